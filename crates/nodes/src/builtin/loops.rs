//! `loop` — run the node's branch once per item of a target collection.
//!
//! The job result is the number of finished iterations; descendants see
//! the current item through `$scopes.<loop node id>`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use db::models::{FlowNodeRow, JobRow, JobStatus};

use crate::traits::{InstructionResult, Outcome, PrevJob, ProcessorContext};
use crate::{Instruction, NodeError};

use super::parse_config;

pub const TYPE: &str = "loop";

#[derive(Debug, Default, Deserialize)]
struct LoopConfig {
    #[serde(default)]
    target: Value,
}

/// Items to iterate: arrays as-is, a count `n` as `0..n` (fractions
/// truncated, negatives empty), null as nothing, anything else as a single
/// item.
pub fn loop_items(target: Value) -> Vec<Value> {
    match target {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::Number(n) => {
            let count = n.as_u64().unwrap_or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .map_or(0, |f| f.trunc() as u64)
            });
            (0..count).map(Value::from).collect()
        }
        other => vec![other],
    }
}

fn target_items(node: &FlowNodeRow, processor: &dyn ProcessorContext) -> Result<Vec<Value>, NodeError> {
    let config: LoopConfig = parse_config(node)?;
    Ok(loop_items(processor.get_parsed_value(&config.target, Some(node))))
}

pub struct LoopInstruction;

#[async_trait]
impl Instruction for LoopInstruction {
    async fn run(
        &self,
        node: &FlowNodeRow,
        _prev: &PrevJob,
        processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        let items = target_items(node, processor)?;
        let body = processor.branches(node).first().map(|b| b.id);
        match body {
            Some(body) if !items.is_empty() => {
                Ok(Some(Outcome::pending(json!(0)).enter_branch(body)))
            }
            _ => Ok(Some(Outcome::resolved(json!(0)))),
        }
    }

    async fn resume(
        &self,
        node: &FlowNodeRow,
        branch_job: &JobRow,
        processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        if branch_job.status.is_pending() {
            return Ok(None);
        }
        let mut job = processor
            .branch_parent_job(branch_job, node)
            .cloned()
            .ok_or_else(|| NodeError::failed(format!("no job found for loop node {}", node.id)))?;

        if branch_job.status != JobStatus::Resolved {
            job.status = branch_job.status;
            return Ok(Some(Outcome::save(job)));
        }

        let looped = job.result.as_u64().unwrap_or(0) + 1;
        job.result = json!(looped);

        let items = target_items(node, processor)?;
        debug!(node_id = node.id, looped, total = items.len(), "loop iteration finished");
        let body = processor.branches(node).first().map(|b| b.id);
        match body {
            Some(body) if (looped as usize) < items.len() => {
                Ok(Some(Outcome::save(job).enter_branch(body)))
            }
            _ => {
                job.status = JobStatus::Resolved;
                Ok(Some(Outcome::save(job)))
            }
        }
    }

    fn get_scope(
        &self,
        node: &FlowNodeRow,
        result: Option<&Value>,
        processor: &dyn ProcessorContext,
    ) -> Option<Value> {
        let items = target_items(node, processor).ok()?;
        let index = result.and_then(Value::as_u64).unwrap_or(0) as usize;
        Some(json!({
            "item": items.get(index).cloned().unwrap_or(Value::Null),
            "index": index,
            "length": items.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_normalize_to_item_lists() {
        assert_eq!(loop_items(json!([1, 2])), vec![json!(1), json!(2)]);
        assert_eq!(loop_items(json!(3)), vec![json!(0), json!(1), json!(2)]);
        assert_eq!(loop_items(json!("x")), vec![json!("x")]);
        assert!(loop_items(Value::Null).is_empty());
    }

    #[test]
    fn float_counts_are_truncated() {
        assert_eq!(loop_items(json!(2.0)), vec![json!(0), json!(1)]);
        assert_eq!(loop_items(json!(2.7)).len(), 2);
        assert!(loop_items(json!(-1)).is_empty());
        assert!(loop_items(json!(-3.5)).is_empty());
    }
}

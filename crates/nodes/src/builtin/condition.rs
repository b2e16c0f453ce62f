//! `condition` — evaluate a templated value and either branch on it or
//! stop the flow when it is false.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use db::models::{FlowNodeRow, JobRow, JobStatus};

use super::{parse_config, truthy};
use crate::traits::{InstructionResult, Outcome, PrevJob, ProcessorContext};
use crate::{Instruction, NodeError};

pub const TYPE: &str = "condition";

/// Branch taken when the value is truthy.
pub const ON_TRUE: i32 = 1;
/// Branch taken when the value is falsy.
pub const ON_FALSE: i32 = 0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionConfig {
    #[serde(default)]
    value: Value,
    /// Without branches, a false value fails the node.
    #[serde(default = "default_reject")]
    reject_on_false: bool,
}

fn default_reject() -> bool {
    true
}

pub struct ConditionInstruction;

#[async_trait]
impl Instruction for ConditionInstruction {
    async fn run(
        &self,
        node: &FlowNodeRow,
        _prev: &PrevJob,
        processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        let config: ConditionConfig = parse_config(node)?;
        let passed = truthy(&processor.get_parsed_value(&config.value, Some(node)));

        let branches = processor.branches(node);
        if branches.is_empty() {
            let status = if passed || !config.reject_on_false {
                JobStatus::Resolved
            } else {
                JobStatus::Failed
            };
            return Ok(Some(Outcome::new(status, Value::Bool(passed))));
        }

        let wanted = if passed { ON_TRUE } else { ON_FALSE };
        let outcome = Outcome::resolved(Value::Bool(passed));
        Ok(Some(
            match branches.iter().find(|b| b.branch_index == Some(wanted)) {
                Some(branch) => outcome.enter_branch(branch.id),
                None => outcome,
            },
        ))
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
            .ok_or_else(|| NodeError::failed(format!("no job found for condition node {}", node.id)))?;
        // A failed branch fails the condition; its own result is kept.
        if branch_job.status != JobStatus::Resolved {
            job.status = branch_job.status;
        }
        Ok(Some(Outcome::save(job)))
    }
}

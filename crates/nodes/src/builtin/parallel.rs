//! `parallel` — run every branch of the node and combine their outcomes.
//!
//! Branches are logically parallel but are driven one after another: `run`
//! enters the first branch, each `resume` records the finished branch and
//! either enters the next one or settles the node.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use db::models::{FlowNodeRow, JobRow, JobStatus};

use super::parse_config;
use crate::traits::{InstructionResult, Outcome, PrevJob, ProcessorContext};
use crate::{Instruction, NodeError};

pub const TYPE: &str = "parallel";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMode {
    /// Resolve when every branch resolves; fail on the first that doesn't.
    #[default]
    All,
    /// Resolve on the first branch that resolves; fail if none does.
    Any,
    /// Settle with whatever the first finished branch produced.
    Race,
}

#[derive(Debug, Default, Deserialize)]
struct ParallelConfig {
    #[serde(default)]
    mode: ParallelMode,
}

/// What to do after a branch finished.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Settle(JobStatus),
    Enter(usize),
}

fn decide(mode: ParallelMode, finished: usize, status: JobStatus, total: usize) -> Next {
    let more = finished + 1 < total;
    match mode {
        ParallelMode::Race => Next::Settle(status),
        ParallelMode::All if status != JobStatus::Resolved => Next::Settle(status),
        ParallelMode::Any if status == JobStatus::Resolved => Next::Settle(status),
        _ if more => Next::Enter(finished + 1),
        ParallelMode::All => Next::Settle(JobStatus::Resolved),
        ParallelMode::Any => Next::Settle(JobStatus::Failed),
    }
}

pub struct ParallelInstruction;

#[async_trait]
impl Instruction for ParallelInstruction {
    async fn run(
        &self,
        node: &FlowNodeRow,
        _prev: &PrevJob,
        processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        let _: ParallelConfig = parse_config(node)?;
        let branches = processor.branches(node);
        let Some(first) = branches.first() else {
            return Ok(Some(Outcome::resolved(Value::Array(Vec::new()))));
        };
        let statuses = vec![Value::Null; branches.len()];
        Ok(Some(
            Outcome::pending(Value::Array(statuses)).enter_branch(first.id),
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
        let config: ParallelConfig = parse_config(node)?;
        let mut job = processor
            .branch_parent_job(branch_job, node)
            .cloned()
            .ok_or_else(|| NodeError::failed(format!("no job found for parallel node {}", node.id)))?;

        let branches = processor.branches(node);
        let finished_node = processor
            .node(branch_job.node_id)
            .and_then(|n| processor.branch_start(n, Some(node)))
            .ok_or_else(|| NodeError::failed("finished job is not inside a branch of this node"))?;
        let position = branches
            .iter()
            .position(|b| b.id == finished_node.id)
            .ok_or_else(|| NodeError::failed("finished branch not found"))?;

        let mut statuses = match job.result.take() {
            Value::Array(items) => items,
            _ => vec![Value::Null; branches.len()],
        };
        statuses.resize(branches.len(), Value::Null);
        statuses[position] = Value::from(branch_job.status.code());
        job.result = Value::Array(statuses);

        match decide(config.mode, position, branch_job.status, branches.len()) {
            Next::Settle(status) => {
                debug!(node_id = node.id, mode = ?config.mode, status = %status, "parallel settled");
                job.status = status;
                Ok(Some(Outcome::save(job)))
            }
            Next::Enter(next) => Ok(Some(Outcome::save(job).enter_branch(branches[next].id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_mode_fails_fast_and_resolves_at_the_end() {
        assert_eq!(decide(ParallelMode::All, 0, JobStatus::Resolved, 2), Next::Enter(1));
        assert_eq!(
            decide(ParallelMode::All, 0, JobStatus::Error, 2),
            Next::Settle(JobStatus::Error)
        );
        assert_eq!(
            decide(ParallelMode::All, 1, JobStatus::Resolved, 2),
            Next::Settle(JobStatus::Resolved)
        );
    }

    #[test]
    fn any_mode_resolves_on_first_success() {
        assert_eq!(decide(ParallelMode::Any, 0, JobStatus::Failed, 3), Next::Enter(1));
        assert_eq!(
            decide(ParallelMode::Any, 1, JobStatus::Resolved, 3),
            Next::Settle(JobStatus::Resolved)
        );
        assert_eq!(
            decide(ParallelMode::Any, 2, JobStatus::Failed, 3),
            Next::Settle(JobStatus::Failed)
        );
    }

    #[test]
    fn race_mode_takes_the_first_outcome() {
        assert_eq!(
            decide(ParallelMode::Race, 0, JobStatus::Rejected, 3),
            Next::Settle(JobStatus::Rejected)
        );
    }
}

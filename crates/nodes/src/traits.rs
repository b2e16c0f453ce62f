//! The `Instruction` trait — the contract every node type must fulfil.

use async_trait::async_trait;
use serde_json::Value;

use db::models::{ExecutionRow, FlowNodeRow, JobPatch, JobRow, JobStatus};

use crate::NodeError;

/// The job handed to an instruction when its node is reached.
///
/// The root node of a flow receives a synthetic, never persisted `Seed`
/// whose result is the execution context, so every instruction can read
/// "the previous result" the same way.
#[derive(Debug, Clone, PartialEq)]
pub enum PrevJob {
    Seed(Value),
    Saved(JobRow),
}

impl PrevJob {
    pub fn result(&self) -> &Value {
        match self {
            Self::Seed(result) => result,
            Self::Saved(job) => &job.result,
        }
    }

    pub fn saved(&self) -> Option<&JobRow> {
        match self {
            Self::Seed(_) => None,
            Self::Saved(job) => Some(job),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.saved().map(|job| job.id)
    }
}

/// How the job produced by an instruction is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Insert a fresh job for the node, linked to the previous job.
    New { status: JobStatus, result: Value },
    /// Write back an already persisted job that the instruction modified.
    Save(JobRow),
    /// Update selected fields of the job with this id.
    Patch { id: i64, patch: JobPatch },
}

/// What an instruction returns: the job to persist and, optionally, the
/// entry node of a branch to run next with the saved job as its input.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub job: JobOutcome,
    pub enter: Option<i64>,
}

impl Outcome {
    pub fn new(status: JobStatus, result: Value) -> Self {
        Self {
            job: JobOutcome::New { status, result },
            enter: None,
        }
    }

    pub fn resolved(result: Value) -> Self {
        Self::new(JobStatus::Resolved, result)
    }

    pub fn pending(result: Value) -> Self {
        Self::new(JobStatus::Pending, result)
    }

    pub fn save(job: JobRow) -> Self {
        Self {
            job: JobOutcome::Save(job),
            enter: None,
        }
    }

    pub fn patch(id: i64, patch: JobPatch) -> Self {
        Self {
            job: JobOutcome::Patch { id, patch },
            enter: None,
        }
    }

    /// Continue into the branch starting at `node_id` once the job is saved.
    pub fn enter_branch(mut self, node_id: i64) -> Self {
        self.enter = Some(node_id);
        self
    }
}

pub type InstructionResult = Result<Option<Outcome>, NodeError>;

/// The processor as seen from inside an instruction.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// instructions can use it without a circular dependency. All lookups read
/// the processor's caches for the current call, including jobs saved
/// earlier in the same call.
pub trait ProcessorContext: Send + Sync {
    fn execution(&self) -> &ExecutionRow;

    fn node(&self, id: i64) -> Option<&FlowNodeRow>;

    /// Branch entry nodes spawned by `node`, ordered by branch index.
    fn branches(&self, node: &FlowNodeRow) -> Vec<&FlowNodeRow>;

    /// The node that spawned the branch `node` is on; `None` on the main flow.
    fn branch_parent(&self, node: &FlowNodeRow) -> Option<&FlowNodeRow>;

    /// First node of the branch containing `node`; with `parent`, the first
    /// node of the branch of `parent` that contains `node`.
    fn branch_start(&self, node: &FlowNodeRow, parent: Option<&FlowNodeRow>)
        -> Option<&FlowNodeRow>;

    /// Last node of the chain that `node` is on.
    fn branch_end(&self, node: &FlowNodeRow) -> Option<&FlowNodeRow>;

    fn job(&self, id: i64) -> Option<&JobRow>;

    /// Jobs recorded for a node, oldest first.
    fn jobs_for_node(&self, node_id: i64) -> Vec<&JobRow>;

    /// Follow `job`'s upstream links back to the job of `node`.
    fn branch_parent_job(&self, job: &JobRow, node: &FlowNodeRow) -> Option<&JobRow>;

    /// Most recent job inside the branch that starts at `node`.
    fn branch_last_job(&self, node: &FlowNodeRow) -> Option<&JobRow>;

    /// JSON view of the variable scope visible at `node`.
    fn get_scope(&self, node: Option<&FlowNodeRow>) -> Value;

    /// Render a templated config value against the scope visible at `node`.
    fn get_parsed_value(&self, value: &Value, node: Option<&FlowNodeRow>) -> Value;
}

/// Behaviour of one node type.
///
/// Instructions must not mutate nodes; they talk to the engine only through
/// the returned [`Outcome`] and the [`ProcessorContext`].
#[async_trait]
pub trait Instruction: Send + Sync {
    /// Called the first time `node` is reached. `Ok(None)` means there is
    /// nothing to record yet and stops the traversal.
    async fn run(
        &self,
        node: &FlowNodeRow,
        prev: &PrevJob,
        processor: &dyn ProcessorContext,
    ) -> InstructionResult;

    /// Called when control returns to `node`: either a branch it spawned has
    /// finished (`job` is that branch's last job) or its own pending job is
    /// being resumed.
    async fn resume(
        &self,
        _node: &FlowNodeRow,
        _job: &JobRow,
        _processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        Err(NodeError::Unsupported("resume"))
    }

    /// Extra variables this node exposes to the nodes of its branches.
    fn get_scope(
        &self,
        _node: &FlowNodeRow,
        _result: Option<&Value>,
        _processor: &dyn ProcessorContext,
    ) -> Option<Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_outcomes_compare_by_content() {
        let patch = JobPatch {
            status: Some(JobStatus::Resolved),
            result: Some(json!("ok")),
        };
        assert_eq!(Outcome::patch(3, patch.clone()), Outcome::patch(3, patch.clone()));
        assert_ne!(Outcome::patch(3, patch), Outcome::patch(3, JobPatch::default()));
        assert_eq!(
            Outcome::resolved(json!(1)).enter_branch(7).enter,
            Some(7)
        );
    }
}

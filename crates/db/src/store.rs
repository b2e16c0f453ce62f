//! Storage contracts shared by the Postgres and in-memory backends.
//!
//! [`Repository`] holds the row operations. They run either directly
//! against a [`Database`] or inside a [`Transaction`] obtained from it;
//! callers that do not care which hold a `&dyn Repository`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DbResult;
use crate::models::{
    ExecutionRow, ExecutionStatus, FlowNodeRow, JobPatch, JobRow, NewExecution, NewFlowNode,
    NewJob, NewWorkflow, WorkflowRow,
};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_workflow(&self, workflow: NewWorkflow) -> DbResult<WorkflowRow>;

    async fn get_workflow(&self, id: i64) -> DbResult<WorkflowRow>;

    async fn list_workflows(&self) -> DbResult<Vec<WorkflowRow>>;

    async fn create_node(&self, node: NewFlowNode) -> DbResult<FlowNodeRow>;

    /// Point `node_id` at a new downstream node (or clear it).
    async fn set_downstream(&self, node_id: i64, downstream_id: Option<i64>) -> DbResult<()>;

    /// All nodes of one workflow version, ordered by id.
    async fn list_nodes(&self, workflow_id: i64) -> DbResult<Vec<FlowNodeRow>>;

    async fn create_execution(&self, execution: NewExecution) -> DbResult<ExecutionRow>;

    /// Fetch an execution. With `for_update` the row stays locked until the
    /// surrounding transaction finishes (no-op outside a transaction).
    async fn get_execution(&self, id: i64, for_update: bool) -> DbResult<ExecutionRow>;

    /// Executions of one workflow version, newest first.
    async fn list_executions(&self, workflow_id: i64) -> DbResult<Vec<ExecutionRow>>;

    /// Set the status of a still-`Started` execution.
    ///
    /// Returns `false` when the execution had already left `Started`, in
    /// which case nothing is written.
    async fn finish_execution(&self, id: i64, status: ExecutionStatus) -> DbResult<bool>;

    /// All jobs of one execution, ordered by id.
    async fn list_jobs(&self, execution_id: i64) -> DbResult<Vec<JobRow>>;

    async fn get_job(&self, id: i64) -> DbResult<JobRow>;

    async fn insert_job(&self, job: NewJob) -> DbResult<JobRow>;

    async fn update_job(&self, id: i64, patch: JobPatch) -> DbResult<JobRow>;

    /// Write back every mutable column of an already persisted job.
    async fn save_job(&self, job: &JobRow) -> DbResult<JobRow>;
}

/// A store that can hand out transactions.
#[async_trait]
pub trait Database: Repository {
    async fn begin(&self) -> DbResult<Arc<dyn Transaction>>;

    fn as_repository(&self) -> &dyn Repository;
}

/// An open unit of work. Operations after `commit`/`rollback` fail with
/// [`crate::DbError::TransactionFinished`].
#[async_trait]
pub trait Transaction: Repository {
    fn is_finished(&self) -> bool;

    async fn commit(&self) -> DbResult<()>;

    async fn rollback(&self) -> DbResult<()>;

    fn as_repository(&self) -> &dyn Repository;
}

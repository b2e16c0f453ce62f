//! [`Database`] implementation over a Postgres pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Postgres;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::models::{
    ExecutionRow, ExecutionStatus, FlowNodeRow, JobPatch, JobRow, NewExecution, NewFlowNode,
    NewJob, NewWorkflow, WorkflowRow,
};
use crate::pool::DbPool;
use crate::repository::{executions, jobs, nodes, workflows};
use crate::store::{Database, Repository, Transaction};

#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: DbPool,
}

impl PgDatabase {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PgDatabase {
    async fn create_workflow(&self, workflow: NewWorkflow) -> DbResult<WorkflowRow> {
        workflows::create_workflow(&self.pool, &workflow).await
    }

    async fn get_workflow(&self, id: i64) -> DbResult<WorkflowRow> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn list_workflows(&self) -> DbResult<Vec<WorkflowRow>> {
        workflows::list_workflows(&self.pool).await
    }

    async fn create_node(&self, node: NewFlowNode) -> DbResult<FlowNodeRow> {
        nodes::create_node(&self.pool, &node).await
    }

    async fn set_downstream(&self, node_id: i64, downstream_id: Option<i64>) -> DbResult<()> {
        nodes::set_downstream(&self.pool, node_id, downstream_id).await
    }

    async fn list_nodes(&self, workflow_id: i64) -> DbResult<Vec<FlowNodeRow>> {
        nodes::list_nodes(&self.pool, workflow_id).await
    }

    async fn create_execution(&self, execution: NewExecution) -> DbResult<ExecutionRow> {
        executions::create_execution(&self.pool, &execution).await
    }

    async fn get_execution(&self, id: i64, _for_update: bool) -> DbResult<ExecutionRow> {
        // A row lock outside a transaction would be released immediately.
        executions::get_execution(&self.pool, id, false).await
    }

    async fn list_executions(&self, workflow_id: i64) -> DbResult<Vec<ExecutionRow>> {
        executions::list_executions(&self.pool, workflow_id).await
    }

    async fn finish_execution(&self, id: i64, status: ExecutionStatus) -> DbResult<bool> {
        executions::finish_execution(&self.pool, id, status).await
    }

    async fn list_jobs(&self, execution_id: i64) -> DbResult<Vec<JobRow>> {
        jobs::list_jobs(&self.pool, execution_id).await
    }

    async fn get_job(&self, id: i64) -> DbResult<JobRow> {
        jobs::get_job(&self.pool, id).await
    }

    async fn insert_job(&self, job: NewJob) -> DbResult<JobRow> {
        jobs::insert_job(&self.pool, &job).await
    }

    async fn update_job(&self, id: i64, patch: JobPatch) -> DbResult<JobRow> {
        jobs::update_job(&self.pool, id, &patch).await
    }

    async fn save_job(&self, job: &JobRow) -> DbResult<JobRow> {
        jobs::save_job(&self.pool, job).await
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> DbResult<Arc<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        debug!("transaction opened");
        Ok(Arc::new(PgTransaction {
            inner: Mutex::new(Some(tx)),
            finished: AtomicBool::new(false),
        }))
    }

    fn as_repository(&self) -> &dyn Repository {
        self
    }
}

/// A pooled Postgres transaction shared behind `&self`.
pub struct PgTransaction {
    inner: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
    finished: AtomicBool,
}

impl PgTransaction {
    async fn take(&self) -> DbResult<sqlx::Transaction<'static, Postgres>> {
        let tx = self.inner.lock().await.take().ok_or(DbError::TransactionFinished)?;
        self.finished.store(true, Ordering::SeqCst);
        Ok(tx)
    }
}

/// Runs a repository function on the connection of the open transaction.
macro_rules! on_tx {
    ($self:ident, $call:path $(, $arg:expr)*) => {{
        let mut guard = $self.inner.lock().await;
        let tx = guard.as_mut().ok_or(DbError::TransactionFinished)?;
        $call(&mut **tx $(, $arg)*).await
    }};
}

#[async_trait]
impl Repository for PgTransaction {
    async fn create_workflow(&self, workflow: NewWorkflow) -> DbResult<WorkflowRow> {
        on_tx!(self, workflows::create_workflow, &workflow)
    }

    async fn get_workflow(&self, id: i64) -> DbResult<WorkflowRow> {
        on_tx!(self, workflows::get_workflow, id)
    }

    async fn list_workflows(&self) -> DbResult<Vec<WorkflowRow>> {
        on_tx!(self, workflows::list_workflows)
    }

    async fn create_node(&self, node: NewFlowNode) -> DbResult<FlowNodeRow> {
        on_tx!(self, nodes::create_node, &node)
    }

    async fn set_downstream(&self, node_id: i64, downstream_id: Option<i64>) -> DbResult<()> {
        on_tx!(self, nodes::set_downstream, node_id, downstream_id)
    }

    async fn list_nodes(&self, workflow_id: i64) -> DbResult<Vec<FlowNodeRow>> {
        on_tx!(self, nodes::list_nodes, workflow_id)
    }

    async fn create_execution(&self, execution: NewExecution) -> DbResult<ExecutionRow> {
        on_tx!(self, executions::create_execution, &execution)
    }

    async fn get_execution(&self, id: i64, for_update: bool) -> DbResult<ExecutionRow> {
        on_tx!(self, executions::get_execution, id, for_update)
    }

    async fn list_executions(&self, workflow_id: i64) -> DbResult<Vec<ExecutionRow>> {
        on_tx!(self, executions::list_executions, workflow_id)
    }

    async fn finish_execution(&self, id: i64, status: ExecutionStatus) -> DbResult<bool> {
        on_tx!(self, executions::finish_execution, id, status)
    }

    async fn list_jobs(&self, execution_id: i64) -> DbResult<Vec<JobRow>> {
        on_tx!(self, jobs::list_jobs, execution_id)
    }

    async fn get_job(&self, id: i64) -> DbResult<JobRow> {
        on_tx!(self, jobs::get_job, id)
    }

    async fn insert_job(&self, job: NewJob) -> DbResult<JobRow> {
        on_tx!(self, jobs::insert_job, &job)
    }

    async fn update_job(&self, id: i64, patch: JobPatch) -> DbResult<JobRow> {
        on_tx!(self, jobs::update_job, id, &patch)
    }

    async fn save_job(&self, job: &JobRow) -> DbResult<JobRow> {
        on_tx!(self, jobs::save_job, job)
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    async fn commit(&self) -> DbResult<()> {
        self.take().await?.commit().await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        self.take().await?.rollback().await?;
        debug!("transaction rolled back");
        Ok(())
    }

    fn as_repository(&self) -> &dyn Repository {
        self
    }
}

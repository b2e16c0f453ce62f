//! In-process transactional store.
//!
//! Used by tests and by `flowline run`. Every change is expressed as a
//! [`Write`] of whole rows. Outside a transaction a write lands in the shared
//! tables at once; inside one it lands in a private snapshot and is logged,
//! and `commit` replays the log onto the shared tables under one lock.
//! Ids come from a counter shared by the database and its transactions, so
//! rows written concurrently never collide. Conflicting writes to the same
//! row resolve row by row, last commit wins; finishing an execution stays
//! conditional on it still being started.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{DbError, DbResult};
use crate::models::{
    ExecutionRow, ExecutionStatus, FlowNodeRow, JobPatch, JobRow, NewExecution, NewFlowNode,
    NewJob, NewWorkflow, WorkflowRow,
};
use crate::store::{Database, Repository, Transaction};

#[derive(Debug, Clone, Default)]
struct Tables {
    workflows: BTreeMap<i64, WorkflowRow>,
    nodes: BTreeMap<i64, FlowNodeRow>,
    executions: BTreeMap<i64, ExecutionRow>,
    jobs: BTreeMap<i64, JobRow>,
}

/// One row-level change.
#[derive(Debug, Clone)]
enum Write {
    /// Insert a workflow version and demote the other versions of its key.
    Workflow(WorkflowRow),
    Node(FlowNodeRow),
    Execution(ExecutionRow),
    /// Move a started execution to a terminal status.
    Finish { id: i64, status: ExecutionStatus },
    Job(JobRow),
}

impl Tables {
    fn apply(&mut self, write: Write) {
        match write {
            Write::Workflow(row) => {
                for existing in self.workflows.values_mut() {
                    if existing.key == row.key {
                        existing.current = false;
                    }
                }
                self.workflows.insert(row.id, row);
            }
            Write::Node(row) => {
                self.nodes.insert(row.id, row);
            }
            Write::Execution(row) => {
                self.executions.insert(row.id, row);
            }
            Write::Finish { id, status } => {
                if let Some(row) = self.executions.get_mut(&id) {
                    if !row.status.is_terminal() {
                        row.status = status;
                        row.updated_at = Utc::now();
                    }
                }
            }
            Write::Job(row) => {
                self.jobs.insert(row.id, row);
            }
        }
    }

    fn job(&self, id: i64) -> DbResult<JobRow> {
        self.jobs.get(&id).cloned().ok_or(DbError::NotFound)
    }
}

fn workflow_row(id: i64, workflow: NewWorkflow) -> WorkflowRow {
    WorkflowRow {
        id,
        key: workflow.key,
        title: workflow.title,
        enabled: workflow.enabled,
        current: true,
        trigger_type: workflow.trigger_type,
        config: workflow.config,
        created_at: Utc::now(),
    }
}

fn node_row(id: i64, node: NewFlowNode) -> FlowNodeRow {
    FlowNodeRow {
        id,
        workflow_id: node.workflow_id,
        title: node.title,
        node_type: node.node_type,
        config: node.config,
        upstream_id: node.upstream_id,
        downstream_id: node.downstream_id,
        branch_index: node.branch_index,
    }
}

fn execution_row(id: i64, execution: NewExecution) -> ExecutionRow {
    let now = Utc::now();
    ExecutionRow {
        id,
        workflow_id: execution.workflow_id,
        key: execution.key,
        context: execution.context,
        status: ExecutionStatus::Started,
        use_transaction: execution.use_transaction,
        created_at: now,
        updated_at: now,
    }
}

fn job_row(id: i64, job: NewJob) -> JobRow {
    let now = Utc::now();
    JobRow {
        id,
        execution_id: job.execution_id,
        node_id: job.node_id,
        upstream_id: job.upstream_id,
        status: job.status,
        result: job.result,
        created_at: now,
        updated_at: now,
    }
}

/// Implements [`Repository`] for a type with `read`, `write` and `next_id`.
macro_rules! impl_repository {
    ($ty:ty) => {
        #[async_trait]
        impl Repository for $ty {
            async fn create_workflow(&self, workflow: NewWorkflow) -> DbResult<WorkflowRow> {
                let row = workflow_row(self.next_id(), workflow);
                self.write(|_| Ok((Some(Write::Workflow(row.clone())), row)))
            }

            async fn get_workflow(&self, id: i64) -> DbResult<WorkflowRow> {
                self.read(|t| t.workflows.get(&id).cloned().ok_or(DbError::NotFound))
            }

            async fn list_workflows(&self) -> DbResult<Vec<WorkflowRow>> {
                self.read(|t| Ok(t.workflows.values().rev().cloned().collect()))
            }

            async fn create_node(&self, node: NewFlowNode) -> DbResult<FlowNodeRow> {
                let row = node_row(self.next_id(), node);
                self.write(|_| Ok((Some(Write::Node(row.clone())), row)))
            }

            async fn set_downstream(&self, node_id: i64, downstream_id: Option<i64>) -> DbResult<()> {
                self.write(|t| {
                    let mut node = t.nodes.get(&node_id).cloned().ok_or(DbError::NotFound)?;
                    node.downstream_id = downstream_id;
                    Ok((Some(Write::Node(node)), ()))
                })
            }

            async fn list_nodes(&self, workflow_id: i64) -> DbResult<Vec<FlowNodeRow>> {
                self.read(|t| {
                    Ok(t.nodes
                        .values()
                        .filter(|n| n.workflow_id == workflow_id)
                        .cloned()
                        .collect())
                })
            }

            async fn create_execution(&self, execution: NewExecution) -> DbResult<ExecutionRow> {
                let row = execution_row(self.next_id(), execution);
                self.write(|_| Ok((Some(Write::Execution(row.clone())), row)))
            }

            async fn get_execution(&self, id: i64, _for_update: bool) -> DbResult<ExecutionRow> {
                self.read(|t| t.executions.get(&id).cloned().ok_or(DbError::NotFound))
            }

            async fn list_executions(&self, workflow_id: i64) -> DbResult<Vec<ExecutionRow>> {
                self.read(|t| {
                    Ok(t.executions
                        .values()
                        .rev()
                        .filter(|e| e.workflow_id == workflow_id)
                        .cloned()
                        .collect())
                })
            }

            async fn finish_execution(&self, id: i64, status: ExecutionStatus) -> DbResult<bool> {
                self.write(|t| {
                    let row = t.executions.get(&id).ok_or(DbError::NotFound)?;
                    if row.status.is_terminal() {
                        return Ok((None, false));
                    }
                    Ok((Some(Write::Finish { id, status }), true))
                })
            }

            async fn list_jobs(&self, execution_id: i64) -> DbResult<Vec<JobRow>> {
                self.read(|t| {
                    Ok(t.jobs
                        .values()
                        .filter(|j| j.execution_id == execution_id)
                        .cloned()
                        .collect())
                })
            }

            async fn get_job(&self, id: i64) -> DbResult<JobRow> {
                self.read(|t| t.job(id))
            }

            async fn insert_job(&self, job: NewJob) -> DbResult<JobRow> {
                let row = job_row(self.next_id(), job);
                self.write(|_| Ok((Some(Write::Job(row.clone())), row)))
            }

            async fn update_job(&self, id: i64, patch: JobPatch) -> DbResult<JobRow> {
                self.write(|t| {
                    let mut row = t.job(id)?;
                    if let Some(status) = patch.status {
                        row.status = status;
                    }
                    if let Some(result) = patch.result {
                        row.result = result;
                    }
                    row.updated_at = Utc::now();
                    Ok((Some(Write::Job(row.clone())), row))
                })
            }

            async fn save_job(&self, job: &JobRow) -> DbResult<JobRow> {
                self.write(|t| {
                    let mut row = t.job(job.id)?;
                    row.upstream_id = job.upstream_id;
                    row.status = job.status;
                    row.result = job.result.clone();
                    row.updated_at = Utc::now();
                    Ok((Some(Write::Job(row.clone())), row))
                })
            }
        }
    };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A change computed from the current tables, plus what the caller gets
/// back.
type Change<T> = DbResult<(Option<Write>, T)>;

/// Shared in-memory database. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
    ids: Arc<AtomicI64>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert nodes verbatim, keeping their ids. Used to load authored
    /// graphs whose links already reference each other by id.
    pub fn seed_nodes(&self, nodes: Vec<FlowNodeRow>) {
        let mut tables = lock(&self.tables);
        for node in nodes {
            self.ids.fetch_max(node.id, Ordering::SeqCst);
            tables.nodes.insert(node.id, node);
        }
    }

    fn next_id(&self) -> i64 {
        self.ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> DbResult<T>) -> DbResult<T> {
        f(&lock(&self.tables))
    }

    fn write<T>(&self, f: impl FnOnce(&Tables) -> Change<T>) -> DbResult<T> {
        let mut tables = lock(&self.tables);
        let (write, value) = f(&tables)?;
        if let Some(write) = write {
            tables.apply(write);
        }
        Ok(value)
    }
}

impl_repository!(MemoryDatabase);

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> DbResult<Arc<dyn Transaction>> {
        let snapshot = lock(&self.tables).clone();
        Ok(Arc::new(MemoryTransaction {
            shared: Arc::clone(&self.tables),
            ids: Arc::clone(&self.ids),
            staged: Mutex::new(Some(Staged {
                tables: snapshot,
                log: Vec::new(),
            })),
            finished: AtomicBool::new(false),
        }))
    }

    fn as_repository(&self) -> &dyn Repository {
        self
    }
}

/// Snapshot taken at `begin` with the transaction's own writes applied,
/// and those writes in order.
#[derive(Debug)]
struct Staged {
    tables: Tables,
    log: Vec<Write>,
}

pub struct MemoryTransaction {
    shared: Arc<Mutex<Tables>>,
    ids: Arc<AtomicI64>,
    staged: Mutex<Option<Staged>>,
    finished: AtomicBool,
}

impl MemoryTransaction {
    fn next_id(&self) -> i64 {
        self.ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> DbResult<T>) -> DbResult<T> {
        let staged = lock(&self.staged);
        let staged = staged.as_ref().ok_or(DbError::TransactionFinished)?;
        f(&staged.tables)
    }

    fn write<T>(&self, f: impl FnOnce(&Tables) -> Change<T>) -> DbResult<T> {
        let mut staged = lock(&self.staged);
        let staged = staged.as_mut().ok_or(DbError::TransactionFinished)?;
        let (write, value) = f(&staged.tables)?;
        if let Some(write) = write {
            staged.tables.apply(write.clone());
            staged.log.push(write);
        }
        Ok(value)
    }
}

impl_repository!(MemoryTransaction);

#[async_trait]
impl Transaction for MemoryTransaction {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    async fn commit(&self) -> DbResult<()> {
        let staged = lock(&self.staged)
            .take()
            .ok_or(DbError::TransactionFinished)?;
        let mut shared = lock(&self.shared);
        for write in staged.log {
            shared.apply(write);
        }
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        lock(&self.staged)
            .take()
            .ok_or(DbError::TransactionFinished)?;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn as_repository(&self) -> &dyn Repository {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn new_execution(workflow_id: i64) -> NewExecution {
        NewExecution {
            workflow_id,
            key: Uuid::new_v4(),
            context: json!({ "data": 1 }),
            use_transaction: true,
        }
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let db = MemoryDatabase::new();
        let tx = db.begin().await.unwrap();
        let execution = tx.create_execution(new_execution(1)).await.unwrap();

        assert!(matches!(db.get_execution(execution.id, false).await, Err(DbError::NotFound)));

        tx.commit().await.unwrap();
        assert!(tx.is_finished());
        assert_eq!(db.get_execution(execution.id, false).await.unwrap().id, execution.id);
    }

    #[tokio::test]
    async fn rolled_back_writes_are_discarded() {
        let db = MemoryDatabase::new();
        let tx = db.begin().await.unwrap();
        let execution = tx.create_execution(new_execution(1)).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(db.get_execution(execution.id, false).await.is_err());
        assert!(matches!(
            tx.list_jobs(execution.id).await,
            Err(DbError::TransactionFinished)
        ));
    }

    #[tokio::test]
    async fn finished_executions_are_never_revised() {
        let db = MemoryDatabase::new();
        let execution = db.create_execution(new_execution(1)).await.unwrap();

        assert!(db.finish_execution(execution.id, ExecutionStatus::Failed).await.unwrap());
        assert!(!db.finish_execution(execution.id, ExecutionStatus::Resolved).await.unwrap());
        assert_eq!(
            db.get_execution(execution.id, false).await.unwrap().status,
            ExecutionStatus::Failed
        );
    }

    #[tokio::test]
    async fn job_patch_only_touches_given_fields() {
        let db = MemoryDatabase::new();
        let job = db
            .insert_job(NewJob {
                execution_id: 1,
                node_id: 2,
                upstream_id: None,
                status: crate::models::JobStatus::Pending,
                result: json!({ "a": 1 }),
            })
            .await
            .unwrap();

        let patched = db
            .update_job(job.id, JobPatch { status: Some(crate::models::JobStatus::Resolved), result: None })
            .await
            .unwrap();
        assert_eq!(patched.status, crate::models::JobStatus::Resolved);
        assert_eq!(patched.result, json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn new_workflow_version_takes_over_current() {
        let db = MemoryDatabase::new();
        let key = Uuid::new_v4();
        let v1 = db
            .create_workflow(NewWorkflow {
                key,
                title: "v1".into(),
                enabled: true,
                trigger_type: "manual".into(),
                config: json!({}),
            })
            .await
            .unwrap();
        db.create_workflow(NewWorkflow {
            key,
            title: "v2".into(),
            enabled: true,
            trigger_type: "manual".into(),
            config: json!({}),
        })
        .await
        .unwrap();

        assert!(!db.get_workflow(v1.id).await.unwrap().current);
    }

    #[tokio::test]
    async fn commit_keeps_rows_written_outside_the_transaction() {
        let db = MemoryDatabase::new();
        let tx = db.begin().await.unwrap();

        let outside = db.create_execution(new_execution(1)).await.unwrap();
        let inside = tx.create_execution(new_execution(1)).await.unwrap();
        assert_ne!(outside.id, inside.id);
        // The snapshot does not see rows written after `begin`.
        assert!(matches!(tx.get_execution(outside.id, false).await, Err(DbError::NotFound)));

        tx.commit().await.unwrap();

        let ids: Vec<i64> = db.list_executions(1).await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![inside.id, outside.id]);
        assert_eq!(db.get_execution(outside.id, false).await.unwrap().context, json!({ "data": 1 }));
    }

    #[tokio::test]
    async fn replayed_finish_does_not_revise_an_ended_execution() {
        let db = MemoryDatabase::new();
        let execution = db.create_execution(new_execution(1)).await.unwrap();

        let tx = db.begin().await.unwrap();
        assert!(tx.finish_execution(execution.id, ExecutionStatus::Resolved).await.unwrap());
        assert!(db.finish_execution(execution.id, ExecutionStatus::Canceled).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(
            db.get_execution(execution.id, false).await.unwrap().status,
            ExecutionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn interleaved_transactions_both_land() {
        let db = MemoryDatabase::new();
        let first = db.begin().await.unwrap();
        let second = db.begin().await.unwrap();

        let a = first.create_execution(new_execution(1)).await.unwrap();
        let b = second.create_execution(new_execution(1)).await.unwrap();
        let job = second
            .insert_job(NewJob {
                execution_id: b.id,
                node_id: 9,
                upstream_id: None,
                status: crate::models::JobStatus::Resolved,
                result: json!(null),
            })
            .await
            .unwrap();
        second.commit().await.unwrap();
        first.commit().await.unwrap();

        assert!(db.get_execution(a.id, false).await.is_ok());
        assert!(db.get_execution(b.id, false).await.is_ok());
        assert_eq!(db.get_job(job.id).await.unwrap().execution_id, b.id);
    }
}

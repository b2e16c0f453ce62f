//! The processor drives one execution through its workflow graph.
//!
//! One `Processor` handles one call (`start` or `resume`):
//! 1. Reloads the execution, its nodes and its jobs (`prepare`).
//! 2. Walks the graph as a trampoline of [`Step`]s: run a node, follow the
//!    downstream link while jobs resolve, hand finished branches back to the
//!    node that spawned them.
//! 3. Stops when a node produces no job or stays pending, or finishes the
//!    execution when the main chain ends.
//! 4. Commits the transaction it opened; a borrowed one is left alone.
//!
//! Instruction failures do not abort the call: they are recorded as `Error`
//! jobs and control unwinds through the normal end-of-branch path.

use std::error::Error as StdError;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

use db::models::{ExecutionRow, ExecutionStatus, FlowNodeRow, JobRow, JobStatus};
use db::{DbResult, Repository, Transaction};
use nodes::{Instruction, JobOutcome, NodeError, Outcome, PrevJob, ProcessorContext};

use crate::functions::FunctionContext;
use crate::graph::FlowGraph;
use crate::jobs::{write_job, JobCache};
use crate::runtime::Engine;
use crate::scope::Scope;
use crate::{template, EngineError};

/// Per-call options.
#[derive(Clone, Default)]
pub struct ProcessorOptions {
    /// Run inside this transaction instead of opening one. The caller stays
    /// responsible for committing it.
    pub transaction: Option<Arc<dyn Transaction>>,
}

/// One unit of traversal work.
enum Step {
    /// Invoke `run` of a node with the job that led to it.
    Run { node_id: i64, prev: PrevJob },
    /// Invoke `resume` of a node with a job that finished (or was updated)
    /// below it.
    Recall { node_id: i64, job: JobRow },
    Halt,
}

enum Invocation {
    Run(PrevJob),
    Resume(JobRow),
}

impl Invocation {
    fn saved(&self) -> Option<&JobRow> {
        match self {
            Self::Run(prev) => prev.saved(),
            Self::Resume(job) => Some(job),
        }
    }

    fn method(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Resume(_) => "resume",
        }
    }
}

pub struct Processor {
    engine: Arc<Engine>,
    execution: ExecutionRow,
    options: ProcessorOptions,
    transaction: Option<Arc<dyn Transaction>>,
    owns_transaction: bool,
    graph: Arc<FlowGraph>,
    jobs: JobCache,
}

impl Processor {
    pub fn new(engine: Arc<Engine>, execution: ExecutionRow, options: ProcessorOptions) -> Self {
        Self {
            engine,
            execution,
            options,
            transaction: None,
            owns_transaction: false,
            graph: Arc::new(FlowGraph::default()),
            jobs: JobCache::default(),
        }
    }

    pub fn execution(&self) -> &ExecutionRow {
        &self.execution
    }

    pub fn into_execution(self) -> ExecutionRow {
        self.execution
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn jobs(&self) -> &JobCache {
        &self.jobs
    }

    /// The connection every read and write of this call goes through.
    fn repo(&self) -> &dyn Repository {
        match &self.transaction {
            Some(transaction) => transaction.as_repository(),
            None => self.engine.database.as_repository(),
        }
    }

    async fn open_transaction(&mut self) -> Result<(), EngineError> {
        if !self.execution.use_transaction || self.transaction.is_some() {
            return Ok(());
        }
        match &self.options.transaction {
            Some(transaction) if !transaction.is_finished() => {
                debug!("using caller transaction");
                self.transaction = Some(Arc::clone(transaction));
                self.owns_transaction = false;
            }
            _ => {
                self.transaction = Some(self.engine.database.begin().await?);
                self.owns_transaction = true;
            }
        }
        Ok(())
    }

    /// Reload the execution (locking it when inside a transaction), the
    /// workflow's nodes and the jobs written so far.
    pub async fn prepare(&mut self) -> Result<(), EngineError> {
        self.open_transaction().await?;

        let locked = self.transaction.is_some();
        self.execution = self.repo().get_execution(self.execution.id, locked).await?;

        let nodes = self.repo().list_nodes(self.execution.workflow_id).await?;
        self.graph = Arc::new(FlowGraph::new(nodes));

        let jobs = self.repo().list_jobs(self.execution.id).await?;
        self.jobs = JobCache::from_jobs(jobs);

        debug!(
            nodes = self.graph.len(),
            jobs = self.jobs.len(),
            "execution prepared"
        );
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), EngineError> {
        if self.execution.status.is_terminal() {
            warn!(
                execution_id = self.execution.id,
                status = %self.execution.status,
                "execution was ended, refusing to continue"
            );
            return Err(EngineError::ExecutionEnded {
                execution_id: self.execution.id,
                status: self.execution.status,
            });
        }
        Ok(())
    }

    /// Run the workflow from its root node.
    ///
    /// # Errors
    /// [`EngineError::ExecutionEnded`] when the execution is not `Started`,
    /// [`EngineError::Configuration`] for an unusable node type, and any
    /// store failure.
    #[instrument(skip(self), fields(execution_id = self.execution.id))]
    pub async fn start(&mut self) -> Result<(), EngineError> {
        self.ensure_started()?;
        let outcome = self.start_inner().await;
        self.finish(outcome).await
    }

    async fn start_inner(&mut self) -> Result<(), EngineError> {
        self.prepare().await?;
        self.ensure_started()?;

        let graph = Arc::clone(&self.graph);
        match graph.root() {
            Some(root) => {
                info!("execution started");
                let prev = PrevJob::Seed(self.execution.context.clone());
                self.drive(Step::Run {
                    node_id: root.id,
                    prev,
                })
                .await
            }
            None => {
                info!("workflow has no nodes");
                self.exit(None).await
            }
        }
    }

    /// Continue the execution at the node of `job`, typically a pending job
    /// whose status was changed by someone outside the engine.
    #[instrument(skip(self, job), fields(execution_id = self.execution.id, job_id = job.id))]
    pub async fn resume(&mut self, job: JobRow) -> Result<(), EngineError> {
        self.ensure_started()?;
        let outcome = self.resume_inner(job).await;
        self.finish(outcome).await
    }

    async fn resume_inner(&mut self, job: JobRow) -> Result<(), EngineError> {
        self.prepare().await?;
        self.ensure_started()?;

        if self.graph.get(job.node_id).is_none() {
            return Err(EngineError::NodeNotFound(job.node_id));
        }
        info!(node_id = job.node_id, "execution resumed");
        self.drive(Step::Recall {
            node_id: job.node_id,
            job,
        })
        .await
    }

    async fn finish(&mut self, outcome: Result<(), EngineError>) -> Result<(), EngineError> {
        match outcome {
            Ok(()) => self.commit().await,
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn commit(&mut self) -> Result<(), EngineError> {
        if !self.owns_transaction {
            return Ok(());
        }
        if let Some(transaction) = self.transaction.take() {
            transaction.commit().await?;
            debug!("transaction committed");
        }
        self.owns_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if !self.owns_transaction {
            return Ok(());
        }
        self.owns_transaction = false;
        match self.transaction.take() {
            Some(transaction) if !transaction.is_finished() => transaction.rollback().await,
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    async fn drive(&mut self, mut step: Step) -> Result<(), EngineError> {
        loop {
            step = match step {
                Step::Run { node_id, prev } => self.run(node_id, prev).await?,
                Step::Recall { node_id, job } => self.recall(node_id, job).await?,
                Step::Halt => return Ok(()),
            };
        }
    }

    async fn run(&mut self, node_id: i64, prev: PrevJob) -> Result<Step, EngineError> {
        let graph = Arc::clone(&self.graph);
        let node = graph.get(node_id).ok_or(EngineError::NodeNotFound(node_id))?;
        let instruction = self.instruction(node)?;
        self.exec(instruction, node, Invocation::Run(prev)).await
    }

    async fn recall(&mut self, node_id: i64, job: JobRow) -> Result<Step, EngineError> {
        let graph = Arc::clone(&self.graph);
        let node = graph.get(node_id).ok_or(EngineError::NodeNotFound(node_id))?;
        let instruction = self.instruction(node)?;
        self.exec(instruction, node, Invocation::Resume(job)).await
    }

    fn instruction(&self, node: &FlowNodeRow) -> Result<Arc<dyn Instruction>, EngineError> {
        self.engine
            .instructions
            .get(&node.node_type)
            .ok_or_else(|| EngineError::Configuration {
                node_id: node.id,
                node_type: node.node_type.clone(),
                reason: "no instruction is registered for this type".into(),
            })
    }

    async fn exec(
        &mut self,
        instruction: Arc<dyn Instruction>,
        node: &FlowNodeRow,
        invocation: Invocation,
    ) -> Result<Step, EngineError> {
        info!(
            node_id = node.id,
            node_type = %node.node_type,
            method = invocation.method(),
            "executing instruction"
        );
        debug!(node_id = node.id, config = %node.config, "config of node");

        let result = match &invocation {
            Invocation::Run(prev) => instruction.run(node, prev, &*self).await,
            Invocation::Resume(job) => instruction.resume(node, job, &*self).await,
        };

        let outcome = match result {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                info!(node_id = node.id, "instruction produced no job, stopping here");
                return Ok(Step::Halt);
            }
            Err(NodeError::Unsupported(method)) => {
                return Err(EngineError::Configuration {
                    node_id: node.id,
                    node_type: node.node_type.clone(),
                    reason: format!("instruction does not support `{method}`"),
                });
            }
            Err(err) => {
                error!(node_id = node.id, error = %err, "instruction failed");
                let result = self.error_result(&err);
                match invocation.saved() {
                    Some(job) if job.node_id == node.id => {
                        let mut job = job.clone();
                        job.status = JobStatus::Error;
                        job.result = result;
                        Outcome::save(job)
                    }
                    _ => Outcome::new(JobStatus::Error, result),
                }
            }
        };

        let upstream_id = invocation.saved().map(|job| job.id);
        let saved = self.save_job(node.id, upstream_id, outcome.job).await?;
        info!(
            node_id = node.id,
            job_id = saved.id,
            status = %saved.status,
            "instruction finished"
        );

        if let Some(entry) = outcome.enter {
            debug!(node_id = node.id, branch = entry, "entering branch");
            return Ok(Step::Run {
                node_id: entry,
                prev: PrevJob::Saved(saved),
            });
        }

        if saved.status == JobStatus::Resolved {
            if let Some(next) = self.graph.downstream(node) {
                return Ok(Step::Run {
                    node_id: next.id,
                    prev: PrevJob::Saved(saved),
                });
            }
        }

        self.end(node, saved).await
    }

    /// The chain `node` is on is done (or stuck): hand control to the node
    /// that spawned the branch, or finish the execution on the main chain.
    async fn end(&mut self, node: &FlowNodeRow, job: JobRow) -> Result<Step, EngineError> {
        let parent = self.graph.branch_parent(node).map(|parent| parent.id);
        match parent {
            Some(parent_id) => {
                debug!(node_id = node.id, parent_id, "branch ended, returning to parent");
                Ok(Step::Recall {
                    node_id: parent_id,
                    job,
                })
            }
            None => {
                self.exit(Some(&job)).await?;
                Ok(Step::Halt)
            }
        }
    }

    /// Settle the execution from its last job. A pending job leaves the
    /// execution `Started`, waiting for a resume.
    async fn exit(&mut self, job: Option<&JobRow>) -> Result<(), EngineError> {
        let status = job.map_or(ExecutionStatus::Resolved, |job| {
            self.engine.config.status_map.execution_status(job.status)
        });

        if !status.is_terminal() {
            info!("execution suspended, waiting to be resumed");
            return Ok(());
        }

        let updated = self.repo().finish_execution(self.execution.id, status).await?;
        if updated {
            info!(status = %status, "execution finished");
        } else {
            warn!(status = %status, "execution had already been ended");
        }
        self.execution.status = status;
        Ok(())
    }

    async fn save_job(
        &mut self,
        node_id: i64,
        upstream_id: Option<i64>,
        outcome: JobOutcome,
    ) -> Result<JobRow, EngineError> {
        let saved = write_job(self.repo(), self.execution.id, node_id, upstream_id, outcome).await?;
        self.jobs.insert(saved.clone());
        Ok(saved)
    }

    fn error_result(&self, err: &NodeError) -> Value {
        let stack: Vec<String> = if self.engine.config.production {
            Vec::new()
        } else {
            let mut chain = vec![format!("{err:?}")];
            let mut source = err.source();
            while let Some(cause) = source {
                chain.push(cause.to_string());
                source = cause.source();
            }
            chain
        };
        json!({ "message": err.to_string(), "stack": stack })
    }

    // -----------------------------------------------------------------------
    // Scope
    // -----------------------------------------------------------------------

    /// Variables visible to `node`: the execution context, every node's
    /// latest result and the scopes of all enclosing branch parents.
    pub fn scope<'a>(&'a self, node: Option<&'a FlowNodeRow>) -> Scope<'a> {
        let mut scopes = Map::new();
        let mut ancestor = node.and_then(|node| self.graph.branch_parent(node));
        while let Some(current) = ancestor {
            if let Some(instruction) = self.engine.instructions.get(&current.node_type) {
                let result = self.jobs.latest(current.id).map(|job| &job.result);
                if let Some(value) = instruction.get_scope(current, result, self) {
                    scopes.insert(current.id.to_string(), value);
                }
            }
            ancestor = self.graph.branch_parent(current);
        }

        Scope::new(
            self.execution.context.clone(),
            self.jobs.results_by_node(),
            scopes,
            &self.engine.functions,
            FunctionContext {
                execution: &self.execution,
                node,
            },
        )
    }

    /// Render a templated value against the scope of `node`.
    pub fn parse_value(&self, value: &Value, node: Option<&FlowNodeRow>) -> Value {
        let template = template::parse(value);
        let mut scope = self.scope(node);
        for parameter in template.parameters() {
            scope.append_array_column(&parameter.key);
        }
        template.render(|key| scope.get(key))
    }
}

impl ProcessorContext for Processor {
    fn execution(&self) -> &ExecutionRow {
        &self.execution
    }

    fn node(&self, id: i64) -> Option<&FlowNodeRow> {
        self.graph.get(id)
    }

    fn branches(&self, node: &FlowNodeRow) -> Vec<&FlowNodeRow> {
        self.graph.branches(node)
    }

    fn branch_parent(&self, node: &FlowNodeRow) -> Option<&FlowNodeRow> {
        self.graph.branch_parent(node)
    }

    fn branch_start(
        &self,
        node: &FlowNodeRow,
        parent: Option<&FlowNodeRow>,
    ) -> Option<&FlowNodeRow> {
        let start = self.graph.branch_start(node, parent)?.id;
        self.graph.get(start)
    }

    fn branch_end(&self, node: &FlowNodeRow) -> Option<&FlowNodeRow> {
        let end = self.graph.branch_end(node).id;
        self.graph.get(end)
    }

    fn job(&self, id: i64) -> Option<&JobRow> {
        self.jobs.get(id)
    }

    fn jobs_for_node(&self, node_id: i64) -> Vec<&JobRow> {
        self.jobs.for_node(node_id)
    }

    fn branch_parent_job(&self, job: &JobRow, node: &FlowNodeRow) -> Option<&JobRow> {
        let mut current = match self.jobs.get(job.id) {
            Some(cached) => cached,
            None => self.jobs.get(job.upstream_id?)?,
        };
        loop {
            if current.node_id == node.id {
                return Some(current);
            }
            current = self.jobs.get(current.upstream_id?)?;
        }
    }

    fn branch_last_job(&self, node: &FlowNodeRow) -> Option<&JobRow> {
        let mut node_ids = vec![node.id];
        let mut current = node;
        while let Some(next) = self.graph.downstream(current) {
            node_ids.push(next.id);
            current = next;
        }
        self.jobs
            .iter()
            .rev()
            .find(|job| node_ids.contains(&job.node_id))
    }

    fn get_scope(&self, node: Option<&FlowNodeRow>) -> Value {
        self.scope(node).to_value()
    }

    fn get_parsed_value(&self, value: &Value, node: Option<&FlowNodeRow>) -> Value {
        self.parse_value(value, node)
    }
}

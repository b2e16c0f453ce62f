//! Process-wide entry points: install and trigger workflows, resume jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use db::models::{ExecutionRow, JobPatch, JobRow, NewExecution, NewFlowNode, WorkflowRow};
use db::{Database, Repository};
use nodes::InstructionRegistry;

use crate::config::EngineConfig;
use crate::functions::SystemFunctions;
use crate::graph::FlowGraph;
use crate::models::{WorkflowDefinition, WorkflowOptions};
use crate::processor::{Processor, ProcessorOptions};
use crate::trigger::{ManualTrigger, Trigger, TriggerRegistry, WebhookTrigger, MANUAL, WEBHOOK};
use crate::EngineError;

/// Everything a processor needs besides the execution itself.
pub struct Engine {
    pub database: Arc<dyn Database>,
    pub instructions: InstructionRegistry,
    pub functions: SystemFunctions,
    pub config: EngineConfig,
}

impl Engine {
    /// Built-in instructions and functions, configuration from the
    /// environment.
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            database,
            instructions: InstructionRegistry::with_builtins(),
            functions: SystemFunctions::with_builtins(),
            config: EngineConfig::from_env(),
        }
    }

    pub fn with_instructions(mut self, instructions: InstructionRegistry) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_functions(mut self, functions: SystemFunctions) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

/// One async lock per execution id, so concurrent `start`/`resume` calls
/// for the same execution run one at a time within this process.
#[derive(Default)]
struct ExecutionLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl ExecutionLocks {
    async fn acquire(&self, execution_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(execution_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget the lock of an execution nobody is waiting on.
    fn release(&self, execution_id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&execution_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&execution_id);
        }
    }
}

pub struct WorkflowRuntime {
    engine: Arc<Engine>,
    triggers: TriggerRegistry,
    webhooks: Arc<WebhookTrigger>,
    locks: ExecutionLocks,
}

impl WorkflowRuntime {
    /// A runtime with the `manual` and `webhook` triggers registered.
    pub fn new(engine: Engine) -> Self {
        let webhooks = Arc::new(WebhookTrigger::new());
        let mut triggers = TriggerRegistry::new();
        triggers
            .register(MANUAL, Arc::new(ManualTrigger))
            .register(WEBHOOK, Arc::clone(&webhooks) as Arc<dyn Trigger>);
        Self {
            engine: Arc::new(engine),
            triggers,
            webhooks,
            locks: ExecutionLocks::default(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn database(&self) -> &dyn Repository {
        self.engine.database.as_repository()
    }

    pub fn webhooks(&self) -> &WebhookTrigger {
        &self.webhooks
    }

    pub fn register_trigger(&mut self, trigger_type: impl Into<String>, trigger: Arc<dyn Trigger>) {
        self.triggers.register(trigger_type, trigger);
    }

    /// Subscribe every stored workflow with its trigger. Returns how many
    /// workflows are live.
    pub async fn load(&self) -> Result<usize, EngineError> {
        let workflows = self.database().list_workflows().await?;
        for workflow in &workflows {
            self.triggers.sync(workflow);
        }
        let live = workflows.iter().filter(|w| w.enabled && w.current).count();
        info!(workflows = workflows.len(), live, "workflows loaded");
        Ok(live)
    }

    /// Validate and store a workflow definition as the current version of
    /// its key, then subscribe it with its trigger.
    #[instrument(skip(self, definition), fields(title = %definition.workflow.title))]
    pub async fn install(&self, definition: WorkflowDefinition) -> Result<WorkflowRow, EngineError> {
        let graph = FlowGraph::new(definition.nodes);
        let order = graph.validate()?;

        let transaction = self.engine.database.begin().await?;
        let result = async {
            let repo = transaction.as_repository();
            let workflow = repo.create_workflow(definition.workflow).await?;

            // Nodes go in upstream-first order so every upstream id is known.
            let mut ids: HashMap<i64, i64> = HashMap::with_capacity(order.len());
            for local_id in order {
                let node = graph.get(local_id).ok_or(EngineError::NodeNotFound(local_id))?;
                let upstream_id = node.upstream_id.and_then(|id| ids.get(&id).copied());
                let created = repo
                    .create_node(NewFlowNode {
                        workflow_id: workflow.id,
                        title: node.title.clone(),
                        node_type: node.node_type.clone(),
                        config: node.config.clone(),
                        upstream_id,
                        downstream_id: None,
                        branch_index: node.branch_index,
                    })
                    .await?;
                ids.insert(local_id, created.id);
            }
            for node in graph.nodes() {
                if let (Some(&id), Some(downstream)) = (ids.get(&node.id), node.downstream_id) {
                    repo.set_downstream(id, ids.get(&downstream).copied()).await?;
                }
            }
            Ok::<_, EngineError>(workflow)
        }
        .await;

        match result {
            Ok(workflow) => {
                transaction.commit().await?;
                info!(workflow_id = workflow.id, nodes = graph.len(), "workflow installed");
                // Earlier versions of the key are no longer current.
                for previous in self.database().list_workflows().await? {
                    if previous.key == workflow.key && previous.id != workflow.id {
                        self.triggers.sync(&previous);
                    }
                }
                self.triggers.sync(&workflow);
                Ok(workflow)
            }
            Err(err) => {
                if let Err(rollback_err) = transaction.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Create an execution of `workflow` for `context` and run it until it
    /// finishes or suspends.
    #[instrument(skip(self, workflow, context, options), fields(workflow_id = workflow.id))]
    pub async fn trigger(
        &self,
        workflow: &WorkflowRow,
        context: Value,
        options: ProcessorOptions,
    ) -> Result<ExecutionRow, EngineError> {
        let use_transaction = WorkflowOptions::from_config(&workflow.config).use_transaction;
        let new = NewExecution {
            workflow_id: workflow.id,
            key: workflow.key,
            context,
            use_transaction,
        };
        // Create the row where the processor will look for it.
        let execution = match &options.transaction {
            Some(transaction) if use_transaction && !transaction.is_finished() => {
                transaction.create_execution(new).await?
            }
            _ => self.database().create_execution(new).await?,
        };
        info!(execution_id = execution.id, "execution created");

        let guard = self.locks.acquire(execution.id).await;
        let execution_id = execution.id;
        let mut processor = Processor::new(Arc::clone(&self.engine), execution, options);
        let result = processor.start().await;
        drop(guard);
        self.locks.release(execution_id);

        result.map(|()| processor.into_execution())
    }

    /// Manually trigger a stored workflow version. Disabled workflows are
    /// refused.
    pub async fn execute(&self, workflow_id: i64, context: Value) -> Result<ExecutionRow, EngineError> {
        let workflow = self.database().get_workflow(workflow_id).await?;
        if !workflow.enabled {
            return Err(EngineError::WorkflowDisabled(workflow.id));
        }
        self.trigger(&workflow, context, ProcessorOptions::default()).await
    }

    /// Trigger the workflow listening on webhook `path`. `Ok(None)` when no
    /// workflow is registered for it.
    pub async fn trigger_webhook(
        &self,
        path: &str,
        context: Value,
    ) -> Result<Option<ExecutionRow>, EngineError> {
        let Some(workflow_id) = self.webhooks.workflow_for(path) else {
            return Ok(None);
        };
        let workflow = self.database().get_workflow(workflow_id).await?;
        self.trigger(&workflow, context, ProcessorOptions::default())
            .await
            .map(Some)
    }

    /// Apply `patch` to a job and resume its execution from it.
    ///
    /// For transactional executions the patch and the resumed run share
    /// one transaction owned by this call.
    #[instrument(skip(self, patch))]
    pub async fn resume(&self, job_id: i64, patch: JobPatch) -> Result<ExecutionRow, EngineError> {
        let job = self.database().get_job(job_id).await?;

        let guard = self.locks.acquire(job.execution_id).await;
        let result = self.resume_locked(job.clone(), patch).await;
        drop(guard);
        self.locks.release(job.execution_id);
        result
    }

    async fn resume_locked(&self, job: JobRow, patch: JobPatch) -> Result<ExecutionRow, EngineError> {
        let execution = self.database().get_execution(job.execution_id, false).await?;
        if execution.status.is_terminal() {
            return Err(EngineError::ExecutionEnded {
                execution_id: execution.id,
                status: execution.status,
            });
        }

        if !execution.use_transaction {
            let job = apply_patch(self.database(), job, patch).await?;
            let mut processor = Processor::new(Arc::clone(&self.engine), execution, ProcessorOptions::default());
            processor.resume(job).await?;
            return Ok(processor.into_execution());
        }

        let transaction = self.engine.database.begin().await?;
        let result = async {
            let job = apply_patch(transaction.as_repository(), job, patch).await?;
            let options = ProcessorOptions {
                transaction: Some(Arc::clone(&transaction)),
            };
            let mut processor = Processor::new(Arc::clone(&self.engine), execution, options);
            processor.resume(job).await?;
            Ok::<_, EngineError>(processor.into_execution())
        }
        .await;

        match result {
            Ok(execution) => {
                transaction.commit().await?;
                Ok(execution)
            }
            Err(err) => {
                if let Err(rollback_err) = transaction.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// An execution and all of its jobs, oldest first.
    pub async fn execution_with_jobs(&self, id: i64) -> Result<(ExecutionRow, Vec<JobRow>), EngineError> {
        let execution = self.database().get_execution(id, false).await?;
        let jobs = self.database().list_jobs(id).await?;
        Ok((execution, jobs))
    }
}

async fn apply_patch(repo: &dyn Repository, job: JobRow, patch: JobPatch) -> Result<JobRow, EngineError> {
    if patch.status.is_none() && patch.result.is_none() {
        return Ok(job);
    }
    Ok(repo.update_job(job.id, patch).await?)
}

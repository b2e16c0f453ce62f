//! `MockInstruction` — a test double for `Instruction`.
//!
//! Useful in unit and integration tests where a real instruction is either
//! unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use db::models::{FlowNodeRow, JobRow, JobStatus};

use crate::traits::{InstructionResult, Outcome, PrevJob, ProcessorContext};
use crate::{Instruction, NodeError};

/// Behaviour injected into `MockInstruction` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Resolve with `{ "node": <id>, ...value }`.
    Resolve(Value),
    /// Fail with `NodeError::Failed`.
    Fail(String),
    /// Produce a job with the given status and result.
    Status(JobStatus, Value),
    /// Produce a pending job; resuming it resolves with the stored result.
    Suspend,
    /// Return no job at all.
    Nothing,
}

/// Which method of the instruction was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCallKind {
    Run,
    Resume,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub kind: MockCallKind,
    pub node_id: i64,
    /// Result of the job handed to the instruction.
    pub input: Value,
}

/// A mock instruction that records every call it receives and returns a
/// programmer-specified outcome.
#[derive(Debug, Clone)]
pub struct MockInstruction {
    /// What the instruction will do when `run` is called.
    pub behaviour: MockBehaviour,
    /// All calls seen by this instruction (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockInstruction {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always resolves with the given value.
    pub fn resolving(value: Value) -> Self {
        Self::new(MockBehaviour::Resolve(value))
    }

    /// Create a mock whose `run` always fails.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::new(MockBehaviour::Fail(msg.into()))
    }

    /// Create a mock that suspends on `run` and resolves on `resume`.
    pub fn suspending() -> Self {
        Self::new(MockBehaviour::Suspend)
    }

    /// Create a mock that ends its node with an arbitrary status.
    pub fn with_status(status: JobStatus) -> Self {
        Self::new(MockBehaviour::Status(status, Value::Null))
    }

    /// Snapshot of the recorded calls.
    pub fn recorded(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times `run` or `resume` was invoked for `node_id`.
    pub fn call_count_for(&self, node_id: i64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.node_id == node_id)
            .count()
    }

    /// Total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, kind: MockCallKind, node_id: i64, input: &Value) {
        self.calls.lock().unwrap().push(MockCall {
            kind,
            node_id,
            input: input.clone(),
        });
    }
}

#[async_trait]
impl Instruction for MockInstruction {
    async fn run(
        &self,
        node: &FlowNodeRow,
        prev: &PrevJob,
        _processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        self.record(MockCallKind::Run, node.id, prev.result());

        match &self.behaviour {
            MockBehaviour::Resolve(value) => {
                // Merge the node id into the output so tests can trace data
                // flowing through the flow.
                let mut out = json!({ "node": node.id });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), value.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(Some(Outcome::resolved(out)))
            }
            MockBehaviour::Fail(msg) => Err(NodeError::Failed(msg.clone())),
            MockBehaviour::Status(status, value) => Ok(Some(Outcome::new(*status, value.clone()))),
            MockBehaviour::Suspend => Ok(Some(Outcome::pending(json!({ "node": node.id })))),
            MockBehaviour::Nothing => Ok(None),
        }
    }

    async fn resume(
        &self,
        node: &FlowNodeRow,
        job: &JobRow,
        _processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        self.record(MockCallKind::Resume, node.id, &job.result);

        let mut job = job.clone();
        if job.status.is_pending() {
            job.status = JobStatus::Resolved;
        }
        Ok(Some(Outcome::save(job)))
    }
}

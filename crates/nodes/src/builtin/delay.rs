//! `delay` — park the flow until an external timer resumes it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use db::models::{FlowNodeRow, JobRow, JobStatus};

use super::parse_config;
use crate::traits::{InstructionResult, Outcome, PrevJob, ProcessorContext};
use crate::Instruction;

pub const TYPE: &str = "delay";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelayConfig {
    /// Milliseconds to wait; read by whatever schedules the resume.
    #[serde(default)]
    duration: u64,
    /// Status the job ends with once the delay has elapsed.
    #[serde(default = "default_end_status")]
    end_status: JobStatus,
}

fn default_end_status() -> JobStatus {
    JobStatus::Resolved
}

pub struct DelayInstruction;

#[async_trait]
impl Instruction for DelayInstruction {
    async fn run(
        &self,
        node: &FlowNodeRow,
        _prev: &PrevJob,
        _processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        let config: DelayConfig = parse_config(node)?;
        debug!(node_id = node.id, duration = config.duration, "delay waiting for resume");
        Ok(Some(Outcome::pending(json!({ "duration": config.duration }))))
    }

    async fn resume(
        &self,
        node: &FlowNodeRow,
        job: &JobRow,
        _processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        let config: DelayConfig = parse_config(node)?;
        let mut job = job.clone();
        if job.status.is_pending() {
            job.status = config.end_status;
        }
        Ok(Some(Outcome::save(job)))
    }
}

//! `manual` — suspend until someone outside the engine settles the job.

use async_trait::async_trait;
use serde_json::Value;

use db::models::{FlowNodeRow, JobRow};

use crate::traits::{InstructionResult, Outcome, PrevJob, ProcessorContext};
use crate::Instruction;

pub const TYPE: &str = "manual";

pub struct ManualInstruction;

#[async_trait]
impl Instruction for ManualInstruction {
    async fn run(
        &self,
        node: &FlowNodeRow,
        _prev: &PrevJob,
        processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        let form = node.config.get("form").cloned().unwrap_or(Value::Null);
        Ok(Some(Outcome::pending(
            processor.get_parsed_value(&form, Some(node)),
        )))
    }

    async fn resume(
        &self,
        _node: &FlowNodeRow,
        job: &JobRow,
        _processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        // The approver writes status and result onto the job before resuming.
        if job.status.is_pending() {
            return Ok(None);
        }
        Ok(Some(Outcome::save(job.clone())))
    }
}

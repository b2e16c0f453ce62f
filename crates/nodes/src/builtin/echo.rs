//! `echo` — resolves with a rendered value.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use db::models::FlowNodeRow;

use super::parse_config;
use crate::traits::{InstructionResult, Outcome, PrevJob, ProcessorContext};
use crate::Instruction;

pub const TYPE: &str = "echo";

#[derive(Debug, Default, Deserialize)]
struct EchoConfig {
    /// Template to render. Absent means "pass the previous result through".
    #[serde(default)]
    value: Option<Value>,
}

pub struct EchoInstruction;

#[async_trait]
impl Instruction for EchoInstruction {
    async fn run(
        &self,
        node: &FlowNodeRow,
        prev: &PrevJob,
        processor: &dyn ProcessorContext,
    ) -> InstructionResult {
        let config: EchoConfig = parse_config(node)?;
        let result = match config.value {
            Some(template) => processor.get_parsed_value(&template, Some(node)),
            None => prev.result().clone(),
        };
        Ok(Some(Outcome::resolved(result)))
    }
}

//! `engine` crate — workflow graph, variable scope, the processor that
//! drives executions, and the runtime that triggers and resumes them.

pub mod config;
pub mod error;
pub mod functions;
pub mod graph;
pub mod jobs;
pub mod models;
pub mod processor;
pub mod runtime;
pub mod scope;
pub mod status;
pub mod template;
pub mod trigger;

pub use config::EngineConfig;
pub use error::EngineError;
pub use functions::{FunctionContext, SystemFunctions};
pub use graph::FlowGraph;
pub use models::{WorkflowDefinition, WorkflowOptions};
pub use processor::{Processor, ProcessorOptions};
pub use runtime::{Engine, WorkflowRuntime};
pub use status::StatusMap;
pub use trigger::{Trigger, TriggerRegistry, WebhookTrigger};

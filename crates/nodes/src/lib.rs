//! `nodes` crate — the `Instruction` contract and built-in instructions.
//!
//! Every node type, built-in or custom, is an [`Instruction`]
//! registered under its type tag in an [`InstructionRegistry`]. The engine
//! crate dispatches through these trait objects and hands each instruction
//! a [`ProcessorContext`] to read the flow's state.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::NodeError;
pub use registry::InstructionRegistry;
pub use traits::{Instruction, InstructionResult, JobOutcome, Outcome, PrevJob, ProcessorContext};

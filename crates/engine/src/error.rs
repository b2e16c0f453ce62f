//! Engine-level error types.

use thiserror::Error;

use db::models::ExecutionStatus;

/// Errors produced by the workflow engine (validation + execution).
///
/// Runtime failures of an instruction are not errors at this level: they
/// are recorded as `Error` jobs and the flow keeps unwinding.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: {0}")]
    DuplicateNodeId(i64),

    /// A node links to a node ID that doesn't exist in the workflow.
    #[error("node {node_id} references an unknown {side} node")]
    UnknownNodeReference {
        node_id: i64,
        side: &'static str,
    },

    /// `a.downstream == b` but `b` does not point back to `a`.
    #[error("node {node_id} links downstream to {downstream_id}, which does not link back")]
    LinkMismatch {
        node_id: i64,
        downstream_id: i64,
    },

    #[error("workflow has nodes but no root node")]
    MissingRoot,

    #[error("workflow has more than one root node: {0:?}")]
    MultipleRoots(Vec<i64>),

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    // ------ Execution errors ------

    /// The node's type has no instruction, or the instruction lacks the
    /// method the engine needs. Nothing is written for the node.
    #[error("node {node_id} of type '{node_type}' is misconfigured: {reason}")]
    Configuration {
        node_id: i64,
        node_type: String,
        reason: String,
    },

    /// `start`/`resume` on an execution that is no longer `Started`.
    #[error("execution {execution_id} was ended with status {status}")]
    ExecutionEnded {
        execution_id: i64,
        status: ExecutionStatus,
    },

    #[error("node {0} is not part of the execution's workflow")]
    NodeNotFound(i64),

    #[error("workflow {0} is disabled")]
    WorkflowDisabled(i64),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

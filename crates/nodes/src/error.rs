//! Node-level error type.

use thiserror::Error;

/// Errors returned by an instruction's `run`/`resume`.
///
/// The engine treats them in two ways:
/// - `Unsupported`: the instruction does not implement the requested
///   method. This is a configuration error and rejects the whole call.
/// - everything else: the node failed at runtime; the engine records an
///   `Error` job for it and keeps unwinding the flow.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The instruction has no implementation for this method.
    #[error("`{0}` is not implemented for this node type")]
    Unsupported(&'static str),

    /// The node's config could not be understood.
    #[error("invalid node config: {0}")]
    InvalidConfig(String),

    /// The instruction ran and failed.
    #[error("{0}")]
    Failed(String),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

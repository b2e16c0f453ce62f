//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models. Status codes are stored as small
//! integers: positive means success, zero means "still open", negative
//! means one of the failure outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::UnknownStatus;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Status of a single job (one instruction invocation for one node).
///
/// Instructions may emit codes outside the known set; those are carried as
/// [`JobStatus::Custom`] and mapped to an execution status by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", from = "i16")]
pub enum JobStatus {
    Pending,
    Resolved,
    Failed,
    Error,
    Aborted,
    Canceled,
    Rejected,
    Custom(i16),
}

impl JobStatus {
    pub fn code(self) -> i16 {
        match self {
            Self::Pending => 0,
            Self::Resolved => 1,
            Self::Failed => -1,
            Self::Error => -2,
            Self::Aborted => -3,
            Self::Canceled => -4,
            Self::Rejected => -5,
            Self::Custom(code) => code,
        }
    }

    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }
}

impl From<i16> for JobStatus {
    fn from(code: i16) -> Self {
        match code {
            0 => Self::Pending,
            1 => Self::Resolved,
            -1 => Self::Failed,
            -2 => Self::Error,
            -3 => Self::Aborted,
            -4 => Self::Canceled,
            -5 => Self::Rejected,
            other => Self::Custom(other),
        }
    }
}

impl From<JobStatus> for i16 {
    fn from(status: JobStatus) -> Self {
        status.code()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Aborted => write!(f, "aborted"),
            Self::Canceled => write!(f, "canceled"),
            Self::Rejected => write!(f, "rejected"),
            Self::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

/// Status of a workflow execution. `Started` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum ExecutionStatus {
    Started,
    Resolved,
    Failed,
    Error,
    Aborted,
    Canceled,
    Rejected,
}

impl ExecutionStatus {
    pub fn code(self) -> i16 {
        match self {
            Self::Started => 0,
            Self::Resolved => 1,
            Self::Failed => -1,
            Self::Error => -2,
            Self::Aborted => -3,
            Self::Canceled => -4,
            Self::Rejected => -5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Started
    }
}

impl TryFrom<i16> for ExecutionStatus {
    type Error = UnknownStatus;

    fn try_from(code: i16) -> Result<Self, UnknownStatus> {
        match code {
            0 => Ok(Self::Started),
            1 => Ok(Self::Resolved),
            -1 => Ok(Self::Failed),
            -2 => Ok(Self::Error),
            -3 => Ok(Self::Aborted),
            -4 => Ok(Self::Canceled),
            -5 => Ok(Self::Rejected),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl From<ExecutionStatus> for i16 {
    fn from(status: ExecutionStatus) -> Self {
        status.code()
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Resolved => write!(f, "resolved"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Aborted => write!(f, "aborted"),
            Self::Canceled => write!(f, "canceled"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// One version of a workflow definition. Versions of the same logical
/// workflow share `key`; exactly one of them is `current`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: i64,
    pub key: Uuid,
    pub title: String,
    pub enabled: bool,
    pub current: bool,
    /// Tag of the trigger that starts this workflow (e.g. `"webhook"`).
    pub trigger_type: String,
    /// Trigger configuration plus engine options such as `useTransaction`.
    pub config: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    #[serde(default = "Uuid::new_v4")]
    pub key: Uuid,
    pub title: String,
    #[serde(default)]
    pub enabled: bool,
    pub trigger_type: String,
    #[serde(default)]
    pub config: Value,
}

// ---------------------------------------------------------------------------
// flow_nodes
// ---------------------------------------------------------------------------

/// A single step in a workflow graph.
///
/// `upstream_id`/`downstream_id` chain the nodes of one branch together.
/// A non-null `branch_index` marks the entry node of a branch spawned by its
/// upstream node and orders sibling branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FlowNodeRow {
    pub id: i64,
    #[serde(default)]
    pub workflow_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    /// Tag used to look up the instruction in the registry.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub upstream_id: Option<i64>,
    #[serde(default)]
    pub downstream_id: Option<i64>,
    #[serde(default)]
    pub branch_index: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFlowNode {
    pub workflow_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub upstream_id: Option<i64>,
    #[serde(default)]
    pub downstream_id: Option<i64>,
    #[serde(default)]
    pub branch_index: Option<i32>,
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// One run of a pinned workflow version.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRow {
    pub id: i64,
    pub workflow_id: i64,
    pub key: Uuid,
    /// Trigger payload, visible to every node as `$context`.
    pub context: Value,
    #[sqlx(try_from = "i16")]
    pub status: ExecutionStatus,
    pub use_transaction: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: i64,
    pub key: Uuid,
    pub context: Value,
    pub use_transaction: bool,
}

// ---------------------------------------------------------------------------
// jobs
// ---------------------------------------------------------------------------

/// The persisted outcome of one instruction invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub execution_id: i64,
    pub node_id: i64,
    /// Job of the causally preceding node, not necessarily the graph upstream.
    pub upstream_id: Option<i64>,
    #[sqlx(try_from = "i16")]
    pub status: JobStatus,
    pub result: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub execution_id: i64,
    pub node_id: i64,
    pub upstream_id: Option<i64>,
    pub status: JobStatus,
    pub result: Value,
}

/// Targeted update of a job; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_job_codes_survive_the_conversion() {
        assert_eq!(JobStatus::from(7), JobStatus::Custom(7));
        assert_eq!(JobStatus::from(-2), JobStatus::Error);
        assert_eq!(i16::from(JobStatus::Custom(-9)), -9);
    }

    #[test]
    fn execution_status_rejects_unknown_codes() {
        assert_eq!(ExecutionStatus::try_from(-4), Ok(ExecutionStatus::Canceled));
        assert_eq!(ExecutionStatus::try_from(12), Err(UnknownStatus(12)));
        assert!(!ExecutionStatus::Started.is_terminal());
    }

    #[test]
    fn statuses_serialize_as_codes() {
        assert_eq!(serde_json::to_value(JobStatus::Rejected).unwrap(), -5);
        let status: ExecutionStatus = serde_json::from_value(serde_json::json!(1)).unwrap();
        assert_eq!(status, ExecutionStatus::Resolved);
    }

    #[test]
    fn flow_node_reads_authoring_json() {
        let node: FlowNodeRow = serde_json::from_value(serde_json::json!({
            "id": 3,
            "type": "echo",
            "upstream_id": 2,
            "branch_index": 1
        }))
        .unwrap();
        assert_eq!(node.node_type, "echo");
        assert_eq!(node.downstream_id, None);
        assert_eq!(node.branch_index, Some(1));
    }
}

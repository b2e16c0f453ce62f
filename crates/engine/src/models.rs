//! Authoring-side models: the JSON a workflow is installed from and the
//! engine options read out of a workflow's `config`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use db::models::{FlowNodeRow, NewWorkflow};

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A workflow plus its nodes, as written by hand or posted to the API.
///
/// Node ids are local to the document; they are remapped to store ids when
/// the workflow is installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(flatten)]
    pub workflow: NewWorkflow,
    #[serde(default)]
    pub nodes: Vec<FlowNodeRow>,
}

// ---------------------------------------------------------------------------
// WorkflowOptions
// ---------------------------------------------------------------------------

/// Engine-relevant keys of a workflow's `config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOptions {
    /// Run each processor call inside one store transaction.
    #[serde(default = "default_use_transaction")]
    pub use_transaction: bool,
    /// URL path segment of the webhook trigger (`/webhook/{path}`).
    #[serde(default)]
    pub path: Option<String>,
}

fn default_use_transaction() -> bool {
    true
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            use_transaction: default_use_transaction(),
            path: None,
        }
    }
}

impl WorkflowOptions {
    /// Read options from a workflow config; unreadable configs fall back to
    /// the defaults.
    pub fn from_config(config: &Value) -> Self {
        if config.is_null() {
            return Self::default();
        }
        serde_json::from_value(config.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "invalid workflow options, using defaults");
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_default_to_transactional() {
        assert_eq!(WorkflowOptions::from_config(&Value::Null), WorkflowOptions::default());
        let options = WorkflowOptions::from_config(&json!({ "path": "orders" }));
        assert!(options.use_transaction);
        assert_eq!(options.path.as_deref(), Some("orders"));
    }

    #[test]
    fn options_read_camel_case_keys() {
        let options = WorkflowOptions::from_config(&json!({ "useTransaction": false }));
        assert!(!options.use_transaction);
    }

    #[test]
    fn definition_reads_flattened_workflow() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "title": "greet",
            "trigger_type": "manual",
            "enabled": true,
            "nodes": [{ "id": 1, "type": "echo" }]
        }))
        .unwrap();
        assert_eq!(definition.workflow.title, "greet");
        assert_eq!(definition.nodes.len(), 1);
    }
}

//! Generic flow-control instructions.
//!
//! They only move control around the graph (branching, looping, waiting);
//! domain work such as HTTP calls or queries belongs to custom instructions.

use serde::de::DeserializeOwned;
use serde_json::Value;

use db::models::FlowNodeRow;

use crate::NodeError;

pub mod condition;
pub mod delay;
pub mod echo;
pub mod loops;
pub mod manual;
pub mod parallel;

/// Deserialize a node's config into its typed form.
pub(crate) fn parse_config<T: DeserializeOwned>(node: &FlowNodeRow) -> Result<T, NodeError> {
    let config = if node.config.is_null() {
        Value::Object(Default::default())
    } else {
        node.config.clone()
    };
    serde_json::from_value(config)
        .map_err(|e| NodeError::InvalidConfig(format!("node {}: {e}", node.id)))
}

/// Truthiness of a rendered template value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_template_conventions() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!(-1.5)));
    }

    #[test]
    fn null_config_reads_as_empty_object() {
        #[derive(serde::Deserialize)]
        struct Config {
            #[serde(default)]
            flag: bool,
        }
        let node = FlowNodeRow {
            id: 1,
            workflow_id: 1,
            title: None,
            node_type: "x".into(),
            config: Value::Null,
            upstream_id: None,
            downstream_id: None,
            branch_index: None,
        };
        let config: Config = parse_config(&node).unwrap();
        assert!(!config.flag);
    }
}

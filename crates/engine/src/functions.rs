//! Named system functions exposed to templates as `$system.<name>`.
//!
//! Functions are only called when a template (or a scope dump) asks for
//! them, so registering an expensive one costs nothing until it is used.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use db::models::{ExecutionRow, FlowNodeRow};

/// What a system function can see when it is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct FunctionContext<'a> {
    pub execution: &'a ExecutionRow,
    /// The node whose config is being rendered, if any.
    pub node: Option<&'a FlowNodeRow>,
}

pub type SystemFunction = Arc<dyn Fn(&FunctionContext<'_>) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct SystemFunctions {
    functions: BTreeMap<String, SystemFunction>,
}

impl SystemFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `now`, `executionId` and `nodeId`.
    pub fn with_builtins() -> Self {
        let mut functions = Self::new();
        functions
            .register("now", |_| Value::String(Utc::now().to_rfc3339()))
            .register("executionId", |ctx| Value::from(ctx.execution.id))
            .register("nodeId", |ctx| ctx.node.map_or(Value::Null, |node| Value::from(node.id)));
        functions
    }

    /// Register (or replace) a function. Returns `&mut Self` for chaining.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&FunctionContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn call(&self, name: &str, ctx: &FunctionContext<'_>) -> Option<Value> {
        self.functions.get(name).map(|function| function(ctx))
    }
}

impl fmt::Debug for SystemFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemFunctions")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::ExecutionStatus;
    use serde_json::json;
    use uuid::Uuid;

    fn execution() -> ExecutionRow {
        ExecutionRow {
            id: 42,
            workflow_id: 1,
            key: Uuid::new_v4(),
            context: json!({}),
            status: ExecutionStatus::Started,
            use_transaction: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn builtins_read_the_context() {
        let functions = SystemFunctions::with_builtins();
        let execution = execution();
        let ctx = FunctionContext { execution: &execution, node: None };

        assert_eq!(functions.call("executionId", &ctx), Some(json!(42)));
        assert_eq!(functions.call("nodeId", &ctx), Some(Value::Null));
        assert!(functions.call("now", &ctx).is_some_and(|v| v.is_string()));
        assert_eq!(functions.call("missing", &ctx), None);
    }

    #[test]
    fn registered_functions_replace_builtins() {
        let mut functions = SystemFunctions::with_builtins();
        functions.register("now", |_| json!("frozen"));
        let execution = execution();
        let ctx = FunctionContext { execution: &execution, node: None };

        assert_eq!(functions.call("now", &ctx), Some(json!("frozen")));
        assert_eq!(functions.names().collect::<Vec<_>>(), vec!["executionId", "nodeId", "now"]);
    }
}

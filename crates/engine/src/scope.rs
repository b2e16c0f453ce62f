//! The variable scope a node's config is rendered against.
//!
//! Top-level keys:
//! - `$context`: the execution's trigger payload
//! - `$jobsMapByNodeId`: node id → result of that node's most recently
//!   written job
//! - `$scopes`: node id → variables exposed by each enclosing branch parent
//! - `$system`: named system functions, evaluated on access

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::functions::{FunctionContext, SystemFunctions};

pub const CONTEXT: &str = "$context";
pub const JOBS: &str = "$jobsMapByNodeId";
pub const SCOPES: &str = "$scopes";
pub const SYSTEM: &str = "$system";

pub struct Scope<'a> {
    root: Map<String, Value>,
    functions: &'a SystemFunctions,
    function_context: FunctionContext<'a>,
    /// Materialized array columns, keyed by the dotted path they answer.
    columns: HashMap<String, Value>,
}

impl<'a> Scope<'a> {
    pub fn new(
        context: Value,
        jobs: Map<String, Value>,
        scopes: Map<String, Value>,
        functions: &'a SystemFunctions,
        function_context: FunctionContext<'a>,
    ) -> Self {
        let mut root = Map::new();
        root.insert(CONTEXT.to_string(), context);
        root.insert(JOBS.to_string(), Value::Object(jobs));
        root.insert(SCOPES.to_string(), Value::Object(scopes));
        Self {
            root,
            functions,
            function_context,
            columns: HashMap::new(),
        }
    }

    /// Resolve a dotted path. Numeric segments index arrays.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (first, rest) = segments.split_first()?;

        if *first == SYSTEM {
            let (name, rest) = rest.split_first()?;
            let value = self.functions.call(name, &self.function_context)?;
            return walk(&value, rest).cloned();
        }

        let mut current = self.root.get(*first)?;
        for (i, segment) in rest.iter().enumerate() {
            let prefix = segments[..i + 2].join(".");
            current = match self.columns.get(&prefix) {
                Some(column) => column,
                None => step(current, segment)?,
            };
        }
        Some(current.clone())
    }

    /// Make `key` resolvable when it reaches through an array: a non-index
    /// segment applied to an array yields the column of that property over
    /// all items, flattening items that are themselves arrays.
    ///
    /// `orders.items.sku` over `{"orders": {"items": [{"sku": "a"}, {"sku":
    /// "b"}]}}` resolves to `["a", "b"]`.
    pub fn append_array_column(&mut self, key: &str) {
        let segments: Vec<&str> = key.split('.').collect();
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        if *first == SYSTEM {
            return;
        }
        let Some(mut current) = self.root.get(*first).cloned() else {
            return;
        };

        for (i, segment) in rest.iter().enumerate() {
            let prefix = segments[..i + 2].join(".");
            let next = match &current {
                Value::Array(items) if segment.parse::<usize>().is_err() => {
                    let column = column(items, segment);
                    self.columns.insert(prefix, column.clone());
                    Some(column)
                }
                other => step(other, segment).cloned(),
            };
            match next {
                Some(value) => current = value,
                None => return,
            }
        }
    }

    /// JSON view of the whole scope, with every system function evaluated.
    pub fn to_value(&self) -> Value {
        let mut root = self.root.clone();
        let system: Map<String, Value> = self
            .functions
            .names()
            .filter_map(|name| {
                self.functions
                    .call(name, &self.function_context)
                    .map(|value| (name.to_string(), value))
            })
            .collect();
        root.insert(SYSTEM.to_string(), Value::Object(system));
        Value::Object(root)
    }
}

fn step<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn walk<'v>(value: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| step(current, segment))
}

fn column(items: &[Value], property: &str) -> Value {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match step(item, property) {
            Some(Value::Array(inner)) => out.extend(inner.iter().cloned()),
            Some(value) => out.push(value.clone()),
            None => out.push(Value::Null),
        }
    }
    Value::Array(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use db::models::{ExecutionRow, ExecutionStatus};
    use serde_json::json;
    use uuid::Uuid;

    fn execution() -> ExecutionRow {
        ExecutionRow {
            id: 9,
            workflow_id: 1,
            key: Uuid::new_v4(),
            context: json!({}),
            status: ExecutionStatus::Started,
            use_transaction: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn with_scope<R>(context: Value, f: impl FnOnce(&mut Scope<'_>) -> R) -> R {
        let execution = execution();
        let functions = SystemFunctions::with_builtins();
        let mut jobs = Map::new();
        jobs.insert("3".into(), json!({ "rows": [{ "id": 1 }, { "id": 2 }] }));
        let mut scope = Scope::new(
            context,
            jobs,
            Map::new(),
            &functions,
            FunctionContext { execution: &execution, node: None },
        );
        f(&mut scope)
    }

    #[test]
    fn resolves_plain_paths_and_indexes() {
        with_scope(json!({ "user": { "tags": ["x", "y"] } }), |scope| {
            assert_eq!(scope.get("$context.user.tags.1"), Some(json!("y")));
            assert_eq!(scope.get("$jobsMapByNodeId.3.rows.0.id"), Some(json!(1)));
            assert_eq!(scope.get("$context.user.nope"), None);
        });
    }

    #[test]
    fn system_functions_are_called_on_access() {
        with_scope(json!({}), |scope| {
            assert_eq!(scope.get("$system.executionId"), Some(json!(9)));
            assert_eq!(scope.get("$system.unknown"), None);
        });
    }

    #[test]
    fn array_columns_are_mapped_and_flattened() {
        let context = json!({
            "orders": [
                { "items": [{ "sku": "a" }, { "sku": "b" }] },
                { "items": [{ "sku": "c" }] }
            ]
        });
        with_scope(context, |scope| {
            assert_eq!(scope.get("$context.orders.items"), None);

            scope.append_array_column("$context.orders.items.sku");
            assert_eq!(scope.get("$context.orders.items.sku"), Some(json!(["a", "b", "c"])));
            assert_eq!(scope.get("$context.orders.items").map(|v| v.as_array().map(Vec::len)), Some(Some(3)));
            // plain index access still works
            assert_eq!(scope.get("$context.orders.1.items.0.sku"), Some(json!("c")));
        });
    }

    #[test]
    fn to_value_includes_evaluated_system_functions() {
        with_scope(json!({ "a": 1 }), |scope| {
            let value = scope.to_value();
            assert_eq!(value["$context"]["a"], json!(1));
            assert_eq!(value["$system"]["executionId"], json!(9));
            assert!(value["$scopes"].is_object());
        });
    }
}

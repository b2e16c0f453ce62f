//! `{{ path }}` placeholders inside JSON config values.
//!
//! A placeholder is a dotted path into the scope, optionally followed by a
//! default: `{{ $context.user.name:anonymous }}`. A string that consists of a
//! single placeholder renders to the raw value it points at (numbers, objects
//! and arrays keep their type); placeholders embedded in longer text are
//! interpolated as text. Objects and arrays are rendered recursively.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}\s:]+)(?:\s*:\s*([^{}]*?))?\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// One distinct placeholder found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub default: Option<String>,
}

/// A parsed config value, ready to be rendered against any lookup.
#[derive(Debug, Clone)]
pub struct Template {
    source: Value,
    parameters: Vec<Parameter>,
}

pub fn parse(value: &Value) -> Template {
    let mut parameters = Vec::new();
    collect(value, &mut parameters);
    Template {
        source: value.clone(),
        parameters,
    }
}

fn collect(value: &Value, out: &mut Vec<Parameter>) {
    match value {
        Value::String(text) => {
            for caps in placeholder().captures_iter(text) {
                let parameter = to_parameter(&caps);
                if !out.contains(&parameter) {
                    out.push(parameter);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect(item, out)),
        _ => {}
    }
}

fn to_parameter(caps: &Captures<'_>) -> Parameter {
    Parameter {
        key: caps[1].to_string(),
        default: caps.get(2).map(|m| m.as_str().to_string()),
    }
}

impl Template {
    /// Distinct placeholders in order of first appearance.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Substitute every placeholder using `lookup`. Missing (or null) values
    /// fall back to the placeholder's default, then to null / empty text.
    pub fn render<F>(&self, lookup: F) -> Value
    where
        F: Fn(&str) -> Option<Value>,
    {
        render_value(&self.source, &lookup)
    }
}

fn render_value<F>(value: &Value, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<Value>,
{
    match value {
        Value::String(text) => render_string(text, lookup),
        Value::Array(items) => Value::Array(items.iter().map(|item| render_value(item, lookup)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), render_value(item, lookup)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

fn render_string<F>(text: &str, lookup: &F) -> Value
where
    F: Fn(&str) -> Option<Value>,
{
    let pattern = placeholder();

    if let Some(caps) = pattern.captures(text) {
        if caps.get(0).is_some_and(|m| m.range() == (0..text.len())) {
            let parameter = to_parameter(&caps);
            return match resolve(&parameter, lookup) {
                Some(value) => value,
                None => parameter.default.map(Value::String).unwrap_or(Value::Null),
            };
        }
    }

    let rendered = pattern.replace_all(text, |caps: &Captures<'_>| {
        let parameter = to_parameter(caps);
        match resolve(&parameter, lookup) {
            Some(Value::String(s)) => s,
            Some(value) => value.to_string(),
            None => parameter.default.unwrap_or_default(),
        }
    });
    Value::String(rendered.into_owned())
}

fn resolve<F>(parameter: &Parameter, lookup: &F) -> Option<Value>
where
    F: Fn(&str) -> Option<Value>,
{
    lookup(&parameter.key).filter(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(key: &str) -> Option<Value> {
        match key {
            "$context.name" => Some(json!("ada")),
            "$context.count" => Some(json!(3)),
            "$context.tags" => Some(json!(["a", "b"])),
            "$context.empty" => Some(Value::Null),
            _ => None,
        }
    }

    #[test]
    fn collects_distinct_parameters_recursively() {
        let template = parse(&json!({
            "a": "{{ $context.name }}",
            "b": ["{{$context.count}} of {{ $context.name }}"],
            "c": "{{ $context.missing:fallback }}"
        }));
        let keys: Vec<&str> = template.parameters().iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["$context.name", "$context.count", "$context.missing"]);
        assert_eq!(template.parameters()[2].default.as_deref(), Some("fallback"));
    }

    #[test]
    fn whole_placeholder_keeps_the_raw_value() {
        let rendered = parse(&json!({ "n": "{{ $context.count }}", "t": "{{$context.tags}}" }))
            .render(scope);
        assert_eq!(rendered, json!({ "n": 3, "t": ["a", "b"] }));
    }

    #[test]
    fn embedded_placeholders_are_interpolated() {
        let rendered = parse(&json!("hi {{ $context.name }}, you have {{ $context.count }}"))
            .render(scope);
        assert_eq!(rendered, json!("hi ada, you have 3"));
    }

    #[test]
    fn missing_values_use_default_or_nothing() {
        assert_eq!(parse(&json!("{{ $context.nope:none }}")).render(scope), json!("none"));
        assert_eq!(parse(&json!("{{ $context.empty }}")).render(scope), Value::Null);
        assert_eq!(parse(&json!("[{{ $context.nope }}]")).render(scope), json!("[]"));
    }

    #[test]
    fn non_string_values_pass_through() {
        let value = json!({ "flag": true, "n": 1.5, "nested": { "x": null } });
        assert_eq!(parse(&value).render(scope), value);
    }
}

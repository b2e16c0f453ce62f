//! Triggers decide when workflows start; the runtime tells them which
//! workflows are live.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use db::models::WorkflowRow;

use crate::models::WorkflowOptions;

pub const MANUAL: &str = "manual";
pub const WEBHOOK: &str = "webhook";

/// Subscription hooks of one trigger type.
pub trait Trigger: Send + Sync {
    /// Start listening for `workflow`.
    fn on(&self, workflow: &WorkflowRow);
    /// Stop listening for `workflow`.
    fn off(&self, workflow: &WorkflowRow);
}

/// Workflows started explicitly through the API or CLI; nothing to listen
/// for.
#[derive(Debug, Default)]
pub struct ManualTrigger;

impl Trigger for ManualTrigger {
    fn on(&self, _workflow: &WorkflowRow) {}

    fn off(&self, _workflow: &WorkflowRow) {}
}

/// Routes `POST /webhook/{path}` to the workflow registered for `path`.
#[derive(Debug, Default)]
pub struct WebhookTrigger {
    routes: RwLock<HashMap<String, i64>>,
}

impl WebhookTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the workflow listening on `path`.
    pub fn workflow_for(&self, path: &str) -> Option<i64> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
    }
}

impl Trigger for WebhookTrigger {
    fn on(&self, workflow: &WorkflowRow) {
        let Some(path) = WorkflowOptions::from_config(&workflow.config).path else {
            warn!(workflow_id = workflow.id, "webhook workflow has no path");
            return;
        };
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = routes.insert(path.clone(), workflow.id) {
            if previous != workflow.id {
                warn!(path = %path, previous, workflow_id = workflow.id, "webhook path taken over");
            }
        }
        debug!(path = %path, workflow_id = workflow.id, "webhook registered");
    }

    fn off(&self, workflow: &WorkflowRow) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, id| *id != workflow.id);
    }
}

/// Trigger type tag → trigger.
#[derive(Default)]
pub struct TriggerRegistry {
    triggers: HashMap<String, Arc<dyn Trigger>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, trigger_type: impl Into<String>, trigger: Arc<dyn Trigger>) -> &mut Self {
        self.triggers.insert(trigger_type.into(), trigger);
        self
    }

    pub fn get(&self, trigger_type: &str) -> Option<Arc<dyn Trigger>> {
        self.triggers.get(trigger_type).cloned()
    }

    /// Subscribe an enabled current version, unsubscribe anything else.
    pub fn sync(&self, workflow: &WorkflowRow) {
        let Some(trigger) = self.triggers.get(&workflow.trigger_type) else {
            warn!(
                workflow_id = workflow.id,
                trigger_type = %workflow.trigger_type,
                "no trigger registered for type"
            );
            return;
        };
        if workflow.enabled && workflow.current {
            trigger.on(workflow);
        } else {
            trigger.off(workflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn workflow(id: i64, config: Value, enabled: bool) -> WorkflowRow {
        WorkflowRow {
            id,
            key: Uuid::new_v4(),
            title: "hook".into(),
            enabled,
            current: true,
            trigger_type: WEBHOOK.into(),
            config,
            created_at: Utc::now(),
        }
    }

    fn registry(webhooks: &Arc<WebhookTrigger>) -> TriggerRegistry {
        let mut registry = TriggerRegistry::new();
        registry
            .register(MANUAL, Arc::new(ManualTrigger))
            .register(WEBHOOK, Arc::clone(webhooks) as Arc<dyn Trigger>);
        registry
    }

    #[test]
    fn enabled_webhook_is_routed_and_disabled_one_removed() {
        let webhooks = Arc::new(WebhookTrigger::new());
        let registry = registry(&webhooks);

        registry.sync(&workflow(7, json!({ "path": "orders" }), true));
        assert_eq!(webhooks.workflow_for("orders"), Some(7));

        registry.sync(&workflow(7, json!({ "path": "orders" }), false));
        assert_eq!(webhooks.workflow_for("orders"), None);
    }

    #[test]
    fn webhook_without_path_is_ignored() {
        let webhooks = Arc::new(WebhookTrigger::new());
        registry(&webhooks).sync(&workflow(1, json!({}), true));
        assert!(webhooks.routes.read().unwrap().is_empty());
    }
}

//! Maps node type tags to instruction implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin;
use crate::Instruction;

/// Registry of instructions keyed by the node's `node_type` tag.
///
/// The engine treats the tag as an opaque key; adding a node type never
/// requires touching the engine.
#[derive(Clone, Default)]
pub struct InstructionRegistry {
    instructions: HashMap<String, Arc<dyn Instruction>>,
}

impl InstructionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the generic flow-control instructions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(builtin::echo::TYPE, builtin::echo::EchoInstruction)
            .register(builtin::condition::TYPE, builtin::condition::ConditionInstruction)
            .register(builtin::parallel::TYPE, builtin::parallel::ParallelInstruction)
            .register(builtin::loops::TYPE, builtin::loops::LoopInstruction)
            .register(builtin::manual::TYPE, builtin::manual::ManualInstruction)
            .register(builtin::delay::TYPE, builtin::delay::DelayInstruction);
        registry
    }

    pub fn register(
        &mut self,
        node_type: impl Into<String>,
        instruction: impl Instruction + 'static,
    ) -> &mut Self {
        self.register_arc(node_type, Arc::new(instruction))
    }

    pub fn register_arc(
        &mut self,
        node_type: impl Into<String>,
        instruction: Arc<dyn Instruction>,
    ) -> &mut Self {
        self.instructions.insert(node_type.into(), instruction);
        self
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Instruction>> {
        self.instructions.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.instructions.contains_key(node_type)
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.instructions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for InstructionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInstruction;

    #[test]
    fn builtins_are_registered_by_tag() {
        let registry = InstructionRegistry::with_builtins();
        assert_eq!(
            registry.types(),
            vec!["condition", "delay", "echo", "loop", "manual", "parallel"]
        );
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry = InstructionRegistry::new();
        let first = MockInstruction::resolving(serde_json::json!(1));
        let second = MockInstruction::failing("boom");
        let second_calls = second.calls.clone();
        registry.register("x", first).register("x", second);

        assert!(registry.contains("x"));
        assert!(registry.get("y").is_none());
        assert!(Arc::strong_count(&second_calls) >= 2);
    }
}

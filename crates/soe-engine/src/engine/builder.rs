//! Engine builder — assembles backends, tools, and the model caller.

use std::sync::Arc;

use async_trait::async_trait;

use super::Engine;
use crate::defaults::in_memory::in_memory_backends;
use crate::errors::ModelError;
use crate::tool_registry::ToolRegistry;
use crate::traits::{
    Backends, ContextBackend, ContextSchemaBackend, ConversationHistoryBackend, IdentityBackend,
    ModelCaller, TelemetryBackend, ToolSpec, WorkflowBackend,
};
use crate::types::NodeConfig;

/// Placeholder caller for engines that never run model-backed nodes.
/// Any `llm`/`agent` activation fails with a clear error.
struct UnconfiguredModelCaller;

#[async_trait]
impl ModelCaller for UnconfiguredModelCaller {
    async fn complete(&self, _prompt: &str, _node: &NodeConfig) -> Result<String, ModelError> {
        Err(ModelError::NotConfigured)
    }
}

/// Builder for assembling an [`Engine`].
///
/// Every component is optional — defaults are in-memory backends, an empty
/// tool registry, and an unconfigured model caller.
pub struct EngineBuilder {
    backends: Backends,
    tools: ToolRegistry,
    model: Option<Arc<dyn ModelCaller>>,
    max_agent_turns: u32,
    max_node_activations: Option<u64>,
}

impl EngineBuilder {
    pub(super) fn new() -> Self {
        Self {
            backends: in_memory_backends(),
            tools: ToolRegistry::new(),
            model: None,
            max_agent_turns: 25,
            max_node_activations: None,
        }
    }

    /// Replace the full backend set at once.
    pub fn backends(mut self, backends: Backends) -> Self {
        self.backends = backends;
        self
    }

    /// Set the context backend. Default: in-memory.
    pub fn context_backend(mut self, backend: impl ContextBackend + 'static) -> Self {
        self.backends.context = Arc::new(backend);
        self
    }

    /// Set the workflow backend. Default: in-memory.
    pub fn workflow_backend(mut self, backend: impl WorkflowBackend + 'static) -> Self {
        self.backends.workflow = Arc::new(backend);
        self
    }

    /// Set the context-schema backend. Default: in-memory.
    pub fn context_schema_backend(mut self, backend: impl ContextSchemaBackend + 'static) -> Self {
        self.backends.context_schema = Some(Arc::new(backend));
        self
    }

    /// Set the identity backend. Default: in-memory.
    pub fn identity_backend(mut self, backend: impl IdentityBackend + 'static) -> Self {
        self.backends.identity = Some(Arc::new(backend));
        self
    }

    /// Set the conversation-history backend. Default: in-memory.
    pub fn conversation_history_backend(
        mut self,
        backend: impl ConversationHistoryBackend + 'static,
    ) -> Self {
        self.backends.conversation_history = Some(Arc::new(backend));
        self
    }

    /// Set the telemetry backend. Default: in-memory (recording).
    pub fn telemetry_backend(mut self, backend: impl TelemetryBackend + 'static) -> Self {
        self.backends.telemetry = Some(Arc::new(backend));
        self
    }

    /// Disable the optional backends entirely: no schema contracts, no
    /// identities, no shared history, no telemetry.
    pub fn without_optional_backends(mut self) -> Self {
        self.backends.context_schema = None;
        self.backends.identity = None;
        self.backends.conversation_history = None;
        self.backends.telemetry = None;
        self
    }

    /// Register a tool under a name.
    pub fn tool(self, name: impl Into<String>, spec: ToolSpec) -> Self {
        self.tools.register(name, spec);
        self
    }

    /// Use an existing (possibly shared) tool registry.
    pub fn tool_registry(mut self, registry: ToolRegistry) -> Self {
        self.tools = registry;
        self
    }

    /// Set the model caller used by `llm` and `agent` nodes.
    pub fn model_caller(mut self, caller: impl ModelCaller + 'static) -> Self {
        self.model = Some(Arc::new(caller));
        self
    }

    /// Ceiling on agent loop turns. Default: 25. A safety knob against
    /// runaway loops, not a semantic bound — the model is expected to
    /// finish on its own.
    pub fn max_agent_turns(mut self, turns: u32) -> Self {
        self.max_agent_turns = turns;
        self
    }

    /// Execution-wide ceiling on node activations. Default: unlimited.
    /// The guard of last resort for workflows that recursively spawn
    /// themselves; prefer guard routers over `__operational__` counters.
    pub fn max_node_activations(mut self, limit: u64) -> Self {
        self.max_node_activations = Some(limit);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            backends: self.backends,
            tools: self.tools,
            model: self
                .model
                .unwrap_or_else(|| Arc::new(UnconfiguredModelCaller)),
            max_agent_turns: self.max_agent_turns,
            max_node_activations: self.max_node_activations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn defaults_build() {
        let engine = Engine::builder().build();
        assert!(engine.tools.is_empty());
        assert_eq!(engine.max_agent_turns, 25);
        assert!(engine.max_node_activations.is_none());
    }

    #[test]
    fn registered_tools_visible() {
        let engine = Engine::builder()
            .tool("pay", ToolSpec::new(|_: Value| Ok(json!({"ok": true}))))
            .build();
        assert!(engine.tool_exists("pay"));
        assert!(engine.tool_exists("soe_get_context")); // builtin
        assert!(!engine.tool_exists("nope"));
    }

    #[tokio::test]
    async fn unconfigured_model_caller_errors() {
        let engine = Engine::builder().build();
        let node: NodeConfig = serde_json::from_value(json!({
            "node_type": "llm",
            "event_triggers": ["GO"],
            "prompt": "p"
        }))
        .unwrap();
        let err = engine.model.complete("hello", &node).await.unwrap_err();
        assert!(matches!(err, ModelError::NotConfigured));
    }
}

//! Foundational types for the orchestration engine.
//!
//! Every persisted type is `Serialize + Deserialize + Debug + Clone`.
//! Workflow definitions use `IndexMap` so the declared node order survives
//! parsing — that order is the dispatch tiebreak used everywhere in the
//! kernel, not a presentation detail.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved context namespace for engine-managed operational state.
pub const OPERATIONAL_KEY: &str = "__operational__";

/// Reserved context namespace linking a child execution to its parent.
pub const PARENT_KEY: &str = "__parent__";

/// Prefix marking reserved context field names.
pub const RESERVED_PREFIX: &str = "__";

// ---------------------------------------------------------------------------
// Nodes and workflows
// ---------------------------------------------------------------------------

/// The five node kinds the dispatcher knows how to activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Router,
    Tool,
    Llm,
    Agent,
    Child,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Tool => "tool",
            Self::Llm => "llm",
            Self::Agent => "agent",
            Self::Child => "child",
        }
    }
}

/// One entry in a node's `event_emissions` list.
///
/// The `condition` string is dual-purpose: a template (`{{ … }}`) is
/// evaluated programmatically; any other non-empty string is a semantic
/// description consumed by model-side signal selection on `llm` and
/// `agent` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionDef {
    pub signal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Declarative configuration of a single node.
///
/// Holds the union of fields across node types; which fields are required
/// or permitted per type is enforced at load time by
/// [`validate_config`](crate::config::validate_config). Unknown fields are
/// rejected by serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub node_type: NodeType,
    #[serde(default)]
    pub event_triggers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_emissions: Vec<EmissionDef>,

    // llm / agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_failure_signal: Option<String>,

    // agent
    #[serde(
        default,
        alias = "available_tools",
        skip_serializing_if = "Option::is_none"
    )]
    pub tools: Option<Vec<String>>,

    // tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_parameter_field: Option<String>,

    // child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_initial_signals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals_to_parent: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_updates_to_parent: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_out_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_input_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_interval: Option<f64>,
}

impl NodeConfig {
    /// Retry budget for model-backed nodes. Default: 3.
    pub fn retry_budget(&self) -> u32 {
        self.retries.unwrap_or(3)
    }

    /// Whether any emission carries a template-style condition.
    pub fn has_template_conditions(&self) -> bool {
        self.event_emissions.iter().any(|e| {
            e.condition
                .as_deref()
                .is_some_and(crate::template::is_template)
        })
    }
}

/// A workflow: node name → node configuration, in declared order.
pub type WorkflowDef = IndexMap<String, NodeConfig>;

/// A registry: workflow name → workflow definition.
pub type WorkflowRegistry = IndexMap<String, WorkflowDef>;

/// Parsed top-level configuration: `workflows` required,
/// `context_schema` and `identities` optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    pub workflows: WorkflowRegistry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_schema: Option<BTreeMap<String, FieldSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identities: Option<BTreeMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Field schema
// ---------------------------------------------------------------------------

/// Value types a field schema entry can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    #[serde(alias = "str", alias = "text")]
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "float")]
    Number,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "dict")]
    Object,
    #[serde(alias = "array")]
    List,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::List => "list",
        }
    }
}

/// Schema entry for one context field, keyed by `main_execution_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nested field schemas for `object` types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, FieldSchema>>,
    /// Element schema for `list` types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,
}

// ---------------------------------------------------------------------------
// Conversation history
// ---------------------------------------------------------------------------

/// One turn in a shared conversation history.
///
/// Roles in use: `system`, `user`, `assistant`, `tool`, `tool_error`,
/// `system_error`. Tool turns carry the tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_name: Some(tool_name.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry events
// ---------------------------------------------------------------------------

/// Event vocabulary emitted to the telemetry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OrchestrationStart,
    ConfigInheritanceStart,
    SignalsBroadcast,
    NodeExecution,
    LlmCall,
    ToolCall,
    AgentToolCall,
    NodeError,
    SignalsToParent,
    ContextWarning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrchestrationStart => "orchestration_start",
            Self::ConfigInheritanceStart => "config_inheritance_start",
            Self::SignalsBroadcast => "signals_broadcast",
            Self::NodeExecution => "node_execution",
            Self::LlmCall => "llm_call",
            Self::ToolCall => "tool_call",
            Self::AgentToolCall => "agent_tool_call",
            Self::NodeError => "node_error",
            Self::SignalsToParent => "signals_to_parent",
            Self::ContextWarning => "context_warning",
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrate request
// ---------------------------------------------------------------------------

/// Arguments to [`Engine::orchestrate`](crate::engine::Engine::orchestrate).
///
/// Either `config` or `inherit_config_from_id` must be present.
#[derive(Debug, Clone, Default)]
pub struct OrchestrateRequest {
    pub config: Option<WorkflowConfig>,
    pub initial_workflow_name: String,
    pub initial_signals: Vec<String>,
    pub initial_context: BTreeMap<String, Value>,
    pub inherit_config_from_id: Option<String>,
    pub inherit_context_from_id: Option<String>,
}

impl OrchestrateRequest {
    pub fn new(initial_workflow_name: impl Into<String>) -> Self {
        Self {
            initial_workflow_name: initial_workflow_name.into(),
            ..Default::default()
        }
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn signals<I, S>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initial_signals = signals.into_iter().map(Into::into).collect();
        self
    }

    pub fn context_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.initial_context.insert(name.into(), value);
        self
    }

    pub fn inherit_config_from(mut self, execution_id: impl Into<String>) -> Self {
        self.inherit_config_from_id = Some(execution_id.into());
        self
    }

    pub fn inherit_context_from(mut self, execution_id: impl Into<String>) -> Self {
        self.inherit_context_from_id = Some(execution_id.into());
        self
    }
}

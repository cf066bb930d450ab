//! Plugin trait interfaces for the orchestration kernel.
//!
//! Every pluggable component is defined as an async trait. Default
//! implementations live in [`defaults`](crate::defaults). Adding a method
//! to any trait requires a default implementation to preserve backward
//! compatibility.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::errors::{BackendError, ModelError, ToolError};
use crate::types::{EventType, FieldSchema, Message, NodeConfig, WorkflowRegistry};

// ---------------------------------------------------------------------------
// ContextBackend
// ---------------------------------------------------------------------------

/// Persistence for per-execution context.
///
/// The kernel performs read-modify-write cycles against this backend; it is
/// the only shared channel between executions, so implementations must make
/// `save_context` atomic per execution id.
#[async_trait]
pub trait ContextBackend: Send + Sync {
    async fn save_context(
        &self,
        execution_id: &str,
        context: &ExecutionContext,
    ) -> Result<(), BackendError>;

    async fn get_context(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionContext>, BackendError>;

    /// Execution ids with stored contexts, for backends that can enumerate
    /// them. Default: `None` (not supported) — `soe_list_contexts` reports
    /// accordingly.
    async fn list_executions(&self) -> Result<Option<Vec<String>>, BackendError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// WorkflowBackend
// ---------------------------------------------------------------------------

/// Persistence for per-execution workflow registry snapshots and the
/// current workflow name.
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    async fn save_workflows_registry(
        &self,
        execution_id: &str,
        registry: &WorkflowRegistry,
    ) -> Result<(), BackendError>;

    async fn get_workflows_registry(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowRegistry>, BackendError>;

    async fn save_current_workflow_name(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<(), BackendError>;

    async fn get_current_workflow_name(
        &self,
        execution_id: &str,
    ) -> Result<Option<String>, BackendError>;
}

// ---------------------------------------------------------------------------
// ContextSchemaBackend
// ---------------------------------------------------------------------------

/// Optional persistence for field schemas, keyed by `main_execution_id`.
#[async_trait]
pub trait ContextSchemaBackend: Send + Sync {
    async fn save_context_schema(
        &self,
        execution_id: &str,
        schema: &BTreeMap<String, FieldSchema>,
    ) -> Result<(), BackendError>;

    async fn get_context_schema(
        &self,
        execution_id: &str,
    ) -> Result<Option<BTreeMap<String, FieldSchema>>, BackendError>;
}

// ---------------------------------------------------------------------------
// IdentityBackend
// ---------------------------------------------------------------------------

/// Optional persistence for identities (name → system prompt), keyed by
/// `main_execution_id`.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn save_identities(
        &self,
        execution_id: &str,
        identities: &BTreeMap<String, String>,
    ) -> Result<(), BackendError>;

    async fn get_identities(
        &self,
        execution_id: &str,
    ) -> Result<Option<BTreeMap<String, String>>, BackendError>;
}

// ---------------------------------------------------------------------------
// ConversationHistoryBackend
// ---------------------------------------------------------------------------

/// Optional persistence for shared conversation history, keyed by
/// `main_execution_id`. Implementations must serialize appends per key —
/// every node in an orchestration tree with a truthy `identity` writes
/// through here.
#[async_trait]
pub trait ConversationHistoryBackend: Send + Sync {
    async fn get_history(&self, main_execution_id: &str) -> Result<Vec<Message>, BackendError>;

    async fn append_turns(
        &self,
        main_execution_id: &str,
        turns: &[Message],
    ) -> Result<(), BackendError>;

    async fn save_history(
        &self,
        main_execution_id: &str,
        history: &[Message],
    ) -> Result<(), BackendError>;

    async fn delete_history(&self, main_execution_id: &str) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// TelemetryBackend
// ---------------------------------------------------------------------------

/// Optional event sink. A projection layer — never authoritative, never
/// fatal, so `log_event` is infallible by contract.
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    async fn log_event(&self, execution_id: &str, event_type: EventType, data: Value);
}

// ---------------------------------------------------------------------------
// Backends container
// ---------------------------------------------------------------------------

/// The full set of backends an engine runs against. Context and workflow
/// persistence are required; everything else is optional and features that
/// need an absent backend degrade gracefully (no shared history, no schema
/// contracts, no telemetry).
#[derive(Clone)]
pub struct Backends {
    pub context: Arc<dyn ContextBackend>,
    pub workflow: Arc<dyn WorkflowBackend>,
    pub context_schema: Option<Arc<dyn ContextSchemaBackend>>,
    pub identity: Option<Arc<dyn IdentityBackend>>,
    pub conversation_history: Option<Arc<dyn ConversationHistoryBackend>>,
    pub telemetry: Option<Arc<dyn TelemetryBackend>>,
}

impl Backends {
    /// Log a telemetry event if a telemetry backend is configured.
    /// Telemetry is a projection — it never fails the caller.
    pub async fn log_event(&self, execution_id: &str, event_type: EventType, data: Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.log_event(execution_id, event_type, data).await;
        }
    }
}

// ---------------------------------------------------------------------------
// ModelCaller
// ---------------------------------------------------------------------------

/// The single seam to a language model: rendered prompt in, raw text out.
///
/// The engine owns everything around the call — contract construction,
/// format instructions, response parsing, and retries. Implementations see
/// the node configuration for provider routing (model name, temperature,
/// whatever the embedder encodes there).
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn complete(&self, prompt: &str, node: &NodeConfig) -> Result<String, ModelError>;
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A callable tool. Arguments arrive as a JSON object (or a JSON array when
/// the registry entry sets `process_accumulated`); the return value is
/// stored verbatim in context.
#[async_trait]
pub trait ToolFn: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Plain synchronous closures are tools too.
#[async_trait]
impl<F> ToolFn for F
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        self(args)
    }
}

/// Registry entry for one tool.
#[derive(Clone)]
pub struct ToolSpec {
    pub function: Arc<dyn ToolFn>,
    /// Shown to agents when building the tool-selection contract.
    pub description: String,
    /// JSON schema of the argument object, for agent parameter generation.
    pub parameters: Value,
    /// Additional attempts after the first failure. Default: 1.
    pub max_retries: u32,
    /// Signal emitted instead of raising when retries are exhausted.
    pub failure_signal: Option<String>,
    /// Pass the full accumulated history of `context_parameter_field` as a
    /// positional list instead of the current mapping.
    pub process_accumulated: bool,
}

impl ToolSpec {
    pub fn new(function: impl ToolFn + 'static) -> Self {
        Self {
            function: Arc::new(function),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
            max_retries: 1,
            failure_signal: None,
            process_accumulated: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn failure_signal(mut self, signal: impl Into<String>) -> Self {
        self.failure_signal = Some(signal.into());
        self
    }

    pub fn process_accumulated(mut self, enabled: bool) -> Self {
        self.process_accumulated = enabled;
        self
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("description", &self.description)
            .field("max_retries", &self.max_retries)
            .field("failure_signal", &self.failure_signal)
            .field("process_accumulated", &self.process_accumulated)
            .finish_non_exhaustive()
    }
}

//! In-memory backends for tests and development.
//!
//! Each backend is a `tokio::sync::RwLock` over a map keyed by execution
//! id. Write locks serialize the kernel's read-modify-write cycles, which
//! satisfies the per-execution atomicity the backend contract requires.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::context::ExecutionContext;
use crate::errors::BackendError;
use crate::traits::{
    Backends, ContextBackend, ContextSchemaBackend, ConversationHistoryBackend, IdentityBackend,
    TelemetryBackend, WorkflowBackend,
};
use crate::types::{EventType, FieldSchema, Message, WorkflowRegistry};

/// A full [`Backends`] set wired to fresh in-memory implementations,
/// including a recording telemetry backend.
pub fn in_memory_backends() -> Backends {
    Backends {
        context: Arc::new(InMemoryContextBackend::new()),
        workflow: Arc::new(InMemoryWorkflowBackend::new()),
        context_schema: Some(Arc::new(InMemoryContextSchemaBackend::new())),
        identity: Some(Arc::new(InMemoryIdentityBackend::new())),
        conversation_history: Some(Arc::new(InMemoryConversationHistoryBackend::new())),
        telemetry: Some(Arc::new(InMemoryTelemetryBackend::new())),
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// In-memory context storage.
#[derive(Default)]
pub struct InMemoryContextBackend {
    storage: RwLock<HashMap<String, ExecutionContext>>,
}

impl InMemoryContextBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All execution ids with stored contexts (used by `soe_list_contexts`).
    pub async fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.storage.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ContextBackend for InMemoryContextBackend {
    async fn save_context(
        &self,
        execution_id: &str,
        context: &ExecutionContext,
    ) -> Result<(), BackendError> {
        self.storage
            .write()
            .await
            .insert(execution_id.to_string(), context.clone());
        Ok(())
    }

    async fn get_context(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionContext>, BackendError> {
        Ok(self.storage.read().await.get(execution_id).cloned())
    }

    async fn list_executions(&self) -> Result<Option<Vec<String>>, BackendError> {
        Ok(Some(self.execution_ids().await))
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// In-memory workflow registry storage.
#[derive(Default)]
pub struct InMemoryWorkflowBackend {
    registries: RwLock<HashMap<String, WorkflowRegistry>>,
    current: RwLock<HashMap<String, String>>,
}

impl InMemoryWorkflowBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowBackend for InMemoryWorkflowBackend {
    async fn save_workflows_registry(
        &self,
        execution_id: &str,
        registry: &WorkflowRegistry,
    ) -> Result<(), BackendError> {
        self.registries
            .write()
            .await
            .insert(execution_id.to_string(), registry.clone());
        Ok(())
    }

    async fn get_workflows_registry(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowRegistry>, BackendError> {
        Ok(self.registries.read().await.get(execution_id).cloned())
    }

    async fn save_current_workflow_name(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<(), BackendError> {
        self.current
            .write()
            .await
            .insert(execution_id.to_string(), name.to_string());
        Ok(())
    }

    async fn get_current_workflow_name(
        &self,
        execution_id: &str,
    ) -> Result<Option<String>, BackendError> {
        Ok(self.current.read().await.get(execution_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Context schema
// ---------------------------------------------------------------------------

/// In-memory field-schema storage.
#[derive(Default)]
pub struct InMemoryContextSchemaBackend {
    storage: RwLock<HashMap<String, BTreeMap<String, FieldSchema>>>,
}

impl InMemoryContextSchemaBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextSchemaBackend for InMemoryContextSchemaBackend {
    async fn save_context_schema(
        &self,
        execution_id: &str,
        schema: &BTreeMap<String, FieldSchema>,
    ) -> Result<(), BackendError> {
        self.storage
            .write()
            .await
            .insert(execution_id.to_string(), schema.clone());
        Ok(())
    }

    async fn get_context_schema(
        &self,
        execution_id: &str,
    ) -> Result<Option<BTreeMap<String, FieldSchema>>, BackendError> {
        Ok(self.storage.read().await.get(execution_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// In-memory identity storage.
#[derive(Default)]
pub struct InMemoryIdentityBackend {
    storage: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl InMemoryIdentityBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityBackend for InMemoryIdentityBackend {
    async fn save_identities(
        &self,
        execution_id: &str,
        identities: &BTreeMap<String, String>,
    ) -> Result<(), BackendError> {
        self.storage
            .write()
            .await
            .insert(execution_id.to_string(), identities.clone());
        Ok(())
    }

    async fn get_identities(
        &self,
        execution_id: &str,
    ) -> Result<Option<BTreeMap<String, String>>, BackendError> {
        Ok(self.storage.read().await.get(execution_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Conversation history
// ---------------------------------------------------------------------------

/// In-memory conversation-history storage. The write lock serializes
/// appends per key, as the contract requires.
#[derive(Default)]
pub struct InMemoryConversationHistoryBackend {
    storage: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryConversationHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationHistoryBackend for InMemoryConversationHistoryBackend {
    async fn get_history(&self, main_execution_id: &str) -> Result<Vec<Message>, BackendError> {
        Ok(self
            .storage
            .read()
            .await
            .get(main_execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_turns(
        &self,
        main_execution_id: &str,
        turns: &[Message],
    ) -> Result<(), BackendError> {
        self.storage
            .write()
            .await
            .entry(main_execution_id.to_string())
            .or_default()
            .extend_from_slice(turns);
        Ok(())
    }

    async fn save_history(
        &self,
        main_execution_id: &str,
        history: &[Message],
    ) -> Result<(), BackendError> {
        self.storage
            .write()
            .await
            .insert(main_execution_id.to_string(), history.to_vec());
        Ok(())
    }

    async fn delete_history(&self, main_execution_id: &str) -> Result<(), BackendError> {
        self.storage.write().await.remove(main_execution_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// A telemetry event as recorded by [`InMemoryTelemetryBackend`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub execution_id: String,
    pub event_type: EventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: Value,
}

/// Recording telemetry backend; tests inspect the captured events.
#[derive(Default)]
pub struct InMemoryTelemetryBackend {
    events: RwLock<Vec<RecordedEvent>>,
}

impl InMemoryTelemetryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_of_type(&self, event_type: EventType) -> Vec<RecordedEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TelemetryBackend for InMemoryTelemetryBackend {
    async fn log_event(&self, execution_id: &str, event_type: EventType, data: Value) {
        self.events.write().await.push(RecordedEvent {
            execution_id: execution_id.to_string(),
            event_type,
            timestamp: chrono::Utc::now(),
            data,
        });
    }
}

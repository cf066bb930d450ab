//! Engine entry points: orchestration start, signal re-entry, inheritance.

mod builder;

pub use builder::EngineBuilder;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::config;
use crate::context::ExecutionContext;
use crate::contract::ToolChoice;
use crate::dispatcher;
use crate::errors::{ConfigError, EngineError};
use crate::tool_registry::ToolRegistry;
use crate::traits::{Backends, ModelCaller, ToolSpec};
use crate::types::{
    EventType, FieldSchema, OrchestrateRequest, WorkflowConfig, WorkflowDef, WorkflowRegistry,
};
use crate::builtins;

/// How a tool name resolves: a registered [`ToolSpec`] takes precedence;
/// built-ins are consulted when the registry misses.
pub(crate) enum ToolBinding {
    Registered(ToolSpec),
    Builtin,
}

/// The orchestration engine. Construct through [`Engine::builder`].
///
/// One engine instance serves any number of executions; all per-execution
/// state lives behind the backends.
pub struct Engine {
    pub(crate) backends: Backends,
    pub(crate) tools: ToolRegistry,
    pub(crate) model: Arc<dyn ModelCaller>,
    pub(crate) max_agent_turns: u32,
    pub(crate) max_node_activations: Option<u64>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    // -----------------------------------------------------------------------
    // Orchestrate
    // -----------------------------------------------------------------------

    /// Initialize an execution and run its seed signals to
    /// quiescence. Returns the new execution id.
    pub async fn orchestrate(&self, request: OrchestrateRequest) -> Result<String, EngineError> {
        if request.initial_workflow_name.is_empty() {
            return Err(ConfigError::new("'initial_workflow_name' is required").into());
        }
        if request.config.is_none() && request.inherit_config_from_id.is_none() {
            return Err(
                ConfigError::new("either 'config' or 'inherit_config_from_id' must be provided")
                    .into(),
            );
        }

        let execution_id = Uuid::new_v4().to_string();
        tracing::info!(
            execution_id = %execution_id,
            workflow = %request.initial_workflow_name,
            "starting orchestration"
        );

        // 1. Assemble the registry: inherited copy first, explicit config
        //    overrides it.
        let mut registry = WorkflowRegistry::new();
        let mut identities: Option<BTreeMap<String, String>> = None;
        let mut context_schema: Option<BTreeMap<String, FieldSchema>> = None;

        if let Some(source_id) = &request.inherit_config_from_id {
            self.backends
                .log_event(
                    &execution_id,
                    EventType::ConfigInheritanceStart,
                    json!({ "source_execution_id": source_id }),
                )
                .await;
            registry = self
                .backends
                .workflow
                .get_workflows_registry(source_id)
                .await?
                .ok_or_else(|| EngineError::UnknownExecution {
                    id: source_id.clone(),
                })?;
            if let Some(identity_backend) = &self.backends.identity {
                identities = identity_backend.get_identities(source_id).await?;
            }
            if let Some(schema_backend) = &self.backends.context_schema {
                context_schema = schema_backend.get_context_schema(source_id).await?;
            }
        }

        if let Some(config) = request.config {
            let WorkflowConfig {
                workflows,
                context_schema: config_schema,
                identities: config_identities,
            } = config;
            registry = workflows;
            if config_identities.is_some() {
                identities = config_identities;
            }
            if config_schema.is_some() {
                context_schema = config_schema;
            }
        }

        config::validate_registry(&registry, &|name| self.tool_exists(name))?;
        if !registry.contains_key(&request.initial_workflow_name) {
            return Err(ConfigError::new(format!(
                "initial workflow '{}' not found in config",
                request.initial_workflow_name
            ))
            .into());
        }

        // 2. Persist the execution's snapshots. Identities and schema are
        //    keyed by the new id, which is the `main_execution_id` every
        //    descendant resolves them through.
        self.backends
            .workflow
            .save_workflows_registry(&execution_id, &registry)
            .await?;
        self.backends
            .workflow
            .save_current_workflow_name(&execution_id, &request.initial_workflow_name)
            .await?;
        if let (Some(identities), Some(identity_backend)) = (&identities, &self.backends.identity)
        {
            identity_backend
                .save_identities(&execution_id, identities)
                .await?;
        }
        if let (Some(schema), Some(schema_backend)) =
            (&context_schema, &self.backends.context_schema)
        {
            schema_backend
                .save_context_schema(&execution_id, schema)
                .await?;
        }

        // 3. Seed the context: fresh, or inherited with operational state
        //    reset and a new main_execution_id.
        let context = match &request.inherit_context_from_id {
            Some(source_id) => {
                let source = self
                    .backends
                    .context
                    .get_context(source_id)
                    .await?
                    .ok_or_else(|| EngineError::UnknownExecution {
                        id: source_id.clone(),
                    })?;
                ExecutionContext::from_inherited(
                    &execution_id,
                    source.inheritable_copy(),
                    request.initial_context,
                )?
            }
            None => ExecutionContext::from_initial(&execution_id, request.initial_context)?,
        };
        self.backends
            .context
            .save_context(&execution_id, &context)
            .await?;

        self.backends
            .log_event(
                &execution_id,
                EventType::OrchestrationStart,
                json!({ "workflow_name": request.initial_workflow_name }),
            )
            .await;

        // 4. Run the seed signals to quiescence.
        dispatcher::run_to_quiescence(self, &execution_id, request.initial_signals).await?;

        Ok(execution_id)
    }

    // -----------------------------------------------------------------------
    // Broadcast
    // -----------------------------------------------------------------------

    /// Resume an existing execution with new signals. Operational
    /// counters and signal history are preserved across re-entries;
    /// parent-bound signals drive ancestors as they dispatch.
    pub async fn broadcast_signals(
        &self,
        execution_id: &str,
        signals: Vec<String>,
    ) -> Result<(), EngineError> {
        // Re-entry requires an initialized execution.
        self.backends
            .context
            .get_context(execution_id)
            .await?
            .ok_or_else(|| EngineError::UnknownExecution {
                id: execution_id.to_string(),
            })?;

        dispatcher::run_to_quiescence(self, execution_id, signals).await
    }

    // -----------------------------------------------------------------------
    // Lookups used across the kernel
    // -----------------------------------------------------------------------

    pub(crate) async fn load_registry(
        &self,
        execution_id: &str,
    ) -> Result<WorkflowRegistry, EngineError> {
        self.backends
            .workflow
            .get_workflows_registry(execution_id)
            .await?
            .ok_or_else(|| EngineError::UnknownExecution {
                id: execution_id.to_string(),
            })
    }

    /// The current workflow's definition for an execution. A current name
    /// pointing at a removed workflow yields an empty definition — signals
    /// then dispatch to nothing, which is not an error.
    pub(crate) async fn current_workflow(
        &self,
        execution_id: &str,
    ) -> Result<WorkflowDef, EngineError> {
        let registry = self.load_registry(execution_id).await?;
        let name = self
            .backends
            .workflow
            .get_current_workflow_name(execution_id)
            .await?
            .ok_or_else(|| EngineError::UnknownExecution {
                id: execution_id.to_string(),
            })?;
        Ok(registry.get(&name).cloned().unwrap_or_default())
    }

    pub(crate) fn tool_exists(&self, name: &str) -> bool {
        self.tools.contains(name) || builtins::is_builtin(name)
    }

    pub(crate) fn bind_tool(&self, name: &str) -> Option<ToolBinding> {
        if let Some(spec) = self.tools.get(name) {
            return Some(ToolBinding::Registered(spec));
        }
        builtins::is_builtin(name).then_some(ToolBinding::Builtin)
    }

    /// Agent-contract descriptor for a tool name.
    pub(crate) fn tool_choice(&self, name: &str) -> Option<ToolChoice> {
        if let Some(spec) = self.tools.get(name) {
            return Some(ToolChoice {
                name: name.to_string(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            });
        }
        builtins::descriptor(name)
    }
}

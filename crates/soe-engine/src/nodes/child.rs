//! Child node — sub-orchestration.
//!
//! Spawns a child execution (or one per accumulated element with
//! `fan_out_field`) that shares the parent's registry snapshot, identities,
//! and field schema. The child runs to quiescence inline; signals matching
//! `signals_to_parent` drive the parent as the child dispatches them, and
//! fields named in `context_updates_to_parent` append to the parent's
//! histories as the child commits them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::NodeHandler;
use crate::context::{ExecutionContext, ParentLink};
use crate::dispatcher::{self, Activation};
use crate::errors::NodeError;
use crate::types::{EventType, NodeConfig};

pub(crate) struct ChildNode;

#[async_trait]
impl NodeHandler for ChildNode {
    async fn run(
        &self,
        activation: &mut Activation<'_>,
        config: &NodeConfig,
    ) -> Result<(), NodeError> {
        let child_workflow = config.child_workflow_name.as_deref().ok_or(NodeError::Config {
            message: "child node is missing 'child_workflow_name'".into(),
        })?;
        let initial_signals = config.child_initial_signals.clone().unwrap_or_default();

        // The child captures this execution's registry snapshot as it is
        // right now — runtime injections included.
        let registry = activation
            .engine
            .load_registry(&activation.execution_id)
            .await
            .map_err(|e| NodeError::Child {
                message: e.to_string(),
            })?;
        if !registry.contains_key(child_workflow) {
            return Err(NodeError::Config {
                message: format!("child workflow '{child_workflow}' does not exist in the registry"),
            });
        }

        // Copy current values (not histories) of the projected input fields.
        let mut seed: BTreeMap<String, Value> = BTreeMap::new();
        for field in config.input_fields.iter().flatten() {
            if let Some(value) = activation.context().get_field(field) {
                seed.insert(field.clone(), value.clone());
            }
        }

        let parent_link = ParentLink {
            parent_execution_id: activation.execution_id.clone(),
            main_execution_id: activation.main_execution_id().to_string(),
            signals_to_parent: config.signals_to_parent.clone().unwrap_or_default(),
            context_updates_to_parent: config.context_updates_to_parent.clone().unwrap_or_default(),
        };

        match (&config.fan_out_field, &config.child_input_field) {
            (Some(fan_out_field), Some(child_input_field)) => {
                let items = activation.context().get_accumulated(fan_out_field);
                let interval = config.spawn_interval.unwrap_or(0.0);
                tracing::debug!(
                    parent = %activation.execution_id,
                    child_workflow,
                    count = items.len(),
                    "fanning out children"
                );
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 && interval > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(interval)).await;
                    }
                    let mut child_seed = seed.clone();
                    child_seed.insert(child_input_field.clone(), item);
                    spawn_child(
                        activation,
                        child_workflow,
                        &registry,
                        child_seed,
                        parent_link.clone(),
                        initial_signals.clone(),
                    )
                    .await?;
                }
            }
            _ => {
                spawn_child(
                    activation,
                    child_workflow,
                    &registry,
                    seed,
                    parent_link,
                    initial_signals,
                )
                .await?;
            }
        }

        Ok(())
    }
}

/// Create one child execution and run it to quiescence. Parent-bound
/// signals drive this (the parent) execution as the child dispatches them,
/// from inside the child's own loop.
async fn spawn_child(
    activation: &Activation<'_>,
    child_workflow: &str,
    registry: &crate::types::WorkflowRegistry,
    seed: BTreeMap<String, Value>,
    parent_link: ParentLink,
    initial_signals: Vec<String>,
) -> Result<(), NodeError> {
    let engine = activation.engine;
    let child_id = Uuid::new_v4().to_string();

    engine
        .backends
        .workflow
        .save_workflows_registry(&child_id, registry)
        .await?;
    engine
        .backends
        .workflow
        .save_current_workflow_name(&child_id, child_workflow)
        .await?;

    let child_ctx = ExecutionContext::new_child(seed, parent_link);
    engine
        .backends
        .context
        .save_context(&child_id, &child_ctx)
        .await?;

    engine
        .backends
        .log_event(
            &child_id,
            EventType::OrchestrationStart,
            json!({
                "workflow_name": child_workflow,
                "parent_execution_id": &activation.execution_id,
            }),
        )
        .await;
    tracing::debug!(
        parent = %activation.execution_id,
        child = %child_id,
        child_workflow,
        "spawning child execution"
    );

    dispatcher::run_to_quiescence(engine, &child_id, initial_signals)
        .await
        .map_err(|e| NodeError::Child {
            message: e.to_string(),
        })
}

//! Signal dispatch loop and node activations.
//!
//! One FIFO queue per `run_to_quiescence` call. Each iteration dequeues a
//! signal, records it in `__operational__.signals`, activates every node of
//! the current workflow whose `event_triggers` contains it (in declared
//! order), commits each activation atomically, and enqueues whatever the
//! activations emitted. When the dispatched signal is listed in
//! `__parent__.signals_to_parent`, the parent execution is driven with it
//! immediately — a notification, not a join — so parents observe child
//! progress as it happens. The loop ends when the queue is empty;
//! quiescence is the only "done".
//!
//! Activations stage their context writes: on success everything commits in
//! one backend save; on failure the staged writes are dropped while the
//! operational deltas and the `nodes[N]` increment still land, so counters
//! reflect partial runs.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::engine::Engine;
use crate::errors::{EngineError, NodeError};
use crate::nodes;
use crate::types::{EventType, NodeConfig};

// ---------------------------------------------------------------------------
// Operational deltas
// ---------------------------------------------------------------------------

/// Counter increments accumulated during one activation. Applied to
/// `__operational__` whether the handler succeeds or fails.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct OperationalDeltas {
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub errors: u64,
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

/// Execution state for one node handler invocation.
///
/// Handlers read context through [`context()`](Activation::context) (their
/// own staged writes are visible), stage writes with
/// [`set_field()`](Activation::set_field), and queue signals with
/// [`emit()`](Activation::emit). The dispatcher decides what actually
/// commits.
pub(crate) struct Activation<'e> {
    pub engine: &'e Engine,
    pub execution_id: String,
    pub node_name: String,
    ctx: ExecutionContext,
    staged: Vec<(String, Value)>,
    pub deltas: OperationalDeltas,
    emitted: Vec<String>,
}

impl<'e> Activation<'e> {
    fn new(
        engine: &'e Engine,
        execution_id: &str,
        node_name: &str,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            engine,
            execution_id: execution_id.to_string(),
            node_name: node_name.to_string(),
            ctx,
            staged: Vec::new(),
            deltas: OperationalDeltas::default(),
            emitted: Vec::new(),
        }
    }

    /// Context snapshot with this activation's staged writes applied.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn main_execution_id(&self) -> &str {
        self.ctx.main_execution_id()
    }

    /// Stage a context write. Visible to this activation immediately,
    /// committed with the rest on success.
    pub fn set_field(&mut self, field: &str, value: Value) -> Result<(), NodeError> {
        self.ctx.set_field(field, value.clone())?;
        self.staged.push((field.to_string(), value));
        Ok(())
    }

    /// Queue a signal for emission when this activation commits.
    pub fn emit(&mut self, signal: impl Into<String>) {
        self.emitted.push(signal.into());
    }

    pub fn emit_all<I: IntoIterator<Item = String>>(&mut self, signals: I) {
        self.emitted.extend(signals);
    }

    fn into_parts(self) -> (Vec<(String, Value)>, OperationalDeltas, Vec<String>) {
        (self.staged, self.deltas, self.emitted)
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

async fn load_context(engine: &Engine, execution_id: &str) -> Result<ExecutionContext, EngineError> {
    engine
        .backends
        .context
        .get_context(execution_id)
        .await?
        .ok_or_else(|| EngineError::UnknownExecution {
            id: execution_id.to_string(),
        })
}

/// Drain the signal queue for one execution, driving ancestors with every
/// parent-bound signal along the way.
pub(crate) fn run_to_quiescence<'a>(
    engine: &'a Engine,
    execution_id: &str,
    seed: Vec<String>,
) -> BoxFuture<'a, Result<(), EngineError>> {
    let execution_id = execution_id.to_string();
    Box::pin(async move {
        let mut queue: VecDeque<String> = seed.into();

        while let Some(signal) = queue.pop_front() {
            tracing::debug!(execution_id = %execution_id, signal = %signal, "dispatching signal");

            // 1. Record the signal, matched or not.
            let mut ctx = load_context(engine, &execution_id).await?;
            ctx.operational_mut().signals.push(signal.clone());
            engine
                .backends
                .context
                .save_context(&execution_id, &ctx)
                .await?;
            engine
                .backends
                .log_event(
                    &execution_id,
                    EventType::SignalsBroadcast,
                    json!({ "signals": [&signal] }),
                )
                .await;
            let parent = ctx.parent().cloned();

            // 2. Activate matching nodes of the current workflow, in
            //    declared order.
            let workflow = engine.current_workflow(&execution_id).await?;
            let matching: Vec<(String, NodeConfig)> = workflow
                .into_iter()
                .filter(|(_, node)| node.event_triggers.contains(&signal))
                .collect();

            for (node_name, node_config) in matching {
                run_activation(engine, &execution_id, &node_name, &node_config, &mut queue)
                    .await?;
            }

            // 3. Propagate to the parent if the signal is listed. The
            //    parent's reaction runs to quiescence before this
            //    execution continues.
            if let Some(parent) = &parent {
                if parent.signals_to_parent.contains(&signal) {
                    engine
                        .backends
                        .log_event(
                            &execution_id,
                            EventType::SignalsToParent,
                            json!({
                                "signal": &signal,
                                "parent_id": &parent.parent_execution_id,
                            }),
                        )
                        .await;
                    run_to_quiescence(
                        engine,
                        &parent.parent_execution_id,
                        vec![signal.clone()],
                    )
                    .await?;
                }
            }
        }

        Ok(())
    })
}

/// Run one node activation and commit its outcome.
async fn run_activation(
    engine: &Engine,
    execution_id: &str,
    node_name: &str,
    node_config: &NodeConfig,
    queue: &mut VecDeque<String>,
) -> Result<(), EngineError> {
    let ctx = load_context(engine, execution_id).await?;

    if let Some(limit) = engine.max_node_activations {
        let total: u64 = ctx.operational().nodes.values().sum();
        if total >= limit {
            return Err(EngineError::ActivationCeiling { limit });
        }
    }

    engine
        .backends
        .log_event(
            execution_id,
            EventType::NodeExecution,
            json!({
                "node_name": node_name,
                "node_type": node_config.node_type.as_str(),
            }),
        )
        .await;
    tracing::debug!(
        execution_id,
        node = node_name,
        node_type = node_config.node_type.as_str(),
        "activating node"
    );

    let mut activation = Activation::new(engine, execution_id, node_name, ctx);
    let outcome = nodes::run_node(&mut activation, node_config).await;
    let (staged, mut deltas, emitted) = activation.into_parts();

    match outcome {
        Ok(()) => {
            // Commit against a fresh snapshot: a child activation may have
            // written this execution's backend entry in the meantime.
            let mut ctx = load_context(engine, execution_id).await?;
            for (field, value) in &staged {
                ctx.set_field(field, value.clone())
                    .map_err(|e| EngineError::Node {
                        node: node_name.to_string(),
                        source: e.into(),
                    })?;
            }
            apply_deltas(&mut ctx, node_name, &deltas);
            engine
                .backends
                .context
                .save_context(execution_id, &ctx)
                .await?;

            sync_fields_to_parent(engine, &ctx, &staged).await?;

            queue.extend(emitted);
            Ok(())
        }
        Err(error) => {
            // Evaluator failures count as absorbed errors even though they
            // abort the run; the staged writes are dropped either way.
            if matches!(error, NodeError::Template(_)) {
                deltas.errors += 1;
            }
            let mut ctx = load_context(engine, execution_id).await?;
            apply_deltas(&mut ctx, node_name, &deltas);
            engine
                .backends
                .context
                .save_context(execution_id, &ctx)
                .await?;
            engine
                .backends
                .log_event(
                    execution_id,
                    EventType::NodeError,
                    json!({ "node_name": node_name, "error": error.to_string() }),
                )
                .await;
            tracing::error!(execution_id, node = node_name, error = %error, "node failed");

            Err(EngineError::Node {
                node: node_name.to_string(),
                source: error,
            })
        }
    }
}

fn apply_deltas(ctx: &mut ExecutionContext, node_name: &str, deltas: &OperationalDeltas) {
    let operational = ctx.operational_mut();
    operational.llm_calls += deltas.llm_calls;
    operational.tool_calls += deltas.tool_calls;
    operational.errors += deltas.errors;
    *operational.nodes.entry(node_name.to_string()).or_insert(0) += 1;
}

/// Append committed writes to ancestor contexts for every field listed in
/// `context_updates_to_parent`, one history entry per written value.
fn sync_fields_to_parent<'a>(
    engine: &'a Engine,
    ctx: &'a ExecutionContext,
    written: &'a [(String, Value)],
) -> BoxFuture<'a, Result<(), EngineError>> {
    Box::pin(async move {
        let Some(parent) = ctx.parent() else {
            return Ok(());
        };
        let forwarded: Vec<(String, Value)> = written
            .iter()
            .filter(|(field, _)| parent.context_updates_to_parent.contains(field))
            .cloned()
            .collect();
        if forwarded.is_empty() {
            return Ok(());
        }

        let mut parent_ctx = load_context(engine, &parent.parent_execution_id).await?;
        for (field, value) in &forwarded {
            parent_ctx.set_field(field, value.clone())?;
        }
        engine
            .backends
            .context
            .save_context(&parent.parent_execution_id, &parent_ctx)
            .await?;
        tracing::debug!(
            parent_id = %parent.parent_execution_id,
            fields = ?forwarded.iter().map(|(f, _)| f).collect::<Vec<_>>(),
            "synced context updates to parent"
        );

        sync_fields_to_parent(engine, &parent_ctx, &forwarded).await
    })
}

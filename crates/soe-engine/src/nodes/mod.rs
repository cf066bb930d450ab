//! Node handlers — one per node type.
//!
//! Every handler implements [`NodeHandler`]: read context through the
//! activation, do the node's work, stage writes, queue emissions. The
//! dispatcher owns commit/rollback.

pub(crate) mod agent;
pub(crate) mod child;
pub(crate) mod llm;
pub(crate) mod router;
pub(crate) mod tool;

use async_trait::async_trait;

use crate::contract::SignalOption;
use crate::dispatcher::Activation;
use crate::errors::{NodeError, TemplateError};
use crate::template::{self, View};
use crate::types::{EmissionDef, NodeConfig, NodeType};

/// The activation contract every node type implements.
#[async_trait]
pub(crate) trait NodeHandler: Send + Sync {
    async fn run(
        &self,
        activation: &mut Activation<'_>,
        config: &NodeConfig,
    ) -> Result<(), NodeError>;
}

/// Dispatch an activation to the handler for its node type.
pub(crate) async fn run_node(
    activation: &mut Activation<'_>,
    config: &NodeConfig,
) -> Result<(), NodeError> {
    match config.node_type {
        NodeType::Router => router::RouterNode.run(activation, config).await,
        NodeType::Tool => tool::ToolNode.run(activation, config).await,
        NodeType::Llm => llm::LlmNode.run(activation, config).await,
        NodeType::Agent => agent::AgentNode.run(activation, config).await,
        NodeType::Child => child::ChildNode.run(activation, config).await,
    }
}

// ---------------------------------------------------------------------------
// Shared emission evaluation
// ---------------------------------------------------------------------------

/// Evaluate emissions programmatically: no condition → emit, template
/// condition → emit iff truthy, plain text → never (semantic conditions
/// are dead in template mode).
pub(crate) fn evaluate_template_emissions(
    emissions: &[EmissionDef],
    view: &View<'_>,
) -> Result<Vec<String>, TemplateError> {
    let mut signals = Vec::new();
    for emission in emissions {
        match emission.condition.as_deref() {
            None | Some("") => signals.push(emission.signal_name.clone()),
            Some(condition) if template::is_template(condition) => {
                if template::truthy(condition, view)? {
                    signals.push(emission.signal_name.clone());
                }
            }
            Some(_) => {}
        }
    }
    Ok(signals)
}

/// Whether a model-backed node should ask the model to select signals:
/// more than one emission declared and none carrying a template condition.
pub(crate) fn needs_semantic_selection(config: &NodeConfig) -> bool {
    config.event_emissions.len() > 1 && !config.has_template_conditions()
}

/// The selectable signals with their plain-text conditions as descriptions.
pub(crate) fn signal_options(config: &NodeConfig) -> Vec<SignalOption> {
    if !needs_semantic_selection(config) {
        return Vec::new();
    }
    config
        .event_emissions
        .iter()
        .map(|e| SignalOption {
            name: e.signal_name.clone(),
            description: e.condition.clone().unwrap_or_default(),
        })
        .collect()
}

/// Completion emissions for model-backed nodes:
/// template conditions pre-empt semantic selection; with several
/// selectable signals the model's choice is authoritative (possibly
/// empty); a single declared emission fires unconditionally.
pub(crate) fn emit_completion_signals(
    activation: &mut Activation<'_>,
    config: &NodeConfig,
    selected: Vec<String>,
) -> Result<(), NodeError> {
    if config.has_template_conditions() {
        let view = View::new(activation.context());
        let signals = evaluate_template_emissions(&config.event_emissions, &view)?;
        activation.emit_all(signals);
    } else if config.event_emissions.len() > 1 {
        activation.emit_all(selected);
    } else if let Some(emission) = config.event_emissions.first() {
        activation.emit(emission.signal_name.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use serde_json::json;

    fn emission(signal: &str, condition: Option<&str>) -> EmissionDef {
        EmissionDef {
            signal_name: signal.into(),
            condition: condition.map(Into::into),
        }
    }

    #[test]
    fn unconditioned_emissions_always_fire() {
        let ctx = ExecutionContext::new("e1");
        let view = View::new(&ctx);
        let signals =
            evaluate_template_emissions(&[emission("A", None), emission("B", Some(""))], &view)
                .unwrap();
        assert_eq!(signals, ["A", "B"]);
    }

    #[test]
    fn template_conditions_filter() {
        let mut ctx = ExecutionContext::new("e1");
        ctx.set_field("x", json!(5)).unwrap();
        let view = View::new(&ctx);
        let signals = evaluate_template_emissions(
            &[
                emission("HIGH", Some("{{ context.x > 3 }}")),
                emission("LOW", Some("{{ context.x <= 3 }}")),
            ],
            &view,
        )
        .unwrap();
        assert_eq!(signals, ["HIGH"]);
    }

    #[test]
    fn plain_text_is_dead_in_template_mode() {
        let ctx = ExecutionContext::new("e1");
        let view = View::new(&ctx);
        let signals =
            evaluate_template_emissions(&[emission("SEM", Some("sounds happy"))], &view).unwrap();
        assert!(signals.is_empty());
    }

    #[test]
    fn semantic_selection_needs_multiple_nontemplate_emissions() {
        let two_semantic: NodeConfig = serde_json::from_value(json!({
            "node_type": "llm",
            "event_triggers": ["GO"],
            "prompt": "p",
            "event_emissions": [
                {"signal_name": "POS", "condition": "user is happy"},
                {"signal_name": "NEG", "condition": "user is unhappy"}
            ]
        }))
        .unwrap();
        assert!(needs_semantic_selection(&two_semantic));
        assert_eq!(signal_options(&two_semantic).len(), 2);

        let single: NodeConfig = serde_json::from_value(json!({
            "node_type": "llm",
            "event_triggers": ["GO"],
            "prompt": "p",
            "event_emissions": [{"signal_name": "DONE"}]
        }))
        .unwrap();
        assert!(!needs_semantic_selection(&single));

        let templated: NodeConfig = serde_json::from_value(json!({
            "node_type": "llm",
            "event_triggers": ["GO"],
            "prompt": "p",
            "event_emissions": [
                {"signal_name": "A", "condition": "{{ context.x }}"},
                {"signal_name": "B", "condition": "text"}
            ]
        }))
        .unwrap();
        assert!(!needs_semantic_selection(&templated));
    }
}

//! LLM node — render one prompt, call the model, store the result, select
//! emissions.
//!
//! The model payload is a JSON object `{prompt, context, conversation_history}`
//! where `context` carries the fields the prompt references. Structured
//! output runs through [`ResponseContract`]: an output value typed by the
//! field schema (when one exists for `output_field`) plus a
//! `selected_signals` list when the node declares several semantically
//! described emissions.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{emit_completion_signals, signal_options, NodeHandler};
use crate::contract::{self, ResponseContract};
use crate::conversation::{self, Conversation};
use crate::dispatcher::Activation;
use crate::errors::{ModelError, NodeError};
use crate::template::{self, View};
use crate::types::{EventType, FieldSchema, NodeConfig};

pub(crate) struct LlmNode;

#[async_trait]
impl NodeHandler for LlmNode {
    async fn run(
        &self,
        activation: &mut Activation<'_>,
        config: &NodeConfig,
    ) -> Result<(), NodeError> {
        let prompt_template = config.prompt.as_deref().ok_or(NodeError::Config {
            message: "llm node is missing 'prompt'".into(),
        })?;
        let identity = config.identity.as_deref();
        let main_id = activation.main_execution_id().to_string();
        let backends = activation.engine.backends.clone();

        backends
            .log_event(
                &activation.execution_id,
                EventType::LlmCall,
                json!({ "identity": identity }),
            )
            .await;

        // 1. Render the prompt and collect the referenced context fields.
        let rendered_prompt = {
            let view = View::new(activation.context());
            template::render(prompt_template, &view)?
        };
        let (context_payload, warnings) = prompt_context(activation, prompt_template);
        if !warnings.is_empty() {
            backends
                .log_event(
                    &activation.execution_id,
                    EventType::ContextWarning,
                    json!({ "warnings": warnings }),
                )
                .await;
        }

        // 2. Build the response contract.
        let output_schema =
            lookup_output_schema(activation, &main_id, config.output_field.as_deref()).await?;
        let contract = ResponseContract {
            output_field: config.output_field.clone(),
            output_schema,
            signal_options: signal_options(config),
        };
        let schema = contract.schema_value();

        let mut conversation = Conversation::load(&backends, &main_id, identity).await?;
        let base_prompt = model_payload(&rendered_prompt, &context_payload, &conversation);

        // 3. Call the model; every attempt counts.
        let deltas = &mut activation.deltas;
        let resolved = contract::resolve_call(
            activation.engine.model.as_ref(),
            config,
            &base_prompt,
            &schema,
            config.retry_budget(),
            |text| contract.parse(text),
            || deltas.llm_calls += 1,
        )
        .await;

        match resolved {
            Ok(reply) => {
                // 4. Store the primary response.
                if let Some(output_field) = &config.output_field {
                    activation.set_field(output_field, reply.output.clone())?;
                }

                // Identity gates shared history accumulation.
                conversation
                    .save_turn(&backends, &rendered_prompt, &value_as_text(&reply.output))
                    .await?;

                // 5. Emissions: template conditions pre-empt selection.
                emit_completion_signals(activation, config, reply.selected_signals)
            }
            Err(error) => handle_model_failure(activation, config, error).await,
        }
    }
}

/// Route a model failure through `llm_failure_signal` or surface it as
/// fatal. Shared with the agent node.
pub(super) async fn handle_model_failure(
    activation: &mut Activation<'_>,
    config: &NodeConfig,
    error: ModelError,
) -> Result<(), NodeError> {
    if let Some(signal) = &config.llm_failure_signal {
        activation.deltas.errors += 1;
        activation
            .engine
            .backends
            .log_event(
                &activation.execution_id,
                EventType::NodeError,
                json!({
                    "node_type": config.node_type.as_str(),
                    "error": error.to_string(),
                }),
            )
            .await;
        activation.emit(signal.clone());
        Ok(())
    } else {
        Err(NodeError::Model(error))
    }
}

/// Current values of the context fields the prompt references, plus
/// warnings for anything missing or empty.
pub(super) fn prompt_context(
    activation: &Activation<'_>,
    prompt_template: &str,
) -> (Map<String, Value>, Vec<String>) {
    let mut payload = Map::new();
    let mut warnings = Vec::new();
    for field in template::referenced_context_fields(prompt_template) {
        match activation.context().get_field(&field) {
            None => warnings.push(format!(
                "context field '{field}' referenced in prompt but not found in context"
            )),
            Some(Value::Null) => {
                warnings.push(format!("context field '{field}' is null"));
                payload.insert(field, Value::Null);
            }
            Some(Value::String(s)) if s.is_empty() => {
                warnings.push(format!("context field '{field}' is an empty string"));
                payload.insert(field, Value::String(String::new()));
            }
            Some(value) => {
                payload.insert(field, value.clone());
            }
        }
    }
    (payload, warnings)
}

/// The JSON payload handed to the model caller.
fn model_payload(
    rendered_prompt: &str,
    context_payload: &Map<String, Value>,
    conversation: &Conversation,
) -> String {
    let context_str = if context_payload.is_empty() {
        String::new()
    } else {
        serde_json::to_string_pretty(context_payload).unwrap_or_default()
    };
    json!({
        "prompt": rendered_prompt,
        "context": context_str,
        "conversation_history": conversation::format_history(&conversation.history),
    })
    .to_string()
}

/// Schema entry for the output field, when one is declared for this tree.
pub(super) async fn lookup_output_schema(
    activation: &Activation<'_>,
    main_execution_id: &str,
    output_field: Option<&str>,
) -> Result<Option<FieldSchema>, NodeError> {
    let (Some(output_field), Some(schema_backend)) =
        (output_field, &activation.engine.backends.context_schema)
    else {
        return Ok(None);
    };
    let schema = schema_backend
        .get_context_schema(main_execution_id)
        .await?
        .unwrap_or_default();
    Ok(schema.get(output_field).cloned())
}

pub(super) fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Tool node — one function call with retries and result routing.
//!
//! Arguments come from inline `parameters` (template-rendered against
//! context) or from `context_parameter_field` (a context field whose
//! current value is a mapping; with `process_accumulated`, the field's
//! full history as a positional list). Emissions evaluate against a
//! two-name view: `result` and `context`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{evaluate_template_emissions, NodeHandler};
use crate::dispatcher::Activation;
use crate::engine::ToolBinding;
use crate::errors::{NodeError, ToolError};
use crate::template::{self, View};
use crate::types::{EventType, NodeConfig};

pub(crate) struct ToolNode;

#[async_trait]
impl NodeHandler for ToolNode {
    async fn run(
        &self,
        activation: &mut Activation<'_>,
        config: &NodeConfig,
    ) -> Result<(), NodeError> {
        // 1. Resolve the tool. Built-ins carry no registry entry: they run
        //    without retries and without a failure signal.
        let tool_name = config.tool_name.as_deref().ok_or(NodeError::Config {
            message: "tool node is missing 'tool_name'".into(),
        })?;
        let binding =
            activation
                .engine
                .bind_tool(tool_name)
                .ok_or_else(|| NodeError::Config {
                    message: format!("tool '{tool_name}' is not registered"),
                })?;
        let (max_retries, failure_signal, process_accumulated) = match &binding {
            ToolBinding::Registered(spec) => (
                spec.max_retries,
                spec.failure_signal.clone(),
                spec.process_accumulated,
            ),
            ToolBinding::Builtin => (0, None, false),
        };

        // 2. Build arguments.
        let args = build_arguments(activation, config, process_accumulated)?;

        activation
            .engine
            .backends
            .log_event(
                &activation.execution_id,
                EventType::ToolCall,
                json!({ "tool_name": tool_name, "max_retries": max_retries }),
            )
            .await;

        // 3. Call with retries; every attempt counts.
        let mut last_error = String::new();
        for attempt in 0..=max_retries {
            activation.deltas.tool_calls += 1;
            let outcome = match &binding {
                ToolBinding::Registered(spec) => spec.function.call(args.clone()).await,
                ToolBinding::Builtin => {
                    crate::builtins::call(activation, tool_name, args.clone()).await
                }
            };

            match outcome {
                Ok(result) => {
                    // 4. Store the result and route on it.
                    if let Some(output_field) = &config.output_field {
                        activation.set_field(output_field, result.clone())?;
                    }
                    let view = View::with_result(activation.context(), &result);
                    let signals = evaluate_template_emissions(&config.event_emissions, &view)?;
                    activation.emit_all(signals);
                    return Ok(());
                }
                Err(error) => {
                    last_error = error.to_string();
                    tracing::warn!(
                        tool = tool_name,
                        attempt = attempt + 1,
                        error = %last_error,
                        "tool attempt failed"
                    );
                }
            }
        }

        // 5. Retries exhausted: absorb through the failure signal or raise.
        if let Some(signal) = failure_signal {
            if let Some(output_field) = &config.output_field {
                activation.set_field(output_field, Value::String(last_error.clone()))?;
            }
            activation.deltas.errors += 1;
            activation
                .engine
                .backends
                .log_event(
                    &activation.execution_id,
                    EventType::NodeError,
                    json!({ "tool_name": tool_name, "error": last_error }),
                )
                .await;
            activation.emit(signal);
            Ok(())
        } else {
            Err(NodeError::Tool(ToolError::Execution {
                message: format!("'{tool_name}' failed after {} attempts: {last_error}", max_retries + 1),
            }))
        }
    }
}

/// Resolve the tool's argument value from node config and context.
fn build_arguments(
    activation: &Activation<'_>,
    config: &NodeConfig,
    process_accumulated: bool,
) -> Result<Value, NodeError> {
    if let Some(parameters) = &config.parameters {
        let view = View::new(activation.context());
        return Ok(render_parameters(parameters, &view)?);
    }

    if let Some(field) = &config.context_parameter_field {
        let ctx = activation.context();
        if process_accumulated {
            return Ok(Value::Array(ctx.get_accumulated(field)));
        }
        return match ctx.get_field(field) {
            None => Ok(json!({})),
            Some(Value::String(raw)) => {
                // A string-valued field is parsed as a YAML/JSON mapping.
                let parsed: Value = serde_yaml::from_str(raw).map_err(|e| {
                    NodeError::Tool(ToolError::Arguments {
                        message: format!("field '{field}' is not a parsable mapping: {e}"),
                    })
                })?;
                if parsed.is_object() {
                    Ok(parsed)
                } else {
                    Err(NodeError::Tool(ToolError::Arguments {
                        message: format!("field '{field}' must hold a mapping of arguments"),
                    }))
                }
            }
            Some(value) if value.is_object() => Ok(value.clone()),
            Some(value) => Err(NodeError::Tool(ToolError::Arguments {
                message: format!(
                    "field '{field}' must hold a mapping of arguments, got {value}"
                ),
            })),
        };
    }

    Ok(json!({}))
}

/// Render template strings inside an inline parameter mapping, recursively.
fn render_parameters(params: &Value, view: &View<'_>) -> Result<Value, NodeError> {
    Ok(match params {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), render_parameters(value, view)?);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_parameters(item, view))
                .collect::<Result<_, _>>()?,
        ),
        Value::String(s) if s.contains("{{") => Value::String(template::render(s, view)?),
        other => other.clone(),
    })
}

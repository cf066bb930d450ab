//! Agent node — a bounded loop of model calls that may invoke tools.
//!
//! Each turn the model sees the task, the referenced context, and the loop
//! transcript, and must either select one of the node's tools with a JSON
//! argument object or produce the final response. Tool results and errors
//! feed back into the transcript; the model decides when to finish. The
//! engine-level `max_agent_turns` ceiling is the only hard bound beyond
//! the node's `retries` budget.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::llm::{handle_model_failure, lookup_output_schema, prompt_context, value_as_text};
use super::{emit_completion_signals, signal_options, NodeHandler};
use crate::contract::{self, AgentContract, AgentDecision, ResponseContract};
use crate::conversation::{self, Conversation};
use crate::dispatcher::Activation;
use crate::engine::ToolBinding;
use crate::errors::{ModelError, NodeError};
use crate::template::{self, View};
use crate::types::{EventType, Message, NodeConfig};

pub(crate) struct AgentNode;

#[async_trait]
impl NodeHandler for AgentNode {
    async fn run(
        &self,
        activation: &mut Activation<'_>,
        config: &NodeConfig,
    ) -> Result<(), NodeError> {
        let prompt_template = config.prompt.as_deref().ok_or(NodeError::Config {
            message: "agent node is missing 'prompt'".into(),
        })?;
        let identity = config.identity.as_deref();
        let main_id = activation.main_execution_id().to_string();
        let backends = activation.engine.backends.clone();

        backends
            .log_event(
                &activation.execution_id,
                EventType::LlmCall,
                json!({ "stage": "agent", "identity": identity }),
            )
            .await;

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

        // 1. Build the per-turn contract: available tools + final response.
        let tool_names = config.tools.clone().unwrap_or_default();
        let mut tool_choices = Vec::with_capacity(tool_names.len());
        for name in &tool_names {
            let choice = activation
                .engine
                .tool_choice(name)
                .ok_or_else(|| NodeError::Config {
                    message: format!("agent tool '{name}' is not registered"),
                })?;
            tool_choices.push(choice);
        }
        let output_schema =
            lookup_output_schema(activation, &main_id, config.output_field.as_deref()).await?;
        let agent_contract = AgentContract {
            tools: tool_choices,
            response: ResponseContract {
                output_field: config.output_field.clone(),
                output_schema,
                signal_options: signal_options(config),
            },
        };
        let schema = agent_contract.schema_value();

        let mut conversation = Conversation::load(&backends, &main_id, identity).await?;
        let mut transcript: Vec<Message> = conversation.history.clone();
        let mut loop_errors: Vec<String> = Vec::new();
        let retries = config.retry_budget();
        let mut retry_count: u32 = 0;
        let max_turns = activation.engine.max_agent_turns;

        // 2. Turn loop.
        for turn in 0..max_turns {
            if retry_count > retries {
                break;
            }

            let base_prompt =
                turn_payload(&rendered_prompt, &context_payload, &transcript, &loop_errors);
            let deltas = &mut activation.deltas;
            let resolved = contract::resolve_call(
                activation.engine.model.as_ref(),
                config,
                &base_prompt,
                &schema,
                retries,
                |text| agent_contract.parse(text),
                || deltas.llm_calls += 1,
            )
            .await;
            let decision = match resolved {
                Ok(decision) => decision,
                Err(error) => return handle_model_failure(activation, config, error).await,
            };

            match decision {
                AgentDecision::Finish(reply) => {
                    if let Some(output_field) = &config.output_field {
                        activation.set_field(output_field, reply.output.clone())?;
                    }
                    conversation
                        .save_turn(&backends, &rendered_prompt, &value_as_text(&reply.output))
                        .await?;
                    return emit_completion_signals(activation, config, reply.selected_signals);
                }
                AgentDecision::CallTool {
                    tool_name,
                    arguments,
                } => {
                    if !tool_names.contains(&tool_name) {
                        let message = format!("tool '{tool_name}' not found or not available");
                        tracing::warn!(turn, tool = %tool_name, "agent selected unknown tool");
                        loop_errors.push(message.clone());
                        let entry = Message::new("system_error", message);
                        transcript.push(entry.clone());
                        conversation.append(&backends, vec![entry]).await?;
                        retry_count += 1;
                        continue;
                    }

                    backends
                        .log_event(
                            &activation.execution_id,
                            EventType::AgentToolCall,
                            json!({ "tool_name": &tool_name, "arguments": &arguments }),
                        )
                        .await;

                    let entry = match run_agent_tool(activation, &tool_name, arguments).await {
                        AgentToolOutcome::Success(result) => {
                            Message::tool(&tool_name, value_as_text(&result))
                        }
                        AgentToolOutcome::Absorbed { signal, error } => {
                            // The tool's failure signal fires, the loop
                            // keeps going on the error note.
                            activation.deltas.errors += 1;
                            activation.emit(signal);
                            tool_error_entry(&tool_name, &error)
                        }
                        AgentToolOutcome::Failed(error) => {
                            retry_count += 1;
                            loop_errors.push(format!("error executing {tool_name}: {error}"));
                            tool_error_entry(&tool_name, &error)
                        }
                    };
                    transcript.push(entry.clone());
                    conversation.append(&backends, vec![entry]).await?;
                }
            }
        }

        // 3. Loop exhausted without a final response.
        let mut message = if retry_count > retries {
            format!("agent exceeded its retry budget ({retries})")
        } else {
            format!("agent reached the turn ceiling ({max_turns}) without finishing")
        };
        if let Some(last) = loop_errors.last() {
            message.push_str(&format!("; last error: {last}"));
        }
        handle_model_failure(activation, config, ModelError::Call { message }).await
    }
}

enum AgentToolOutcome {
    Success(Value),
    Absorbed { signal: String, error: String },
    Failed(String),
}

/// Execute a tool on the agent's behalf with the registry's retry policy.
async fn run_agent_tool(
    activation: &mut Activation<'_>,
    tool_name: &str,
    arguments: Value,
) -> AgentToolOutcome {
    let Some(binding) = activation.engine.bind_tool(tool_name) else {
        return AgentToolOutcome::Failed(format!("tool '{tool_name}' is not registered"));
    };
    let (max_retries, failure_signal) = match &binding {
        ToolBinding::Registered(spec) => (spec.max_retries, spec.failure_signal.clone()),
        ToolBinding::Builtin => (0, None),
    };

    let mut last_error = String::new();
    for _ in 0..=max_retries {
        activation.deltas.tool_calls += 1;
        let outcome = match &binding {
            ToolBinding::Registered(spec) => spec.function.call(arguments.clone()).await,
            ToolBinding::Builtin => {
                crate::builtins::call(activation, tool_name, arguments.clone()).await
            }
        };
        match outcome {
            Ok(result) => return AgentToolOutcome::Success(result),
            Err(error) => last_error = error.to_string(),
        }
    }

    match failure_signal {
        Some(signal) => AgentToolOutcome::Absorbed {
            signal,
            error: last_error,
        },
        None => AgentToolOutcome::Failed(last_error),
    }
}

fn tool_error_entry(tool_name: &str, error: &str) -> Message {
    Message {
        role: "tool_error".into(),
        content: format!("error executing {tool_name}: {error}"),
        tool_name: Some(tool_name.to_string()),
    }
}

/// The JSON payload for one agent turn.
fn turn_payload(
    task: &str,
    context_payload: &Map<String, Value>,
    transcript: &[Message],
    loop_errors: &[String],
) -> String {
    let context_str = if context_payload.is_empty() {
        String::new()
    } else {
        serde_json::to_string_pretty(context_payload).unwrap_or_default()
    };
    let instructions = if loop_errors.is_empty() {
        "Decide the next step: call a tool or finish with the final response.".to_string()
    } else {
        format!(
            "Decide the next step: call a tool or finish with the final response. \
             Previous errors to account for: {}",
            loop_errors.join("; ")
        )
    };
    json!({
        "instructions": instructions,
        "task_description": task,
        "context": context_str,
        "conversation_history": conversation::format_history(transcript),
    })
    .to_string()
}

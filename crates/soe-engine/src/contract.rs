//! Structured-output contracts for model calls.
//!
//! The model caller returns raw text; everything around it lives
//! here: building JSON-schema format instructions, cleaning the response
//! (`<think>` tags, markdown fences), extracting balanced JSON, validating
//! it against the contract, and feeding validation errors back into retry
//! prompts.

use serde_json::{json, Map, Value};

use crate::errors::ModelError;
use crate::traits::ModelCaller;
use crate::types::{FieldSchema, NodeConfig, SchemaType};

// ---------------------------------------------------------------------------
// Contract definitions
// ---------------------------------------------------------------------------

/// One selectable signal: its name plus the plain-text condition used as
/// its description.
#[derive(Debug, Clone)]
pub struct SignalOption {
    pub name: String,
    pub description: String,
}

/// Contract for a plain model call: an output value (optionally typed by a
/// field schema) and, when the node declares multiple semantically-selected
/// emissions, a `selected_signals` list.
#[derive(Debug, Clone, Default)]
pub struct ResponseContract {
    pub output_field: Option<String>,
    pub output_schema: Option<FieldSchema>,
    pub signal_options: Vec<SignalOption>,
}

/// Parsed reply satisfying a [`ResponseContract`].
#[derive(Debug, Clone)]
pub struct ContractReply {
    pub output: Value,
    pub selected_signals: Vec<String>,
}

impl ResponseContract {
    fn output_key(&self) -> &str {
        self.output_field.as_deref().unwrap_or("output")
    }

    /// The contract as a JSON schema object.
    pub fn schema_value(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        let output_schema = match &self.output_schema {
            Some(schema) => schema_to_json(schema),
            None if self.output_field.is_some() => {
                json!({"description": format!("The {} value", self.output_key())})
            }
            None => json!({"type": "string", "description": "The final output/result"}),
        };
        properties.insert(self.output_key().to_string(), output_schema);
        required.push(json!(self.output_key()));

        if !self.signal_options.is_empty() {
            let names: Vec<&str> = self.signal_options.iter().map(|o| o.name.as_str()).collect();
            let mut lines = vec!["Select every signal whose description applies:".to_string()];
            for option in &self.signal_options {
                if option.description.is_empty() {
                    lines.push(format!("- {}", option.name));
                } else {
                    lines.push(format!("- {}: {}", option.name, option.description));
                }
            }
            properties.insert(
                "selected_signals".into(),
                json!({
                    "type": "array",
                    "items": {"type": "string", "enum": names},
                    "description": lines.join("\n")
                }),
            );
            required.push(json!("selected_signals"));
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }

    /// Parse and validate a raw model response.
    pub fn parse(&self, text: &str) -> Result<ContractReply, ModelError> {
        let value = parse_json_response(text)?;
        let object = value.as_object().ok_or_else(|| ModelError::Contract {
            message: "response is not a JSON object".into(),
        })?;

        let output = object
            .get(self.output_key())
            .cloned()
            .ok_or_else(|| ModelError::Contract {
                message: format!("response is missing required field '{}'", self.output_key()),
            })?;

        if let Some(schema) = &self.output_schema {
            validate_value(&output, schema).map_err(|message| ModelError::Contract {
                message: format!("field '{}': {message}", self.output_key()),
            })?;
        }

        let selected_signals = if self.signal_options.is_empty() {
            Vec::new()
        } else {
            let raw = object.get("selected_signals").cloned().unwrap_or(json!([]));
            let items = raw.as_array().ok_or_else(|| ModelError::Contract {
                message: "'selected_signals' must be an array of signal names".into(),
            })?;
            let mut signals = Vec::with_capacity(items.len());
            for item in items {
                let name = item.as_str().ok_or_else(|| ModelError::Contract {
                    message: "'selected_signals' entries must be strings".into(),
                })?;
                if !self.signal_options.iter().any(|o| o.name == name) {
                    return Err(ModelError::Contract {
                        message: format!("'{name}' is not one of the declared signals"),
                    });
                }
                signals.push(name.to_string());
            }
            signals
        };

        Ok(ContractReply {
            output,
            selected_signals,
        })
    }
}

// ---------------------------------------------------------------------------
// Agent contract
// ---------------------------------------------------------------------------

/// One tool the agent may select.
#[derive(Debug, Clone)]
pub struct ToolChoice {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Per-turn agent contract: call a tool or produce the final response.
#[derive(Debug, Clone)]
pub struct AgentContract {
    pub tools: Vec<ToolChoice>,
    pub response: ResponseContract,
}

/// What the model decided to do this turn.
#[derive(Debug, Clone)]
pub enum AgentDecision {
    CallTool { tool_name: String, arguments: Value },
    Finish(ContractReply),
}

impl AgentContract {
    pub fn schema_value(&self) -> Value {
        let tool_names: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
        let tool_docs: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters
                })
            })
            .collect();

        let mut finish_schema = self.response.schema_value();
        if let Some(props) = finish_schema
            .get_mut("properties")
            .and_then(Value::as_object_mut)
        {
            props.insert("action".into(), json!({"const": "finish"}));
        }

        json!({
            "oneOf": [
                {
                    "type": "object",
                    "description": "Call one of the available tools",
                    "properties": {
                        "action": {"const": "call_tool"},
                        "tool_name": {"type": "string", "enum": tool_names},
                        "arguments": {"type": "object"}
                    },
                    "required": ["action", "tool_name", "arguments"],
                    "available_tools": tool_docs
                },
                finish_schema
            ]
        })
    }

    pub fn parse(&self, text: &str) -> Result<AgentDecision, ModelError> {
        let value = parse_json_response(text)?;
        let object = value.as_object().ok_or_else(|| ModelError::Contract {
            message: "response is not a JSON object".into(),
        })?;

        match object.get("action").and_then(Value::as_str) {
            Some("call_tool") => {
                let tool_name = object
                    .get("tool_name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::Contract {
                        message: "'call_tool' response is missing 'tool_name'".into(),
                    })?
                    .to_string();
                let arguments = object.get("arguments").cloned().unwrap_or(json!({}));
                if !arguments.is_object() {
                    return Err(ModelError::Contract {
                        message: "'arguments' must be a JSON object".into(),
                    });
                }
                Ok(AgentDecision::CallTool {
                    tool_name,
                    arguments,
                })
            }
            Some("finish") | None => self.response.parse(text).map(AgentDecision::Finish),
            Some(other) => Err(ModelError::Contract {
                message: format!("unknown action '{other}' (expected 'call_tool' or 'finish')"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Model call loop
// ---------------------------------------------------------------------------

/// Format instructions appended to every contracted prompt.
pub fn format_instructions(schema: &Value) -> String {
    format!(
        "Respond ONLY with a valid JSON object matching this schema:\n{}\n\
         Do not return the schema itself. Return a JSON instance of the schema.",
        serde_json::to_string(schema).unwrap_or_default()
    )
}

/// Execute the call loop: call the model, parse against the contract, feed
/// validation errors back, retry up to `1 + retries` attempts.
///
/// `on_attempt` fires before each model call — the dispatcher counts
/// `llm_calls` through it, so attempts are recorded even when the loop
/// ultimately fails.
pub(crate) async fn resolve_call<T>(
    caller: &dyn ModelCaller,
    node: &NodeConfig,
    base_prompt: &str,
    schema: &Value,
    retries: u32,
    parse: impl Fn(&str) -> Result<T, ModelError>,
    mut on_attempt: impl FnMut(),
) -> Result<T, ModelError> {
    let mut prompt = format!("{base_prompt}\n\n{}", format_instructions(schema));
    let mut last_error = String::new();

    for attempt in 0..=retries {
        on_attempt();
        let text = caller.complete(&prompt, node).await?;
        match parse(&text) {
            Ok(parsed) => return Ok(parsed),
            Err(error) => {
                tracing::debug!(attempt, error = %error, "model response failed contract");
                last_error = error.to_string();
                if attempt < retries {
                    prompt.push_str(&format!(
                        "\n\nPrevious response: {text}\n\nValidation failed: {last_error}\n\
                         Respond with valid JSON."
                    ));
                }
            }
        }
    }

    Err(ModelError::RetriesExhausted {
        attempts: retries + 1,
        last_error,
    })
}

// ---------------------------------------------------------------------------
// Response cleaning and JSON extraction
// ---------------------------------------------------------------------------

fn parse_json_response(text: &str) -> Result<Value, ModelError> {
    let cleaned = strip_thinking(text);
    let json_str = extract_json(cleaned.trim());
    serde_json::from_str(json_str).map_err(|e| ModelError::Contract {
        message: format!("invalid JSON: {e}"),
    })
}

/// Remove `<think>…</think>` blocks emitted by reasoning models.
fn strip_thinking(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("<think>") {
        out.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => return out, // unterminated block: drop the tail
        }
    }
    out.push_str(rest);
    out
}

/// Extract the JSON payload: a fenced block if present, otherwise the first
/// balanced object or array.
fn extract_json(text: &str) -> &str {
    if let Some(fenced) = extract_fenced(text) {
        return fenced;
    }
    for (i, c) in text.char_indices() {
        if c == '{' || c == '[' {
            return extract_balanced(text, i);
        }
    }
    text
}

fn extract_fenced(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    let inner = body[..close].trim();
    (inner.starts_with('{') || inner.starts_with('[')).then_some(inner)
}

fn extract_balanced(text: &str, start: usize) -> &str {
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return &text[start..=i];
                }
            }
            _ => {}
        }
    }
    &text[start..]
}

// ---------------------------------------------------------------------------
// Schema projection and validation
// ---------------------------------------------------------------------------

/// Project a [`FieldSchema`] into a JSON-schema fragment.
pub fn schema_to_json(schema: &FieldSchema) -> Value {
    let mut out = Map::new();
    let type_name = match schema.field_type {
        SchemaType::List => "array",
        other => other.as_str(),
    };
    out.insert("type".into(), json!(type_name));
    if let Some(description) = &schema.description {
        out.insert("description".into(), json!(description));
    }
    if let Some(properties) = &schema.properties {
        let props: Map<String, Value> = properties
            .iter()
            .map(|(k, v)| (k.clone(), schema_to_json(v)))
            .collect();
        out.insert("properties".into(), Value::Object(props));
    }
    if let Some(items) = &schema.items {
        out.insert("items".into(), schema_to_json(items));
    }
    Value::Object(out)
}

/// Validate a value against a field schema. Returns a human-readable
/// mismatch description suitable for retry feedback.
pub fn validate_value(value: &Value, schema: &FieldSchema) -> Result<(), String> {
    match schema.field_type {
        SchemaType::String => {
            if !value.is_string() {
                return Err(format!("expected a string, got {}", kind_of(value)));
            }
        }
        SchemaType::Integer => {
            if !value.is_i64() && !value.is_u64() {
                return Err(format!("expected an integer, got {}", kind_of(value)));
            }
        }
        SchemaType::Number => {
            if !value.is_number() {
                return Err(format!("expected a number, got {}", kind_of(value)));
            }
        }
        SchemaType::Boolean => {
            if !value.is_boolean() {
                return Err(format!("expected a boolean, got {}", kind_of(value)));
            }
        }
        SchemaType::Object => {
            let object = value
                .as_object()
                .ok_or_else(|| format!("expected an object, got {}", kind_of(value)))?;
            if let Some(properties) = &schema.properties {
                for (name, property) in properties {
                    if let Some(v) = object.get(name) {
                        validate_value(v, property).map_err(|e| format!("{name}: {e}"))?;
                    }
                }
            }
        }
        SchemaType::List => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("expected a list, got {}", kind_of(value)))?;
            if let Some(item_schema) = &schema.items {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item, item_schema).map_err(|e| format!("[{i}]: {e}"))?;
                }
            }
        }
    }
    Ok(())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

//! Engine-provided built-in tools.
//!
//! Every execution can call these without registration: they inspect and
//! mutate the current execution's registry/identities/schema snapshots,
//! read and write context, and invoke other tools dynamically. Registry
//! mutations persist immediately so a mid-execution crash does not revert
//! them; they touch this execution's snapshot only, never a shared global.

mod docs;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use crate::config;
use crate::context::ExecutionContext;
use crate::contract::ToolChoice;
use crate::dispatcher::Activation;
use crate::errors::{BackendError, ToolError};
use crate::types::{FieldSchema, NodeConfig, WorkflowDef, WorkflowRegistry, RESERVED_PREFIX};

/// Names of all built-in tools, in the order they are documented.
pub const BUILTIN_TOOL_NAMES: &[&str] = &[
    "soe_explore_docs",
    "soe_get_workflows",
    "soe_inject_workflow",
    "soe_inject_node",
    "soe_remove_workflow",
    "soe_remove_node",
    "soe_add_signal",
    "soe_get_context",
    "soe_update_context",
    "soe_copy_context",
    "soe_list_contexts",
    "soe_get_identities",
    "soe_inject_identity",
    "soe_remove_identity",
    "soe_get_context_schema",
    "soe_inject_context_schema_field",
    "soe_remove_context_schema_field",
    "soe_get_available_tools",
    "soe_call_tool",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_TOOL_NAMES.contains(&name)
}

/// Tool-selection descriptor for agent contracts.
pub(crate) fn descriptor(name: &str) -> Option<ToolChoice> {
    let (description, parameters) = match name {
        "soe_explore_docs" => (
            "Explore the engine documentation (list/read/tree/search/get_tags)",
            json!({"type": "object", "properties": {
                "path": {"type": "string"},
                "action": {"type": "string", "enum": ["list", "read", "tree", "search", "get_tags"]},
                "query": {"type": "string"},
                "tag": {"type": "string"}
            }, "required": ["path", "action"]}),
        ),
        "soe_get_workflows" => (
            "Return this execution's workflow registry",
            json!({"type": "object", "properties": {}}),
        ),
        "soe_inject_workflow" => (
            "Add or replace a workflow in this execution's registry",
            json!({"type": "object", "properties": {
                "workflow_name": {"type": "string"},
                "workflow_config_data": {"type": "string", "description": "YAML or JSON workflow definition"}
            }, "required": ["workflow_name", "workflow_config_data"]}),
        ),
        "soe_inject_node" => (
            "Inject a node configuration into an existing workflow",
            json!({"type": "object", "properties": {
                "workflow_name": {"type": "string"},
                "node_name": {"type": "string"},
                "node_config_data": {"type": "string", "description": "YAML or JSON node configuration"}
            }, "required": ["workflow_name", "node_name", "node_config_data"]}),
        ),
        "soe_remove_workflow" => (
            "Remove a workflow from this execution's registry",
            json!({"type": "object", "properties": {
                "workflow_name": {"type": "string"}
            }, "required": ["workflow_name"]}),
        ),
        "soe_remove_node" => (
            "Remove a node from a workflow",
            json!({"type": "object", "properties": {
                "workflow_name": {"type": "string"},
                "node_name": {"type": "string"}
            }, "required": ["workflow_name", "node_name"]}),
        ),
        "soe_add_signal" => (
            "Add or update a signal on a node's event_emissions",
            json!({"type": "object", "properties": {
                "workflow_name": {"type": "string"},
                "node_name": {"type": "string"},
                "signal_name": {"type": "string"},
                "condition": {"type": "string"}
            }, "required": ["workflow_name", "node_name", "signal_name", "condition"]}),
        ),
        "soe_get_context" => (
            "Read context fields from the current execution",
            json!({"type": "object", "properties": {
                "field": {"type": "string"},
                "fields": {"type": "array", "items": {"type": "string"}}
            }}),
        ),
        "soe_update_context" => (
            "Write context fields (each value appends to the field's history)",
            json!({"type": "object", "properties": {
                "updates": {"type": "object"}
            }, "required": ["updates"]}),
        ),
        "soe_copy_context" => (
            "Copy context fields between executions",
            json!({"type": "object", "properties": {
                "source_execution_id": {"type": "string"},
                "target_execution_id": {"type": "string"},
                "fields": {"type": "object", "description": "source field -> target field"},
                "all_fields": {"type": "boolean"}
            }}),
        ),
        "soe_list_contexts" => (
            "List execution ids with stored contexts",
            json!({"type": "object", "properties": {
                "include_current": {"type": "boolean"}
            }}),
        ),
        "soe_get_identities" => (
            "Return the identities shared by this orchestration tree",
            json!({"type": "object", "properties": {}}),
        ),
        "soe_inject_identity" => (
            "Add or replace an identity (name -> system prompt)",
            json!({"type": "object", "properties": {
                "identity_name": {"type": "string"},
                "system_prompt": {"type": "string"}
            }, "required": ["identity_name", "system_prompt"]}),
        ),
        "soe_remove_identity" => (
            "Remove an identity",
            json!({"type": "object", "properties": {
                "identity_name": {"type": "string"}
            }, "required": ["identity_name"]}),
        ),
        "soe_get_context_schema" => (
            "Return the context field schema for this orchestration tree",
            json!({"type": "object", "properties": {}}),
        ),
        "soe_inject_context_schema_field" => (
            "Add or replace a context schema field",
            json!({"type": "object", "properties": {
                "field_name": {"type": "string"},
                "field_schema": {"type": "string", "description": "YAML or JSON schema entry"}
            }, "required": ["field_name", "field_schema"]}),
        ),
        "soe_remove_context_schema_field" => (
            "Remove a context schema field",
            json!({"type": "object", "properties": {
                "field_name": {"type": "string"}
            }, "required": ["field_name"]}),
        ),
        "soe_get_available_tools" => (
            "List every callable tool (registered and built-in)",
            json!({"type": "object", "properties": {}}),
        ),
        "soe_call_tool" => (
            "Invoke any registered or built-in tool by name",
            json!({"type": "object", "properties": {
                "tool_name": {"type": "string"},
                "arguments": {"description": "Argument object, or a JSON string of one"}
            }, "required": ["tool_name"]}),
        ),
        _ => return None,
    };
    Some(ToolChoice {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    })
}

/// Invoke a built-in by name. `soe_call_tool` may recurse back in here,
/// hence the boxed future.
pub(crate) fn call<'a, 'e: 'a>(
    activation: &'a mut Activation<'e>,
    name: &'a str,
    args: Value,
) -> BoxFuture<'a, Result<Value, ToolError>> {
    Box::pin(async move {
        match name {
            "soe_explore_docs" => {
                let path = require_str(&args, "path")?;
                let action = require_str(&args, "action")?;
                let text = docs::explore(path, action, opt_str(&args, "query"), opt_str(&args, "tag"))?;
                Ok(Value::String(text))
            }
            "soe_get_workflows" => {
                let registry = load_registry(activation).await?;
                serde_json::to_value(&registry).map_err(internal)
            }
            "soe_inject_workflow" => inject_workflow(activation, &args).await,
            "soe_inject_node" => inject_node(activation, &args).await,
            "soe_remove_workflow" => remove_workflow(activation, &args).await,
            "soe_remove_node" => remove_node(activation, &args).await,
            "soe_add_signal" => add_signal(activation, &args).await,
            "soe_get_context" => get_context(activation, &args).await,
            "soe_update_context" => update_context(activation, &args).await,
            "soe_copy_context" => copy_context(activation, &args).await,
            "soe_list_contexts" => list_contexts(activation, &args).await,
            "soe_get_identities" => {
                let identities = load_identities(activation).await?;
                serde_json::to_value(&identities).map_err(internal)
            }
            "soe_inject_identity" => inject_identity(activation, &args).await,
            "soe_remove_identity" => remove_identity(activation, &args).await,
            "soe_get_context_schema" => {
                let schema = load_schema(activation).await?;
                serde_json::to_value(&schema).map_err(internal)
            }
            "soe_inject_context_schema_field" => inject_schema_field(activation, &args).await,
            "soe_remove_context_schema_field" => remove_schema_field(activation, &args).await,
            "soe_get_available_tools" => Ok(available_tools(activation)),
            "soe_call_tool" => call_tool(activation, &args).await,
            other => Err(ToolError::NotFound { name: other.into() }),
        }
    })
}

// ---------------------------------------------------------------------------
// Registry tools
// ---------------------------------------------------------------------------

async fn load_registry(activation: &Activation<'_>) -> Result<WorkflowRegistry, ToolError> {
    activation
        .engine
        .load_registry(&activation.execution_id)
        .await
        .map_err(|e| ToolError::Execution {
            message: e.to_string(),
        })
}

async fn save_registry(
    activation: &Activation<'_>,
    registry: &WorkflowRegistry,
) -> Result<(), ToolError> {
    activation
        .engine
        .backends
        .workflow
        .save_workflows_registry(&activation.execution_id, registry)
        .await
        .map_err(backend_err)
}

async fn inject_workflow(
    activation: &mut Activation<'_>,
    args: &Value,
) -> Result<Value, ToolError> {
    let workflow_name = require_str(args, "workflow_name")?;
    let raw = require_str(args, "workflow_config_data")?;
    let workflow: WorkflowDef = serde_yaml::from_str(raw).map_err(|e| ToolError::Arguments {
        message: format!("workflow definition must be a YAML/JSON mapping: {e}"),
    })?;

    let mut registry = load_registry(activation).await?;
    registry.insert(workflow_name.to_string(), workflow);

    let engine = activation.engine;
    config::validate_registry(&registry, &|name| engine.tool_exists(name)).map_err(|e| {
        ToolError::Arguments { message: e.message }
    })?;

    save_registry(activation, &registry).await?;
    Ok(json!({
        "injected": true,
        "workflow_name": workflow_name,
    }))
}

async fn inject_node(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let workflow_name = require_str(args, "workflow_name")?;
    let node_name = require_str(args, "node_name")?;
    let raw = require_str(args, "node_config_data")?;
    let node: NodeConfig = serde_yaml::from_str(raw).map_err(|e| ToolError::Arguments {
        message: format!("node configuration must be a YAML/JSON mapping: {e}"),
    })?;

    let mut registry = load_registry(activation).await?;
    let engine = activation.engine;
    config::validate_node(&node, &registry, &|name| engine.tool_exists(name))
        .map_err(|e| ToolError::Arguments { message: e.message })?;

    let workflow = registry
        .get_mut(workflow_name)
        .ok_or_else(|| not_found("workflow", workflow_name))?;
    workflow.insert(node_name.to_string(), node);

    save_registry(activation, &registry).await?;
    Ok(json!({
        "injected": true,
        "workflow_name": workflow_name,
        "node_name": node_name,
    }))
}

async fn remove_workflow(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let workflow_name = require_str(args, "workflow_name")?;
    let mut registry = load_registry(activation).await?;
    if registry.shift_remove(workflow_name).is_none() {
        return Err(not_found("workflow", workflow_name));
    }
    save_registry(activation, &registry).await?;
    Ok(json!({ "removed": true, "workflow_name": workflow_name }))
}

async fn remove_node(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let workflow_name = require_str(args, "workflow_name")?;
    let node_name = require_str(args, "node_name")?;
    let mut registry = load_registry(activation).await?;
    let workflow = registry
        .get_mut(workflow_name)
        .ok_or_else(|| not_found("workflow", workflow_name))?;
    if workflow.shift_remove(node_name).is_none() {
        return Err(not_found("node", node_name));
    }
    save_registry(activation, &registry).await?;
    Ok(json!({
        "removed": true,
        "workflow_name": workflow_name,
        "node_name": node_name,
    }))
}

async fn add_signal(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let workflow_name = require_str(args, "workflow_name")?;
    let node_name = require_str(args, "node_name")?;
    let signal_name = require_str(args, "signal_name")?;
    let condition = require_str(args, "condition")?;

    let mut registry = load_registry(activation).await?;
    let workflow = registry
        .get_mut(workflow_name)
        .ok_or_else(|| not_found("workflow", workflow_name))?;
    let node = workflow
        .get_mut(node_name)
        .ok_or_else(|| not_found("node", node_name))?;

    let status = match node
        .event_emissions
        .iter_mut()
        .find(|e| e.signal_name == signal_name)
    {
        Some(existing) => {
            existing.condition = Some(condition.to_string());
            "updated"
        }
        None => {
            node.event_emissions.push(crate::types::EmissionDef {
                signal_name: signal_name.to_string(),
                condition: Some(condition.to_string()),
            });
            "added"
        }
    };

    save_registry(activation, &registry).await?;
    Ok(json!({ "status": status, "signal_name": signal_name, "node_name": node_name }))
}

// ---------------------------------------------------------------------------
// Context tools
// ---------------------------------------------------------------------------

async fn load_execution_context(
    activation: &Activation<'_>,
    execution_id: &str,
) -> Result<ExecutionContext, ToolError> {
    activation
        .engine
        .backends
        .context
        .get_context(execution_id)
        .await
        .map_err(backend_err)?
        .ok_or_else(|| ToolError::Execution {
            message: format!("execution '{execution_id}' has no stored context"),
        })
}

async fn get_context(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let ctx = load_execution_context(activation, &activation.execution_id).await?;
    let histories = ctx.fields();

    if let Some(field) = opt_str(args, "field") {
        let mut out = Map::new();
        out.insert(field.to_string(), json!(histories.get(field)));
        return Ok(Value::Object(out));
    }
    if let Some(fields) = args.get("fields").and_then(Value::as_array) {
        let mut out = Map::new();
        for field in fields.iter().filter_map(Value::as_str) {
            out.insert(field.to_string(), json!(histories.get(field)));
        }
        return Ok(Value::Object(out));
    }
    serde_json::to_value(histories).map_err(internal)
}

async fn update_context(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let updates = args
        .get("updates")
        .and_then(Value::as_object)
        .ok_or_else(|| ToolError::Arguments {
            message: "'updates' must be an object of field -> value".into(),
        })?;

    // Reserved fields are silently dropped, matching the context contract:
    // workflow writes to engine namespaces are ignored, not errors.
    let accepted: Vec<(&String, &Value)> = updates
        .iter()
        .filter(|(k, _)| !k.starts_with(RESERVED_PREFIX))
        .collect();
    if accepted.is_empty() {
        return Ok(json!({ "status": "no valid updates" }));
    }

    let mut ctx = load_execution_context(activation, &activation.execution_id).await?;
    let mut written = Vec::new();
    for (field, value) in accepted {
        ctx.set_field(field, value.clone()).map_err(|e| ToolError::Execution {
            message: e.to_string(),
        })?;
        written.push(field.clone());
    }
    activation
        .engine
        .backends
        .context
        .save_context(&activation.execution_id, &ctx)
        .await
        .map_err(backend_err)?;

    Ok(json!({ "status": "updated", "fields": written }))
}

async fn copy_context(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let source_id = opt_str(args, "source_execution_id").unwrap_or(&activation.execution_id);
    let target_id = opt_str(args, "target_execution_id").unwrap_or(&activation.execution_id);
    let all_fields = args
        .get("all_fields")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let source = load_execution_context(activation, source_id).await?;
    let mut target = load_execution_context(activation, target_id).await?;

    let mut copied = Map::new();
    if all_fields {
        for (field, history) in source.fields() {
            for value in history {
                target.set_field(field, value.clone()).map_err(|e| ToolError::Execution {
                    message: e.to_string(),
                })?;
            }
            copied.insert(field.clone(), json!(field));
        }
    } else if let Some(mappings) = args.get("fields").and_then(Value::as_object) {
        for (source_field, target_field) in mappings {
            let target_field = target_field.as_str().ok_or_else(|| ToolError::Arguments {
                message: "'fields' values must be target field names".into(),
            })?;
            let Some(history) = source.get_history(source_field) else {
                return Err(ToolError::Arguments {
                    message: format!("source field '{source_field}' not found in {source_id}"),
                });
            };
            for value in history.to_vec() {
                target.set_field(target_field, value).map_err(|e| ToolError::Execution {
                    message: e.to_string(),
                })?;
            }
            copied.insert(source_field.clone(), json!(target_field));
        }
    } else {
        return Err(ToolError::Arguments {
            message: "specify either a 'fields' mapping or 'all_fields: true'".into(),
        });
    }

    activation
        .engine
        .backends
        .context
        .save_context(target_id, &target)
        .await
        .map_err(backend_err)?;

    Ok(json!({
        "status": "copied",
        "source_execution": source_id,
        "target_execution": target_id,
        "fields_copied": copied,
    }))
}

async fn list_contexts(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let include_current = args
        .get("include_current")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let ids = activation
        .engine
        .backends
        .context
        .list_executions()
        .await
        .map_err(backend_err)?;
    let Some(mut ids) = ids else {
        return Err(ToolError::Execution {
            message: "the configured context backend does not support listing executions".into(),
        });
    };
    if !include_current {
        ids.retain(|id| id != &activation.execution_id);
    }
    Ok(json!({
        "current_execution_id": &activation.execution_id,
        "contexts": ids,
    }))
}

// ---------------------------------------------------------------------------
// Identity and schema tools
// ---------------------------------------------------------------------------

async fn load_identities(
    activation: &Activation<'_>,
) -> Result<std::collections::BTreeMap<String, String>, ToolError> {
    let backend = activation
        .engine
        .backends
        .identity
        .as_ref()
        .ok_or_else(|| ToolError::Execution {
            message: "no identity backend configured".into(),
        })?;
    Ok(backend
        .get_identities(activation.main_execution_id())
        .await
        .map_err(backend_err)?
        .unwrap_or_default())
}

async fn inject_identity(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let identity_name = require_str(args, "identity_name")?;
    let system_prompt = require_str(args, "system_prompt")?;

    let mut identities = load_identities(activation).await?;
    identities.insert(identity_name.to_string(), system_prompt.to_string());

    let backend = activation.engine.backends.identity.as_ref().ok_or_else(|| {
        ToolError::Execution {
            message: "no identity backend configured".into(),
        }
    })?;
    backend
        .save_identities(activation.main_execution_id(), &identities)
        .await
        .map_err(backend_err)?;
    Ok(json!({ "injected": true, "identity_name": identity_name }))
}

async fn remove_identity(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let identity_name = require_str(args, "identity_name")?;
    let mut identities = load_identities(activation).await?;
    if identities.remove(identity_name).is_none() {
        return Err(not_found("identity", identity_name));
    }
    let backend = activation.engine.backends.identity.as_ref().ok_or_else(|| {
        ToolError::Execution {
            message: "no identity backend configured".into(),
        }
    })?;
    backend
        .save_identities(activation.main_execution_id(), &identities)
        .await
        .map_err(backend_err)?;
    Ok(json!({ "removed": true, "identity_name": identity_name }))
}

async fn load_schema(
    activation: &Activation<'_>,
) -> Result<std::collections::BTreeMap<String, FieldSchema>, ToolError> {
    let backend = activation
        .engine
        .backends
        .context_schema
        .as_ref()
        .ok_or_else(|| ToolError::Execution {
            message: "no context schema backend configured".into(),
        })?;
    Ok(backend
        .get_context_schema(activation.main_execution_id())
        .await
        .map_err(backend_err)?
        .unwrap_or_default())
}

async fn inject_schema_field(
    activation: &mut Activation<'_>,
    args: &Value,
) -> Result<Value, ToolError> {
    let field_name = require_str(args, "field_name")?;
    let raw = require_str(args, "field_schema")?;
    let field_schema: FieldSchema = serde_yaml::from_str(raw).map_err(|e| ToolError::Arguments {
        message: format!("invalid field schema: {e}"),
    })?;

    let mut schema = load_schema(activation).await?;
    schema.insert(field_name.to_string(), field_schema);

    let backend = activation
        .engine
        .backends
        .context_schema
        .as_ref()
        .ok_or_else(|| ToolError::Execution {
            message: "no context schema backend configured".into(),
        })?;
    backend
        .save_context_schema(activation.main_execution_id(), &schema)
        .await
        .map_err(backend_err)?;
    Ok(json!({ "injected": true, "field_name": field_name }))
}

async fn remove_schema_field(
    activation: &mut Activation<'_>,
    args: &Value,
) -> Result<Value, ToolError> {
    let field_name = require_str(args, "field_name")?;
    let mut schema = load_schema(activation).await?;
    if schema.remove(field_name).is_none() {
        return Err(not_found("schema field", field_name));
    }
    let backend = activation
        .engine
        .backends
        .context_schema
        .as_ref()
        .ok_or_else(|| ToolError::Execution {
            message: "no context schema backend configured".into(),
        })?;
    backend
        .save_context_schema(activation.main_execution_id(), &schema)
        .await
        .map_err(backend_err)?;
    Ok(json!({ "removed": true, "field_name": field_name }))
}

// ---------------------------------------------------------------------------
// Tool introspection and dynamic invocation
// ---------------------------------------------------------------------------

fn available_tools(activation: &Activation<'_>) -> Value {
    let mut tools: Vec<Value> = activation
        .engine
        .tools
        .snapshot()
        .into_iter()
        .map(|(name, spec)| {
            json!({
                "name": name,
                "description": spec.description,
                "builtin": false,
            })
        })
        .collect();
    for name in BUILTIN_TOOL_NAMES {
        let description = descriptor(name).map(|c| c.description).unwrap_or_default();
        tools.push(json!({
            "name": name,
            "description": description,
            "builtin": true,
        }));
    }
    json!({ "tools": tools })
}

/// Dynamically invoke a tool by name. Argument and lookup failures come
/// back as structured error objects rather than raised errors, so a model
/// driving this tool can correct itself.
async fn call_tool(activation: &mut Activation<'_>, args: &Value) -> Result<Value, ToolError> {
    let tool_name = require_str(args, "tool_name")?.to_string();
    let arguments = match args.get("arguments") {
        None => json!({}),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) if parsed.is_object() => parsed,
            Ok(_) | Err(_) => {
                return Ok(json!({
                    "error": format!("invalid JSON arguments for '{tool_name}'"),
                    "tool_name": tool_name,
                }));
            }
        },
        Some(value) if value.is_object() => value.clone(),
        Some(_) => {
            return Ok(json!({
                "error": "'arguments' must be an object or a JSON string of one",
                "tool_name": tool_name,
            }));
        }
    };

    // The underlying call is a real tool invocation and is counted as one.
    let outcome = if is_builtin(&tool_name) {
        activation.deltas.tool_calls += 1;
        call(activation, &tool_name, arguments).await
    } else if let Some(spec) = activation.engine.tools.get(&tool_name) {
        activation.deltas.tool_calls += 1;
        spec.function.call(arguments).await
    } else {
        let mut available = activation.engine.tools.names();
        available.extend(BUILTIN_TOOL_NAMES.iter().map(|s| s.to_string()));
        available.truncate(20);
        return Ok(json!({
            "error": format!("tool '{tool_name}' not found"),
            "available_tools": available,
        }));
    };

    match outcome {
        Ok(result) => Ok(json!({
            "success": true,
            "tool_name": tool_name,
            "result": result,
        })),
        Err(error) => Ok(json!({
            "error": format!("tool '{tool_name}' failed: {error}"),
            "tool_name": tool_name,
        })),
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn require_str<'v>(args: &'v Value, key: &str) -> Result<&'v str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::Arguments {
            message: format!("missing required argument '{key}'"),
        })
}

fn opt_str<'v>(args: &'v Value, key: &str) -> Option<&'v str> {
    args.get(key).and_then(Value::as_str)
}

fn not_found(kind: &str, name: &str) -> ToolError {
    ToolError::Arguments {
        message: format!("{kind} '{name}' not found"),
    }
}

fn internal(e: serde_json::Error) -> ToolError {
    ToolError::Execution {
        message: e.to_string(),
    }
}

fn backend_err(e: BackendError) -> ToolError {
    ToolError::Execution {
        message: e.to_string(),
    }
}

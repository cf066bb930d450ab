//! Configuration parsing and load-time validation.
//!
//! Validation runs once, before any dispatch: a config that passes here
//! will not produce structural surprises mid-run. Runtime-injected nodes
//! (`soe_inject_node` and friends) pass through the same per-node checks.

use crate::errors::ConfigError;
use crate::template::is_template;
use crate::types::{NodeConfig, NodeType, WorkflowConfig, WorkflowRegistry, RESERVED_PREFIX};

impl WorkflowConfig {
    /// Parse a YAML (or JSON — YAML is a superset) config string.
    pub fn from_yaml(input: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(input)
            .map_err(|e| ConfigError::new(format!("failed to parse config: {e}")))
    }
}

/// Validate every workflow in a registry. `tool_exists` resolves tool names
/// (registered tools plus built-ins).
pub fn validate_registry(
    registry: &WorkflowRegistry,
    tool_exists: &dyn Fn(&str) -> bool,
) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if registry.is_empty() {
        errors.push("config contains no workflows".to_string());
    }

    for (workflow_name, workflow) in registry {
        if workflow.is_empty() {
            errors.push(format!(
                "workflow '{workflow_name}' is empty - at least one node is required"
            ));
            continue;
        }
        for (node_name, node) in workflow {
            if node_name.starts_with(RESERVED_PREFIX) {
                errors.push(format!(
                    "workflow '{workflow_name}': node name '{node_name}' is reserved"
                ));
                continue;
            }
            if let Err(e) = validate_node(node, registry, tool_exists) {
                errors.push(format!(
                    "workflow '{workflow_name}', node '{node_name}': {}",
                    e.message
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::new(errors.join("; ")))
    }
}

/// Validate a single node configuration against its declared type.
pub fn validate_node(
    node: &NodeConfig,
    registry: &WorkflowRegistry,
    tool_exists: &dyn Fn(&str) -> bool,
) -> Result<(), ConfigError> {
    if node.event_triggers.is_empty() {
        return Err(ConfigError::new(
            "'event_triggers' is required - a node with no triggers can never run",
        ));
    }
    for emission in &node.event_emissions {
        if emission.signal_name.is_empty() {
            return Err(ConfigError::new("event emission is missing 'signal_name'"));
        }
    }
    if let Some(output_field) = &node.output_field {
        if output_field.starts_with(RESERVED_PREFIX) {
            return Err(ConfigError::new(format!(
                "'output_field' must not use the reserved '{RESERVED_PREFIX}' prefix: {output_field}"
            )));
        }
    }

    match node.node_type {
        NodeType::Router => validate_router(node),
        NodeType::Tool => validate_tool(node, tool_exists),
        NodeType::Llm => validate_llm(node),
        NodeType::Agent => validate_agent(node, tool_exists),
        NodeType::Child => validate_child(node, registry),
    }
}

fn validate_router(node: &NodeConfig) -> Result<(), ConfigError> {
    if node.event_emissions.is_empty() {
        return Err(ConfigError::new(
            "router nodes require 'event_emissions' - a router that emits nothing does nothing",
        ));
    }
    // Routers never consult a model, so a semantic (plain text) condition
    // has no meaning here. Rejected rather than silently always-emitting.
    for emission in &node.event_emissions {
        if let Some(condition) = &emission.condition {
            if !condition.is_empty() && !is_template(condition) {
                return Err(ConfigError::new(format!(
                    "emission '{}' has a plain-text condition; router conditions must be \
                     templates ({{{{ ... }}}})",
                    emission.signal_name
                )));
            }
        }
    }
    Ok(())
}

fn validate_tool(node: &NodeConfig, tool_exists: &dyn Fn(&str) -> bool) -> Result<(), ConfigError> {
    let Some(tool_name) = &node.tool_name else {
        return Err(ConfigError::new("'tool_name' is required for tool nodes"));
    };
    if !tool_exists(tool_name) {
        return Err(ConfigError::new(format!(
            "tool '{tool_name}' is not registered"
        )));
    }
    if node.parameters.is_some() && node.context_parameter_field.is_some() {
        return Err(ConfigError::new(
            "'parameters' and 'context_parameter_field' are mutually exclusive",
        ));
    }
    if let Some(params) = &node.parameters {
        if !params.is_object() {
            return Err(ConfigError::new("'parameters' must be a mapping"));
        }
    }
    // Tool emissions evaluate against {result, context}; semantic selection
    // does not apply here.
    for emission in &node.event_emissions {
        if let Some(condition) = &emission.condition {
            if !condition.is_empty() && !is_template(condition) {
                return Err(ConfigError::new(format!(
                    "emission '{}' has a plain-text condition; tool conditions must be \
                     templates ({{{{ ... }}}})",
                    emission.signal_name
                )));
            }
        }
    }
    Ok(())
}

fn validate_llm(node: &NodeConfig) -> Result<(), ConfigError> {
    if node.prompt.as_deref().unwrap_or_default().is_empty() {
        return Err(ConfigError::new("'prompt' is required for llm nodes"));
    }
    Ok(())
}

fn validate_agent(
    node: &NodeConfig,
    tool_exists: &dyn Fn(&str) -> bool,
) -> Result<(), ConfigError> {
    if node.prompt.as_deref().unwrap_or_default().is_empty() {
        return Err(ConfigError::new("'prompt' is required for agent nodes"));
    }
    if let Some(tools) = &node.tools {
        for tool_name in tools {
            if !tool_exists(tool_name) {
                return Err(ConfigError::new(format!(
                    "agent tool '{tool_name}' is not registered"
                )));
            }
        }
    }
    Ok(())
}

fn validate_child(node: &NodeConfig, registry: &WorkflowRegistry) -> Result<(), ConfigError> {
    let Some(child_workflow) = &node.child_workflow_name else {
        return Err(ConfigError::new(
            "'child_workflow_name' is required - specify which workflow to start as a child",
        ));
    };
    if !registry.contains_key(child_workflow) {
        return Err(ConfigError::new(format!(
            "child workflow '{child_workflow}' does not exist in the registry"
        )));
    }
    if node
        .child_initial_signals
        .as_ref()
        .is_none_or(|s| s.is_empty())
    {
        return Err(ConfigError::new(
            "'child_initial_signals' is required - the child needs at least one seed signal",
        ));
    }
    if node.fan_out_field.is_some() && node.child_input_field.is_none() {
        return Err(ConfigError::new(
            "'child_input_field' is required when 'fan_out_field' is set - it names the field \
             each child receives its element under",
        ));
    }
    if let Some(interval) = node.spawn_interval {
        if !interval.is_finite() || interval < 0.0 {
            return Err(ConfigError::new("'spawn_interval' must be non-negative"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> WorkflowConfig {
        WorkflowConfig::from_yaml(yaml).unwrap()
    }

    fn no_tools(_: &str) -> bool {
        false
    }

    fn all_tools(_: &str) -> bool {
        true
    }

    #[test]
    fn minimal_valid_config() {
        let config = parse(
            r#"
workflows:
  main:
    gate:
      node_type: router
      event_triggers: [START]
      event_emissions:
        - signal_name: DONE
"#,
        );
        assert!(validate_registry(&config.workflows, &no_tools).is_ok());
    }

    #[test]
    fn combined_config_sections() {
        let config = parse(
            r#"
workflows:
  main:
    gate:
      node_type: router
      event_triggers: [START]
      event_emissions:
        - signal_name: DONE
context_schema:
  sentiment:
    type: string
    description: Detected sentiment
identities:
  assistant: You are a helpful assistant.
"#,
        );
        assert!(config.context_schema.unwrap().contains_key("sentiment"));
        assert!(config.identities.unwrap().contains_key("assistant"));
    }

    #[test]
    fn unknown_top_level_section_rejected() {
        assert!(WorkflowConfig::from_yaml("workflows: {}\nsurprise: 1\n").is_err());
    }

    #[test]
    fn router_plain_text_condition_rejected() {
        let config = parse(
            r#"
workflows:
  main:
    gate:
      node_type: router
      event_triggers: [START]
      event_emissions:
        - signal_name: DONE
          condition: when the user seems happy
"#,
        );
        let err = validate_registry(&config.workflows, &no_tools).unwrap_err();
        assert!(err.message.contains("plain-text condition"));
    }

    #[test]
    fn router_template_condition_accepted() {
        let config = parse(
            r#"
workflows:
  main:
    gate:
      node_type: router
      event_triggers: [START]
      event_emissions:
        - signal_name: HAS
          condition: "{{ context.data is defined }}"
        - signal_name: NO
          condition: "{{ context.data is not defined }}"
"#,
        );
        assert!(validate_registry(&config.workflows, &no_tools).is_ok());
    }

    #[test]
    fn tool_requires_registered_name() {
        let config = parse(
            r#"
workflows:
  main:
    pay:
      node_type: tool
      event_triggers: [GO]
      tool_name: charge
"#,
        );
        assert!(validate_registry(&config.workflows, &no_tools).is_err());
        assert!(validate_registry(&config.workflows, &all_tools).is_ok());
    }

    #[test]
    fn tool_parameter_sources_are_exclusive() {
        let config = parse(
            r#"
workflows:
  main:
    pay:
      node_type: tool
      event_triggers: [GO]
      tool_name: charge
      parameters:
        amount: "10"
      context_parameter_field: charge_args
"#,
        );
        let err = validate_registry(&config.workflows, &all_tools).unwrap_err();
        assert!(err.message.contains("mutually exclusive"));
    }

    #[test]
    fn llm_requires_prompt() {
        let config = parse(
            r#"
workflows:
  main:
    think:
      node_type: llm
      event_triggers: [GO]
"#,
        );
        assert!(validate_registry(&config.workflows, &no_tools).is_err());
    }

    #[test]
    fn child_requires_existing_workflow() {
        let config = parse(
            r#"
workflows:
  main:
    spawn:
      node_type: child
      event_triggers: [GO]
      child_workflow_name: worker
      child_initial_signals: [BEGIN]
"#,
        );
        let err = validate_registry(&config.workflows, &no_tools).unwrap_err();
        assert!(err.message.contains("does not exist"));
    }

    #[test]
    fn fan_out_requires_child_input_field() {
        let config = parse(
            r#"
workflows:
  main:
    spawn:
      node_type: child
      event_triggers: [GO]
      child_workflow_name: main
      child_initial_signals: [BEGIN]
      fan_out_field: items
"#,
        );
        let err = validate_registry(&config.workflows, &no_tools).unwrap_err();
        assert!(err.message.contains("child_input_field"));
    }

    #[test]
    fn reserved_node_names_rejected() {
        let config = parse(
            r#"
workflows:
  main:
    __sneaky:
      node_type: router
      event_triggers: [GO]
      event_emissions:
        - signal_name: X
"#,
        );
        let err = validate_registry(&config.workflows, &no_tools).unwrap_err();
        assert!(err.message.contains("reserved"));
    }

    #[test]
    fn serialize_reload_is_a_no_op() {
        let original = parse(
            r#"
workflows:
  main:
    gate:
      node_type: router
      event_triggers: [START]
      event_emissions:
        - signal_name: HAS
          condition: "{{ context.data is defined }}"
    spawn:
      node_type: child
      event_triggers: [HAS]
      child_workflow_name: main
      child_initial_signals: [START]
      spawn_interval: 0.5
context_schema:
  score:
    type: number
identities:
  helper: Be helpful.
"#,
        );
        let serialized = serde_yaml::to_string(&original).unwrap();
        let reloaded = WorkflowConfig::from_yaml(&serialized).unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn reserved_output_field_rejected() {
        let config = parse(
            r#"
workflows:
  main:
    think:
      node_type: llm
      event_triggers: [GO]
      prompt: p
      output_field: __operational__
"#,
        );
        let err = validate_registry(&config.workflows, &no_tools).unwrap_err();
        assert!(err.message.contains("reserved"));
    }

    #[test]
    fn node_without_triggers_rejected() {
        let config = parse(
            r#"
workflows:
  main:
    idle:
      node_type: router
      event_emissions:
        - signal_name: X
"#,
        );
        let err = validate_registry(&config.workflows, &no_tools).unwrap_err();
        assert!(err.message.contains("event_triggers"));
    }
}

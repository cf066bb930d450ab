//! Embedded documentation served by `soe_explore_docs`.
//!
//! A small static index with a file-system-like interface: agents navigate
//! it at runtime to learn the engine's own configuration surface before
//! injecting workflows or nodes.

use crate::errors::ToolError;

struct DocPage {
    path: &'static str,
    title: &'static str,
    tags: &'static [&'static str],
    content: &'static str,
}

const PAGES: &[DocPage] = &[
    DocPage {
        path: "docs/overview.md",
        title: "Engine overview",
        tags: &["basics"],
        content: "\
# Engine overview\n\n\
Workflows are YAML mappings of node name to node configuration. Nodes do not \
call each other: a node lists the signals that trigger it (`event_triggers`) \
and the signals it may emit (`event_emissions`). The dispatcher drains a FIFO \
signal queue until no signals remain; quiescence is the only end state.\n\n\
Context is a per-execution store where every field keeps its full write \
history. `{{ context.field }}` reads the latest value; the `accumulated` \
filter reads the whole history.",
    },
    DocPage {
        path: "docs/signals.md",
        title: "Signals and emissions",
        tags: &["basics", "routing"],
        content: "\
# Signals and emissions\n\n\
Each entry in `event_emissions` is `{signal_name, condition?}`. A condition \
containing `{{ }}` is evaluated against context; any other text is a semantic \
description the model uses to select signals (llm and agent nodes only). \
A signal matching no trigger is recorded and dropped, never an error.",
    },
    DocPage {
        path: "docs/nodes/router.md",
        title: "Router nodes",
        tags: &["nodes", "routing"],
        content: "\
# Router nodes\n\n\
Pure control flow: evaluate each emission's template condition and emit the \
truthy ones. Routers never touch context or external services. Conditions \
must be templates; plain text is rejected at load time.",
    },
    DocPage {
        path: "docs/nodes/tool.md",
        title: "Tool nodes",
        tags: &["nodes", "tools"],
        content: "\
# Tool nodes\n\n\
`tool_name` selects a registered tool. Arguments come from inline \
`parameters` (values are templates) or `context_parameter_field` (a context \
field holding a mapping); the two are mutually exclusive. Emissions evaluate \
against `result` and `context`. Registry entries may carry `max_retries`, \
`failure_signal`, and `process_accumulated`.",
    },
    DocPage {
        path: "docs/nodes/llm.md",
        title: "LLM nodes",
        tags: &["nodes", "models"],
        content: "\
# LLM nodes\n\n\
Render `prompt`, call the model, store the reply in `output_field`. With an \
`identity`, the call joins the conversation history shared across the \
orchestration tree. Multiple emissions with plain-text conditions turn into \
model-side signal selection; `llm_failure_signal` absorbs exhausted retries.",
    },
    DocPage {
        path: "docs/nodes/agent.md",
        title: "Agent nodes",
        tags: &["nodes", "models", "tools"],
        content: "\
# Agent nodes\n\n\
A loop of model calls that may invoke the tools listed in `tools`. Each turn \
the model either calls a tool or finishes with the final response. Tool \
results feed back into the transcript. The loop is bounded by `retries` and \
the engine's turn ceiling.",
    },
    DocPage {
        path: "docs/nodes/child.md",
        title: "Child nodes",
        tags: &["nodes", "composition"],
        content: "\
# Child nodes\n\n\
Spawn `child_workflow_name` as a separate execution seeded with \
`child_initial_signals`. `input_fields` copies current values into the child; \
`signals_to_parent` and `context_updates_to_parent` propagate results back. \
With `fan_out_field`, one child spawns per accumulated element, each \
receiving its element under `child_input_field`.",
    },
    DocPage {
        path: "docs/context.md",
        title: "Context and operational state",
        tags: &["basics", "context"],
        content: "\
# Context and operational state\n\n\
Every write appends to the field's history. `__operational__` holds the \
signal log and the `nodes`, `llm_calls`, `tool_calls`, and `errors` counters; \
workflows may read it to build guard routers (loop bounds, kill switches). \
Writes to reserved namespaces are ignored.",
    },
    DocPage {
        path: "docs/builtins.md",
        title: "Built-in tools",
        tags: &["tools", "self-modification"],
        content: "\
# Built-in tools\n\n\
The `soe_*` tools are always available: inspect and mutate the current \
execution's workflow registry (`soe_get_workflows`, `soe_inject_node`, \
`soe_remove_workflow`, `soe_add_signal`, ...), read and write context \
(`soe_get_context`, `soe_update_context`, `soe_copy_context`), manage \
identities and the context schema, and invoke any tool dynamically with \
`soe_call_tool`. Registry mutations affect this execution's snapshot only \
and persist immediately.",
    },
    DocPage {
        path: "docs/inheritance.md",
        title: "Inheritance",
        tags: &["composition"],
        content: "\
# Inheritance\n\n\
A new orchestration can start from an existing execution: \
`inherit_config_from_id` copies the registry, identities, and schema; \
`inherit_context_from_id` copies field histories with `__operational__` \
reset and a fresh `main_execution_id`. Evolved registries travel to future \
executions this way.",
    },
];

/// Entry point for the `soe_explore_docs` built-in.
pub(super) fn explore(
    path: &str,
    action: &str,
    query: Option<&str>,
    tag: Option<&str>,
) -> Result<String, ToolError> {
    match action {
        "list" => Ok(list(path)),
        "read" => read(path),
        "tree" => Ok(tree()),
        "search" => search(query, tag),
        "get_tags" => Ok(get_tags()),
        other => Err(ToolError::Arguments {
            message: format!(
                "unknown action '{other}' (expected list, read, tree, search, or get_tags)"
            ),
        }),
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "docs"
    } else {
        trimmed
    }
}

fn list(path: &str) -> String {
    let prefix = format!("{}/", normalize(path));
    let mut lines: Vec<String> = PAGES
        .iter()
        .filter(|p| p.path.starts_with(&prefix) || normalize(path) == "docs")
        .map(|p| format!("[FILE] {}", p.path))
        .collect();
    if lines.is_empty() {
        return format!("Error: path '{path}' not found.");
    }
    lines.sort();
    lines.join("\n")
}

fn read(path: &str) -> Result<String, ToolError> {
    let key = normalize(path);
    PAGES
        .iter()
        .find(|p| p.path == key)
        .map(|p| p.content.to_string())
        .ok_or_else(|| ToolError::Arguments {
            message: format!("path '{path}' not found"),
        })
}

fn tree() -> String {
    let mut out = vec!["[D] docs".to_string()];
    for page in PAGES {
        let depth = page.path.matches('/').count();
        let name = page.path.rsplit('/').next().unwrap_or(page.path);
        out.push(format!("{}[F] {name}", "  ".repeat(depth)));
    }
    out.join("\n")
}

fn search(query: Option<&str>, tag: Option<&str>) -> Result<String, ToolError> {
    if query.is_none() && tag.is_none() {
        return Err(ToolError::Arguments {
            message: "provide 'query' or 'tag' for search".into(),
        });
    }
    let matches: Vec<&str> = PAGES
        .iter()
        .filter(|p| tag.is_none_or(|t| p.tags.contains(&t)))
        .filter(|p| {
            query.is_none_or(|q| {
                let q = q.to_ascii_lowercase();
                q.split_whitespace().any(|word| {
                    p.path.to_ascii_lowercase().contains(word)
                        || p.title.to_ascii_lowercase().contains(word)
                        || p.content.to_ascii_lowercase().contains(word)
                })
            })
        })
        .map(|p| p.path)
        .collect();
    if matches.is_empty() {
        Ok("No results.".to_string())
    } else {
        Ok(matches.join("\n"))
    }
}

fn get_tags() -> String {
    let mut tags: Vec<&str> = PAGES.iter().flat_map(|p| p.tags.iter().copied()).collect();
    tags.sort_unstable();
    tags.dedup();
    tags.join("\n")
}

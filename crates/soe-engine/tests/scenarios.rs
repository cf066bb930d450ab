//! End-to-end orchestration scenarios against in-memory backends, a
//! scripted model caller, and closure tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use soe_engine::{
    ContextBackend, ConversationHistoryBackend, Engine, EngineError, ModelCaller, ModelError,
    NodeConfig, NodeError, OrchestrateRequest, ToolError, ToolSpec, WorkflowConfig,
};

/// Model caller that replays a fixed script of responses.
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl ModelCaller for ScriptedModel {
    async fn complete(&self, _prompt: &str, _node: &NodeConfig) -> Result<String, ModelError> {
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| ModelError::Call {
                message: "scripted model ran out of responses".into(),
            })
    }
}

fn config(yaml: &str) -> WorkflowConfig {
    WorkflowConfig::from_yaml(yaml).expect("valid config")
}

async fn operational(engine: &Engine, execution_id: &str) -> soe_engine::OperationalState {
    engine
        .backends()
        .context
        .get_context(execution_id)
        .await
        .unwrap()
        .expect("context exists")
        .operational()
        .clone()
}

// ---------------------------------------------------------------------------
// Scenario 1: router branching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn router_branching() {
    let engine = Engine::builder().build();
    let cfg = config(
        r#"
workflows:
  main:
    v:
      node_type: router
      event_triggers: [START]
      event_emissions:
        - signal_name: HAS
          condition: "{{ context.data is defined }}"
        - signal_name: "NO"
          condition: "{{ context.data is not defined }}"
    h:
      node_type: router
      event_triggers: [HAS]
      event_emissions:
        - signal_name: DONE
    n:
      node_type: router
      event_triggers: ["NO"]
      event_emissions:
        - signal_name: DONE
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["START"])
                .context_field("data", json!(1)),
        )
        .await
        .unwrap();

    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.signals, ["START", "HAS", "DONE"]);
    assert_eq!(op.nodes.get("v"), Some(&1));
    assert_eq!(op.nodes.get("h"), Some(&1));
    assert_eq!(op.nodes.get("n"), None);
}

// ---------------------------------------------------------------------------
// Scenario 2: tool result routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tool_result_routing() {
    let engine = Engine::builder()
        .tool(
            "pay",
            ToolSpec::new(|_: Value| Ok(json!({"status": "approved"}))),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    charge:
      node_type: tool
      event_triggers: [START]
      tool_name: pay
      output_field: payment_result
      event_emissions:
        - signal_name: OK
          condition: "{{ result.status == 'approved' }}"
        - signal_name: BAD
          condition: "{{ result.status != 'approved' }}"
"#,
    );

    let execution_id = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["START"]))
        .await
        .unwrap();

    let ctx = engine
        .backends()
        .context
        .get_context(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ctx.get_field("payment_result"),
        Some(&json!({"status": "approved"}))
    );

    let op = ctx.operational();
    assert!(op.signals.contains(&"OK".to_string()));
    assert!(!op.signals.contains(&"BAD".to_string()));
    assert_eq!(op.tool_calls, 1);
}

// ---------------------------------------------------------------------------
// Scenario 3: model signal selection (semantic)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_signal_selection() {
    let engine = Engine::builder()
        .model_caller(ScriptedModel::new([
            r#"{"sentiment": "mixed", "selected_signals": ["POS", "NEU"]}"#,
        ]))
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    classify:
      node_type: llm
      event_triggers: [START]
      prompt: "Classify the sentiment of {{ context.message }}"
      output_field: sentiment
      event_emissions:
        - signal_name: POS
          condition: the message is positive
        - signal_name: NEG
          condition: the message is negative
        - signal_name: NEU
          condition: the message is neutral
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["START"])
                .context_field("message", json!("fine, I guess")),
        )
        .await
        .unwrap();

    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.signals, ["START", "POS", "NEU"]);
    assert_eq!(op.llm_calls, 1);
}

// ---------------------------------------------------------------------------
// Scenario 4: fan-out + join
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fan_out_and_join() {
    let engine = Engine::builder()
        .tool(
            "work",
            ToolSpec::new(|args: Value| {
                let item = args["item"].as_str().unwrap_or_default().to_string();
                Ok(json!(format!("processed {item}")))
            }),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    spawner:
      node_type: child
      event_triggers: [START]
      child_workflow_name: worker
      child_initial_signals: [BEGIN]
      fan_out_field: items
      child_input_field: item
      signals_to_parent: [CHILD_DONE]
      context_updates_to_parent: [result]
    join:
      node_type: router
      event_triggers: [CHILD_DONE]
      event_emissions:
        - signal_name: ALL_DONE
          condition: "{{ context.result|accumulated|length == context.items|accumulated|length }}"
  worker:
    process:
      node_type: tool
      event_triggers: [BEGIN]
      tool_name: work
      parameters:
        item: "{{ context.item }}"
      output_field: result
      event_emissions:
        - signal_name: CHILD_DONE
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["START"])
                .context_field("items", json!(["a", "b", "c"])),
        )
        .await
        .unwrap();

    let ctx = engine
        .backends()
        .context
        .get_context(&execution_id)
        .await
        .unwrap()
        .unwrap();
    // One history entry per fan-out child.
    assert_eq!(ctx.get_accumulated("result").len(), 3);

    let op = ctx.operational();
    let all_done = op.signals.iter().filter(|s| *s == "ALL_DONE").count();
    assert_eq!(all_done, 1, "join fired {all_done} times: {:?}", op.signals);
    let child_done = op.signals.iter().filter(|s| *s == "CHILD_DONE").count();
    assert_eq!(child_done, 3);

    // Three independent child executions exist alongside the parent.
    let ids = engine
        .backends()
        .context
        .list_executions()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids.len(), 4);
}

// ---------------------------------------------------------------------------
// Scenario 5: inheritance reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inheritance_resets_operational_state() {
    let engine = Engine::builder()
        .model_caller(ScriptedModel::new([
            r#"{"summary": "first"}"#,
            r#"{"summary": "second"}"#,
        ]))
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    summarize:
      node_type: llm
      event_triggers: [START, AGAIN]
      prompt: "Summarize {{ context.text }}"
      output_field: summary
"#,
    );

    let e1 = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["START"])
                .context_field("text", json!("hello world")),
        )
        .await
        .unwrap();
    engine
        .broadcast_signals(&e1, vec!["AGAIN".into()])
        .await
        .unwrap();

    let op1 = operational(&engine, &e1).await;
    assert_eq!(op1.llm_calls, 2);

    let e2 = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .signals(Vec::<String>::new())
                .context_field("text", json!("fresh input"))
                .inherit_config_from(&e1)
                .inherit_context_from(&e1),
        )
        .await
        .unwrap();

    let ctx2 = engine
        .backends()
        .context
        .get_context(&e2)
        .await
        .unwrap()
        .unwrap();
    let op2 = ctx2.operational();
    assert_ne!(op2.main_execution_id, op1.main_execution_id);
    assert_eq!(op2.main_execution_id, e2);
    assert_eq!(op2.llm_calls, 0);
    assert!(op2.signals.is_empty());

    // Inherited history with the new initial value appended.
    assert_eq!(
        ctx2.get_accumulated("text"),
        vec![json!("hello world"), json!("fresh input")]
    );
    assert_eq!(ctx2.get_field("summary"), Some(&json!("second")));
}

// ---------------------------------------------------------------------------
// Scenario 6: tool failure-signal path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tool_failure_signal_path() {
    let engine = Engine::builder()
        .tool(
            "flaky_api",
            ToolSpec::new(|_: Value| -> Result<Value, ToolError> {
                Err(ToolError::execution("connection refused"))
            })
            .max_retries(2)
            .failure_signal("API_FAILED"),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    call_api:
      node_type: tool
      event_triggers: [START]
      tool_name: flaky_api
      event_emissions:
        - signal_name: API_OK
          condition: "{{ result.ok }}"
"#,
    );

    let execution_id = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["START"]))
        .await
        .unwrap();

    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.tool_calls, 3);
    assert_eq!(op.errors, 1);
    assert_eq!(op.signals, ["START", "API_FAILED"]);
}

// ---------------------------------------------------------------------------
// Unmatched signals, re-entry, counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unmatched_signal_recorded_without_activation() {
    let engine = Engine::builder().build();
    let cfg = config(
        r#"
workflows:
  main:
    gate:
      node_type: router
      event_triggers: [KNOWN]
      event_emissions:
        - signal_name: OUT
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["MYSTERY"]),
        )
        .await
        .unwrap();

    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.signals, ["MYSTERY"]);
    assert!(op.nodes.is_empty());
}

#[tokio::test]
async fn broadcast_preserves_history_across_reentries() {
    let engine = Engine::builder().build();
    let cfg = config(
        r#"
workflows:
  main:
    gate:
      node_type: router
      event_triggers: [PING]
      event_emissions:
        - signal_name: PONG
"#,
    );

    let execution_id = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["PING"]))
        .await
        .unwrap();
    engine
        .broadcast_signals(&execution_id, vec!["PING".into()])
        .await
        .unwrap();

    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.signals, ["PING", "PONG", "PING", "PONG"]);
    assert_eq!(op.nodes.get("gate"), Some(&2));
}

#[tokio::test]
async fn broadcast_to_unknown_execution_fails() {
    let engine = Engine::builder().build();
    let err = engine
        .broadcast_signals("no-such-id", vec!["X".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownExecution { .. }));
}

// ---------------------------------------------------------------------------
// Tool argument sources
// ---------------------------------------------------------------------------

#[tokio::test]
async fn process_accumulated_passes_full_history() {
    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let seen_in_tool = seen.clone();

    let engine = Engine::builder()
        .tool(
            "tally",
            ToolSpec::new(move |args: Value| {
                seen_in_tool.lock().push(args.clone());
                let total: i64 = args
                    .as_array()
                    .map(|xs| xs.iter().filter_map(Value::as_i64).sum())
                    .unwrap_or(0);
                Ok(json!(total))
            })
            .process_accumulated(true),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    sum:
      node_type: tool
      event_triggers: [TALLY]
      tool_name: tally
      context_parameter_field: readings
      output_field: total
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["TALLY"])
                .context_field("readings", json!([4, 7, 9])),
        )
        .await
        .unwrap();

    // The tool saw exactly what get_accumulated returns at spawn time.
    assert_eq!(seen.lock().as_slice(), [json!([4, 7, 9])]);

    let ctx = engine
        .backends()
        .context
        .get_context(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctx.get_field("total"), Some(&json!(20)));
}

#[tokio::test]
async fn context_parameter_field_passes_current_mapping() {
    let engine = Engine::builder()
        .tool(
            "send",
            ToolSpec::new(|args: Value| {
                let to = args["to"].as_str().unwrap_or_default().to_string();
                Ok(json!({"sent_to": to}))
            }),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    deliver:
      node_type: tool
      event_triggers: [SEND]
      tool_name: send
      context_parameter_field: delivery_args
      output_field: receipt
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["SEND"])
                .context_field("delivery_args", json!({"to": "ops@example.com"})),
        )
        .await
        .unwrap();

    let ctx = engine
        .backends()
        .context
        .get_context(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ctx.get_field("receipt"),
        Some(&json!({"sent_to": "ops@example.com"}))
    );
}

// ---------------------------------------------------------------------------
// Model failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn llm_failure_signal_after_exhausted_retries() {
    // Every response is unparseable; retries: 1 means two attempts.
    let engine = Engine::builder()
        .model_caller(ScriptedModel::new(["not json", "still not json"]))
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    think:
      node_type: llm
      event_triggers: [START]
      prompt: "Answer carefully"
      output_field: answer
      retries: 1
      llm_failure_signal: LLM_FAILED
    cleanup:
      node_type: router
      event_triggers: [LLM_FAILED]
      event_emissions:
        - signal_name: HANDLED
"#,
    );

    let execution_id = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["START"]))
        .await
        .unwrap();

    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.signals, ["START", "LLM_FAILED", "HANDLED"]);
    assert_eq!(op.llm_calls, 2);
    assert_eq!(op.errors, 1);
}

#[tokio::test]
async fn output_schema_enforces_type_with_retry_feedback() {
    // First reply violates the declared string schema; the retry (with
    // validation feedback folded into the prompt) corrects it.
    let engine = Engine::builder()
        .model_caller(ScriptedModel::new([
            r#"{"sentiment": 5}"#,
            r#"{"sentiment": "positive"}"#,
        ]))
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    classify:
      node_type: llm
      event_triggers: [START]
      prompt: "Classify {{ context.message }}"
      output_field: sentiment
context_schema:
  sentiment:
    type: string
    description: Detected sentiment label
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["START"])
                .context_field("message", json!("great work")),
        )
        .await
        .unwrap();

    let ctx = engine
        .backends()
        .context
        .get_context(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctx.get_field("sentiment"), Some(&json!("positive")));
    assert_eq!(ctx.operational().llm_calls, 2);
}

#[tokio::test]
async fn llm_failure_without_signal_is_fatal() {
    let engine = Engine::builder()
        .model_caller(ScriptedModel::new(["garbage"]))
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    think:
      node_type: llm
      event_triggers: [START]
      prompt: "Answer"
      retries: 0
"#,
    );

    let err = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["START"]))
        .await
        .unwrap_err();
    match err {
        EngineError::Node { node, source } => {
            assert_eq!(node, "think");
            assert!(matches!(source, NodeError::Model(_)));
        }
        other => panic!("expected node failure, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Agent loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn agent_calls_tool_then_finishes() {
    let lookups = Arc::new(AtomicU32::new(0));
    let lookups_in_tool = lookups.clone();

    let engine = Engine::builder()
        .model_caller(ScriptedModel::new([
            r#"{"action": "call_tool", "tool_name": "lookup", "arguments": {"key": "temperature"}}"#,
            r#"{"action": "finish", "report": "72 degrees and sunny"}"#,
        ]))
        .tool(
            "lookup",
            ToolSpec::new(move |args: Value| {
                lookups_in_tool.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"key": args["key"], "value": 72}))
            })
            .description("Look up a measurement by key")
            .parameters(json!({
                "type": "object",
                "properties": {"key": {"type": "string"}},
                "required": ["key"]
            })),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    reporter:
      node_type: agent
      event_triggers: [START]
      prompt: "Report the current conditions"
      tools: [lookup]
      output_field: report
      event_emissions:
        - signal_name: REPORTED
"#,
    );

    let execution_id = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["START"]))
        .await
        .unwrap();

    let ctx = engine
        .backends()
        .context
        .get_context(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctx.get_field("report"), Some(&json!("72 degrees and sunny")));

    let op = ctx.operational();
    assert_eq!(op.llm_calls, 2);
    assert_eq!(op.tool_calls, 1);
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
    assert!(op.signals.contains(&"REPORTED".to_string()));
}

// ---------------------------------------------------------------------------
// Child context projection and signal propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn child_inherits_inputs_and_propagates_results() {
    let engine = Engine::builder()
        .tool(
            "summarize",
            ToolSpec::new(|args: Value| {
                let text = args["text"].as_str().unwrap_or_default().to_string();
                Ok(json!(format!("summary of {text}")))
            }),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    delegate:
      node_type: child
      event_triggers: [START]
      child_workflow_name: sub
      child_initial_signals: [GO]
      input_fields: [document]
      signals_to_parent: [SUB_DONE]
      context_updates_to_parent: [summary]
    finish:
      node_type: router
      event_triggers: [SUB_DONE]
      event_emissions:
        - signal_name: COMPLETE
  sub:
    work:
      node_type: tool
      event_triggers: [GO]
      tool_name: summarize
      parameters:
        text: "{{ context.document }}"
      output_field: summary
      event_emissions:
        - signal_name: SUB_DONE
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["START"])
                .context_field("document", json!("the quarterly report")),
        )
        .await
        .unwrap();

    let ctx = engine
        .backends()
        .context
        .get_context(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ctx.get_field("summary"),
        Some(&json!("summary of the quarterly report"))
    );

    let op = ctx.operational();
    assert_eq!(op.signals, ["START", "SUB_DONE", "COMPLETE"]);
    assert_eq!(op.nodes.get("delegate"), Some(&1));
    assert_eq!(op.nodes.get("finish"), Some(&1));

    // The child kept its own signal history under the shared main id.
    let ids = engine
        .backends()
        .context
        .list_executions()
        .await
        .unwrap()
        .unwrap();
    let child_id = ids.iter().find(|id| *id != &execution_id).unwrap();
    let child_ctx = engine
        .backends()
        .context
        .get_context(child_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child_ctx.operational().signals, ["GO", "SUB_DONE"]);
    assert_eq!(child_ctx.main_execution_id(), execution_id);
}

// ---------------------------------------------------------------------------
// Atomicity on fatal failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fatal_failure_preserves_committed_context_only() {
    // First tool succeeds and commits; second tool always fails with no
    // failure signal, so the run aborts after the first commit.
    let engine = Engine::builder()
        .tool("step_one", ToolSpec::new(|_: Value| Ok(json!("one done"))))
        .tool(
            "step_two",
            ToolSpec::new(|_: Value| -> Result<Value, ToolError> {
                Err(ToolError::execution("boom"))
            })
            .max_retries(0),
        )
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    first:
      node_type: tool
      event_triggers: [START]
      tool_name: step_one
      output_field: first_result
      event_emissions:
        - signal_name: NEXT
    second:
      node_type: tool
      event_triggers: [NEXT]
      tool_name: step_two
      output_field: second_result
"#,
    );

    let err = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["START"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Node { .. }));

    // The failed handler's writes are absent; the committed one survives,
    // and counters reflect the partial run.
    let ids = engine
        .backends()
        .context
        .list_executions()
        .await
        .unwrap()
        .unwrap();
    let ctx = engine
        .backends()
        .context
        .get_context(&ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctx.get_field("first_result"), Some(&json!("one done")));
    assert_eq!(ctx.get_field("second_result"), None);

    let op = ctx.operational();
    assert_eq!(op.tool_calls, 2);
    assert_eq!(op.nodes.get("first"), Some(&1));
    assert_eq!(op.nodes.get("second"), Some(&1));
}

// ---------------------------------------------------------------------------
// Runtime self-modification through built-ins
// ---------------------------------------------------------------------------

#[tokio::test]
async fn injected_node_participates_in_dispatch() {
    let engine = Engine::builder().build();
    let cfg = config(
        r#"
workflows:
  main:
    evolve:
      node_type: tool
      event_triggers: [START]
      tool_name: soe_inject_node
      parameters:
        workflow_name: main
        node_name: echo
        node_config_data: "{\"node_type\": \"router\", \"event_triggers\": [\"PING\"], \"event_emissions\": [{\"signal_name\": \"PONG\"}]}"
      event_emissions:
        - signal_name: PING
"#,
    );

    let execution_id = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["START"]))
        .await
        .unwrap();

    // The injected router saw PING within the same run.
    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.signals, ["START", "PING", "PONG"]);
    assert_eq!(op.nodes.get("echo"), Some(&1));

    // A config-inheriting execution observes the evolved registry.
    let e2 = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .signals(["PING"])
                .inherit_config_from(&execution_id),
        )
        .await
        .unwrap();
    let op2 = operational(&engine, &e2).await;
    assert_eq!(op2.signals, ["PING", "PONG"]);
}

// ---------------------------------------------------------------------------
// Identity-gated conversation history
// ---------------------------------------------------------------------------

/// Scripted model that also records the prompts it was given.
struct RecordingModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ModelCaller for RecordingModel {
    async fn complete(&self, prompt: &str, _node: &NodeConfig) -> Result<String, ModelError> {
        self.prompts.lock().push(prompt.to_string());
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| ModelError::Call {
                message: "out of responses".into(),
            })
    }
}

#[tokio::test]
async fn identity_gates_shared_conversation_history() {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let engine = Engine::builder()
        .model_caller(RecordingModel {
            responses: Mutex::new(
                [r#"{"answer": "four"}"#, r#"{"answer": "six"}"#]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            prompts: prompts.clone(),
        })
        .build();
    let cfg = config(
        r#"
workflows:
  main:
    chat:
      node_type: llm
      event_triggers: [ASK]
      prompt: "Answer: {{ context.question }}"
      identity: assistant
      output_field: answer
identities:
  assistant: You are concise.
"#,
    );

    let execution_id = engine
        .orchestrate(
            OrchestrateRequest::new("main")
                .config(cfg)
                .signals(["ASK"])
                .context_field("question", json!("what is 2+2?")),
        )
        .await
        .unwrap();
    engine
        .broadcast_signals(&execution_id, vec!["ASK".into()])
        .await
        .unwrap();

    // Identity seeds the system prompt, then each call appends one
    // user/assistant turn, all keyed by the root execution id.
    let history = engine
        .backends()
        .conversation_history
        .as_ref()
        .unwrap()
        .get_history(&execution_id)
        .await
        .unwrap();
    let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, ["system", "user", "assistant", "user", "assistant"]);
    assert_eq!(history[0].content, "You are concise.");
    assert_eq!(history[2].content, "four");

    // The second call's prompt carried the accumulated transcript.
    let recorded = prompts.lock();
    assert_eq!(recorded.len(), 2);
    assert!(recorded[1].contains("[assistant]: four"));
    assert!(recorded[1].contains("[system]: You are concise."));
}

// ---------------------------------------------------------------------------
// Guard routers over operational counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guard_router_bounds_a_cycle() {
    let engine = Engine::builder().build();
    // loops re-emits TICK until its own activation count reaches 3.
    let cfg = config(
        r#"
workflows:
  main:
    loops:
      node_type: router
      event_triggers: [TICK]
      event_emissions:
        - signal_name: TICK
          condition: "{{ context.__operational__.nodes.loops is not defined or context.__operational__.nodes.loops < 3 }}"
        - signal_name: STOP
          condition: "{{ context.__operational__.nodes.loops is defined and context.__operational__.nodes.loops >= 3 }}"
"#,
    );

    let execution_id = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["TICK"]))
        .await
        .unwrap();

    let op = operational(&engine, &execution_id).await;
    assert_eq!(op.nodes.get("loops"), Some(&4));
    assert_eq!(op.signals.last(), Some(&"STOP".to_string()));
}

#[tokio::test]
async fn activation_ceiling_stops_runaway_workflows() {
    let engine = Engine::builder().max_node_activations(10).build();
    let cfg = config(
        r#"
workflows:
  main:
    forever:
      node_type: router
      event_triggers: [TICK]
      event_emissions:
        - signal_name: TICK
"#,
    );

    let err = engine
        .orchestrate(OrchestrateRequest::new("main").config(cfg).signals(["TICK"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActivationCeiling { limit: 10 }));
}

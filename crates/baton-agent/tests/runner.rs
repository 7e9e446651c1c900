//! End-to-end runs against the scripted fake model.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use baton_agent::filters::remove_all_tools_filter;
use baton_agent::shell::{LocalShellCommandRequest, LocalShellExecutor, LocalShellTool};
use baton_agent::tool_guardrails::ToolInputGuardrailData;
use baton_agent::{
    Agent, AgentBuilder, AgentError, AgentToolOptions, CallModelInputFilter, FunctionTool, GuardrailFunctionOutput, Handoff,
    HandoffInputFilter, InputGuardrail, ModelInputData, ModelRef, OutputGuardrail, OutputSchema, RunConfig,
    RunContext, RunHooks, RunOptions, Runner, ToolGuardrailFunctionOutput, ToolInputGuardrail,
    ToolOutputGuardrail, ToolUseBehavior,
};
use baton_core::error::Result as CoreResult;
use baton_core::items::{Item, LocalShellAction, ModelResponse};
use baton_core::session::{MemorySession, Session};
use baton_core::usage::Usage;
use baton_providers::testing::{FAKE_RESPONSE_ID, FakeModel, function_call, text_message};
use baton_providers::{Model, ModelProvider};

fn agent(name: &str, model: &Arc<FakeModel>) -> AgentBuilder {
    Agent::builder(name).model(ModelRef::instance(model.clone()))
}

fn echo_tool(name: &str, result: &'static str) -> FunctionTool {
    FunctionTool::from_sync(name, "Returns a fixed result", json!({"type": "object"}), move |_, _| Ok(result))
}

#[tokio::test]
async fn test_tool_call_then_final_output() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![text_message("a_message"), function_call("foo", r#"{"a":"b"}"#)],
        vec![text_message("done")],
    ]);
    let agent = agent("test", &model).tool(echo_tool("foo", "tool_result")).build();

    let result = Runner::run(agent, "user_message", RunOptions::default()).await.unwrap();

    assert_eq!(result.raw_responses.len(), 2);
    assert_eq!(result.final_output, json!("done"));
    assert_eq!(result.new_items.len(), 4);
    assert_eq!(result.to_input_list().len(), 5);
    assert_eq!(result.last_agent().name, "test");
    assert_eq!(result.last_response_id(), Some(FAKE_RESPONSE_ID));
}

#[tokio::test]
async fn test_stop_on_first_tool_uses_first_result() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("first", "{}"), function_call("second", "{}")],
        vec![text_message("never")],
    ]);
    let agent = agent("test", &model)
        .tool(echo_tool("first", "first result"))
        .tool(echo_tool("second", "second result"))
        .tool_use_behavior(ToolUseBehavior::StopOnFirstTool)
        .build();

    let result = Runner::run(agent, "go", RunOptions::default()).await.unwrap();

    assert_eq!(result.final_output, json!("first result"));
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_conversation_id_sends_only_new_items() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![vec![function_call("foo", "{}")], vec![text_message("done")]]);
    let agent = agent("test", &model).tool(echo_tool("foo", "tool_result")).build();
    let options = RunOptions {
        run_config: RunConfig {
            conversation_id: Some("conv_123".into()),
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    let result = Runner::run(agent, "hi", options).await.unwrap();
    assert_eq!(result.final_output, json!("done"));

    let first = model.first_turn_args().unwrap();
    assert_eq!(first.input, vec![Item::user_message("hi")]);
    assert_eq!(first.conversation_id.as_deref(), Some("conv_123"));

    let second = model.last_turn_args().unwrap();
    assert_eq!(second.input.len(), 1);
    assert!(matches!(&second.input[0], Item::FunctionCallOutput { output, .. } if output == "tool_result"));
    assert_eq!(second.conversation_id.as_deref(), Some("conv_123"));
    assert!(second.previous_response_id.is_none());
}

#[tokio::test]
async fn test_conversation_id_survives_handoff_filter() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("foo", "{}")],
        vec![function_call("transfer_to_b", "{}")],
        vec![text_message("done")],
    ]);
    let b = agent("b", &model).build();
    let handoff = Handoff::builder(b)
        .input_filter(HandoffInputFilter::from_fn(|mut data| {
            data.pre_handoff_items.clear();
            data
        }))
        .build()
        .unwrap();
    let a = agent("a", &model).tool(echo_tool("foo", "tool_result")).handoff(handoff).build();
    let options = RunOptions {
        run_config: RunConfig {
            conversation_id: Some("conv_123".into()),
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    let result = Runner::run(a, "hi", options).await.unwrap();

    assert_eq!(result.final_output, json!("done"));
    assert_eq!(result.last_agent().name, "b");
    let third = model.last_turn_args().unwrap();
    assert_eq!(third.input.len(), 1);
    assert!(matches!(&third.input[0], Item::FunctionCallOutput { output, .. } if output == r#"{"assistant":"b"}"#));
    assert_eq!(third.conversation_id.as_deref(), Some("conv_123"));
}

#[tokio::test]
async fn test_previous_response_id_is_chained() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![vec![function_call("foo", "{}")], vec![text_message("done")]]);
    let agent = agent("test", &model).tool(echo_tool("foo", "tool_result")).build();
    let options = RunOptions {
        run_config: RunConfig {
            previous_response_id: Some("resp_start".into()),
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    Runner::run(agent, "hi", options).await.unwrap();

    let first = model.first_turn_args().unwrap();
    assert_eq!(first.previous_response_id.as_deref(), Some("resp_start"));
    let second = model.last_turn_args().unwrap();
    assert_eq!(second.previous_response_id.as_deref(), Some(FAKE_RESPONSE_ID));
    assert_eq!(second.input.len(), 1);
}

#[tokio::test]
async fn test_full_history_without_server_state() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![vec![function_call("foo", "{}")], vec![text_message("done")]]);
    let agent = agent("test", &model).tool(echo_tool("foo", "tool_result")).build();

    Runner::run(agent, "hi", RunOptions::default()).await.unwrap();

    let second = model.last_turn_args().unwrap();
    assert_eq!(second.input.len(), 3);
    assert!(second.previous_response_id.is_none());
    assert!(second.conversation_id.is_none());
}

#[tokio::test]
async fn test_input_guardrail_tripwire_prevents_model_call() {
    let model = Arc::new(FakeModel::with_output(vec![text_message("should not run")]));
    let agent = agent("test", &model)
        .input_guardrail(InputGuardrail::from_fn("no_secrets", |_, _, _| {
            GuardrailFunctionOutput::tripwire(json!({"reason": "secret"}))
        }))
        .build();

    let err = Runner::run(agent, "my password is hunter2", RunOptions::default())
        .await
        .unwrap_err();

    assert_eq!(model.call_count(), 0);
    match &err {
        AgentError::InputGuardrailTripwireTriggered {
            guardrail, output_info, ..
        } => {
            assert_eq!(guardrail, "no_secrets");
            assert_eq!(output_info, &json!({"reason": "secret"}));
        }
        other => panic!("unexpected error: {other}"),
    }
    let run_data = err.run_data().unwrap();
    assert!(run_data.raw_responses.is_empty());
    assert_eq!(run_data.last_agent, "test");
}

#[tokio::test]
async fn test_run_config_guardrails_run_with_agent_guardrails() {
    let model = Arc::new(FakeModel::with_output(vec![text_message("fine")]));
    let agent = agent("test", &model)
        .input_guardrail(InputGuardrail::from_fn("agent_level", |_, _, _| {
            GuardrailFunctionOutput::pass(Value::Null)
        }))
        .build();
    let options = RunOptions {
        run_config: RunConfig {
            input_guardrails: vec![InputGuardrail::from_fn("run_level", |_, _, _| {
                GuardrailFunctionOutput::pass(Value::Null)
            })],
            output_guardrails: vec![OutputGuardrail::from_fn("run_output", |_, _, _| {
                GuardrailFunctionOutput::pass(Value::Null)
            })],
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    let result = Runner::run(agent, "hi", options).await.unwrap();

    let names: Vec<_> = result
        .input_guardrail_results
        .iter()
        .map(|r| r.guardrail_name.as_str())
        .collect();
    assert_eq!(names, vec!["agent_level", "run_level"]);
    assert_eq!(result.output_guardrail_results.len(), 1);
}

#[tokio::test]
async fn test_output_guardrail_tripwire_carries_run_data() {
    let model = Arc::new(FakeModel::with_output(vec![text_message("rude answer")]));
    let agent = agent("test", &model)
        .output_guardrail(OutputGuardrail::from_fn("polite", |_, _, output| {
            if output.as_str().is_some_and(|s| s.contains("rude")) {
                GuardrailFunctionOutput::tripwire(json!("rude"))
            } else {
                GuardrailFunctionOutput::pass(Value::Null)
            }
        }))
        .build();

    let err = Runner::run(agent, "hi", RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, AgentError::OutputGuardrailTripwireTriggered { ref guardrail, .. } if guardrail == "polite"));
    let run_data = err.run_data().unwrap();
    assert_eq!(run_data.raw_responses.len(), 1);
    assert_eq!(run_data.new_items.len(), 1);
}

#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<String>>,
    handoffs: Mutex<Vec<(String, String)>>,
}

impl RecordingHooks {
    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

#[async_trait]
impl RunHooks for RecordingHooks {
    async fn on_agent_start(&self, _: &RunContext, _: &Arc<Agent>) -> anyhow::Result<()> {
        self.record("agent_start");
        Ok(())
    }

    async fn on_agent_end(&self, _: &RunContext, _: &Arc<Agent>, _: &Value) -> anyhow::Result<()> {
        self.record("agent_end");
        Ok(())
    }

    async fn on_handoff(&self, _: &RunContext, from: &Arc<Agent>, to: &Arc<Agent>) -> anyhow::Result<()> {
        self.handoffs
            .lock()
            .unwrap()
            .push((from.name.clone(), to.name.clone()));
        Ok(())
    }

    async fn on_tool_start(&self, _: &RunContext, _: &Arc<Agent>, _: &str) -> anyhow::Result<()> {
        self.record("tool_start");
        Ok(())
    }

    async fn on_tool_end(&self, _: &RunContext, _: &Arc<Agent>, _: &str, _: &str) -> anyhow::Result<()> {
        self.record("tool_end");
        Ok(())
    }

    async fn on_llm_start(
        &self,
        _: &RunContext,
        _: &Arc<Agent>,
        _: Option<&str>,
        _: &[Item],
    ) -> anyhow::Result<()> {
        self.record("llm_start");
        Ok(())
    }

    async fn on_llm_end(&self, _: &RunContext, _: &Arc<Agent>, _: &ModelResponse) -> anyhow::Result<()> {
        self.record("llm_end");
        Ok(())
    }
}

#[tokio::test]
async fn test_handoff_switches_agent_and_fires_hook_once() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("transfer_to_agent_2", "")],
        vec![text_message("done")],
    ]);
    let agent_2 = agent("agent_2", &model).build();
    let agent_1 = agent("agent_1", &model).handoff(agent_2).build();
    let hooks = Arc::new(RecordingHooks::default());
    let options = RunOptions {
        hooks: hooks.clone(),
        ..RunOptions::default()
    };

    let result = Runner::run(agent_1, "hi", options).await.unwrap();

    assert_eq!(result.last_agent().name, "agent_2");
    assert_eq!(result.final_output, json!("done"));
    assert_eq!(
        *hooks.handoffs.lock().unwrap(),
        vec![("agent_1".to_string(), "agent_2".to_string())]
    );
    assert_eq!(hooks.count("agent_start"), 2);
    let handoff_output = result
        .new_items
        .iter()
        .find(|item| item.kind() == "handoff_output_item")
        .unwrap();
    assert!(matches!(handoff_output.raw(), Item::FunctionCallOutput { output, .. } if output == r#"{"assistant":"agent_2"}"#));
}

#[tokio::test]
async fn test_handoff_with_typed_input() {
    #[derive(Deserialize)]
    struct Escalation {
        reason: String,
    }

    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("escalate", r#"{"reason":"billing dispute"}"#)],
        vec![text_message("handled")],
    ]);
    let seen = Arc::new(Mutex::new(None));
    let seen_in_callback = seen.clone();
    let manager = agent("manager", &model).build();
    let handoff = Handoff::builder(manager)
        .tool_name_override("escalate")
        .input_type(json!({
            "type": "object",
            "properties": {"reason": {"type": "string"}},
            "required": ["reason"]
        }))
        .on_handoff(baton_agent::OnHandoff::typed(move |_, input: Escalation| {
            let seen = seen_in_callback.clone();
            async move {
                *seen.lock().unwrap() = Some(input.reason);
                Ok(())
            }
        }))
        .build()
        .unwrap();
    let triage = agent("triage", &model).handoff(handoff).build();

    let result = Runner::run(triage, "help", RunOptions::default()).await.unwrap();

    assert_eq!(result.last_agent().name, "manager");
    assert_eq!(seen.lock().unwrap().as_deref(), Some("billing dispute"));
}

#[tokio::test]
async fn test_handoff_with_invalid_payload_is_model_error() {
    let model = Arc::new(FakeModel::with_output(vec![function_call("escalate", "{not json")]));
    let manager = agent("manager", &model).build();
    let handoff = Handoff::builder(manager)
        .tool_name_override("escalate")
        .input_type(json!({"type": "object"}))
        .on_handoff(baton_agent::OnHandoff::with_input(|_, _| async { Ok(()) }))
        .build()
        .unwrap();
    let triage = agent("triage", &model).handoff(handoff).build();

    let err = Runner::run(triage, "help", RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, AgentError::ModelBehavior(_)));
}

#[tokio::test]
async fn test_handoff_filter_trims_history_for_next_agent() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("foo", "{}"), function_call("transfer_to_billing", "{}")],
        vec![text_message("done")],
    ]);
    let billing = agent("billing", &model).build();
    let handoff = Handoff::builder(billing)
        .input_filter(remove_all_tools_filter())
        .build()
        .unwrap();
    let triage = agent("triage", &model)
        .tool(echo_tool("foo", "tool_result"))
        .handoff(handoff)
        .build();

    let result = Runner::run(triage, "hi", RunOptions::default()).await.unwrap();

    assert_eq!(model.last_turn_args().unwrap().input, vec![Item::user_message("hi")]);
    assert_eq!(result.new_items.len(), 1);
    assert_eq!(result.final_output, json!("done"));
}

#[tokio::test]
async fn test_hooks_fire_for_every_lifecycle_event() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![vec![function_call("foo", "{}")], vec![text_message("done")]]);
    let agent = agent("test", &model).tool(echo_tool("foo", "tool_result")).build();
    let hooks = Arc::new(RecordingHooks::default());
    let options = RunOptions {
        hooks: hooks.clone(),
        ..RunOptions::default()
    };

    Runner::run(agent, "hi", options).await.unwrap();

    assert_eq!(hooks.count("agent_start"), 1);
    assert_eq!(hooks.count("llm_start"), 2);
    assert_eq!(hooks.count("llm_end"), 2);
    assert_eq!(hooks.count("tool_start"), 1);
    assert_eq!(hooks.count("tool_end"), 1);
    assert_eq!(hooks.count("agent_end"), 1);
}

#[tokio::test]
async fn test_llm_end_skipped_when_model_fails() {
    let model = Arc::new(FakeModel::new());
    model.set_next_error("boom");
    let agent = agent("test", &model).build();
    let hooks = Arc::new(RecordingHooks::default());
    let options = RunOptions {
        hooks: hooks.clone(),
        ..RunOptions::default()
    };

    assert!(Runner::run(agent, "hi", options).await.is_err());
    assert_eq!(hooks.count("llm_start"), 1);
    assert_eq!(hooks.count("llm_end"), 0);
}

#[tokio::test]
async fn test_max_turns_exceeded() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("foo", "{}")],
        vec![function_call("foo", "{}")],
        vec![function_call("foo", "{}")],
    ]);
    let agent = agent("test", &model).tool(echo_tool("foo", "again")).build();
    let options = RunOptions {
        max_turns: 2,
        ..RunOptions::default()
    };

    let err = Runner::run(agent, "loop", options).await.unwrap_err();

    assert!(matches!(err, AgentError::MaxTurnsExceeded { max_turns: 2, .. }));
    assert_eq!(err.run_data().unwrap().raw_responses.len(), 2);
    assert_eq!(model.call_count(), 2);
}

/// Session that records the size of every `add_items` call.
struct CountingSession {
    inner: MemorySession,
    adds: Mutex<Vec<usize>>,
}

impl CountingSession {
    fn new() -> Self {
        Self {
            inner: MemorySession::new("counting"),
            adds: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Session for CountingSession {
    fn session_id(&self) -> &str {
        self.inner.session_id()
    }

    async fn get_items(&self, limit: Option<usize>) -> CoreResult<Vec<Item>> {
        self.inner.get_items(limit).await
    }

    async fn add_items(&self, items: Vec<Item>) -> CoreResult<()> {
        self.adds.lock().unwrap().push(items.len());
        self.inner.add_items(items).await
    }

    async fn pop_item(&self) -> CoreResult<Option<Item>> {
        self.inner.pop_item().await
    }

    async fn clear_session(&self) -> CoreResult<()> {
        self.inner.clear_session().await
    }
}

#[tokio::test]
async fn test_session_saves_each_turn_once() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("foo", "{}")],
        vec![text_message("done")],
        vec![text_message("again")],
    ]);
    let agent = agent("test", &model).tool(echo_tool("foo", "tool_result")).build();
    let session = Arc::new(CountingSession::new());
    let options = RunOptions {
        session: Some(session.clone()),
        ..RunOptions::default()
    };

    Runner::run(agent.clone(), "first", options.clone()).await.unwrap();
    assert_eq!(*session.adds.lock().unwrap(), vec![1, 2, 1]);
    assert_eq!(session.get_items(None).await.unwrap().len(), 4);

    let result = Runner::run(agent, "second", options).await.unwrap();
    assert_eq!(result.final_output, json!("again"));
    assert_eq!(model.last_turn_args().unwrap().input.len(), 5);
    assert_eq!(*session.adds.lock().unwrap(), vec![1, 2, 1, 1, 1]);
}

#[tokio::test]
async fn test_tool_added_during_run_is_callable() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("add_more", "{}")],
        vec![function_call("late", "{}")],
        vec![text_message("done")],
    ]);
    let adder = FunctionTool::from_sync("add_more", "Adds a tool", json!({"type": "object"}), |ctx, _| {
        ctx.agent.add_tool(echo_tool("late", "late result"));
        Ok("added")
    });
    let agent = agent("test", &model).tool(adder).build();

    let result = Runner::run(agent.clone(), "hi", RunOptions::default()).await.unwrap();

    assert_eq!(result.final_output, json!("done"));
    assert_eq!(agent.tools().len(), 2);
    let outputs: Vec<_> = result
        .new_items
        .iter()
        .filter(|item| item.kind() == "tool_call_output_item")
        .map(|item| item.raw().clone())
        .collect();
    assert!(matches!(&outputs[1], Item::FunctionCallOutput { output, .. } if output == "late result"));
}

#[tokio::test]
async fn test_tool_input_guardrail_rejects_content() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![vec![function_call("delete", "{}")], vec![text_message("ok")]]);
    let called = Arc::new(AtomicBool::new(false));
    let called_in_tool = called.clone();
    let tool = FunctionTool::from_sync("delete", "Deletes things", json!({"type": "object"}), move |_, _| {
        called_in_tool.store(true, Ordering::SeqCst);
        Ok("deleted")
    })
    .with_input_guardrail(ToolInputGuardrail::from_fn("no_delete", |data: &ToolInputGuardrailData| {
        ToolGuardrailFunctionOutput::reject_content(
            format!("{} is not allowed", data.context.tool_name),
            Value::Null,
        )
    }));
    let agent = agent("test", &model).tool(tool).build();

    let result = Runner::run(agent, "hi", RunOptions::default()).await.unwrap();

    assert!(!called.load(Ordering::SeqCst));
    assert_eq!(result.tool_input_guardrail_results.len(), 1);
    let output = result
        .new_items
        .iter()
        .find(|item| item.kind() == "tool_call_output_item")
        .unwrap();
    assert!(matches!(output.raw(), Item::FunctionCallOutput { output, .. } if output == "delete is not allowed"));
}

#[tokio::test]
async fn test_tool_input_guardrail_raise_stops_the_run() {
    let model = Arc::new(FakeModel::with_output(vec![function_call("delete", "{}")]));
    let tool = echo_tool("delete", "deleted").with_input_guardrail(ToolInputGuardrail::from_fn("strict", |_| {
        ToolGuardrailFunctionOutput::raise_exception(json!("forbidden"))
    }));
    let agent = agent("test", &model).tool(tool).build();

    let err = Runner::run(agent, "hi", RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, AgentError::ToolInputGuardrailTripwireTriggered { ref guardrail, .. } if guardrail == "strict"));
    assert!(err.to_string().contains("ToolInputGuardrail"));
    let data = err.run_data().expect("tool tripwire carries run data");
    assert_eq!(data.last_agent, "test");
    assert_eq!(data.raw_responses.len(), 1);
}

#[tokio::test]
async fn test_bad_tool_arguments_are_model_errors() {
    let model = Arc::new(FakeModel::with_output(vec![function_call("foo", "{broken")]));
    let agent = agent("test", &model).tool(echo_tool("foo", "x")).build();

    let err = Runner::run(agent, "hi", RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, AgentError::ModelBehavior(msg) if msg.contains("foo")));
}

#[tokio::test]
async fn test_structured_output() {
    #[derive(Deserialize)]
    struct Answer {
        value: i64,
    }

    let schema = json!({
        "type": "object",
        "properties": {"value": {"type": "integer"}},
        "required": ["value"]
    });
    let model = Arc::new(FakeModel::with_output(vec![text_message(r#"{"value": 3}"#)]));
    let agent1 = agent("test", &model)
        .output_type(OutputSchema::new("answer", schema.clone()).unwrap())
        .build();

    let result = Runner::run(agent1, "hi", RunOptions::default()).await.unwrap();
    assert_eq!(result.final_output_as::<Answer>().unwrap().value, 3);
    assert_eq!(model.first_turn_args().unwrap().output_schema.unwrap().name, "answer");

    let model = Arc::new(FakeModel::with_output(vec![text_message(r#"{"value": "three"}"#)]));
    let agent2 = agent("test", &model)
        .output_type(OutputSchema::new("answer", schema).unwrap())
        .build();
    let err = Runner::run(agent2, "hi", RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, AgentError::ModelBehavior(_)));
}

#[tokio::test]
async fn test_call_model_input_filter_rewrites_request() {
    let model = Arc::new(FakeModel::with_output(vec![text_message("done")]));
    let agent = agent("test", &model).instructions("original").build();
    let options = RunOptions {
        run_config: RunConfig {
            call_model_input_filter: Some(CallModelInputFilter::from_fn(|data| {
                let mut input = data.model_data.input;
                input.push(Item::user_message("injected"));
                ModelInputData {
                    input,
                    instructions: Some("filtered".into()),
                }
            })),
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    Runner::run(agent, "hi", options).await.unwrap();

    let request = model.first_turn_args().unwrap();
    assert_eq!(request.system_instructions.as_deref(), Some("filtered"));
    assert_eq!(request.input.len(), 2);
}

struct EchoShell;

#[async_trait]
impl LocalShellExecutor for EchoShell {
    async fn execute(&self, request: &LocalShellCommandRequest) -> anyhow::Result<String> {
        Ok(format!("ran: {}", request.action.command.join(" ")))
    }
}

#[tokio::test]
async fn test_local_shell_call() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![Item::LocalShellCall {
            id: None,
            call_id: "shell_1".into(),
            action: LocalShellAction {
                command: vec!["echo".into(), "hi".into()],
                ..LocalShellAction::default()
            },
        }],
        vec![text_message("done")],
    ]);
    let agent = agent("test", &model)
        .tool(LocalShellTool::new(Arc::new(EchoShell)))
        .build();

    let result = Runner::run(agent, "hi", RunOptions::default()).await.unwrap();

    assert_eq!(result.final_output, json!("done"));
    assert_eq!(
        result.new_items[1].raw(),
        &Item::LocalShellCallOutput {
            call_id: "shell_1".into(),
            output: "ran: echo hi".into(),
        }
    );
}

#[tokio::test]
async fn test_agent_as_tool_runs_nested_agent() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("ask_expert", r#"{"input":"question"}"#)],
        vec![text_message("expert answer")],
        vec![text_message("done")],
    ]);
    let expert = agent("expert", &model).build();
    let outer = agent("outer", &model)
        .tool(expert.as_tool("ask_expert", "Ask the expert"))
        .build();

    let result = Runner::run(outer, "hi", RunOptions::default()).await.unwrap();

    assert_eq!(result.final_output, json!("done"));
    assert!(matches!(result.new_items[1].raw(), Item::FunctionCallOutput { output, .. } if output == "expert answer"));
    assert_eq!(model.call_count(), 3);
}

struct NamedProvider {
    model: Arc<FakeModel>,
    requested: Mutex<Vec<Option<String>>>,
}

impl ModelProvider for NamedProvider {
    fn get_model(&self, name: Option<&str>) -> anyhow::Result<Arc<dyn Model>> {
        self.requested.lock().unwrap().push(name.map(String::from));
        Ok(self.model.clone())
    }
}

#[tokio::test]
async fn test_model_names_resolve_through_provider() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![vec![text_message("one")], vec![text_message("two")]]);
    let provider = Arc::new(NamedProvider {
        model: model.clone(),
        requested: Mutex::new(Vec::new()),
    });
    let options = RunOptions {
        run_config: RunConfig {
            model_provider: Some(provider.clone()),
            default_model: Some("house-default".into()),
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    let named = Agent::builder("named").model("fake-model").build();
    Runner::run(named, "hi", options.clone()).await.unwrap();
    let unnamed = Agent::builder("unnamed").build();
    Runner::run(unnamed, "hi", options).await.unwrap();

    assert_eq!(
        *provider.requested.lock().unwrap(),
        vec![Some("fake-model".to_string()), Some("house-default".to_string())]
    );
}

#[tokio::test]
async fn test_agent_as_tool_resolves_names_through_calling_run() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("ask_expert", r#"{"input":"question"}"#)],
        vec![text_message("expert answer")],
        vec![text_message("done")],
    ]);
    let provider = Arc::new(NamedProvider {
        model: model.clone(),
        requested: Mutex::new(Vec::new()),
    });
    let expert = Agent::builder("expert").model("gpt-x").build();
    let outer = Agent::builder("outer")
        .model("gpt-x")
        .tool(expert.as_tool("ask_expert", "Ask the expert"))
        .build();
    let options = RunOptions {
        run_config: RunConfig {
            model_provider: Some(provider.clone()),
            conversation_id: Some("conv_outer".into()),
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    let result = Runner::run(outer, "hi", options).await.unwrap();

    assert_eq!(result.final_output, json!("done"));
    assert_eq!(*provider.requested.lock().unwrap(), vec![Some("gpt-x".to_string()); 3]);
    assert!(matches!(result.new_items[1].raw(), Item::FunctionCallOutput { output, .. } if output == "expert answer"));
}

#[tokio::test]
async fn test_agent_as_tool_with_explicit_options() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("ask_expert", r#"{"input":"question"}"#)],
        vec![function_call("lookup", "{}")],
        vec![text_message("never")],
    ]);
    let expert = agent("expert", &model).tool(echo_tool("lookup", "x")).build();
    let tool = expert.as_tool_with(
        "ask_expert",
        "Ask the expert",
        AgentToolOptions {
            max_turns: Some(1),
            ..AgentToolOptions::default()
        },
    );
    let outer = agent("outer", &model).tool(tool).build();

    let err = Runner::run(outer, "hi", RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, AgentError::MaxTurnsExceeded { .. }));
}

#[tokio::test]
async fn test_usage_accumulates_across_turns() {
    let model = Arc::new(FakeModel::new());
    model.set_hardcoded_usage(Usage::single_request(10, 5));
    model.add_multiple_turn_outputs(vec![vec![function_call("foo", "{}")], vec![text_message("done")]]);
    let agent = agent("test", &model).tool(echo_tool("foo", "x")).build();

    let result = Runner::run(agent, "hi", RunOptions::default()).await.unwrap();

    let usage = result.usage();
    assert_eq!(usage.requests, 2);
    assert_eq!(usage.total_tokens, 30);
    assert_eq!(usage.request_usage_entries.len(), 2);
}

#[tokio::test]
async fn test_exclusive_server_modes_rejected_before_running() {
    let model = Arc::new(FakeModel::with_output(vec![text_message("x")]));
    let agent = agent("test", &model).build();
    let options = RunOptions {
        run_config: RunConfig {
            previous_response_id: Some("resp_1".into()),
            conversation_id: Some("conv_1".into()),
            ..RunConfig::default()
        },
        ..RunOptions::default()
    };

    let err = Runner::run(agent, "hi", options).await.unwrap_err();
    assert!(matches!(err, AgentError::User(_)));
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_tool_calls_run_concurrently() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let slow_tool = |name: &str| {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        FunctionTool::new(name, "Slow", json!({"type": "object"}), move |_, _| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok("slow")
            }
        })
    };
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("a", "{}"), function_call("b", "{}")],
        vec![text_message("done")],
    ]);
    let agent = agent("test", &model).tool(slow_tool("a")).tool(slow_tool("b")).build();

    Runner::run(agent, "hi", RunOptions::default()).await.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_tool_lets_sibling_calls_finish() {
    let finished = Arc::new(AtomicBool::new(false));
    let finished_in_tool = finished.clone();
    let slow = FunctionTool::new("slow", "Slow", json!({"type": "object"}), move |_, _| {
        let finished = finished_in_tool.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            finished.store(true, Ordering::SeqCst);
            Ok("slow")
        }
    });
    let trip = echo_tool("trip", "secret").with_output_guardrail(ToolOutputGuardrail::from_fn("leak", |_| {
        ToolGuardrailFunctionOutput::raise_exception(json!("leaked"))
    }));
    let model = Arc::new(FakeModel::with_output(vec![function_call("slow", "{}"), function_call("trip", "{}")]));
    let agent = agent("test", &model).tool(slow).tool(trip).build();

    let err = Runner::run(agent, "hi", RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, AgentError::ToolOutputGuardrailTripwireTriggered { ref guardrail, .. } if guardrail == "leak"));
    assert!(finished.load(Ordering::SeqCst));
    assert!(err.run_data().is_some());
}

#[tokio::test]
async fn test_tool_enablement_is_checked_once_per_turn() {
    let checks = Arc::new(AtomicUsize::new(0));
    let checks_in_tool = checks.clone();
    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_tool = ran.clone();
    let flaky = FunctionTool::from_sync("flaky", "Flaky", json!({"type": "object"}), move |_, _| {
        ran_in_tool.store(true, Ordering::SeqCst);
        Ok("ran")
    })
    .enabled_when(move |_ctx, _agent| {
        let checks = checks_in_tool.clone();
        async move { checks.fetch_add(1, Ordering::SeqCst) > 0 }
    });
    let model = Arc::new(FakeModel::with_output(vec![function_call("flaky", "{}")]));
    let agent = agent("test", &model).tool(flaky).build();

    let err = Runner::run(agent, "hi", RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, AgentError::ModelBehavior(ref msg) if msg.contains("flaky")));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(checks.load(Ordering::SeqCst), 1);
    assert!(model.first_turn_args().unwrap().tools.is_empty());
}

struct GateHooks;

#[async_trait]
impl RunHooks for GateHooks {
    async fn on_tool_start(&self, _: &RunContext, _: &Arc<Agent>, tool: &str) -> anyhow::Result<()> {
        match tool {
            "blocked" => Err(AgentError::User(format!("{tool} needs approval")).into()),
            _ => anyhow::bail!("audit log unavailable"),
        }
    }
}

#[tokio::test]
async fn test_hook_agent_errors_stop_the_run() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("open", "{}")],
        vec![function_call("blocked", "{}")],
        vec![text_message("never")],
    ]);
    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_tool = ran.clone();
    let blocked = FunctionTool::from_sync("blocked", "Blocked", json!({"type": "object"}), move |_, _| {
        ran_in_tool.store(true, Ordering::SeqCst);
        Ok("ran")
    });
    let agent = agent("test", &model).tool(echo_tool("open", "opened")).tool(blocked).build();
    let options = RunOptions {
        hooks: Arc::new(GateHooks),
        ..RunOptions::default()
    };

    let err = Runner::run(agent, "hi", options).await.unwrap_err();

    assert!(matches!(err, AgentError::User(ref msg) if msg == "blocked needs approval"));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(model.call_count(), 2);
}

//! Streamed runs: event order, cancellation, and error delivery.

use std::sync::Arc;

use serde_json::json;
use tokio_stream::StreamExt;

use baton_agent::run::RunItemEventName;
use baton_agent::{
    Agent, AgentBuilder, AgentError, CancelMode, FunctionTool, ModelRef, RunOptions, Runner, StreamEvent,
};
use baton_core::items::Item;
use baton_core::session::{MemorySession, Session};
use baton_providers::testing::{FakeModel, function_call, text_message};

fn agent(name: &str, model: &Arc<FakeModel>) -> AgentBuilder {
    Agent::builder(name).model(ModelRef::instance(model.clone()))
}

fn tool_then_done(model: &FakeModel) {
    model.add_multiple_turn_outputs(vec![
        vec![text_message("checking"), function_call("foo", r#"{"a":"b"}"#)],
        vec![text_message("done")],
    ]);
}

fn foo_tool() -> FunctionTool {
    FunctionTool::from_sync("foo", "Test tool", json!({"type": "object"}), |_, _| Ok("tool_result"))
}

#[tokio::test]
async fn test_streamed_run_emits_events_in_order() {
    let model = Arc::new(FakeModel::new());
    tool_then_done(&model);
    let agent = agent("test", &model).tool(foo_tool()).build();

    let result = Runner::run_streamed(agent, "hi", RunOptions::default()).unwrap();
    let mut events = Vec::new();
    {
        let mut stream = std::pin::pin!(result.stream_events());
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
    }

    assert_eq!(events[0].type_name(), "agent_updated_stream_event");
    assert!(events.iter().any(|e| matches!(e, StreamEvent::RawResponse(_))));
    let item_events: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::RunItem { name, .. } => Some(*name),
            _ => None,
        })
        .collect();
    assert_eq!(
        item_events,
        vec![
            RunItemEventName::MessageOutputCreated,
            RunItemEventName::ToolCalled,
            RunItemEventName::ToolOutput,
            RunItemEventName::MessageOutputCreated,
        ]
    );

    assert!(result.is_complete());
    assert_eq!(result.final_output(), json!("done"));
    assert_eq!(result.current_turn(), 2);
    assert_eq!(result.raw_responses().len(), 2);
    assert_eq!(result.to_input_list().len(), 5);
}

async fn count_events_after_cancel(mode: CancelMode) -> (usize, bool) {
    let model = Arc::new(FakeModel::new());
    tool_then_done(&model);
    let agent = agent("test", &model).tool(foo_tool()).build();

    let result = Runner::run_streamed(agent, "hi", RunOptions::default()).unwrap();
    result.cancel(mode);
    let mut count = 0;
    while let Some(event) = result.next_event().await {
        event.unwrap();
        count += 1;
    }
    (count, result.is_complete())
}

#[tokio::test]
async fn test_soft_cancel_yields_more_events_than_immediate() {
    let (after_turn, after_turn_complete) = count_events_after_cancel(CancelMode::AfterTurn).await;
    let (immediate, immediate_complete) = count_events_after_cancel(CancelMode::Immediate).await;

    assert!(after_turn > immediate);
    assert!(after_turn_complete);
    assert!(immediate_complete);
}

#[tokio::test]
async fn test_soft_cancel_finishes_turn_and_persists_it() {
    let model = Arc::new(FakeModel::new());
    tool_then_done(&model);
    let agent = agent("test", &model).tool(foo_tool()).build();
    let session = Arc::new(MemorySession::new("soft-cancel"));
    let options = RunOptions {
        session: Some(session.clone()),
        ..RunOptions::default()
    };

    let result = Runner::run_streamed(agent, "hi", options).unwrap();
    result.cancel(CancelMode::AfterTurn);
    while let Some(event) = result.next_event().await {
        event.unwrap();
    }

    assert_eq!(model.call_count(), 1);
    assert_eq!(result.current_turn(), 1);
    assert_eq!(result.final_output(), serde_json::Value::Null);
    assert_eq!(result.new_items().len(), 3);
    // Input plus the completed turn's three items.
    assert_eq!(session.get_items(None).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_immediate_overrides_after_turn() {
    let model = Arc::new(FakeModel::new());
    tool_then_done(&model);
    let agent = agent("test", &model).tool(foo_tool()).build();

    let result = Runner::run_streamed(agent, "hi", RunOptions::default()).unwrap();
    result.cancel(CancelMode::AfterTurn);
    result.cancel(CancelMode::Immediate);
    result.cancel(CancelMode::AfterTurn);

    assert!(result.next_event().await.is_none());
    assert!(result.is_complete());
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_model_error_arrives_through_the_stream() {
    let model = Arc::new(FakeModel::new());
    model.set_next_error("upstream unavailable");
    let agent = agent("test", &model).build();

    let result = Runner::run_streamed(agent, "hi", RunOptions::default()).unwrap();
    let mut errors = Vec::new();
    while let Some(event) = result.next_event().await {
        if let Err(e) = event {
            errors.push(e);
        }
    }

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], AgentError::Model(_)));
    assert!(result.is_complete());
}

#[tokio::test]
async fn test_handoff_emits_agent_updated_for_each_agent() {
    let model = Arc::new(FakeModel::new());
    model.add_multiple_turn_outputs(vec![
        vec![function_call("transfer_to_agent_2", "")],
        vec![text_message("done")],
    ]);
    let agent_2 = agent("agent_2", &model).build();
    let agent_1 = agent("agent_1", &model).handoff(agent_2).build();

    let result = Runner::run_streamed(agent_1, "hi", RunOptions::default()).unwrap();
    let mut agents = Vec::new();
    let mut handoff_names = Vec::new();
    while let Some(event) = result.next_event().await {
        match event.unwrap() {
            StreamEvent::AgentUpdated { new_agent } => agents.push(new_agent.name.clone()),
            StreamEvent::RunItem { name, .. } if name.as_str().starts_with("handoff") => {
                handoff_names.push(name.as_str())
            }
            _ => {}
        }
    }

    assert_eq!(agents, vec!["agent_1", "agent_2"]);
    assert_eq!(handoff_names, vec!["handoff_requested", "handoff_occured"]);
    assert_eq!(result.last_agent().name, "agent_2");
}

#[tokio::test]
async fn test_raw_events_end_with_completed_response() {
    let model = Arc::new(FakeModel::with_output(vec![text_message("hello")]));
    let agent = agent("test", &model).build();

    let result = Runner::run_streamed(agent, "hi", RunOptions::default()).unwrap();
    let mut raw = Vec::new();
    while let Some(event) = result.next_event().await {
        if let StreamEvent::RawResponse(event) = event.unwrap() {
            raw.push(event.type_name());
        }
    }

    assert_eq!(raw.first(), Some(&"response.created"));
    assert_eq!(raw.last(), Some(&"response.completed"));
    assert_eq!(result.snapshot().final_output_text(), "hello");
    assert_eq!(result.new_items()[0].raw(), &Item::assistant_message("hello"));
}

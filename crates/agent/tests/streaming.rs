//! Streamed runs: event sequences, laziness, the observer side channel,
//! and veto behavior mid-stream.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use capstan_agent::{AgentEvent, AgentOutput, MockDriver, Orchestrator};
use capstan_core::driver::Usage;
use capstan_core::error::Error;
use capstan_core::history::ChatHistory;
use capstan_core::hook::HookFlow;
use capstan_core::message::{Role, ToolCallRequest};
use capstan_core::streaming::{FinishReason, StreamChunk};
use capstan_core::tool::FunctionTool;
use capstan_histories::InMemoryHistory;
use futures::StreamExt;
use serde_json::json;

fn agent_with(driver: MockDriver) -> Orchestrator {
    Orchestrator::new(Box::new(driver), Box::new(InMemoryHistory::new("stream-chat")))
}

fn weather_tool() -> Arc<FunctionTool> {
    Arc::new(
        FunctionTool::new("get_weather", "Get the current weather in a location")
            .add_property("location", "string", "The city to look up")
            .set_required("location")
            .unwrap()
            .with_callback(|args| {
                let city = args["location"].as_str().unwrap_or("?").to_string();
                Ok(json!(format!("22C and sunny in {city}")))
            }),
    )
}

async fn collect(agent: &mut Orchestrator) -> Result<Vec<AgentEvent>> {
    let mut events = Vec::new();
    let mut stream = agent.run_streamed();
    while let Some(event) = stream.next().await {
        events.push(event?);
    }
    Ok(events)
}

#[tokio::test]
async fn text_turn_streams_growing_snapshots_then_done() -> Result<()> {
    let mut driver = MockDriver::new();
    driver.push_chunks(vec![
        StreamChunk::Content { delta: "Once".into() },
        StreamChunk::Content { delta: " upon".into() },
        StreamChunk::Content { delta: " a time.".into() },
        StreamChunk::Finish { reason: FinishReason::Stop },
        StreamChunk::Usage(Usage {
            prompt_tokens: 5,
            completion_tokens: 4,
            total_tokens: 9,
        }),
    ]);

    let mut agent = agent_with(driver);
    agent.message("Tell me a story");
    let events = collect(&mut agent).await?;

    // Three growing snapshots, the final complete state, then the terminal.
    assert_eq!(events.len(), 5);
    let AgentEvent::Chunk(first) = &events[0] else {
        panic!("expected a chunk first");
    };
    assert_eq!(first.content, "Once");
    let AgentEvent::Chunk(last_chunk) = &events[3] else {
        panic!("expected the complete accumulator");
    };
    assert!(last_chunk.complete);
    assert_eq!(last_chunk.content, "Once upon a time.");

    let AgentEvent::Done(AgentOutput::Message(reply)) = &events[4] else {
        panic!("expected a terminal message");
    };
    assert_eq!(reply.content.as_deref(), Some("Once upon a time."));
    assert_eq!(reply.metadata["usage"]["total_tokens"], 9);

    assert_eq!(agent.history().count(), 2);
    Ok(())
}

#[tokio::test]
async fn tool_round_streams_the_call_then_the_answer() -> Result<()> {
    let mut driver = MockDriver::new();
    driver
        .push_tool_calls(vec![ToolCallRequest::new(
            "call_1",
            "get_weather",
            r#"{"location": "Boston"}"#,
        )])
        .push_text("Sunny.");

    let mut agent = agent_with(driver).with_tool(weather_tool());
    agent.message("Weather in Boston?");
    let events = collect(&mut agent).await?;

    // Round one yields the reassembled call; round two streams the reply.
    assert!(matches!(&events[0], AgentEvent::ToolCall(m) if m.is_tool_call()));
    assert!(matches!(&events[1], AgentEvent::Chunk(_)));
    assert!(matches!(events.last(), Some(AgentEvent::Done(_))));

    // user, tool-call turn, tool result, final reply
    let messages = agent.history().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].role, Role::Tool);
    Ok(())
}

#[tokio::test]
async fn observer_sees_every_event_in_order() -> Result<()> {
    let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut driver = MockDriver::new();
    driver.push_text("Hello!");

    let mut agent = agent_with(driver).on_event(move |event| {
        sink.lock().unwrap().push(event.event_type());
    });
    agent.message("Hi");
    let events = collect(&mut agent).await?;

    let streamed: Vec<&'static str> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(*seen.lock().unwrap(), streamed);
    assert_eq!(streamed.last(), Some(&"done"));
    Ok(())
}

#[tokio::test]
async fn streamed_before_send_veto_yields_nothing() -> Result<()> {
    let mut driver = MockDriver::new();
    driver.push_text("never sent");
    let sends = driver.send_count();

    let mut agent = agent_with(driver).on_before_send(|_, _| HookFlow::Veto);
    agent.message("Hi");
    let events = collect(&mut agent).await?;

    assert!(events.is_empty());
    assert_eq!(sends.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn streamed_after_send_veto_ends_without_done() -> Result<()> {
    let mut driver = MockDriver::new();
    driver.push_text("stored but unfinished");

    let mut agent = agent_with(driver).on_after_send(|_, _| HookFlow::Veto);
    agent.message("Hi");
    let events = collect(&mut agent).await?;

    assert!(!events.is_empty());
    assert!(!matches!(events.last(), Some(AgentEvent::Done(_))));
    // The reply was still appended before the veto fired.
    assert_eq!(agent.history().count(), 2);
    Ok(())
}

#[tokio::test]
async fn nothing_happens_until_first_poll() -> Result<()> {
    let mut driver = MockDriver::new();
    driver.push_text("eventually");
    let sends = driver.send_count();

    let mut agent = agent_with(driver);
    agent.message("Hi");

    {
        let stream = agent.run_streamed();
        drop(stream);
    }
    assert_eq!(sends.load(Ordering::SeqCst), 0);
    assert_eq!(agent.history().count(), 0);

    // The queued message survives an unpolled stream.
    let output = agent.run().await?;
    assert!(output.is_some());
    assert_eq!(sends.load(Ordering::SeqCst), 1);
    assert_eq!(agent.history().count(), 2);
    Ok(())
}

#[tokio::test]
async fn streamed_structured_output_decodes_in_done() -> Result<()> {
    let mut driver = MockDriver::new();
    driver.push_text(r#"{"city": "Boston"}"#);

    let mut agent = agent_with(driver).with_response_schema(json!({"type": "object"}));
    agent.message("JSON please");
    let events = collect(&mut agent).await?;

    let Some(AgentEvent::Done(AgentOutput::Structured(value))) = events.last() else {
        panic!("expected structured terminal event");
    };
    assert_eq!(value["city"], "Boston");
    Ok(())
}

#[tokio::test]
async fn backend_failure_surfaces_as_a_stream_error() {
    let mut driver = MockDriver::new();
    driver.push_error(capstan_core::error::DriverError::Network(
        "connection refused".into(),
    ));

    let mut agent = agent_with(driver);
    agent.message("Hi");
    let mut stream = agent.run_streamed();

    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(Error::Driver(_))));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn empty_chunk_sequence_is_a_driver_shape_error() {
    let mut driver = MockDriver::new();
    driver.push_chunks(vec![]);

    let mut agent = agent_with(driver);
    agent.message("Hi");
    let mut stream = agent.run_streamed();

    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(Error::UnexpectedDriverResult(_))));
}

//! End-to-end tests of the execution core against the scripted mock
//! provider. Timing-sensitive tests run under tokio's paused clock so
//! sleeps and watchdogs advance deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kaji::agent::{AgentEvent, AgentStatus, SubagentSpec, SubagentStatus};
use kaji::memory::InMemoryManager;
use kaji::providers::{MockProvider, MockTurn, TimedChunk};
use kaji::stream::{ChatChunk, StopReason, ToolCallDelta};
use kaji::{
    Agent, ChatResponse, FailureCode, LlmError, Message, Role, Tool, ToolCall,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Collects every event the agent emits, losslessly.
fn collect_events(agent: &Agent) -> Arc<Mutex<Vec<AgentEvent>>> {
    init_tracing();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    agent.on_any(Arc::new(move |event| {
        if let Ok(mut events) = sink.lock() {
            events.push(event.clone());
        }
    }));
    events
}

fn text_deltas(events: &[AgentEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::TextDelta { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

fn retry_events(events: &[AgentEvent]) -> Vec<(u32, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::TaskRetry {
                retry_count,
                reason,
                ..
            } => Some((*retry_count, reason.clone())),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn streaming_happy_path() {
    let provider = Arc::new(MockProvider::new().stream_text(
        "m1",
        10,
        Duration::from_millis(50),
    ));
    let agent = Agent::builder()
        .provider(provider.clone())
        .stream(true)
        .idle_timeout(Duration::from_millis(200))
        .build();
    let events = collect_events(&agent);

    let report = agent.execute_with_result("hello").await;

    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(report.retry_count, 0);
    assert_eq!(report.loop_count, 1);
    assert!(report.failure.is_none());

    let events = events.lock().unwrap();
    let deltas = text_deltas(&events);
    assert_eq!(deltas.len(), 10);
    let expected: Vec<String> = (0..10).map(|i| format!("chunk-{i} ")).collect();
    assert_eq!(deltas, expected);
    assert!(retry_events(&events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_fires_and_cancels_the_stream() {
    let provider = Arc::new(MockProvider::new().stream(vec![
        TimedChunk::new(Duration::from_millis(30), ChatChunk::text("m1", "early")),
        TimedChunk::new(Duration::from_millis(500), ChatChunk::text("m1", "late")),
    ]));
    let agent = Agent::builder()
        .provider(provider.clone())
        .stream(true)
        .idle_timeout(Duration::from_millis(100))
        .max_retries(0)
        .build();
    let events = collect_events(&agent);

    let report = agent.execute_with_result("hello").await;

    assert_eq!(report.status, AgentStatus::Failed);
    assert_eq!(report.failure.unwrap().code, FailureCode::LlmTimeout);
    assert!(provider.last_abort_observed());

    // The stalled chunk never produced a delta.
    let events = events.lock().unwrap();
    assert_eq!(text_deltas(&events), vec!["early".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn retry_then_success() {
    let provider = Arc::new(
        MockProvider::new()
            .error(LlmError::Server {
                status: 500,
                retry_after: Some(Duration::from_millis(50)),
                message: "internal error".into(),
            })
            .text("recovered"),
    );
    let agent = Agent::builder()
        .provider(provider.clone())
        .max_retries(3)
        .build();
    let events = collect_events(&agent);

    let report = agent.execute_with_result("hello").await;

    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(report.retry_count, 1);
    assert_eq!(report.final_message.unwrap().text(), "recovered");
    assert_eq!(provider.call_count(), 2);

    let events = events.lock().unwrap();
    let retries = retry_events(&events);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].0, 1);
    assert!(retries[0].1.contains("500"));
}

#[tokio::test(start_paused = true)]
async fn retry_exhausted_on_rate_limit() {
    let rate_limited = || LlmError::RateLimited {
        retry_after: Some(Duration::from_millis(1)),
        message: "RATE_LIMIT: too many requests".into(),
    };
    let provider = Arc::new(
        MockProvider::new()
            .error(rate_limited())
            .error(rate_limited())
            .error(rate_limited()),
    );
    let agent = Agent::builder()
        .provider(provider.clone())
        .max_retries(2)
        .retry_delay(Duration::from_millis(1))
        .build();

    let report = agent.execute_with_result("hello").await;

    assert_eq!(provider.call_count(), 3);
    assert_eq!(report.status, AgentStatus::Failed);
    let failure = report.failure.unwrap();
    assert_eq!(failure.code, FailureCode::AgentMaxRetriesExceeded);
    assert!(failure.is_rate_limit);
    assert!(failure.recovery_hint.unwrap().contains(&agent.session_id()));
}

#[tokio::test]
async fn empty_response_compensation() {
    let provider = Arc::new(
        MockProvider::new()
            .text("")
            .text("")
            .text("Hello"),
    );
    let agent = Agent::builder()
        .provider(provider.clone())
        .max_compensation_retries(2)
        .build();

    let report = agent.execute_with_result("hi").await;

    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(report.final_message.unwrap().text(), "Hello");
    assert_eq!(provider.call_count(), 3);

    // The two empty assistant turns were removed from the session.
    let assistants: Vec<Message> = agent
        .messages()
        .into_iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(assistants.len(), 1);
    assert_eq!(assistants[0].text(), "Hello");
}

#[tokio::test]
async fn compensation_budget_exhausted() {
    let provider = Arc::new(MockProvider::new().text("").text("").text(""));
    let agent = Agent::builder()
        .provider(provider)
        .max_compensation_retries(1)
        .build();

    let report = agent.execute_with_result("hi").await;

    assert_eq!(report.status, AgentStatus::Failed);
    assert_eq!(
        report.failure.unwrap().code,
        FailureCode::AgentCompensationRetryExceeded
    );
}

#[tokio::test(start_paused = true)]
async fn abort_during_retry_sleep() {
    let provider = Arc::new(MockProvider::new().error(LlmError::Server {
        status: 500,
        retry_after: Some(Duration::from_millis(5000)),
        message: "down".into(),
    }));
    let agent = Arc::new(
        Agent::builder()
            .provider(provider)
            .max_retries(3)
            .build(),
    );

    let aborter = Arc::clone(&agent);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        aborter.abort();
    });

    let started = std::time::Instant::now();
    let report = agent.execute_with_result("hello").await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.status, AgentStatus::Aborted);
    assert_eq!(report.failure.unwrap().code, FailureCode::AgentAborted);
    assert_eq!(agent.status(), AgentStatus::Aborted);
}

#[tokio::test(start_paused = true)]
async fn abort_during_provider_call() {
    let provider = Arc::new(MockProvider::new().turn(MockTurn::DelayedResponse(
        Duration::from_secs(30),
        ChatResponse::from_text("never"),
    )));
    let agent = Arc::new(Agent::builder().provider(provider).build());

    let aborter = Arc::clone(&agent);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        aborter.abort();
    });

    let report = agent.execute_with_result("hello").await;
    assert_eq!(report.status, AgentStatus::Aborted);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_applies_to_non_streaming_calls() {
    let provider = Arc::new(MockProvider::new().turn(MockTurn::DelayedResponse(
        Duration::from_secs(30),
        ChatResponse::from_text("too late"),
    )));
    let agent = Agent::builder()
        .provider(provider)
        .request_timeout(Duration::from_millis(100))
        .max_retries(0)
        .build();

    let report = agent.execute_with_result("hello").await;
    assert_eq!(report.status, AgentStatus::Failed);
    assert_eq!(report.failure.unwrap().code, FailureCode::LlmTimeout);
}

#[tokio::test(start_paused = true)]
async fn usage_only_chunks_keep_the_stream_alive() {
    use kaji::Usage;

    // Gaps of 80 ms stay under the 100 ms idle timeout only because the
    // usage-only chunks count as activity.
    let provider = Arc::new(MockProvider::new().stream(vec![
        TimedChunk::new(Duration::from_millis(80), ChatChunk::text("m1", "part ")),
        TimedChunk::new(
            Duration::from_millis(80),
            ChatChunk::usage_only("m1", Usage::new(10, 1)),
        ),
        TimedChunk::new(Duration::from_millis(80), ChatChunk::text("m1", "two")),
        TimedChunk::new(Duration::ZERO, ChatChunk::finish("m1", StopReason::Stop)),
    ]));
    let agent = Agent::builder()
        .provider(provider)
        .stream(true)
        .idle_timeout(Duration::from_millis(100))
        .build();

    let report = agent.execute_with_result("hello").await;
    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(report.final_message.unwrap().text(), "part two");
    assert_eq!(report.usage, Usage::new(10, 1));
}

#[tokio::test]
async fn usage_accumulates_across_loops() {
    use kaji::Usage;

    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(
                tool_call_response(vec![ToolCall::new("call_1", "lookup", r#"{"key":"a"}"#)])
                    .with_usage(Usage::new(100, 20)),
            ))
            .turn(MockTurn::Response(
                ChatResponse::from_text("done").with_usage(Usage::new(150, 30)),
            )),
    );
    let agent = Agent::builder()
        .provider(provider)
        .tool(Arc::new(Lookup))
        .build();
    let events = collect_events(&agent);

    let report = agent.execute_with_result("add it up").await;
    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(report.usage, Usage::new(250, 50));

    let events = events.lock().unwrap();
    let updates: Vec<Usage> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::UsageUpdate { cumulative, .. } => Some(*cumulative),
            _ => None,
        })
        .collect();
    assert_eq!(updates.last(), Some(&Usage::new(250, 50)));
}

// ---------------------------------------------------------------------------
// Tool dispatch
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct LookupArgs {
    key: String,
}

struct Lookup;

#[async_trait::async_trait]
impl Tool for Lookup {
    const NAME: &'static str = "lookup";
    type Args = LookupArgs;
    type Output = String;
    type Error = std::convert::Infallible;

    fn description(&self) -> String {
        "Look up a value by key".to_owned()
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        Ok(format!("value-for-{}", args.key))
    }
}

struct Failing;

#[async_trait::async_trait]
impl Tool for Failing {
    const NAME: &'static str = "failing";
    type Args = LookupArgs;
    type Output = String;
    type Error = String;

    fn description(&self) -> String {
        "Always fails".to_owned()
    }

    async fn call(&self, _args: Self::Args) -> Result<Self::Output, Self::Error> {
        Err("disk on fire".to_owned())
    }
}

fn tool_call_response(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse::new(Message::assistant_tool_calls(calls))
}

#[tokio::test]
async fn tool_round_trip_appends_paired_results() {
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![
                ToolCall::new("call_1", "lookup", r#"{"key":"a"}"#),
                ToolCall::new("call_2", "lookup", r#"{"key":"b"}"#),
            ])))
            .text("done"),
    );
    let agent = Agent::builder()
        .provider(provider.clone())
        .tool(Arc::new(Lookup))
        .build();
    let events = collect_events(&agent);

    let report = agent.execute_with_result("look things up").await;

    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(report.loop_count, 2);
    assert_eq!(provider.call_count(), 2);

    // Invariant: n tool calls -> n tool results with matching ids, in
    // order, before the next assistant message.
    let messages = agent.messages();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
    );
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_2"));
    assert!(messages[2].text().contains("value-for-a"));

    let events = events.lock().unwrap();
    let created: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ToolCallCreated { .. }))
        .collect();
    let results: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ToolCallResult { .. }))
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn tool_failure_is_reported_to_the_model_not_the_caller() {
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![ToolCall::new(
                "call_1",
                "failing",
                r#"{"key":"x"}"#,
            )])))
            .text("recovered anyway"),
    );
    let agent = Agent::builder()
        .provider(provider)
        .tool(Arc::new(Failing))
        .build();

    let report = agent.execute_with_result("try it").await;

    assert_eq!(report.status, AgentStatus::Completed);
    let messages = agent.messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains(r#""success":false"#));
    assert!(tool_msg.text().contains("disk on fire"));
}

#[tokio::test]
async fn unknown_tool_is_reported_back() {
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![ToolCall::new(
                "call_1",
                "nonexistent",
                "{}",
            )])))
            .text("ok"),
    );
    let agent = Agent::builder().provider(provider).build();

    let report = agent.execute_with_result("go").await;
    assert_eq!(report.status, AgentStatus::Completed);
    let messages = agent.messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains("not found"));
}

#[tokio::test]
async fn plan_mode_skips_tool_execution() {
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![ToolCall::new(
                "call_1",
                "lookup",
                r#"{"key":"a"}"#,
            )])))
            .text("planned"),
    );
    let agent = Agent::builder()
        .provider(provider)
        .tool(Arc::new(Lookup))
        .plan_mode(true)
        .build();

    let report = agent.execute_with_result("plan").await;
    assert_eq!(report.status, AgentStatus::Completed);
    let messages = agent.messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains("plan mode"));
    assert!(!tool_msg.text().contains("value-for-a"));
}

#[tokio::test]
async fn streaming_tool_calls_assemble_across_chunks() {
    let provider = Arc::new(
        MockProvider::new()
            .stream(vec![
                TimedChunk::new(
                    Duration::ZERO,
                    ChatChunk::tool_call_delta(
                        "m1",
                        ToolCallDelta {
                            index: 0,
                            id: Some("call_1".into()),
                            name: Some("lookup".into()),
                            arguments: Some(r#"{"key""#.into()),
                        },
                    ),
                ),
                TimedChunk::new(
                    Duration::ZERO,
                    ChatChunk::tool_call_delta(
                        "m1",
                        ToolCallDelta {
                            index: 0,
                            id: None,
                            name: None,
                            arguments: Some(r#":"a"}"#.into()),
                        },
                    ),
                ),
                TimedChunk::new(Duration::ZERO, ChatChunk::finish("m1", StopReason::ToolCalls)),
            ])
            .stream(vec![
                TimedChunk::new(Duration::ZERO, ChatChunk::text("m2", "done")),
                TimedChunk::new(Duration::ZERO, ChatChunk::finish("m2", StopReason::Stop)),
            ]),
    );
    let agent = Agent::builder()
        .provider(provider)
        .tool(Arc::new(Lookup))
        .stream(true)
        .build();

    let report = agent.execute_with_result("stream tools").await;
    assert_eq!(report.status, AgentStatus::Completed);
    let messages = agent.messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains("value-for-a"));
}

// ---------------------------------------------------------------------------
// Validation, busy, configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_provider_is_a_configuration_error() {
    let agent = Agent::builder().build();
    let report = agent.execute_with_result("hello").await;
    assert_eq!(report.status, AgentStatus::Failed);
    assert_eq!(
        report.failure.unwrap().code,
        FailureCode::AgentConfigurationError
    );
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_provider_call() {
    let provider = Arc::new(MockProvider::new().text("never"));
    let agent = Agent::builder().provider(provider.clone()).build();

    for bad in ["", "   ", "<script>alert(1)</script>", "javascript:boom"] {
        let report = agent.execute_with_result(bad).await;
        assert_eq!(report.status, AgentStatus::Failed, "input {bad:?}");
        assert_eq!(
            report.failure.unwrap().code,
            FailureCode::AgentValidationError
        );
    }
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn overlong_input_is_rejected() {
    let provider = Arc::new(MockProvider::new().text("never"));
    let agent = Agent::builder()
        .provider(provider)
        .max_input_length(10)
        .build();
    let report = agent.execute_with_result("a very long input indeed").await;
    assert_eq!(
        report.failure.unwrap().code,
        FailureCode::AgentValidationError
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_execute_is_rejected_as_busy() {
    let provider = Arc::new(MockProvider::new().turn(MockTurn::DelayedResponse(
        Duration::from_millis(500),
        ChatResponse::from_text("slow"),
    )));
    let agent = Arc::new(Agent::builder().provider(provider).build());

    let first = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.execute_with_result("first").await })
    };
    // Let the first task claim the agent.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = agent.execute_with_result("second").await;
    assert_eq!(second.status, AgentStatus::Failed);
    assert_eq!(second.failure.unwrap().code, FailureCode::AgentBusy);

    let first = first.await.unwrap();
    assert_eq!(first.status, AgentStatus::Completed);
    assert_eq!(first.final_message.unwrap().text(), "slow");
}

#[tokio::test]
async fn agent_is_reusable_after_a_terminal_state() {
    let provider = Arc::new(MockProvider::new().text("one").text("two"));
    let agent = Agent::builder().provider(provider).build();

    assert_eq!(
        agent.execute_with_result("a").await.status,
        AgentStatus::Completed
    );
    assert_eq!(
        agent.execute_with_result("b").await.status,
        AgentStatus::Completed
    );
    // Both turns accumulated in one session.
    let assistants = agent
        .messages()
        .into_iter()
        .filter(|m| m.role == Role::Assistant)
        .count();
    assert_eq!(assistants, 2);
}

#[tokio::test]
async fn loop_budget_is_enforced() {
    // The model asks for tools forever.
    let endless = |n: u32| {
        MockTurn::Response(tool_call_response(vec![ToolCall::new(
            format!("call_{n}"),
            "lookup",
            r#"{"key":"x"}"#,
        )]))
    };
    let provider = Arc::new(
        MockProvider::new()
            .turn(endless(1))
            .turn(endless(2))
            .turn(endless(3)),
    );
    let agent = Agent::builder()
        .provider(provider)
        .tool(Arc::new(Lookup))
        .max_loops(2)
        .build();

    let report = agent.execute_with_result("loop forever").await;
    assert_eq!(report.status, AgentStatus::Failed);
    assert_eq!(report.failure.unwrap().code, FailureCode::AgentLoopExceeded);
    assert!(report.loop_count <= 2);
}

#[tokio::test]
async fn compensation_is_allowed_past_the_loop_budget() {
    // One loop of budget, but the empty turn's re-ask may still finish.
    let provider = Arc::new(MockProvider::new().text("").text("Hello"));
    let agent = Agent::builder()
        .provider(provider)
        .max_loops(1)
        .max_compensation_retries(2)
        .build();

    let report = agent.execute_with_result("hi").await;
    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(report.final_message.unwrap().text(), "Hello");
}

// ---------------------------------------------------------------------------
// Compaction hook
// ---------------------------------------------------------------------------

struct KeepTail(usize);

#[async_trait::async_trait]
impl kaji::agent::CompactionHook for KeepTail {
    async fn compact(&self, messages: Vec<Message>) -> kaji::Result<Vec<Message>> {
        let start = messages.len().saturating_sub(self.0);
        Ok(messages[start..].to_vec())
    }
}

#[tokio::test]
async fn compaction_hook_shrinks_the_request_history() {
    let provider = Arc::new(MockProvider::new().text("one").text("two"));
    let agent = Agent::builder()
        .provider(provider.clone())
        .system_prompt("sys")
        .compaction(Arc::new(KeepTail(1)))
        .build();

    agent.execute_with_result("first").await;
    agent.execute_with_result("second").await;

    // Each request carries the system prompt plus only the hook-retained
    // tail, instead of the whole accumulated history.
    assert_eq!(provider.message_counts(), vec![2, 2]);
}

// ---------------------------------------------------------------------------
// Memory collaborator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn injected_memory_is_initialized_but_never_closed() {
    let memory = Arc::new(InMemoryManager::new("injected"));
    let provider = Arc::new(MockProvider::new().text("ok"));
    let agent = Agent::builder()
        .provider(provider)
        .memory_manager(memory.clone())
        .build();

    agent.execute_with_result("hello").await;
    assert!(memory.is_initialized());

    agent.shutdown().await.unwrap();
    assert!(!memory.is_closed());
}

// ---------------------------------------------------------------------------
// Subagents
// ---------------------------------------------------------------------------

fn researcher_spec() -> SubagentSpec {
    SubagentSpec {
        name: "researcher".to_owned(),
        description: "Finds facts".to_owned(),
        system_prompt: "You research things.".to_owned(),
    }
}

fn task_call(id: &str, background: bool) -> ToolCall {
    ToolCall::new(
        id,
        "task",
        format!(
            r#"{{"subagent_type":"researcher","prompt":"find the answer","run_in_background":{background}}}"#
        ),
    )
}

#[tokio::test]
async fn foreground_subagent_result_feeds_the_parent() {
    // Call order: parent (task call), child (answer), parent (final).
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![task_call(
                "call_1", false,
            )])))
            .text("the answer is 42")
            .text("parent done"),
    );
    let agent = Agent::builder()
        .provider(provider.clone())
        .subagent(researcher_spec())
        .build();
    let events = collect_events(&agent);

    let report = agent.execute_with_result("delegate").await;

    assert_eq!(report.status, AgentStatus::Completed);
    assert_eq!(provider.call_count(), 3);

    // The child's final text became the parent's tool result.
    let messages = agent.messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains("the answer is 42"));

    // The handle reached a terminal status and every wrapped event
    // carries its identity.
    let handles = agent.subagent_handles();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].subagent_type, "researcher");
    assert_eq!(handles[0].status, SubagentStatus::Completed);
    assert!(!handles[0].run_in_background);

    let events = events.lock().unwrap();
    let wrapped: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::SubagentEvent {
                task_id,
                child_session_id,
                ..
            } => Some((task_id.clone(), child_session_id.clone())),
            _ => None,
        })
        .collect();
    assert!(!wrapped.is_empty());
    for (task_id, child_session_id) in &wrapped {
        assert_eq!(task_id, &handles[0].task_id);
        assert_eq!(child_session_id, &handles[0].child_session_id);
    }
}

#[tokio::test(start_paused = true)]
async fn background_subagent_acks_immediately() {
    // The parent and the detached child race for the remaining script
    // turns, so both are instant completions; the test only pins the
    // acknowledgment shape and the handle lifecycle.
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![task_call(
                "call_1", true,
            )])))
            .text("first")
            .text("second"),
    );
    let agent = Agent::builder()
        .provider(provider)
        .subagent(researcher_spec())
        .build();

    let report = agent.execute_with_result("delegate in background").await;
    assert_eq!(report.status, AgentStatus::Completed);

    // The tool result is the synchronous acknowledgment.
    let messages = agent.messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains("started"));
    assert!(tool_msg.text().contains("task_id"));

    let handles = agent.subagent_handles();
    assert_eq!(handles.len(), 1);
    assert!(handles[0].run_in_background);

    // Let the detached child drain its turn and record a terminal state.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let handles = agent.subagent_handles();
    assert_eq!(handles[0].status, SubagentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn abort_propagates_to_a_foreground_subagent() {
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![task_call(
                "call_1", false,
            )])))
            // The child hangs on this turn until aborted.
            .turn(MockTurn::DelayedResponse(
                Duration::from_secs(30),
                ChatResponse::from_text("too late"),
            )),
    );
    let agent = Arc::new(
        Agent::builder()
            .provider(provider)
            .subagent(researcher_spec())
            .build(),
    );

    let aborter = Arc::clone(&agent);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        aborter.abort();
    });

    let started = std::time::Instant::now();
    let report = agent.execute_with_result("delegate").await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, AgentStatus::Aborted);
    let handles = agent.subagent_handles();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].status, SubagentStatus::Aborted);
}

#[tokio::test]
async fn unknown_subagent_type_is_reported_to_the_model() {
    let provider = Arc::new(
        MockProvider::new()
            .turn(MockTurn::Response(tool_call_response(vec![ToolCall::new(
                "call_1",
                "task",
                r#"{"subagent_type":"poet","prompt":"write"}"#,
            )])))
            .text("ok"),
    );
    let agent = Agent::builder()
        .provider(provider)
        .subagent(researcher_spec())
        .build();

    let report = agent.execute_with_result("go").await;
    assert_eq!(report.status, AgentStatus::Completed);
    let messages = agent.messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains("unknown subagent type"));
}

// ---------------------------------------------------------------------------
// Exception-style surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_returns_the_final_message_or_throws() {
    let provider = Arc::new(
        MockProvider::new()
            .text("fine")
            .error(LlmError::Auth("bad key".into())),
    );
    let agent = Agent::builder().provider(provider).max_retries(0).build();

    let message = agent.execute("first").await.unwrap();
    assert_eq!(message.text(), "fine");

    let err = agent.execute("second").await.unwrap_err();
    assert_eq!(err.failure_code(), FailureCode::LlmRequestFailed);
    // State reached terminal before the error was rethrown.
    assert_eq!(agent.status(), AgentStatus::Failed);
}

#[tokio::test]
async fn status_events_end_with_a_terminal_state() {
    let provider = Arc::new(MockProvider::new().text("done"));
    let agent = Agent::builder().provider(provider).build();
    let events = collect_events(&agent);

    agent.execute_with_result("hello").await;

    let events = events.lock().unwrap();
    let statuses: Vec<AgentStatus> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Status { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.first(), Some(&AgentStatus::Running));
    assert_eq!(statuses.last(), Some(&AgentStatus::Completed));
    assert!(events.last().unwrap().is_terminal());
}

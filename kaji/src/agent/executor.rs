//! The outer execution loop.
//!
//! Drives one task from user input to a terminal status: validates the
//! input, claims the agent, then alternates provider calls and tool
//! dispatch until the model produces a final message, a budget runs out,
//! or an abort lands. All status/counter mutations funnel through the
//! execution state; every observable step is published on the bus.
//!
//! Tie-breaks: retry exhaustion beats loop exhaustion within one
//! iteration; an abort beats both.

use std::sync::LazyLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, error, info, info_span, warn};

use crate::chat::ChatRequest;
use crate::error::{AgentError, Failure};
use crate::message::{Content, Message};
use crate::usage::Usage;

use super::classify::{self, RecoveryDecision};
use super::events::{AgentEvent, AgentStatus};
use super::runner::LlmRunner;
use super::tool_processor::ToolProcessor;
use super::{Agent, ExecutionReport, UserInput};

/// Patterns rejected anywhere in the text of a user input.
static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)<script", r"(?i)javascript:", r"(?i)\bon\w+\s*="]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

pub(super) async fn run_task(agent: &Agent, input: UserInput) -> (ExecutionReport, Option<AgentError>) {
    let span = info_span!(
        "task",
        session_id = %agent.session_id(),
        stream = agent.config.stream,
    );
    run_task_inner(agent, input).instrument(span).await
}

async fn run_task_inner(
    agent: &Agent,
    input: UserInput,
) -> (ExecutionReport, Option<AgentError>) {
    // Configuration, then input, then the busy check.
    if agent.config.provider.is_none() {
        let err = AgentError::configuration("no provider configured");
        return pre_task_failure(agent, err, true);
    }

    let content = input.into_content();
    if let Err(err) = validate_input(&content, agent.config.max_input_length()) {
        return pre_task_failure(agent, err, true);
    }

    // Claim the agent: check-and-transition under one lock so two
    // concurrent execute calls cannot both start.
    let Some(token) = agent.claim_task() else {
        return pre_task_failure(agent, AgentError::Busy, false);
    };

    if let Err(err) = agent.memory.initialize().await {
        return finish_failed(agent, err, Usage::zero());
    }

    agent.session_lock().push(Message::user(content));
    agent.bus.emit(&AgentEvent::TaskStart {
        session_id: agent.session_id(),
    });
    emit_status(agent, AgentStatus::Running);

    info!(session_id = %agent.session_id(), "Task started");
    drive_loop(agent, token).await
}

/// The loop proper; runs after the task has been claimed and seeded.
async fn drive_loop(agent: &Agent, token: CancellationToken) -> (ExecutionReport, Option<AgentError>) {
    let provider = agent
        .config
        .provider
        .as_deref()
        .expect("provider checked before the task was claimed");

    let mut tool_definitions = agent.config.tools.definitions();
    if let Some(router) = &agent.router {
        tool_definitions.push(router.tool_definition());
    }

    let runner = LlmRunner {
        provider,
        bus: &agent.bus,
        request_timeout: agent.config.request_timeout,
        idle_timeout: agent.config.idle_timeout(),
        abort: token.clone(),
    };

    let mut cumulative = Usage::zero();
    let mut awaiting_terminal = false;
    let mut last_retry: Option<(String, bool)> = None;

    loop {
        if token.is_cancelled() {
            return finish_aborted(agent, cumulative);
        }

        // Budget guards; retry exhaustion takes precedence over loops.
        {
            let state = agent.state_lock();
            if state.is_retry_exceeded() {
                let (last_error, rate_limited) =
                    last_retry.clone().unwrap_or_default();
                drop(state);
                let err = AgentError::MaxRetriesExceeded {
                    retries: agent.config.max_retries(),
                    last_error,
                    rate_limited,
                };
                return finish_failed(agent, err, cumulative);
            }
            if state.is_compensation_retry_exceeded() {
                let attempts = state.compensation_retry_count();
                drop(state);
                let err = AgentError::CompensationRetryExceeded { attempts };
                return finish_failed(agent, err, cumulative);
            }
            if state.is_loop_exceeded() && !awaiting_terminal {
                let loops = state.loop_count();
                drop(state);
                let err = AgentError::LoopExceeded { loops };
                return finish_failed(agent, err, cumulative);
            }
        }

        agent.state_lock().increment_loop();
        let loop_count = agent.loop_count();
        debug!(loop_count, "Starting loop iteration");

        run_compaction(agent).await;

        let request = ChatRequest::new(agent.messages())
            .tools(tool_definitions.clone())
            .thinking(agent.config.thinking)
            .stream(agent.config.stream);

        set_status(agent, AgentStatus::Thinking);

        match runner.run(request, cumulative).await {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    cumulative += usage;
                    if !agent.config.stream {
                        agent.bus.emit(&AgentEvent::UsageUpdate {
                            usage,
                            cumulative,
                        });
                    }
                }

                agent.state_lock().record_success();
                set_status(agent, AgentStatus::Running);

                let msg_id = response
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple()));
                let message = response.into_message();
                agent.session_lock().push(message.clone());

                if message.has_tool_calls() {
                    awaiting_terminal = false;
                    let calls = message.tool_calls.clone().unwrap_or_default();
                    agent.bus.emit(&AgentEvent::ToolCallCreated {
                        msg_id,
                        tool_calls: calls.clone(),
                    });

                    let processor = ToolProcessor {
                        tools: &agent.config.tools,
                        bus: &agent.bus,
                        abort: &token,
                        plan_mode: agent.config.plan_mode,
                        max_output_len: agent.config.max_tool_output_len(),
                        router: agent.router.as_ref(),
                    };
                    let results = processor.dispatch(&calls).await;
                    {
                        let mut session = agent.session_lock();
                        for result in results {
                            session.push(result);
                        }
                    }
                    continue;
                }

                // A completed task needs non-empty text under a complete
                // finish reason (stop/length); anything else re-asks on
                // the compensation budget.
                let finish_ok = message.finish_reason.is_none_or(|r| r.is_complete());
                if message.is_empty() || !finish_ok {
                    debug!("Empty assistant response; compensation retry");
                    agent.session_lock().remove_last_assistant();
                    agent.state_lock().record_compensation_retry();
                    awaiting_terminal = true;
                    continue;
                }

                return finish_completed(agent, message, cumulative);
            }

            Err(err) => {
                match classify::decide(&err, token.is_cancelled()) {
                    RecoveryDecision::Abort => return finish_aborted(agent, cumulative),
                    RecoveryDecision::Fatal(fatal) => {
                        return finish_failed(agent, fatal, cumulative);
                    }
                    RecoveryDecision::Retry {
                        delay,
                        reason,
                        rate_limited,
                    } => {
                        last_retry = Some((reason.clone(), rate_limited));
                        let (retry_count, backoff, exceeded) = {
                            let mut state = agent.state_lock();
                            state.record_retryable_error(delay);
                            (
                                state.retry_count(),
                                state.next_retry_delay(),
                                state.is_retry_exceeded(),
                            )
                        };

                        if exceeded {
                            // With no retry budget at all, the first error
                            // surfaces under its own code.
                            if agent.config.max_retries() == 0 {
                                return finish_failed(agent, err, cumulative);
                            }
                            let err = AgentError::MaxRetriesExceeded {
                                retries: agent.config.max_retries(),
                                last_error: reason,
                                rate_limited,
                            };
                            return finish_failed(agent, err, cumulative);
                        }

                        warn!(
                            retry_count,
                            backoff_ms = backoff.as_millis() as u64,
                            reason = %reason,
                            "Retrying after provider error",
                        );
                        agent.bus.emit(&AgentEvent::TaskRetry {
                            retry_count,
                            max_retries: agent.config.max_retries(),
                            reason,
                        });
                        set_status(agent, AgentStatus::Retrying);

                        tokio::select! {
                            () = token.cancelled() => {
                                return finish_aborted(agent, cumulative);
                            }
                            () = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Compaction is a black-box hook; a failing hook is logged and skipped.
async fn run_compaction(agent: &Agent) {
    if !agent.config.enable_compaction {
        return;
    }
    let Some(hook) = &agent.config.compaction else {
        return;
    };
    let snapshot = agent.messages();
    match hook.compact(snapshot).await {
        Ok(compacted) => {
            let mut session = agent.session_lock();
            session.reset();
            for message in compacted {
                if message.role != crate::message::Role::System {
                    session.push(message);
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "Compaction hook failed; keeping history");
            agent.bus.emit(&AgentEvent::Error {
                error: err.to_string(),
                phase: Some("compaction".to_owned()),
            });
        }
    }
}

fn validate_input(content: &Content, max_length: usize) -> Result<(), AgentError> {
    match content {
        Content::Text(text) => {
            if text.trim().is_empty() {
                return Err(AgentError::validation("input must not be empty"));
            }
        }
        Content::Parts(parts) => {
            if parts.is_empty() {
                return Err(AgentError::validation("input must contain at least one part"));
            }
        }
    }

    let text = content.text();
    if text.chars().count() > max_length {
        return Err(AgentError::validation(format!(
            "input exceeds the maximum length of {max_length} characters"
        )));
    }
    for pattern in INJECTION_PATTERNS.iter() {
        if pattern.is_match(&text) {
            return Err(AgentError::validation(
                "input contains a disallowed pattern",
            ));
        }
    }
    Ok(())
}

/// A failure before the task was claimed. When `touch_state` is false
/// (busy rejection) the running task's state is left untouched and no
/// events are emitted for it.
fn pre_task_failure(
    agent: &Agent,
    err: AgentError,
    touch_state: bool,
) -> (ExecutionReport, Option<AgentError>) {
    let failure = err.to_failure(&agent.session_id());
    if touch_state {
        let mut state = agent.state_lock();
        if state.status().accepts_task() {
            state.fail_task(failure.clone());
        }
        drop(state);
        emit_failure_events(agent, &failure, AgentStatus::Failed);
    }
    let report = ExecutionReport {
        status: AgentStatus::Failed,
        final_message: None,
        failure: Some(failure),
        retry_count: 0,
        loop_count: 0,
        usage: Usage::zero(),
    };
    (report, Some(err))
}

fn finish_completed(
    agent: &Agent,
    message: Message,
    usage: Usage,
) -> (ExecutionReport, Option<AgentError>) {
    let (loop_count, retry_count) = {
        let mut state = agent.state_lock();
        state.complete_task();
        (state.loop_count(), state.total_retry_count())
    };
    agent.bus.emit(&AgentEvent::TaskSuccess);
    emit_status(agent, AgentStatus::Completed);
    info!(
        loop_count,
        retry_count,
        input_tokens = usage.prompt_tokens,
        output_tokens = usage.completion_tokens,
        "Task completed",
    );
    let report = ExecutionReport {
        status: AgentStatus::Completed,
        final_message: Some(message),
        failure: None,
        retry_count,
        loop_count,
        usage,
    };
    (report, None)
}

fn finish_failed(
    agent: &Agent,
    err: AgentError,
    usage: Usage,
) -> (ExecutionReport, Option<AgentError>) {
    let failure = err.to_failure(&agent.session_id());
    let (loop_count, retry_count) = {
        let mut state = agent.state_lock();
        state.fail_task(failure.clone());
        (state.loop_count(), state.total_retry_count())
    };
    error!(code = %failure.code, detail = %failure.internal_message, "Task failed");
    emit_failure_events(agent, &failure, AgentStatus::Failed);
    let report = ExecutionReport {
        status: AgentStatus::Failed,
        final_message: None,
        failure: Some(failure),
        retry_count,
        loop_count,
        usage,
    };
    (report, Some(err))
}

fn finish_aborted(agent: &Agent, usage: Usage) -> (ExecutionReport, Option<AgentError>) {
    if let Some(router) = &agent.router {
        router.abort_all();
    }
    let err = AgentError::Aborted;
    let failure = err.to_failure(&agent.session_id());
    let (loop_count, retry_count) = {
        let mut state = agent.state_lock();
        state.abort_task(failure.clone());
        (state.loop_count(), state.total_retry_count())
    };
    info!(loop_count, "Task aborted");
    emit_failure_events(agent, &failure, AgentStatus::Aborted);
    let report = ExecutionReport {
        status: AgentStatus::Aborted,
        final_message: None,
        failure: Some(failure),
        retry_count,
        loop_count,
        usage,
    };
    (report, Some(err))
}

fn emit_failure_events(agent: &Agent, failure: &Failure, status: AgentStatus) {
    agent.bus.emit(&AgentEvent::TaskFailed {
        total_loops: agent.loop_count(),
        error: failure.clone(),
    });
    agent.bus.emit(&AgentEvent::Status {
        state: status,
        message: Some(failure.user_message.clone()),
    });
}

fn set_status(agent: &Agent, status: AgentStatus) {
    agent.state_lock().set_status(status);
    emit_status(agent, status);
}

fn emit_status(agent: &Agent, status: AgentStatus) {
    agent.bus.emit(&AgentEvent::Status {
        state: status,
        message: None,
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_whitespace() {
        assert!(validate_input(&Content::Text(String::new()), 100).is_err());
        assert!(validate_input(&Content::Text("   \n".into()), 100).is_err());
        assert!(validate_input(&Content::Parts(Vec::new()), 100).is_err());
        assert!(validate_input(&Content::Text("hello".into()), 100).is_ok());
    }

    #[test]
    fn validate_rejects_injection_patterns() {
        for bad in [
            "<script>alert(1)</script>",
            "click javascript:void(0)",
            "<img onerror=hack()>",
            "JAVASCRIPT:evil",
        ] {
            assert!(
                validate_input(&Content::Text(bad.into()), 1000).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn validate_enforces_length_cap() {
        let long = "a".repeat(101);
        assert!(validate_input(&Content::Text(long), 100).is_err());
        let ok = "a".repeat(100);
        assert!(validate_input(&Content::Text(ok), 100).is_ok());
    }

    #[test]
    fn validate_screens_text_parts_in_multimodal_input() {
        use crate::message::ContentPart;
        let parts = Content::Parts(vec![
            ContentPart::image_url("https://example.com/cat.png"),
            ContentPart::text("<script>x</script>"),
        ]);
        assert!(validate_input(&parts, 1000).is_err());
    }
}

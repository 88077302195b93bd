//! Tool call dispatch.
//!
//! Executes the tool calls from one assistant turn and produces the
//! matching `role=tool` messages, in call order. A tool failure is
//! reported back to the model inside the tool message, never surfaced as
//! an agent failure; the model decides how to recover.
//!
//! Dispatch is sequential unless every call in the batch targets a tool
//! that declares itself parallel-safe. The `task` tool is intercepted
//! before registry lookup and routed to the subagent layer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, info_span, warn};

use crate::error::ToolError;
use crate::message::{Message, ToolCall};
use crate::tool::ToolRegistry;

use super::bus::EventBus;
use super::config::DEFAULT_TOOL_TIMEOUT;
use super::events::{AgentEvent, ToolCallOutcome};
use super::subagent::SubagentRouter;

/// Name of the subagent dispatch tool.
pub(crate) const TASK_TOOL: &str = "task";

/// Executes the tool calls of one assistant turn.
pub(crate) struct ToolProcessor<'a> {
    pub tools: &'a ToolRegistry,
    pub bus: &'a EventBus,
    pub abort: &'a CancellationToken,
    pub plan_mode: bool,
    pub max_output_len: usize,
    pub router: Option<&'a Arc<SubagentRouter>>,
}

impl ToolProcessor<'_> {
    /// Runs all calls and returns their tool messages in call order.
    pub(crate) async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Message> {
        let outcomes = if self.all_parallel_safe(calls) {
            futures::future::join_all(calls.iter().map(|call| self.run_single(call))).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                outcomes.push(self.run_single(call).await);
            }
            outcomes
        };

        calls
            .iter()
            .zip(outcomes)
            .map(|(call, (payload, success))| {
                let payload = truncate_output(&payload, self.max_output_len);
                self.bus.emit(&AgentEvent::ToolCallResult {
                    call_id: call.id.clone(),
                    status: if success {
                        ToolCallOutcome::Success
                    } else {
                        ToolCallOutcome::Error
                    },
                    result: payload.clone(),
                });
                Message::tool(&call.id, payload)
            })
            .collect()
    }

    /// Opt-in only: a batch runs concurrently when every tool in it is
    /// registered and parallel-safe. `task` always serializes.
    fn all_parallel_safe(&self, calls: &[ToolCall]) -> bool {
        calls.len() > 1
            && calls.iter().all(|call| {
                call.name != TASK_TOOL
                    && self
                        .tools
                        .get(&call.name)
                        .is_some_and(|tool| tool.parallel_safe())
            })
    }

    /// Runs one call, returning `(payload, success)`.
    async fn run_single(&self, call: &ToolCall) -> (String, bool) {
        let span = info_span!(
            "tool",
            tool.name = %call.name,
            tool.id = %call.id,
        );

        async {
            if self.abort.is_cancelled() {
                return error_payload("task aborted");
            }

            if self.plan_mode {
                return error_payload(&format!(
                    "tool '{}' was not executed: tool execution is disabled in plan mode",
                    call.name
                ));
            }

            // Live log: surface what is about to run.
            self.bus.emit(&AgentEvent::ToolCallStream {
                call_id: call.id.clone(),
                output: summarize_arguments(&call.name, &call.arguments),
            });

            if call.name == TASK_TOOL {
                return match self.router {
                    Some(router) => {
                        let (payload, success) =
                            router.dispatch(&call.id, &call.arguments).await;
                        if success {
                            (payload, true)
                        } else {
                            error_payload(&payload)
                        }
                    }
                    None => error_payload("no subagent types are registered"),
                };
            }

            let Some(tool) = self.tools.get(&call.name) else {
                warn!(tool = %call.name, "Tool not found");
                return error_payload(&format!("tool '{}' not found", call.name));
            };

            let deadline = tool.timeout().unwrap_or(DEFAULT_TOOL_TIMEOUT);
            let outcome = tokio::select! {
                () = self.abort.cancelled() => Err(ToolError::Aborted),
                result = tokio::time::timeout(deadline, tool.call_json(&call.arguments)) => {
                    result.unwrap_or_else(|_| Err(ToolError::Timeout(call.name.clone())))
                }
            };

            match outcome {
                Ok(value) => {
                    let payload =
                        serde_json::to_string(&value).unwrap_or_else(|_| value.to_string());
                    (payload, true)
                }
                Err(err) => {
                    warn!(tool = %call.name, error = %err, "Tool execution failed");
                    error_payload(&err.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// One-line activity summary of a tool invocation.
fn summarize_arguments(name: &str, arguments: &str) -> String {
    let compact = arguments.split_whitespace().collect::<Vec<_>>().join(" ");
    let preview: String = compact.chars().take(120).collect();
    if preview.len() < compact.len() {
        format!("{name} {preview}...")
    } else {
        format!("{name} {preview}")
    }
}

/// The failure shape reported back to the model.
fn error_payload(message: &str) -> (String, bool) {
    let payload = serde_json::json!({ "success": false, "error": message });
    (payload.to_string(), false)
}

/// Caps tool output, preserving head and tail around a truncation marker.
fn truncate_output(output: &str, max_len: usize) -> String {
    if output.chars().count() <= max_len || max_len == 0 {
        return output.to_owned();
    }
    let head_len = max_len * 3 / 4;
    let tail_len = max_len - head_len;
    let chars: Vec<char> = output.chars().collect();
    let omitted = chars.len() - head_len - tail_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    format!("{head}\n... [{omitted} chars truncated] ...\n{tail}")
}

//! LLM request runner.
//!
//! Wraps a single provider call with a cancellation-aware deadline and
//! normalizes the outcome to a [`ChatResponse`] or a classified error.
//!
//! Two timeout regimes:
//!
//! - **Non-streaming**: one request-level deadline. If it elapses before
//!   the response arrives, the request token is cancelled and the call
//!   fails with a timeout.
//! - **Streaming**: a sliding idle watchdog. The deadline is rearmed to
//!   `now + idle_timeout` after every chunk; only a gap longer than the
//!   idle timeout fires it. There is no wall-clock cap on the stream as
//!   a whole. A usage-only chunk counts as activity.
//!
//! The task's cancellation token is observed at every suspension point;
//! on abort the stream is dropped (running the generator's cleanup path)
//! and no further deltas are emitted for that message id.

use futures::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chat::{ChatProvider, ChatRequest, ChatResponse};
use crate::error::{AgentError, LlmError, Result};
use crate::message::Role;
use crate::stream::ChunkAssembler;
use crate::usage::Usage;

use super::bus::EventBus;
use super::events::AgentEvent;

/// Drives one provider call under the task's timeout policy.
pub(crate) struct LlmRunner<'a> {
    pub provider: &'a dyn ChatProvider,
    pub bus: &'a EventBus,
    pub request_timeout: Option<std::time::Duration>,
    pub idle_timeout: std::time::Duration,
    pub abort: CancellationToken,
}

impl LlmRunner<'_> {
    /// Runs the request, dispatching on `request.stream`.
    ///
    /// `cumulative` is the task's usage before this call; it is folded
    /// into the `UsageUpdate` events emitted while streaming.
    pub async fn run(&self, mut request: ChatRequest, cumulative: Usage) -> Result<ChatResponse> {
        // Each request gets a child token so a watchdog fire cancels the
        // provider call without aborting the whole task.
        let request_token = self.abort.child_token();
        request.abort = request_token.clone();

        let streaming = request.stream;
        let result = if streaming {
            self.run_streamed(&request, cumulative).await
        } else {
            self.run_complete(&request).await
        };

        if result.is_err() {
            request_token.cancel();
        }
        result
    }

    /// Non-streaming call with a request-level deadline.
    async fn run_complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let call = self.provider.chat(request);

        let response = tokio::select! {
            () = self.abort.cancelled() => return Err(AgentError::Aborted),
            outcome = async {
                match self.request_timeout {
                    Some(deadline) => tokio::time::timeout(deadline, call)
                        .await
                        .unwrap_or_else(|_| {
                            Err(LlmError::Timeout(format!(
                                "no response within {}ms",
                                deadline.as_millis()
                            )))
                        }),
                    None => call.await,
                }
            } => outcome?,
        };

        validate(&response)?;
        Ok(response)
    }

    /// Streaming call guarded by the idle watchdog.
    async fn run_streamed(&self, request: &ChatRequest, cumulative: Usage) -> Result<ChatResponse> {
        let mut stream = tokio::select! {
            () = self.abort.cancelled() => return Err(AgentError::Aborted),
            opened = self.provider.chat_stream(request) => opened?,
        };

        let fallback_id = format!("msg_{}", Uuid::new_v4().simple());
        let mut assembler = ChunkAssembler::new();
        let mut text_started = false;
        let mut reasoning_started = false;
        let mut usage_total = cumulative;

        loop {
            let next = tokio::select! {
                // Abort wins over a ready chunk.
                biased;
                () = self.abort.cancelled() => {
                    debug!("stream cancelled externally");
                    return Err(AgentError::Aborted);
                }
                next = stream.next() => next,
                // Rearmed every iteration: a fresh sleep races each chunk.
                () = tokio::time::sleep(self.idle_timeout) => {
                    warn!(idle_ms = self.idle_timeout.as_millis() as u64, "stream idle timeout");
                    request.abort.cancel();
                    return Err(LlmError::Timeout(format!(
                        "no chunk within {}ms",
                        self.idle_timeout.as_millis()
                    ))
                    .into());
                }
            };

            let chunk = match next {
                None => break,
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(chunk)) => chunk,
            };

            assembler.apply(&chunk);
            let msg_id = if assembler.message_id().is_empty() {
                fallback_id.clone()
            } else {
                assembler.message_id().to_owned()
            };

            if let Some(usage) = chunk.usage {
                usage_total += usage;
                self.bus.emit(&AgentEvent::UsageUpdate {
                    usage,
                    cumulative: usage_total,
                });
            }

            for choice in &chunk.choices {
                if choice.index != 0 {
                    continue;
                }
                if let Some(content) = &choice.delta.content
                    && !content.is_empty()
                {
                    if !text_started {
                        text_started = true;
                        self.bus.emit(&AgentEvent::TextStart {
                            msg_id: msg_id.clone(),
                        });
                    }
                    self.bus.emit(&AgentEvent::TextDelta {
                        msg_id: msg_id.clone(),
                        content: content.clone(),
                    });
                }
                if let Some(reasoning) = &choice.delta.reasoning
                    && !reasoning.is_empty()
                {
                    if !reasoning_started {
                        reasoning_started = true;
                        self.bus.emit(&AgentEvent::ReasoningStart {
                            msg_id: msg_id.clone(),
                        });
                    }
                    self.bus.emit(&AgentEvent::ReasoningDelta {
                        msg_id: msg_id.clone(),
                        content: reasoning.clone(),
                    });
                }
            }
        }

        let msg_id = if assembler.message_id().is_empty() {
            fallback_id
        } else {
            assembler.message_id().to_owned()
        };

        if reasoning_started {
            self.bus.emit(&AgentEvent::ReasoningComplete {
                msg_id: msg_id.clone(),
                content: assembler.reasoning().to_owned(),
            });
        }
        if text_started {
            let content = assembler.text().to_owned();
            self.bus.emit(&AgentEvent::TextComplete {
                msg_id: msg_id.clone(),
                content: content.clone(),
            });
            for patch in extract_code_patches(&content) {
                self.bus.emit(&patch);
            }
        }

        let message = assembler.into_message();
        let mut response = ChatResponse::new(message).with_id(msg_id);
        if let Some(usage) = response.message.usage {
            response = response.with_usage(usage);
        }
        validate(&response)?;
        Ok(response)
    }
}

/// Structural check on a provider response.
fn validate(response: &ChatResponse) -> Result<()> {
    if response.message.role != Role::Assistant {
        return Err(LlmError::InvalidResponse(format!(
            "expected an assistant message, got role '{}'",
            response.message.role.as_str()
        ))
        .into());
    }
    Ok(())
}

/// Scans completed text for fenced diff blocks and builds a `CodePatch`
/// event per block. The target path is read from the `+++ b/<path>`
/// header when present.
fn extract_code_patches(text: &str) -> Vec<AgentEvent> {
    let mut patches = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```diff") {
        let body_start = match rest[open..].find('\n') {
            Some(newline) => open + newline + 1,
            None => break,
        };
        let Some(close) = rest[body_start..].find("```") else {
            break;
        };
        let diff = &rest[body_start..body_start + close];
        let path = diff
            .lines()
            .find_map(|line| line.strip_prefix("+++ "))
            .map(|p| p.strip_prefix("b/").unwrap_or(p).trim().to_owned())
            .unwrap_or_default();
        patches.push(AgentEvent::CodePatch {
            path,
            language: None,
            diff: diff.trim_end().to_owned(),
        });
        rest = &rest[body_start + close + 3..];
    }
    patches
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extracts_patch_with_path() {
        let text = "Here you go:\n```diff\n--- a/src/main.rs\n+++ b/src/main.rs\n@@ -1 +1 @@\n-old\n+new\n```\ndone";
        let patches = extract_code_patches(text);
        assert_eq!(patches.len(), 1);
        match &patches[0] {
            AgentEvent::CodePatch { path, diff, .. } => {
                assert_eq!(path, "src/main.rs");
                assert!(diff.contains("+new"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ignores_text_without_diff_fence() {
        assert!(extract_code_patches("plain ```rust\ncode\n``` text").is_empty());
    }

    #[test]
    fn handles_multiple_patches() {
        let text = "```diff\n+++ b/a.rs\n+x\n```\nand\n```diff\n+++ b/b.rs\n+y\n```";
        assert_eq!(extract_code_patches(text).len(), 2);
    }
}

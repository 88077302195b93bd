//! Error classification and retry policy.
//!
//! Maps an error observed mid-loop to one of three recovery decisions.
//! First match wins:
//!
//! 1. external abort signal → [`RecoveryDecision::Abort`]
//! 2. provider errors by subclass — auth/404/400 fatal, rate-limit and
//!    5xx/timeout/network retryable with the provider's backoff
//! 3. structural response errors → fatal
//! 4. internal categorized errors keep their own failure code
//! 5. legacy text fallback on the message ("timeout", "abort",
//!    "not idle", "maximum retries")
//! 6. anything else → runtime error, fatal

use std::time::Duration;

use crate::error::{AgentError, LlmError};

/// What the loop should do with an error.
#[derive(Debug, Clone)]
pub enum RecoveryDecision {
    /// Back off and call the provider again.
    Retry {
        /// Error-supplied backoff; `None` uses the configured default.
        delay: Option<Duration>,
        /// Description for the retry event.
        reason: String,
        /// Whether the error was provider rate limiting.
        rate_limited: bool,
    },
    /// Surface the (possibly reclassified) error as the task failure.
    Fatal(AgentError),
    /// Terminate with status Aborted.
    Abort,
}

/// Classifies an error against the abort signal and the policy above.
#[must_use]
pub fn decide(error: &AgentError, abort_requested: bool) -> RecoveryDecision {
    if abort_requested {
        return RecoveryDecision::Abort;
    }

    match error {
        AgentError::Aborted | AgentError::Llm(LlmError::Aborted) => RecoveryDecision::Abort,

        AgentError::Llm(llm) if llm.is_retryable() => RecoveryDecision::Retry {
            delay: llm.retry_after(),
            reason: llm.to_string(),
            rate_limited: llm.is_rate_limit(),
        },

        // Auth / not-found / bad-request / invalid-response / not-supported
        // all surface immediately with their own code.
        AgentError::Llm(_) => RecoveryDecision::Fatal(error.clone()),

        AgentError::Runtime(message) => classify_legacy_text(message)
            .unwrap_or_else(|| RecoveryDecision::Fatal(error.clone())),

        _ => RecoveryDecision::Fatal(error.clone()),
    }
}

/// Fallback text matching for errors that arrive as bare runtime strings.
fn classify_legacy_text(message: &str) -> Option<RecoveryDecision> {
    let lower = message.to_lowercase();
    if lower.contains("abort") {
        return Some(RecoveryDecision::Abort);
    }
    if lower.contains("timeout") {
        return Some(RecoveryDecision::Retry {
            delay: None,
            reason: message.to_owned(),
            rate_limited: false,
        });
    }
    if lower.contains("not idle") {
        return Some(RecoveryDecision::Fatal(AgentError::Busy));
    }
    if lower.contains("maximum retries") {
        return Some(RecoveryDecision::Fatal(AgentError::MaxRetriesExceeded {
            retries: 0,
            last_error: message.to_owned(),
            rate_limited: false,
        }));
    }
    None
}

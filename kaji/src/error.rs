//! Error types for the execution core.
//!
//! Three layers, by origin:
//!
//! - [`LlmError`] — the provider error taxonomy (auth, rate limit, server,
//!   timeout, network, …) with retryability baked in.
//! - [`ToolError`] — tool lookup/argument/execution failures. These are
//!   reported back to the model, not surfaced as agent failures.
//! - [`AgentError`] — everything `execute` can return, each variant
//!   mapping to exactly one [`FailureCode`].
//!
//! The failure-code enum replaces an error-subclass hierarchy: callers
//! switch on [`FailureCode`] instead of downcasting.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Closed set of failure codes surfaced on a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// The task was aborted by the caller.
    AgentAborted,
    /// `execute` was called while a task was already running.
    AgentBusy,
    /// Uncategorized internal error.
    AgentRuntimeError,
    /// The retry budget was exhausted.
    AgentMaxRetriesExceeded,
    /// The loop budget was exhausted.
    AgentLoopExceeded,
    /// The compensation-retry budget was exhausted.
    AgentCompensationRetryExceeded,
    /// The agent was constructed without a required collaborator.
    AgentConfigurationError,
    /// The user input was rejected.
    AgentValidationError,
    /// The provider timed out (request deadline or idle watchdog).
    LlmTimeout,
    /// The provider rejected the request (auth, 404, 400, …).
    LlmRequestFailed,
    /// The provider returned a structurally invalid response.
    LlmResponseInvalid,
    /// A tool failed in a way that could not be reported to the model.
    ToolExecutionFailed,
}

impl FailureCode {
    /// The wire spelling, e.g. `AGENT_ABORTED`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AgentAborted => "AGENT_ABORTED",
            Self::AgentBusy => "AGENT_BUSY",
            Self::AgentRuntimeError => "AGENT_RUNTIME_ERROR",
            Self::AgentMaxRetriesExceeded => "AGENT_MAX_RETRIES_EXCEEDED",
            Self::AgentLoopExceeded => "AGENT_LOOP_EXCEEDED",
            Self::AgentCompensationRetryExceeded => "AGENT_COMPENSATION_RETRY_EXCEEDED",
            Self::AgentConfigurationError => "AGENT_CONFIGURATION_ERROR",
            Self::AgentValidationError => "AGENT_VALIDATION_ERROR",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::LlmRequestFailed => "LLM_REQUEST_FAILED",
            Self::LlmResponseInvalid => "LLM_RESPONSE_INVALID",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure record populated exactly once per failed task.
///
/// `user_message` is safe to show; `internal_message` carries the verbose
/// chain for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// The failure code.
    pub code: FailureCode,
    /// Sanitized message suitable for end users.
    pub user_message: String,
    /// Verbose message for diagnostics.
    pub internal_message: String,
    /// Set when the underlying cause was provider rate limiting.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_rate_limit: bool,
    /// Guidance for recovering from the failure, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
}

/// Errors raised by an LLM provider.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Authentication or authorization failure.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Unknown model or endpoint.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The provider is rate limiting this caller.
    #[error("rate limited: {message}")]
    RateLimited {
        /// How long the provider asked us to wait.
        retry_after: Option<Duration>,
        /// Provider-supplied detail.
        message: String,
    },

    /// A retryable server-side failure (5xx).
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Optional provider-supplied backoff.
        retry_after: Option<Duration>,
        /// Provider-supplied detail.
        message: String,
    },

    /// The request or stream deadline elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The request was cancelled through the abort token.
    #[error("request aborted")]
    Aborted,

    /// The response was missing choices or a message.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider does not implement the requested operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Create a not-supported error.
    #[must_use]
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported(what.into())
    }

    /// Returns `true` if the loop may retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Returns `true` if this error is provider rate limiting.
    #[must_use]
    pub const fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Provider-requested backoff, when one was supplied.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::Server { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// Errors raised while dispatching a tool call.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The model named a tool that is not registered.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// The arguments JSON did not parse or did not match the schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool itself failed.
    #[error("tool '{tool_name}' failed: {message}")]
    Execution {
        /// Name of the failing tool.
        tool_name: String,
        /// Underlying error message.
        message: String,
    },

    /// The per-tool deadline elapsed.
    #[error("tool '{0}' timed out")]
    Timeout(String),

    /// The task was aborted while the tool was running.
    #[error("tool execution aborted")]
    Aborted,
}

impl ToolError {
    /// Create an execution error.
    #[must_use]
    pub fn execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}

/// The main error type for agent operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// A task is already in flight on this agent.
    #[error("agent is not idle; a task is already running")]
    Busy,

    /// The task was aborted.
    #[error("task aborted")]
    Aborted,

    /// The user input was rejected.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The agent is missing required configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The retry budget was exhausted.
    #[error("maximum retries exceeded after {retries} retries: {last_error}")]
    MaxRetriesExceeded {
        /// Retries consumed before giving up.
        retries: u32,
        /// Description of the final error.
        last_error: String,
        /// Whether the final error was rate limiting.
        rate_limited: bool,
    },

    /// The loop budget was exhausted.
    #[error("maximum loops exceeded ({loops})")]
    LoopExceeded {
        /// Loops consumed.
        loops: u32,
    },

    /// The compensation-retry budget was exhausted.
    #[error("model returned empty output {attempts} times")]
    CompensationRetryExceeded {
        /// Empty responses observed.
        attempts: u32,
    },

    /// Uncategorized internal error.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A provider error that was not consumed by the retry policy.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A tool error that could not be reported back to the model.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl AgentError {
    /// Create a runtime error.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// The failure code this error maps to.
    #[must_use]
    pub const fn failure_code(&self) -> FailureCode {
        match self {
            Self::Busy => FailureCode::AgentBusy,
            Self::Aborted | Self::Llm(LlmError::Aborted) => FailureCode::AgentAborted,
            Self::Validation(_) => FailureCode::AgentValidationError,
            Self::Configuration(_) => FailureCode::AgentConfigurationError,
            Self::MaxRetriesExceeded { .. } => FailureCode::AgentMaxRetriesExceeded,
            Self::LoopExceeded { .. } => FailureCode::AgentLoopExceeded,
            Self::CompensationRetryExceeded { .. } => {
                FailureCode::AgentCompensationRetryExceeded
            }
            Self::Runtime(_) => FailureCode::AgentRuntimeError,
            Self::Llm(LlmError::Timeout(_)) => FailureCode::LlmTimeout,
            Self::Llm(LlmError::InvalidResponse(_)) => FailureCode::LlmResponseInvalid,
            Self::Llm(_) => FailureCode::LlmRequestFailed,
            Self::Tool(_) => FailureCode::ToolExecutionFailed,
        }
    }

    /// Build the failure record for this error.
    ///
    /// Tool errors get the generic user message; agent errors keep their
    /// own. Retry exhaustion caused by rate limiting is annotated with a
    /// recovery hint naming the session.
    #[must_use]
    pub fn to_failure(&self, session_id: &str) -> Failure {
        let code = self.failure_code();
        let internal_message = self.to_string();
        let user_message = match self {
            Self::Tool(_) => "Tool execution failed. Please try again.".to_owned(),
            _ => internal_message.clone(),
        };

        let is_rate_limit = matches!(
            self,
            Self::MaxRetriesExceeded {
                rate_limited: true,
                ..
            }
        );
        let recovery_hint = is_rate_limit.then(|| {
            format!(
                "The provider is rate limiting this account. Wait for the limit to \
                 reset, then resume with session id '{session_id}' to keep the \
                 conversation history."
            )
        });

        Failure {
            code,
            user_message,
            internal_message,
            is_rate_limit,
            recovery_hint,
        }
    }
}

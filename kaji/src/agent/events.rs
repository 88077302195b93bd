//! Typed events emitted during task execution.
//!
//! Every observable moment of a task — stream deltas, tool lifecycle,
//! status transitions, retries, subagent activity — is published as an
//! [`AgentEvent`] through the event bus. Events are lossless for inline
//! handlers and ordered per message id.

use serde::{Deserialize, Serialize};

use crate::error::Failure;
use crate::message::ToolCall;
use crate::usage::Usage;

/// Execution status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// No task has run yet.
    #[default]
    Idle,
    /// Waiting on the provider.
    Thinking,
    /// A task is in flight.
    Running,
    /// Backing off before the next attempt.
    Retrying,
    /// The task finished with a final message.
    Completed,
    /// The task failed; a failure record is available.
    Failed,
    /// The task was aborted by the caller.
    Aborted,
}

impl AgentStatus {
    /// Returns `true` for states in which a new task may start.
    #[must_use]
    pub const fn accepts_task(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Completed | Self::Failed | Self::Aborted
        )
    }

    /// Returns `true` for `Completed`, `Failed`, and `Aborted`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Thinking => "THINKING",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Outcome of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallOutcome {
    /// The tool returned a value.
    Success,
    /// The tool failed; the result holds the error payload.
    Error,
}

/// Events emitted during task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum AgentEvent {
    /// A new task started.
    TaskStart {
        /// Session the task runs in.
        session_id: String,
    },

    /// The loop is about to back off and retry.
    TaskRetry {
        /// Retry counter after this error.
        retry_count: u32,
        /// Configured retry budget.
        max_retries: u32,
        /// Description of the error being retried.
        reason: String,
    },

    /// The task completed with a final message.
    TaskSuccess,

    /// The task failed.
    TaskFailed {
        /// Loops consumed before failing.
        total_loops: u32,
        /// The failure record.
        error: Failure,
    },

    /// Text output started for a message.
    TextStart {
        /// Message identifier.
        msg_id: String,
    },
    /// Incremental text output.
    TextDelta {
        /// Message identifier.
        msg_id: String,
        /// The text fragment.
        content: String,
    },
    /// Text output finished for a message.
    TextComplete {
        /// Message identifier.
        msg_id: String,
        /// Full accumulated text.
        content: String,
    },

    /// Reasoning output started for a message.
    ReasoningStart {
        /// Message identifier.
        msg_id: String,
    },
    /// Incremental reasoning output.
    ReasoningDelta {
        /// Message identifier.
        msg_id: String,
        /// The reasoning fragment.
        content: String,
    },
    /// Reasoning output finished for a message.
    ReasoningComplete {
        /// Message identifier.
        msg_id: String,
        /// Full accumulated reasoning.
        content: String,
    },

    /// The model requested tool calls.
    ToolCallCreated {
        /// Message identifier of the assistant turn.
        msg_id: String,
        /// The requested calls.
        tool_calls: Vec<ToolCall>,
    },

    /// Live output from a running tool.
    ToolCallStream {
        /// Tool call identifier.
        call_id: String,
        /// Output fragment.
        output: String,
    },

    /// A tool call finished.
    ToolCallResult {
        /// Tool call identifier.
        call_id: String,
        /// Success or error.
        status: ToolCallOutcome,
        /// Serialized result or error payload.
        result: String,
    },

    /// Status transition.
    Status {
        /// The new status.
        state: AgentStatus,
        /// Optional human-readable detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Token usage update.
    UsageUpdate {
        /// Usage for the most recent completion.
        usage: Usage,
        /// Accumulated usage for the task.
        cumulative: Usage,
    },

    /// A code patch produced by the model.
    CodePatch {
        /// Target file path.
        path: String,
        /// Language tag, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        /// Unified diff content.
        diff: String,
    },

    /// A non-fatal error observed mid-task.
    Error {
        /// Error description.
        error: String,
        /// Phase in which it occurred.
        #[serde(skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },

    /// An event bubbled up from a subagent, wrapped with its identity.
    SubagentEvent {
        /// Task id minted by the parent at dispatch.
        task_id: String,
        /// Registered subagent type name.
        subagent_type: String,
        /// The child agent's session id.
        child_session_id: String,
        /// The child's original event (possibly itself a wrapper).
        event: Box<AgentEvent>,
    },
}

impl AgentEvent {
    /// The kind discriminant, for handler registration.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::TaskStart { .. } => EventKind::TaskStart,
            Self::TaskRetry { .. } => EventKind::TaskRetry,
            Self::TaskSuccess => EventKind::TaskSuccess,
            Self::TaskFailed { .. } => EventKind::TaskFailed,
            Self::TextStart { .. } => EventKind::TextStart,
            Self::TextDelta { .. } => EventKind::TextDelta,
            Self::TextComplete { .. } => EventKind::TextComplete,
            Self::ReasoningStart { .. } => EventKind::ReasoningStart,
            Self::ReasoningDelta { .. } => EventKind::ReasoningDelta,
            Self::ReasoningComplete { .. } => EventKind::ReasoningComplete,
            Self::ToolCallCreated { .. } => EventKind::ToolCallCreated,
            Self::ToolCallStream { .. } => EventKind::ToolCallStream,
            Self::ToolCallResult { .. } => EventKind::ToolCallResult,
            Self::Status { .. } => EventKind::Status,
            Self::UsageUpdate { .. } => EventKind::UsageUpdate,
            Self::CodePatch { .. } => EventKind::CodePatch,
            Self::Error { .. } => EventKind::Error,
            Self::SubagentEvent { .. } => EventKind::SubagentEvent,
        }
    }

    /// Returns `true` for a STATUS event carrying a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Status { state, .. } if state.is_terminal())
    }
}

/// Discriminant of [`AgentEvent`], used to register handlers by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    /// See [`AgentEvent::TaskStart`].
    TaskStart,
    /// See [`AgentEvent::TaskRetry`].
    TaskRetry,
    /// See [`AgentEvent::TaskSuccess`].
    TaskSuccess,
    /// See [`AgentEvent::TaskFailed`].
    TaskFailed,
    /// See [`AgentEvent::TextStart`].
    TextStart,
    /// See [`AgentEvent::TextDelta`].
    TextDelta,
    /// See [`AgentEvent::TextComplete`].
    TextComplete,
    /// See [`AgentEvent::ReasoningStart`].
    ReasoningStart,
    /// See [`AgentEvent::ReasoningDelta`].
    ReasoningDelta,
    /// See [`AgentEvent::ReasoningComplete`].
    ReasoningComplete,
    /// See [`AgentEvent::ToolCallCreated`].
    ToolCallCreated,
    /// See [`AgentEvent::ToolCallStream`].
    ToolCallStream,
    /// See [`AgentEvent::ToolCallResult`].
    ToolCallResult,
    /// See [`AgentEvent::Status`].
    Status,
    /// See [`AgentEvent::UsageUpdate`].
    UsageUpdate,
    /// See [`AgentEvent::CodePatch`].
    CodePatch,
    /// See [`AgentEvent::Error`].
    Error,
    /// See [`AgentEvent::SubagentEvent`].
    SubagentEvent,
}

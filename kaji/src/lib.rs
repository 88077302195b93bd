#![cfg_attr(docsrs, feature(doc_cfg))]
//! Kaji is an execution core for LLM agents: it drives a single
//! conversational task to completion by interleaving provider calls,
//! tool invocations, retry/backoff, and event emission.
//!
//! The core is provider-agnostic: anything implementing
//! [`chat::ChatProvider`] plugs in. Streaming responses are guarded by a
//! sliding idle watchdog, transient provider errors are retried on a
//! bounded budget, tool calls (including `task` subagent dispatches) are
//! executed and fed back, and every observable step is published as a
//! typed [`agent::AgentEvent`].

// Core types
pub mod chat;
pub mod error;
pub mod message;
pub mod stream;
pub mod usage;

// Agent and tools
pub mod agent;
pub mod tool;

// Collaborators
pub mod memory;
pub mod session;

// Providers
pub mod providers;

// Re-export commonly used types
pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentEvent, AgentStatus, EventKind, ExecutionReport,
    SubagentSpec, UserInput,
};
pub use chat::{ChatProvider, ChatRequest, ChatResponse, ChunkStream, SharedProvider};
pub use error::{AgentError, Failure, FailureCode, LlmError, Result, ToolError};
pub use message::{Content, ContentPart, Message, Role, ToolCall};
pub use session::Session;
pub use stream::{ChatChunk, ChunkAssembler, StopReason};
pub use tool::{BoxedTool, Tool, ToolDefinition, ToolRegistry};
pub use usage::Usage;

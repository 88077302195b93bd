//! Chat types and the provider contract.
//!
//! This module provides:
//! - [`ChatRequest`]: parameters for one completion call
//! - [`ChatResponse`]: a complete (non-streamed) response
//! - [`ChatProvider`]: the trait LLM backends implement
//!
//! The HTTP/SSE client behind a provider is out of scope for this crate;
//! the core only depends on this contract.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::message::{Message, ToolCall};
use crate::stream::{ChatChunk, StopReason};
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// A stream of response chunks from a provider.
///
/// The provider must observe the request's abort token between yields;
/// after cancellation no further chunks may be produced.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>>;

/// A chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages.
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Tools available for the model to call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Whether extended thinking / reasoning output is requested.
    #[serde(default)]
    pub thinking: bool,

    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,

    /// Cancellation token for this request; the provider must observe it
    /// at every suspension point.
    #[serde(skip)]
    pub abort: CancellationToken,
}

impl ChatRequest {
    /// Creates a request over the given messages.
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Sets the available tools.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the output token cap.
    #[must_use]
    pub const fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Requests extended thinking.
    #[must_use]
    pub const fn thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    /// Enables streaming.
    #[must_use]
    pub const fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Attaches the task's cancellation token.
    #[must_use]
    pub fn abort(mut self, token: CancellationToken) -> Self {
        self.abort = token;
        self
    }
}

/// A complete chat response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Completion identifier, when the provider supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The generated assistant message.
    pub message: Message,

    /// Why the model stopped.
    pub stop_reason: StopReason,

    /// Token usage for this completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Creates a response from an assistant message.
    #[must_use]
    pub fn new(message: Message) -> Self {
        let stop_reason = message.finish_reason.unwrap_or_default();
        Self {
            id: None,
            message,
            stop_reason,
            usage: None,
        }
    }

    /// Creates a plain text response.
    #[must_use]
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::new(Message::assistant(content).with_finish_reason(StopReason::Stop))
    }

    /// Sets the completion id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the stop reason.
    #[must_use]
    pub const fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = reason;
        self
    }

    /// Sets the usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// The text content of the response.
    #[must_use]
    pub fn text(&self) -> String {
        self.message.text()
    }

    /// Tool calls requested by the model, if any.
    #[must_use]
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        self.message.tool_calls.as_deref()
    }

    /// Returns `true` if the response carries tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }

    /// Converts into the assistant message, stamping stop reason and usage.
    #[must_use]
    pub fn into_message(self) -> Message {
        let mut message = self.message;
        message.finish_reason = Some(self.stop_reason);
        if message.usage.is_none() {
            message.usage = self.usage;
        }
        message
    }
}

/// Trait for LLM providers.
///
/// A provider turns a [`ChatRequest`] into either a complete response or
/// a stream of chunks. Everything below this trait (wire format, auth,
/// transport) is the provider's business.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a request and receive a complete response.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Send a request and receive a stream of chunks.
    ///
    /// The default implementation reports streaming as unsupported;
    /// providers that stream override this.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, LlmError> {
        let _ = request;
        Err(LlmError::not_supported("streaming"))
    }

    /// Name of this provider, for logs and error messages.
    fn provider_name(&self) -> &'static str;

    /// Whether this provider implements [`ChatProvider::chat_stream`].
    fn supports_streaming(&self) -> bool {
        false
    }
}

/// Type alias for a shared provider handle.
pub type SharedProvider = std::sync::Arc<dyn ChatProvider>;

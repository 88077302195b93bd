//! Streaming response types and chunk assembly.
//!
//! Providers that stream deliver a sequence of [`ChatChunk`]s. The
//! [`ChunkAssembler`] folds them back into a complete assistant
//! [`Message`], tolerating out-of-order tool-call argument fragments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::{Content, Message, Role, ToolCall};
use crate::usage::Usage;

/// Reason why the model stopped generating.
///
/// Maps to `finish_reason` in chat completion API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StopReason {
    /// Natural stop (end of response).
    #[default]
    Stop,
    /// Maximum token limit reached.
    Length,
    /// Model decided to call tools.
    ToolCalls,
    /// Content was filtered by safety systems.
    ContentFilter,
    /// Model is still generating (streaming only, no finish reason yet).
    Null,
}

impl StopReason {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Null => "null",
        }
    }

    /// Parse from a provider string (case-insensitive).
    ///
    /// Handles provider-specific spellings: "end_turn" and "max_tokens"
    /// (Anthropic), "tool_use", and anything unknown defaults to `Stop`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool_use" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            "null" => Self::Null,
            _ => Self::Stop,
        }
    }

    /// Returns `true` if this reason ends a choice.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Null)
    }

    /// Returns `true` if the response counts as a completed answer.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Stop | Self::Length)
    }

    /// Returns `true` if the model called tools.
    #[must_use]
    pub const fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCalls)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A partial tool call inside a streamed delta.
///
/// Fragments for one call share an `index`; `id` and `name` arrive on the
/// first fragment (but may be repeated), `arguments` fragments are
/// concatenated in arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index of the tool call within the response.
    pub index: usize,
    /// Tool call ID, present on at least one fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name, present on at least one fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Partial JSON arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Incremental message content inside a chunk choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, present only on the first chunk of a message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Incremental text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incremental reasoning content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Incremental tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One choice within a streamed chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Index of this choice.
    #[serde(default)]
    pub index: usize,
    /// The incremental content.
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Terminal for this choice when present and not `Null`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<StopReason>,
}

/// One incremental fragment of a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Message/completion identifier, stable across the stream.
    #[serde(default)]
    pub id: String,
    /// Choice deltas; the core consumes choice 0.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Usage, typically only on the final chunk (may arrive alone).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    /// A chunk carrying only a text delta.
    #[must_use]
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(content.into()),
                    ..ChunkDelta::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// A chunk carrying only a reasoning delta.
    #[must_use]
    pub fn reasoning(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    reasoning: Some(content.into()),
                    ..ChunkDelta::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// A chunk carrying one tool-call fragment.
    #[must_use]
    pub fn tool_call_delta(id: impl Into<String>, delta: ToolCallDelta) -> Self {
        Self {
            id: id.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: Some(vec![delta]),
                    ..ChunkDelta::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// A terminal chunk with a finish reason.
    #[must_use]
    pub fn finish(id: impl Into<String>, reason: StopReason) -> Self {
        Self {
            id: id.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some(reason),
            }],
            usage: None,
        }
    }

    /// A chunk carrying only usage (still counts as stream activity).
    #[must_use]
    pub fn usage_only(id: impl Into<String>, usage: Usage) -> Self {
        Self {
            id: id.into(),
            choices: Vec::new(),
            usage: Some(usage),
        }
    }

    /// The terminal finish reason on choice 0, if any.
    #[must_use]
    pub fn finish_reason(&self) -> Option<StopReason> {
        self.choices
            .first()
            .and_then(|c| c.finish_reason)
            .filter(StopReason::is_terminal)
    }
}

#[derive(Debug, Clone, Default)]
struct ToolCallSlot {
    id: String,
    name: String,
    arguments: String,
}

/// Folds a stream of [`ChatChunk`]s into a complete assistant message.
///
/// Text and reasoning deltas are concatenated per channel. Tool-call
/// fragments are keyed by their `index`, so argument pieces that arrive
/// out of order relative to other calls still land in the right slot;
/// `id` and `name` are backfilled from whichever fragment carries them.
#[derive(Debug, Clone, Default)]
pub struct ChunkAssembler {
    message_id: String,
    text: String,
    reasoning: String,
    tool_calls: BTreeMap<usize, ToolCallSlot>,
    usage: Option<Usage>,
    finish_reason: Option<StopReason>,
}

impl ChunkAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one chunk.
    pub fn apply(&mut self, chunk: &ChatChunk) {
        if self.message_id.is_empty() && !chunk.id.is_empty() {
            self.message_id.clone_from(&chunk.id);
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        for choice in &chunk.choices {
            if choice.index != 0 {
                continue;
            }
            if let Some(content) = &choice.delta.content {
                self.text.push_str(content);
            }
            if let Some(reasoning) = &choice.delta.reasoning {
                self.reasoning.push_str(reasoning);
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    let slot = self.tool_calls.entry(delta.index).or_default();
                    if let Some(id) = &delta.id
                        && slot.id.is_empty()
                    {
                        slot.id.clone_from(id);
                    }
                    if let Some(name) = &delta.name
                        && slot.name.is_empty()
                    {
                        slot.name.clone_from(name);
                    }
                    if let Some(fragment) = &delta.arguments {
                        slot.arguments.push_str(fragment);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason
                && reason.is_terminal()
            {
                self.finish_reason = Some(reason);
            }
        }
    }

    /// The message id observed on the stream.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The accumulated text so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The accumulated reasoning so far.
    #[must_use]
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Returns `true` if a terminal finish reason has been seen.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Returns `true` if any tool-call fragment has been seen.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Builds the final assistant message from the accumulated chunks.
    #[must_use]
    pub fn into_message(self) -> Message {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_values()
            .map(|slot| ToolCall::new(slot.id, slot.name, slot.arguments))
            .collect();

        let mut message = if tool_calls.is_empty() {
            Message::new(Role::Assistant, self.text)
        } else {
            let mut msg = Message::assistant_tool_calls(tool_calls);
            if !self.text.is_empty() {
                msg.content = Some(Content::Text(self.text));
            }
            msg
        };

        message.finish_reason = self.finish_reason.or(message.finish_reason);
        message.usage = self.usage;
        message
    }
}

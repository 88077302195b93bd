//! Scripted mock provider for testing.
//!
//! Each call consumes the next [`MockTurn`] from the script: a complete
//! response, an error, or a timed chunk stream. The provider records how
//! many calls it served and hands out its request tokens so tests can
//! assert that cancellation was observed.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatProvider, ChatRequest, ChatResponse, ChunkStream};
use crate::error::LlmError;
use crate::stream::{ChatChunk, StopReason};

/// A chunk delivered after a delay.
#[derive(Debug, Clone)]
pub struct TimedChunk {
    /// How long the stream waits before yielding this chunk.
    pub delay: Duration,
    /// The chunk.
    pub chunk: ChatChunk,
}

impl TimedChunk {
    /// Creates a timed chunk.
    #[must_use]
    pub const fn new(delay: Duration, chunk: ChatChunk) -> Self {
        Self { delay, chunk }
    }
}

/// One scripted provider call.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// A complete non-streaming response.
    Response(ChatResponse),
    /// An error (either mode).
    Error(LlmError),
    /// A timed chunk stream.
    Stream(Vec<TimedChunk>),
    /// A non-streaming response delivered after a delay.
    DelayedResponse(Duration, ChatResponse),
}

/// Scripted provider that returns predefined turns in sequence.
#[derive(Debug, Default)]
pub struct MockProvider {
    turns: Mutex<VecDeque<MockTurn>>,
    calls: AtomicUsize,
    request_tokens: Mutex<Vec<CancellationToken>>,
    message_counts: Mutex<Vec<usize>>,
}

impl MockProvider {
    /// Creates a provider with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn to the script.
    #[must_use]
    pub fn turn(self, turn: MockTurn) -> Self {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(turn);
        }
        self
    }

    /// Appends a plain text response.
    #[must_use]
    pub fn text(self, content: impl Into<String>) -> Self {
        self.turn(MockTurn::Response(ChatResponse::from_text(content)))
    }

    /// Appends an error turn.
    #[must_use]
    pub fn error(self, error: LlmError) -> Self {
        self.turn(MockTurn::Error(error))
    }

    /// Appends a chunk-stream turn.
    #[must_use]
    pub fn stream(self, chunks: Vec<TimedChunk>) -> Self {
        self.turn(MockTurn::Stream(chunks))
    }

    /// Appends a stream that yields `count` text chunks at a fixed
    /// interval and finishes with `stop`.
    #[must_use]
    pub fn stream_text(self, msg_id: &str, count: usize, interval: Duration) -> Self {
        let mut chunks: Vec<TimedChunk> = (0..count)
            .map(|i| TimedChunk::new(interval, ChatChunk::text(msg_id, format!("chunk-{i} "))))
            .collect();
        chunks.push(TimedChunk::new(
            Duration::ZERO,
            ChatChunk::finish(msg_id, StopReason::Stop),
        ));
        self.stream(chunks)
    }

    /// Number of calls served so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message-list length of every request served, in call order.
    #[must_use]
    pub fn message_counts(&self) -> Vec<usize> {
        self.message_counts
            .lock()
            .map(|counts| counts.clone())
            .unwrap_or_default()
    }

    /// Returns `true` if the most recent request's abort token has been
    /// cancelled.
    #[must_use]
    pub fn last_abort_observed(&self) -> bool {
        self.request_tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.last().map(CancellationToken::is_cancelled))
            .unwrap_or(false)
    }

    fn next_turn(&self, request: &ChatRequest) -> Option<MockTurn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut tokens) = self.request_tokens.lock() {
            tokens.push(request.abort.clone());
        }
        if let Ok(mut counts) = self.message_counts.lock() {
            counts.push(request.messages.len());
        }
        self.turns.lock().ok().and_then(|mut turns| turns.pop_front())
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match self.next_turn(request) {
            Some(MockTurn::Response(response)) => Ok(response),
            Some(MockTurn::DelayedResponse(delay, response)) => {
                tokio::select! {
                    () = request.abort.cancelled() => Err(LlmError::Aborted),
                    () = tokio::time::sleep(delay) => Ok(response),
                }
            }
            Some(MockTurn::Error(error)) => Err(error),
            Some(MockTurn::Stream(_)) => Err(LlmError::Other(
                "script expected a streaming call".to_owned(),
            )),
            None => Err(LlmError::Other("mock script exhausted".to_owned())),
        }
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, LlmError> {
        let token = request.abort.clone();
        match self.next_turn(request) {
            Some(MockTurn::Stream(chunks)) => {
                let stream = async_stream::stream! {
                    for timed in chunks {
                        tokio::select! {
                            () = token.cancelled() => return,
                            () = tokio::time::sleep(timed.delay) => {}
                        }
                        yield Ok(timed.chunk);
                    }
                };
                Ok(Box::pin(stream))
            }
            Some(MockTurn::Error(error)) => Err(error),
            Some(MockTurn::Response(_) | MockTurn::DelayedResponse(..)) => Err(LlmError::Other(
                "script expected a non-streaming call".to_owned(),
            )),
            None => Err(LlmError::Other("mock script exhausted".to_owned())),
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

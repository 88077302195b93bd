//! The agent: public surface over the execution core.
//!
//! An [`Agent`] owns one [`Session`] and runs at most one task at a
//! time. A task interleaves provider calls, tool dispatch, retries, and
//! subagent fan-out until the model produces a final message, a budget
//! runs out, or [`Agent::abort`] is called — publishing a lossless event
//! stream the whole way.
//!
//! # Example
//!
//! ```rust,ignore
//! let agent = Agent::builder()
//!     .provider(provider)
//!     .system_prompt("You are helpful.")
//!     .build();
//!
//! let report = agent.execute_with_result("What is 2 + 2?").await;
//! ```

mod bus;
mod classify;
mod config;
mod events;
mod executor;
mod runner;
mod state;
mod subagent;
mod tool_processor;

pub use config::{
    AgentBuilder, AgentConfig, CompactionHook, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_COMPENSATION_RETRIES, DEFAULT_MAX_INPUT_LENGTH,
    DEFAULT_MAX_LOOPS, DEFAULT_MAX_RETRIES, DEFAULT_MAX_TOOL_OUTPUT_LEN, DEFAULT_RETRY_DELAY,
    DEFAULT_TOOL_TIMEOUT, StreamCallback, SubagentSpec,
};
pub use events::{AgentEvent, AgentStatus, EventKind, ToolCallOutcome};
pub use state::{Budgets, StateSnapshot};
pub use subagent::{SubagentHandle, SubagentStatus};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Failure, Result};
use crate::memory::{InMemoryManager, MemoryManager};
use crate::message::{Content, ContentPart, Message};
use crate::session::Session;
use crate::usage::Usage;

pub use bus::EventHandler;

use bus::EventBus;
use state::ExecutionState;
use subagent::SubagentRouter;

/// User input for a task: plain text or ordered multimodal parts.
#[derive(Debug, Clone)]
pub enum UserInput {
    /// Plain text.
    Text(String),
    /// Ordered multimodal parts.
    Parts(Vec<ContentPart>),
}

impl UserInput {
    fn into_content(self) -> Content {
        match self {
            Self::Text(text) => Content::Text(text),
            Self::Parts(parts) => Content::Parts(parts),
        }
    }
}

impl From<&str> for UserInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for UserInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<ContentPart>> for UserInput {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// Outcome of [`Agent::execute_with_result`]; never an `Err`.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Terminal status of the task.
    pub status: AgentStatus,
    /// The final assistant message, when the task completed.
    pub final_message: Option<Message>,
    /// The failure record, when it did not.
    pub failure: Option<Failure>,
    /// Total retryable errors consumed over the task.
    pub retry_count: u32,
    /// Loop iterations consumed.
    pub loop_count: u32,
    /// Accumulated token usage.
    pub usage: Usage,
}

/// The agent execution core.
///
/// All methods take `&self`; the agent is safe to share behind an `Arc`
/// so that `abort` and the accessors work while a task is in flight.
pub struct Agent {
    config: AgentConfig,
    session: Mutex<Session>,
    state: Mutex<ExecutionState>,
    bus: Arc<EventBus>,
    task_token: Mutex<CancellationToken>,
    router: Option<Arc<SubagentRouter>>,
    memory: Arc<dyn MemoryManager>,
    memory_owned: bool,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("session_id", &self.session_id())
            .field("status", &self.status())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates a new builder.
    #[inline]
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Constructs an agent from options.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let session = match &config.session_id {
            Some(id) => Session::with_id(id.clone(), config.system_prompt.as_deref()),
            None => Session::new(config.system_prompt.as_deref()),
        };

        let (memory, memory_owned): (Arc<dyn MemoryManager>, bool) =
            match config.memory_manager.clone() {
                Some(injected) => (injected, false),
                None => (Arc::new(InMemoryManager::new(session.id())), true),
            };

        let bus = Arc::new(EventBus::new(config.max_buffer_size()));
        if let Some(callback) = config.stream_callback.clone() {
            bus.on_any(callback);
        }

        let state = ExecutionState::new(Budgets {
            max_retries: config.max_retries(),
            max_loops: config.max_loops(),
            max_compensation_retries: config.max_compensation_retries(),
            default_retry_delay: config.retry_delay(),
        });

        let router = (!config.subagents.is_empty()).then(|| {
            Arc::new(SubagentRouter::new(
                config.clone(),
                Arc::clone(&bus),
                Arc::clone(&memory),
            ))
        });

        Self {
            config,
            session: Mutex::new(session),
            state: Mutex::new(state),
            bus,
            task_token: Mutex::new(CancellationToken::new()),
            router,
            memory,
            memory_owned,
        }
    }

    /// Runs a task to completion and returns the final assistant message.
    ///
    /// # Errors
    ///
    /// Returns the classified [`AgentError`] when the task does not
    /// complete — after the state has reached a terminal status and the
    /// failure events have been emitted.
    pub async fn execute(&self, input: impl Into<UserInput>) -> Result<Message> {
        let (report, error) = executor::run_task(self, input.into()).await;
        match error {
            None => report
                .final_message
                .ok_or_else(|| AgentError::runtime("completed task produced no message")),
            Some(err) => Err(err),
        }
    }

    /// Runs a task to completion; never returns an error.
    ///
    /// Failures are folded into the report's `status` and `failure`
    /// fields.
    pub async fn execute_with_result(&self, input: impl Into<UserInput>) -> ExecutionReport {
        let (report, _) = executor::run_task(self, input.into()).await;
        report
    }

    /// Requests cancellation of the running task and all live subagents.
    ///
    /// Idempotent and safe to call in any state; an abort during a retry
    /// sleep or a chunk wait takes effect promptly.
    pub fn abort(&self) {
        if let Ok(token) = self.task_token.lock() {
            token.cancel();
        }
        if let Some(router) = &self.router {
            router.abort_all();
        }
    }

    /// Snapshot of the session messages.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.session_lock().snapshot()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        self.state_lock().status()
    }

    /// The session identifier.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session_lock().id().to_owned()
    }

    /// Loop iterations consumed by the current or last task.
    #[must_use]
    pub fn loop_count(&self) -> u32 {
        self.state_lock().loop_count()
    }

    /// Consecutive retryable errors since the last successful call.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.state_lock().retry_count()
    }

    /// When the current or last task started.
    #[must_use]
    pub fn task_start_time(&self) -> Option<Instant> {
        self.state_lock().task_started_at()
    }

    /// Copyable view of status, counters, and failure.
    #[must_use]
    pub fn state_snapshot(&self) -> StateSnapshot {
        self.state_lock().snapshot()
    }

    /// Registers an inline handler for one event kind. Inline handlers
    /// never miss an event and must not block.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.bus.on(kind, handler);
    }

    /// Registers an inline handler invoked for every event.
    pub fn on_any(&self, handler: EventHandler) {
        self.bus.on_any(handler);
    }

    /// Opens a buffered subscription to all events. A subscriber that
    /// falls behind receives an explicit lag signal.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.bus.subscribe()
    }

    /// Handles of all subagents dispatched by this agent.
    #[must_use]
    pub fn subagent_handles(&self) -> Vec<SubagentHandle> {
        self.router.as_ref().map(|r| r.handles()).unwrap_or_default()
    }

    /// Clears the session back to the system prompt. Rejected while a
    /// task is running.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Busy`] when a task is in flight.
    pub fn reset(&self) -> Result<()> {
        if !self.status().accepts_task() {
            return Err(AgentError::Busy);
        }
        self.session_lock().reset();
        Ok(())
    }

    /// Releases resources the agent created itself. An injected memory
    /// manager is left untouched.
    ///
    /// # Errors
    ///
    /// Propagates the memory backend's close error.
    pub async fn shutdown(&self) -> Result<()> {
        if self.memory_owned {
            self.memory.close().await?;
        }
        Ok(())
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn session_lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().expect("session lock poisoned")
    }

    fn state_lock(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().expect("state lock poisoned")
    }

    /// Claims the agent for a new task: checks the status and installs a
    /// fresh cancellation token in one critical section. Returns `None`
    /// when a task is already running.
    fn claim_task(&self) -> Option<CancellationToken> {
        let mut state = self.state_lock();
        if !state.status().accepts_task() {
            return None;
        }
        state.start_task();
        let token = CancellationToken::new();
        if let Ok(mut current) = self.task_token.lock() {
            *current = token.clone();
        }
        Some(token)
    }
}

//! Agent construction options.
//!
//! The option set is closed; defaults follow the shipped configuration
//! (3-minute idle timeout, 100 loops, 3 retries, 1 compensation retry,
//! 1-second base backoff).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::chat::SharedProvider;
use crate::error::Result;
use crate::memory::MemoryManager;
use crate::message::Message;
use crate::tool::{BoxedTool, ToolRegistry};

use super::Agent;
use super::events::AgentEvent;

/// Default idle timeout between stream chunks (3 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(180_000);
/// Default loop budget per task.
pub const DEFAULT_MAX_LOOPS: u32 = 100;
/// Default retry budget per task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default compensation-retry budget per task.
pub const DEFAULT_MAX_COMPENSATION_RETRIES: u32 = 1;
/// Default backoff between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Default per-subscriber event buffer size.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 256;
/// Default maximum user input length, in characters.
pub const DEFAULT_MAX_INPUT_LENGTH: usize = 100_000;
/// Default cap on tool output appended to the session, in characters.
pub const DEFAULT_MAX_TOOL_OUTPUT_LEN: usize = 32_000;
/// Default per-tool execution deadline.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Callback receiving every event, alongside the bus.
pub type StreamCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Black-box history compaction hook.
///
/// When compaction is enabled the agent hands the hook the full message
/// list before each provider call and sends whatever comes back. The
/// core never summarizes on its own.
#[async_trait]
pub trait CompactionHook: Send + Sync {
    /// Compacts the history, returning the replacement message list.
    async fn compact(&self, messages: Vec<Message>) -> Result<Vec<Message>>;
}

/// A subagent type the model can dispatch through the `task` tool.
#[derive(Debug, Clone)]
pub struct SubagentSpec {
    /// Type name the model selects (e.g. "researcher").
    pub name: String,
    /// Description surfaced in the `task` tool schema.
    pub description: String,
    /// System prompt for the child agent.
    pub system_prompt: String,
}

/// Construction options for an [`Agent`].
#[derive(Clone, Default)]
pub struct AgentConfig {
    /// The LLM provider. Required; validated on `execute`.
    pub provider: Option<SharedProvider>,
    /// System prompt seeding the session.
    pub system_prompt: Option<String>,
    /// Registered tools.
    pub tools: ToolRegistry,
    /// Whether provider calls stream.
    pub stream: bool,
    /// Session id to rehydrate; a fresh one is minted when absent.
    pub session_id: Option<String>,
    /// Request deadline for non-streaming calls; provider default when
    /// absent.
    pub request_timeout: Option<Duration>,
    /// Idle timeout between stream chunks. Zero is normalized to the
    /// default at the builder boundary.
    pub idle_timeout: Option<Duration>,
    /// Retry budget.
    pub max_retries: Option<u32>,
    /// Compensation-retry budget.
    pub max_compensation_retries: Option<u32>,
    /// Loop budget.
    pub max_loops: Option<u32>,
    /// Base backoff between retries.
    pub retry_delay: Option<Duration>,
    /// Request extended thinking from the provider.
    pub thinking: bool,
    /// Whether to run the compaction hook before each provider call.
    pub enable_compaction: bool,
    /// The compaction hook.
    pub compaction: Option<Arc<dyn CompactionHook>>,
    /// Injected memory manager. Never closed by the agent.
    pub memory_manager: Option<Arc<dyn MemoryManager>>,
    /// Callback receiving every event.
    pub stream_callback: Option<StreamCallback>,
    /// Plan mode: tools are advertised but not executed.
    pub plan_mode: bool,
    /// Per-subscriber event buffer size.
    pub max_buffer_size: Option<usize>,
    /// Maximum user input length, in characters.
    pub max_input_length: Option<usize>,
    /// Cap on tool output appended to the session, in characters.
    pub max_tool_output_len: Option<usize>,
    /// Subagent types reachable through the `task` tool.
    pub subagents: Vec<SubagentSpec>,
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("has_provider", &self.provider.is_some())
            .field("stream", &self.stream)
            .field("tools", &self.tools)
            .field("max_retries", &self.max_retries)
            .field("max_loops", &self.max_loops)
            .field("plan_mode", &self.plan_mode)
            .field("subagents", &self.subagents.len())
            .finish_non_exhaustive()
    }
}

impl AgentConfig {
    /// Effective idle timeout (zero normalized to the default).
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        match self.idle_timeout {
            Some(d) if !d.is_zero() => d,
            _ => DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Effective retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// Effective compensation-retry budget.
    #[must_use]
    pub fn max_compensation_retries(&self) -> u32 {
        self.max_compensation_retries
            .unwrap_or(DEFAULT_MAX_COMPENSATION_RETRIES)
    }

    /// Effective loop budget.
    #[must_use]
    pub fn max_loops(&self) -> u32 {
        self.max_loops.unwrap_or(DEFAULT_MAX_LOOPS)
    }

    /// Effective base retry backoff.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY)
    }

    /// Effective event buffer size.
    #[must_use]
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Effective input length cap.
    #[must_use]
    pub fn max_input_length(&self) -> usize {
        self.max_input_length.unwrap_or(DEFAULT_MAX_INPUT_LENGTH)
    }

    /// Effective tool output cap.
    #[must_use]
    pub fn max_tool_output_len(&self) -> usize {
        self.max_tool_output_len.unwrap_or(DEFAULT_MAX_TOOL_OUTPUT_LEN)
    }
}

/// Fluent builder for [`Agent`].
#[derive(Debug, Default)]
pub struct AgentBuilder {
    config: AgentConfig,
}

impl AgentBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the provider.
    #[must_use]
    pub fn provider(mut self, provider: SharedProvider) -> Self {
        self.config.provider = Some(provider);
        self
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[must_use]
    pub fn tool(mut self, tool: BoxedTool) -> Self {
        self.config.tools.register(tool);
        self
    }

    /// Enables or disables streaming provider calls.
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.config.stream = stream;
        self
    }

    /// Rehydrates an existing session id.
    #[must_use]
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.config.session_id = Some(id.into());
        self
    }

    /// Sets the non-streaming request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Sets the idle timeout between stream chunks. Zero falls back to
    /// the default.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    /// Sets the idle timeout in milliseconds. Zero falls back to the
    /// default.
    #[must_use]
    pub fn idle_timeout_ms(self, millis: u64) -> Self {
        self.idle_timeout(Duration::from_millis(millis))
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = Some(retries);
        self
    }

    /// Sets the compensation-retry budget.
    #[must_use]
    pub fn max_compensation_retries(mut self, retries: u32) -> Self {
        self.config.max_compensation_retries = Some(retries);
        self
    }

    /// Sets the loop budget.
    #[must_use]
    pub fn max_loops(mut self, loops: u32) -> Self {
        self.config.max_loops = Some(loops);
        self
    }

    /// Sets the base retry backoff.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = Some(delay);
        self
    }

    /// Requests extended thinking.
    #[must_use]
    pub fn thinking(mut self, thinking: bool) -> Self {
        self.config.thinking = thinking;
        self
    }

    /// Enables compaction with the given hook.
    #[must_use]
    pub fn compaction(mut self, hook: Arc<dyn CompactionHook>) -> Self {
        self.config.enable_compaction = true;
        self.config.compaction = Some(hook);
        self
    }

    /// Injects a memory manager. The agent will initialize but never
    /// close it.
    #[must_use]
    pub fn memory_manager(mut self, manager: Arc<dyn MemoryManager>) -> Self {
        self.config.memory_manager = Some(manager);
        self
    }

    /// Sets the stream callback.
    #[must_use]
    pub fn stream_callback(mut self, callback: StreamCallback) -> Self {
        self.config.stream_callback = Some(callback);
        self
    }

    /// Enables plan mode.
    #[must_use]
    pub fn plan_mode(mut self, plan_mode: bool) -> Self {
        self.config.plan_mode = plan_mode;
        self
    }

    /// Sets the per-subscriber event buffer size.
    #[must_use]
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = Some(size);
        self
    }

    /// Sets the input length cap.
    #[must_use]
    pub fn max_input_length(mut self, length: usize) -> Self {
        self.config.max_input_length = Some(length);
        self
    }

    /// Sets the tool output cap.
    #[must_use]
    pub fn max_tool_output_len(mut self, length: usize) -> Self {
        self.config.max_tool_output_len = Some(length);
        self
    }

    /// Registers a subagent type.
    #[must_use]
    pub fn subagent(mut self, spec: SubagentSpec) -> Self {
        self.config.subagents.push(spec);
        self
    }

    /// Builds the agent.
    #[must_use]
    pub fn build(self) -> Agent {
        Agent::new(self.config)
    }
}

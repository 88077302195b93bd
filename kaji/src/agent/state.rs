//! Per-task execution state.
//!
//! Single source of truth for the status lattice, the loop/retry
//! counters, and the failure record. Only the execution loop mutates it;
//! reads hand out copies.

use std::time::{Duration, Instant};

use crate::error::Failure;

use super::events::AgentStatus;

/// Budgets the state machine enforces.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    /// Maximum retries per task; `max_retries = N` allows N+1 attempts.
    pub max_retries: u32,
    /// Maximum loop iterations per task.
    pub max_loops: u32,
    /// Maximum compensation retries (empty model output) per task.
    pub max_compensation_retries: u32,
    /// Backoff used when the error does not supply its own.
    pub default_retry_delay: Duration,
}

/// Copyable view of the counters and status.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Current status.
    pub status: AgentStatus,
    /// Loop iterations consumed.
    pub loop_count: u32,
    /// Consecutive retryable errors since the last success.
    pub retry_count: u32,
    /// All retryable errors over the task lifetime.
    pub total_retry_count: u32,
    /// Compensation retries consumed.
    pub compensation_retry_count: u32,
    /// Failure record, once the task has failed or aborted.
    pub failure: Option<Failure>,
}

/// Status, counters, and failure record for the current task.
#[derive(Debug)]
pub struct ExecutionState {
    budgets: Budgets,
    status: AgentStatus,
    loop_count: u32,
    retry_count: u32,
    total_retry_count: u32,
    compensation_retry_count: u32,
    next_retry_delay: Duration,
    failure: Option<Failure>,
    task_started_at: Option<Instant>,
}

impl ExecutionState {
    /// Creates an idle state with the given budgets.
    #[must_use]
    pub const fn new(budgets: Budgets) -> Self {
        Self {
            budgets,
            status: AgentStatus::Idle,
            loop_count: 0,
            retry_count: 0,
            total_retry_count: 0,
            compensation_retry_count: 0,
            next_retry_delay: Duration::ZERO,
            failure: None,
            task_started_at: None,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> AgentStatus {
        self.status
    }

    /// Sets a non-terminal phase status (Thinking/Running/Retrying).
    pub const fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
    }

    /// Loop iterations consumed so far.
    #[must_use]
    pub const fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Consecutive retryable errors since the last success.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// All retryable errors over the task lifetime.
    #[must_use]
    pub const fn total_retry_count(&self) -> u32 {
        self.total_retry_count
    }

    /// Compensation retries consumed.
    #[must_use]
    pub const fn compensation_retry_count(&self) -> u32 {
        self.compensation_retry_count
    }

    /// Backoff to apply before the next attempt.
    #[must_use]
    pub const fn next_retry_delay(&self) -> Duration {
        self.next_retry_delay
    }

    /// When the current task started.
    #[must_use]
    pub const fn task_started_at(&self) -> Option<Instant> {
        self.task_started_at
    }

    /// The failure record, once set.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Copyable view of counters, status, and failure.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            status: self.status,
            loop_count: self.loop_count,
            retry_count: self.retry_count,
            total_retry_count: self.total_retry_count,
            compensation_retry_count: self.compensation_retry_count,
            failure: self.failure.clone(),
        }
    }

    /// Begins a new task: status Running, all counters zeroed, failure
    /// cleared, start time stamped.
    pub fn start_task(&mut self) {
        self.status = AgentStatus::Running;
        self.loop_count = 0;
        self.retry_count = 0;
        self.total_retry_count = 0;
        self.compensation_retry_count = 0;
        self.next_retry_delay = Duration::ZERO;
        self.failure = None;
        self.task_started_at = Some(Instant::now());
    }

    /// Consumes one loop iteration.
    pub const fn increment_loop(&mut self) {
        self.loop_count += 1;
    }

    /// Records a retryable error and the backoff to apply before the next
    /// attempt (`None` uses the default delay).
    pub fn record_retryable_error(&mut self, delay: Option<Duration>) {
        self.retry_count += 1;
        self.total_retry_count += 1;
        self.next_retry_delay = delay.unwrap_or(self.budgets.default_retry_delay);
        self.status = AgentStatus::Retrying;
    }

    /// Records one compensation retry (empty model output).
    pub const fn record_compensation_retry(&mut self) {
        self.compensation_retry_count += 1;
    }

    /// Records a successful provider call: the consecutive-retry counter
    /// and pending backoff reset; lifetime counters are kept.
    pub const fn record_success(&mut self) {
        self.retry_count = 0;
        self.next_retry_delay = Duration::ZERO;
        self.status = AgentStatus::Running;
    }

    /// Marks the task failed. The first failure record wins.
    pub fn fail_task(&mut self, failure: Failure) {
        self.status = AgentStatus::Failed;
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    /// Marks the task aborted. The first failure record wins.
    pub fn abort_task(&mut self, failure: Failure) {
        self.status = AgentStatus::Aborted;
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    /// Marks the task completed.
    pub const fn complete_task(&mut self) {
        self.status = AgentStatus::Completed;
    }

    /// Strict greater-than: `max_retries = N` yields exactly N+1 attempts.
    #[must_use]
    pub const fn is_retry_exceeded(&self) -> bool {
        self.retry_count > self.budgets.max_retries
    }

    /// Returns `true` once the loop budget is spent.
    #[must_use]
    pub const fn is_loop_exceeded(&self) -> bool {
        self.loop_count >= self.budgets.max_loops
    }

    /// Strict greater-than, mirroring the retry check.
    #[must_use]
    pub const fn is_compensation_retry_exceeded(&self) -> bool {
        self.compensation_retry_count > self.budgets.max_compensation_retries
    }
}

//! Token usage accounting.
//!
//! Providers report usage per completion; the agent accumulates the totals
//! across all loop iterations of a task and surfaces them in the final
//! execution report and in `UsageUpdate` events.

use serde::{Deserialize, Serialize};

/// Token usage statistics for a single completion or an accumulated run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt (input).
    #[serde(default)]
    pub prompt_tokens: u64,

    /// Tokens generated by the model (output).
    #[serde(default)]
    pub completion_tokens: u64,

    /// Total tokens (prompt + completion).
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Creates a usage record from prompt and completion token counts.
    #[must_use]
    pub const fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// A zeroed usage record, the starting point for accumulation.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Returns `true` if no tokens have been recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl std::ops::Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

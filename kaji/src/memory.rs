//! Memory collaborator contract.
//!
//! Persistence is out of scope for the execution core; the agent only
//! drives the lifecycle of whatever manager it is handed. The ownership
//! rule: the agent closes managers it created itself, never an injected
//! one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::Result;

/// Contract for the session-memory backend.
#[async_trait]
pub trait MemoryManager: Send + Sync {
    /// Prepares the backend for use. Called once before the first task.
    async fn initialize(&self) -> Result<()>;

    /// Releases backend resources. Only the creator calls this.
    async fn close(&self) -> Result<()>;

    /// Opaque connection descriptor, for diagnostics.
    fn connection_string(&self) -> String;

    /// Namespace this manager is scoped to.
    fn namespace(&self) -> &str;

    /// Derives a manager scoped to a child namespace (used for subagents).
    fn scoped(&self, child: &str) -> Arc<dyn MemoryManager>;
}

/// Default in-process manager; keeps nothing, tracks lifecycle for tests.
#[derive(Debug, Default)]
pub struct InMemoryManager {
    namespace: String,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryManager {
    /// Creates a manager rooted at the given namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns `true` once `initialize` has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Returns `true` once `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryManager for InMemoryManager {
    async fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connection_string(&self) -> String {
        format!("memory://{}", self.namespace)
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scoped(&self, child: &str) -> Arc<dyn MemoryManager> {
        Arc::new(Self::new(format!("{}/{child}", self.namespace)))
    }
}

//! Provider implementations shipped with the crate.
//!
//! Real providers (HTTP/SSE clients) live outside the execution core;
//! only the scripted test provider is bundled here.

pub mod mock;

pub use mock::{MockProvider, MockTurn, TimedChunk};

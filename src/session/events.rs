//! Events the session engine exposes to the surrounding shell.
//!
//! Intentionally lightweight (no heavy payloads) so the engine can emit
//! events without blocking the capture or receive loops.

use tokio::sync::broadcast;

/// Observable side effects of a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Normalized mean-absolute capture level in [0, 1], emitted once per
    /// capture block while streaming. Drives the visualizer.
    InputLevel { level: f32 },
    /// A memory symbol was saved or merged via a tool call.
    MemoryUpdated,
    /// The session fully tore down. Fired exactly once per teardown,
    /// whether triggered locally or by remote close/error.
    Disconnected,
}

/// Create the event channel shared by the engine and its subscribers.
#[must_use]
pub fn channel() -> broadcast::Sender<SessionEvent> {
    broadcast::channel(64).0
}

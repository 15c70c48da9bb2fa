//! Keepsake: real-time voice companion with a durable associative memory
//! vault.
//!
//! A live session streams microphone audio to a remote conversational agent
//! and schedules the agent's audio for gapless playback:
//! Microphone → capture pipeline → transport → playback scheduler → Speaker
//!
//! # Architecture
//!
//! - **Audio capture**: fixed-cadence blocks from the microphone via `cpal`
//! - **Playback scheduler**: gapless scheduling with immediate barge-in flush
//! - **Transport**: abstract duplex channel to the agent (WebSocket in
//!   production)
//! - **Tool mediator**: routes the agent's `save_memory_symbol` calls into
//!   the vault mid-conversation
//! - **Memory vault**: dual-write, self-healing store of memory symbols,
//!   rendered into the agent's system instruction at every connect

pub mod audio;
pub mod config;
pub mod error;
pub mod memory;
pub mod session;
pub mod transport;

pub use config::KeepsakeConfig;
pub use error::{Result, SessionError};
pub use memory::{FsBlobStore, MemoryStore, MemorySymbol};
pub use session::{SessionController, SessionEvent, SessionState};

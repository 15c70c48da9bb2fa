//! Tool-call mediation between the remote agent and the memory vault.
//!
//! The engine recognizes a single tool contract: `save_memory_symbol`.
//! Unknown tool names are a forward-compatible no-op, never an error.

use crate::error::{Result, SessionError};
use crate::memory::MemoryStore;
use crate::session::events::SessionEvent;
use crate::transport::{ClientMessage, ToolCallRequest};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Name of the memory-saving tool the agent may invoke.
pub const SAVE_MEMORY_TOOL: &str = "save_memory_symbol";

/// Declaration of the save-memory tool, registered at session setup.
#[must_use]
pub fn save_memory_tool_schema() -> serde_json::Value {
    serde_json::json!({
        "name": SAVE_MEMORY_TOOL,
        "description": "Save a permanent memory when the user reveals a core \
            fact, a story, or a meaningful preference. Also extract trigger \
            words for future associative recall.",
        "parameters": {
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "A single emoji or one-word icon \
                        representing the memory (e.g. 💻, 💊, 🎣, 🐕)."
                },
                "meaning": {
                    "type": "string",
                    "description": "The specific fact or conversation \
                        summary. Be detailed."
                },
                "triggers": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "3-5 keywords that should trigger this \
                        memory in the future."
                }
            },
            "required": ["symbol", "meaning"]
        }
    })
}

/// Arguments of a `save_memory_symbol` call. `triggers` defaults to empty
/// when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveMemoryArgs {
    pub symbol: String,
    pub meaning: String,
    #[serde(default)]
    pub triggers: Vec<String>,
}

/// A tool call validated at the boundary.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    SaveMemorySymbol(SaveMemoryArgs),
    /// Tool name this engine does not know. Handled as a no-op.
    Unrecognized { name: String },
}

/// Parse a raw tool-call request into a validated invocation.
///
/// # Errors
///
/// Returns a decode error when a recognized tool carries malformed
/// arguments.
pub fn parse_invocation(call: &ToolCallRequest) -> Result<ToolInvocation> {
    if call.name != SAVE_MEMORY_TOOL {
        return Ok(ToolInvocation::Unrecognized {
            name: call.name.clone(),
        });
    }
    let args: SaveMemoryArgs = serde_json::from_value(call.args.clone())
        .map_err(|e| SessionError::Decode(format!("bad {SAVE_MEMORY_TOOL} args: {e}")))?;
    Ok(ToolInvocation::SaveMemorySymbol(args))
}

/// Bridges tool-call requests to the memory store, synchronously within the
/// receive loop's message-handling pass.
pub struct ToolMediator {
    store: Arc<MemoryStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl ToolMediator {
    #[must_use]
    pub fn new(store: Arc<MemoryStore>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self { store, events }
    }

    /// Handle one tool call. Returns the confirmation message to send back
    /// on the same channel, or `None` when there is nothing to confirm
    /// (unrecognized tool, malformed arguments, or failed persistence).
    ///
    /// The memory-updated notification fires only on successful persistence.
    pub fn handle(&self, call: &ToolCallRequest) -> Option<ClientMessage> {
        let invocation = match parse_invocation(call) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!("dropping tool call '{}': {e}", call.name);
                return None;
            }
        };

        match invocation {
            ToolInvocation::Unrecognized { name } => {
                debug!("ignoring unrecognized tool call: {name}");
                None
            }
            ToolInvocation::SaveMemorySymbol(args) => {
                info!("saving memory symbol [{}] {}", args.symbol, args.meaning);
                match self.store.save(&args.symbol, &args.meaning, &args.triggers) {
                    Ok(_) => {
                        let _ = self.events.send(SessionEvent::MemoryUpdated);
                        Some(ClientMessage::ToolResponse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            response: serde_json::json!({
                                "result": "Memory symbol and triggers stored to vault. Confirmed."
                            }),
                        })
                    }
                    Err(e) => {
                        warn!("memory save failed: {e}");
                        None
                    }
                }
            }
        }
    }
}

//! Duplex transport to the remote conversational agent.
//!
//! The session engine treats the transport purely as an ordered,
//! bidirectional message channel: outbound messages carry realtime audio
//! chunks or tool responses, inbound messages carry audio chunks, an
//! optional interruption flag, and optional tool-call requests. Transport
//! establishment and auth are the connector's concern.

pub mod ws;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages sent from the client to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Realtime capture audio, base64-encoded PCM tagged with a mime
    /// descriptor carrying the sample rate.
    RealtimeAudio { mime_type: String, data: String },
    /// Structured tool response, correlated by the originating call id.
    ToolResponse {
        id: String,
        name: String,
        response: serde_json::Value,
    },
}

/// Inbound audio chunk payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioPayload {
    /// Base64-encoded 16-bit PCM at the playback rate.
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A structured function-invocation request from the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRequest {
    /// Call identifier; the tool response is correlated by this id.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// One inbound message from the agent. Every field is optional on the wire;
/// a single message may carry audio, tool calls, and the interruption flag
/// in any combination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub audio: Option<AudioPayload>,
    /// The user spoke over the agent; all scheduled playback must flush.
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Events delivered on the inbound side of an established session.
#[derive(Debug)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// The remote side closed or the connection errored. Terminal.
    Closed { reason: Option<String> },
}

/// Priming payload sent once when the transport opens: the memory-derived
/// system instruction and the tool declarations the agent may call.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSetup {
    pub system_instruction: String,
    pub tools: Vec<serde_json::Value>,
}

/// Outbound half of an established session. Cheap to clone via `Arc`.
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns a transport-send error if the message cannot be delivered.
    /// Per-frame failures are non-fatal to the session.
    async fn send(&self, message: ClientMessage) -> Result<()>;

    /// Close the outbound side. Idempotent.
    async fn close(&self);
}

/// An established duplex session.
pub struct TransportSession {
    pub sender: Arc<dyn TransportSender>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens duplex sessions to the remote agent.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a session, delivering `setup` before any audio flows.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the handshake fails.
    async fn connect(&self, setup: SessionSetup) -> Result<TransportSession>;
}

/// Mime descriptor for raw PCM at the given sample rate.
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

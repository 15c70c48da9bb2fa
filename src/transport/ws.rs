//! WebSocket transport connector.
//!
//! Frames are JSON text messages. The setup payload goes out as the first
//! frame after the handshake; after that the socket carries realtime audio
//! and tool traffic in both directions until either side closes.

use crate::error::{Result, SessionError};
use crate::transport::{
    ClientMessage, ServerMessage, SessionSetup, TransportConnector, TransportEvent,
    TransportSender, TransportSession,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Inbound event buffer; audio chunks arrive in bursts.
const INBOUND_CHANNEL_SIZE: usize = 64;

enum Outbound {
    Frame(String),
    Close,
}

/// Connects to a live agent endpoint over WebSocket.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(&self, setup: SessionSetup) -> Result<TransportSession> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| SessionError::Connection(format!("invalid transport url: {e}")))?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Connection(format!("websocket connect: {e}")))?;
        let (mut write, read) = ws_stream.split();

        // Prime the session before any audio flows.
        let setup_frame = serde_json::json!({
            "type": "setup",
            "system_instruction": setup.system_instruction,
            "tools": setup.tools,
        });
        write
            .send(Message::Text(setup_frame.to_string()))
            .await
            .map_err(|e| SessionError::Connection(format!("send setup: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(INBOUND_CHANNEL_SIZE);

        tokio::spawn(run_socket(write, read, outbound_rx, inbound_tx));

        Ok(TransportSession {
            sender: Arc::new(WsSender { tx: outbound_tx }),
            inbound: inbound_rx,
        })
    }
}

struct WsSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

#[async_trait]
impl TransportSender for WsSender {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&message)
            .map_err(|e| SessionError::TransportSend(format!("serialize: {e}")))?;
        self.tx
            .send(Outbound::Frame(json))
            .map_err(|_| SessionError::TransportSend("socket task gone".into()))
    }

    async fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

async fn run_socket(
    mut write: WsWrite,
    mut read: WsRead,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(server_msg) => {
                                if inbound_tx.send(TransportEvent::Message(server_msg)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("ignoring malformed server frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = inbound_tx.send(TransportEvent::Closed { reason }).await;
                        break;
                    }
                    Some(Ok(_)) => {} // Binary, Ping/Pong handled by tungstenite.
                    Some(Err(e)) => {
                        let _ = inbound_tx
                            .send(TransportEvent::Closed { reason: Some(e.to_string()) })
                            .await;
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(TransportEvent::Closed { reason: None }).await;
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(json)) => {
                        if let Err(e) = write.send(Message::Text(json)).await {
                            debug!("outbound send failed: {e}");
                            let _ = inbound_tx
                                .send(TransportEvent::Closed { reason: Some(e.to_string()) })
                                .await;
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }
}

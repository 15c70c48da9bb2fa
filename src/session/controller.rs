//! Live session lifecycle: capture → transport → playback orchestration.
//!
//! The controller owns the connection lifecycle and drives two always-on
//! loops for the duration of a session: capture-and-send (paced by the
//! capture device) and receive-and-schedule (paced by inbound transport
//! messages). The loops share no mutable state with each other; tool calls
//! are handled synchronously on the receive loop.

use crate::audio::{capture, playback, AudioDevices, CaptureBlock};
use crate::config::KeepsakeConfig;
use crate::error::{Result, SessionError};
use crate::memory::MemoryStore;
use crate::session::events::SessionEvent;
use crate::session::prompt::build_system_instruction;
use crate::session::tools::{save_memory_tool_schema, ToolMediator};
use crate::transport::{
    pcm_mime_type, ClientMessage, ServerMessage, SessionSetup, TransportConnector, TransportEvent,
    TransportSender,
};
use base64::Engine as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capture block buffer between the audio thread and the send loop.
const AUDIO_CHANNEL_SIZE: usize = 64;

/// Primary session state. An interruption is an orthogonal transient signal
/// within `Streaming`, not a state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Disconnecting,
}

/// Owns the live session lifecycle.
pub struct SessionController {
    config: KeepsakeConfig,
    store: Arc<MemoryStore>,
    connector: Arc<dyn TransportConnector>,
    devices: Arc<dyn AudioDevices>,
    events: broadcast::Sender<SessionEvent>,
    active: Mutex<Option<ActiveSession>>,
    connect_cancel: StdMutex<Option<CancellationToken>>,
    state: Arc<StdMutex<SessionState>>,
}

struct ActiveSession {
    shared: Arc<SessionShared>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// State shared between the two streaming loops and teardown paths.
struct SessionShared {
    cancel: CancellationToken,
    sender: Arc<dyn TransportSender>,
    playback: Arc<dyn crate::audio::PlaybackSink>,
    events: broadcast::Sender<SessionEvent>,
    state: Arc<StdMutex<SessionState>>,
    torn_down: AtomicBool,
}

impl SessionShared {
    fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    /// Full teardown: stop capture, flush and release playback, close the
    /// transport, notify observers. Safe to call from any path; only the
    /// first caller does the work, so the disconnect notification fires
    /// exactly once per actual teardown.
    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Disconnecting);
        self.cancel.cancel();
        let discarded = self.playback.flush();
        if discarded > 0 {
            debug!("discarded {discarded} scheduled playback buffers on teardown");
        }
        self.playback.close();
        self.sender.close().await;
        self.set_state(SessionState::Idle);
        let _ = self.events.send(SessionEvent::Disconnected);
        info!("session torn down");
    }
}

impl SessionController {
    #[must_use]
    pub fn new(
        config: KeepsakeConfig,
        store: Arc<MemoryStore>,
        connector: Arc<dyn TransportConnector>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        Self {
            config,
            store,
            connector,
            devices,
            events: crate::session::events::channel(),
            active: Mutex::new(None),
            connect_cancel: StdMutex::new(None),
            state: Arc::new(StdMutex::new(SessionState::Idle)),
        }
    }

    /// Subscribe to session events (level signal, memory updates,
    /// disconnect notifications).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current primary state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.lock().map_or(SessionState::Idle, |s| *s)
    }

    /// Open a live session: acquire devices, prime the transport with a
    /// fresh memory dump, and start both streaming loops.
    ///
    /// Any prior session is torn down first. On failure every partially
    /// acquired resource is released before the error propagates, and the
    /// controller is left in `Idle`.
    ///
    /// # Errors
    ///
    /// Returns a connection error if device acquisition or the transport
    /// handshake fails.
    pub async fn connect(&self) -> Result<()> {
        self.disconnect().await;

        let connect_cancel = CancellationToken::new();
        if let Ok(mut slot) = self.connect_cancel.lock() {
            *slot = Some(connect_cancel.clone());
        }
        if let Ok(mut state) = self.state.lock() {
            *state = SessionState::Connecting;
        }

        let result = self.establish(&connect_cancel).await;
        if let Ok(mut slot) = self.connect_cancel.lock() {
            *slot = None;
        }

        match result {
            Ok(session) => {
                let shared = Arc::clone(&session.shared);
                let previous = self.active.lock().await.replace(session);
                if let Some(previous) = previous {
                    // A racing connect stored a session already; it must be
                    // torn down, not silently dropped.
                    previous.shared.teardown().await;
                    for task in previous.tasks {
                        let _ = task.await;
                    }
                }
                shared.set_state(SessionState::Streaming);
                // disconnect() may have raced the final handshake step.
                if connect_cancel.is_cancelled() {
                    self.disconnect().await;
                    return Err(SessionError::Connection("connect cancelled".into()));
                }
                info!("live session streaming");
                Ok(())
            }
            Err(e) => {
                if let Ok(mut state) = self.state.lock() {
                    *state = SessionState::Idle;
                }
                Err(e)
            }
        }
    }

    async fn establish(&self, connect_cancel: &CancellationToken) -> Result<ActiveSession> {
        // Capture device first so permission failures surface before any
        // transport work.
        let mut capture = self
            .devices
            .open_capture(&self.config.audio)
            .map_err(|e| SessionError::Connection(format!("capture device: {e}")))?;

        let playback = self
            .devices
            .open_playback(&self.config.audio)
            .map_err(|e| SessionError::Connection(format!("playback device: {e}")))?;

        // Prime with a fresh dump of the vault, never a cached one.
        let context = self.store.context_string();
        debug!("priming session, context length {}", context.len());
        let setup = SessionSetup {
            system_instruction: build_system_instruction(&context),
            tools: vec![save_memory_tool_schema()],
        };

        let session = tokio::select! {
            () = connect_cancel.cancelled() => {
                playback.close();
                return Err(SessionError::Connection("connect cancelled".into()));
            }
            result = self.connector.connect(setup) => match result {
                Ok(session) => session,
                Err(e) => {
                    playback.close();
                    return Err(e);
                }
            }
        };

        let cancel = CancellationToken::new();
        let shared = Arc::new(SessionShared {
            cancel: cancel.clone(),
            sender: Arc::clone(&session.sender),
            playback: Arc::clone(&playback),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            torn_down: AtomicBool::new(false),
        });

        // Start the capture pipeline only once the transport is ready.
        let (block_tx, block_rx) = mpsc::channel(AUDIO_CHANNEL_SIZE);
        if let Err(e) = capture.start(block_tx, cancel.clone()) {
            // Connect failed: release everything without a disconnect
            // notification, since no session was ever observable.
            cancel.cancel();
            playback.close();
            session.sender.close().await;
            return Err(SessionError::Connection(format!("capture start: {e}")));
        }

        let mediator = ToolMediator::new(Arc::clone(&self.store), self.events.clone());
        let tasks = vec![
            tokio::spawn(run_capture_pump(block_rx, Arc::clone(&shared))),
            tokio::spawn(run_receive_loop(session.inbound, Arc::clone(&shared), mediator)),
        ];

        Ok(ActiveSession { shared, tasks })
    }

    /// Tear down the current session, if any. Idempotent and safe to call
    /// from any state, including during an in-flight connect attempt.
    pub async fn disconnect(&self) {
        let pending_connect = self
            .connect_cancel
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(token) = pending_connect {
            token.cancel();
        }

        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.shared.teardown().await;
            for task in active.tasks {
                let _ = task.await;
            }
        }
    }
}

/// Capture-and-send loop: level signal, PCM conversion, transport send.
///
/// Blocks captured while no transport is established are silently dropped;
/// per-frame send failures are logged and swallowed.
async fn run_capture_pump(mut rx: mpsc::Receiver<CaptureBlock>, shared: Arc<SessionShared>) {
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            block = rx.recv() => {
                let Some(block) = block else { break };
                if !shared.is_connected() {
                    continue;
                }

                let level = capture::mean_abs_level(&block.samples);
                let _ = shared.events.send(SessionEvent::InputLevel { level });

                let bytes = capture::f32_to_pcm16_bytes(&block.samples);
                let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
                let message = ClientMessage::RealtimeAudio {
                    mime_type: pcm_mime_type(block.sample_rate),
                    data,
                };
                if let Err(e) = shared.sender.send(message).await {
                    debug!("dropping outbound audio frame: {e}");
                }
            }
        }
    }
}

/// Receive-and-schedule loop: decode inbound audio, route tool calls,
/// honor interruptions. Remote close or error funnels into full teardown.
async fn run_receive_loop(
    mut inbound: mpsc::Receiver<TransportEvent>,
    shared: Arc<SessionShared>,
    mediator: ToolMediator,
) {
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            event = inbound.recv() => {
                match event {
                    Some(TransportEvent::Message(message)) => {
                        handle_server_message(message, &shared, &mediator).await;
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        match reason {
                            Some(reason) => warn!("transport closed: {reason}"),
                            None => info!("transport closed by remote"),
                        }
                        shared.teardown().await;
                        break;
                    }
                    None => {
                        shared.teardown().await;
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_server_message(
    message: ServerMessage,
    shared: &Arc<SessionShared>,
    mediator: &ToolMediator,
) {
    if let Some(audio) = message.audio {
        match playback::decode_pcm_payload(&audio.data) {
            Ok(samples) => shared.playback.enqueue(samples),
            Err(e) => warn!("dropping inbound audio frame: {e}"),
        }
    }

    for call in &message.tool_calls {
        if let Some(response) = mediator.handle(call) {
            if shared.is_connected() {
                if let Err(e) = shared.sender.send(response).await {
                    debug!("tool confirmation not delivered: {e}");
                }
            }
        }
    }

    if message.interrupted {
        let discarded = shared.playback.flush();
        info!("barge-in: stopped {discarded} scheduled playback buffers");
    }
}

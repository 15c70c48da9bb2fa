//! End-to-end session flow tests over a mock transport and mock audio
//! devices: priming, capture send path, playback scheduling, barge-in,
//! tool mediation, and teardown semantics.

use async_trait::async_trait;
use base64::Engine as _;
use keepsake::audio::{AudioDevices, CaptureBlock, CaptureSource, PlaybackSink};
use keepsake::config::{AudioConfig, KeepsakeConfig, MemoryConfig};
use keepsake::error::{Result, SessionError};
use keepsake::memory::{MemoryBlobStore, MemoryStore};
use keepsake::session::{SessionController, SessionEvent, SessionState};
use keepsake::transport::{
    ClientMessage, SessionSetup, TransportConnector, TransportEvent, TransportSender,
    TransportSession,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockSink {
    enqueued: Mutex<Vec<Vec<f32>>>,
    flushes: AtomicUsize,
    closed: AtomicBool,
}

impl PlaybackSink for MockSink {
    fn enqueue(&self, samples: Vec<f32>) {
        self.enqueued.lock().expect("lock").push(samples);
    }

    fn flush(&self) -> usize {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        let mut enqueued = self.enqueued.lock().expect("lock");
        let discarded = enqueued.len();
        enqueued.clear();
        discarded
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockCapture {
    slot: Arc<Mutex<Option<mpsc::Sender<CaptureBlock>>>>,
}

impl CaptureSource for MockCapture {
    fn start(&mut self, tx: mpsc::Sender<CaptureBlock>, _cancel: CancellationToken) -> Result<()> {
        *self.slot.lock().expect("lock") = Some(tx);
        Ok(())
    }
}

#[derive(Default)]
struct MockDevices {
    capture_slot: Arc<Mutex<Option<mpsc::Sender<CaptureBlock>>>>,
    sinks: Mutex<Vec<Arc<MockSink>>>,
    fail_capture: bool,
}

impl MockDevices {
    fn sink(&self, index: usize) -> Arc<MockSink> {
        Arc::clone(&self.sinks.lock().expect("lock")[index])
    }

    fn sink_count(&self) -> usize {
        self.sinks.lock().expect("lock").len()
    }

    fn open_sink_count(&self) -> usize {
        self.sinks
            .lock()
            .expect("lock")
            .iter()
            .filter(|sink| !sink.closed.load(Ordering::SeqCst))
            .count()
    }

    fn feed(&self, block: CaptureBlock) {
        let tx = self
            .capture_slot
            .lock()
            .expect("lock")
            .clone()
            .expect("capture not started");
        tx.try_send(block).expect("feed block");
    }
}

impl AudioDevices for MockDevices {
    fn open_capture(&self, _config: &AudioConfig) -> Result<Box<dyn CaptureSource>> {
        if self.fail_capture {
            return Err(SessionError::Audio("microphone permission denied".into()));
        }
        Ok(Box::new(MockCapture {
            slot: Arc::clone(&self.capture_slot),
        }))
    }

    fn open_playback(&self, _config: &AudioConfig) -> Result<Arc<dyn PlaybackSink>> {
        let sink = Arc::new(MockSink::default());
        self.sinks.lock().expect("lock").push(Arc::clone(&sink));
        Ok(sink)
    }
}

struct MockLink {
    inbound_tx: mpsc::Sender<TransportEvent>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    setup: SessionSetup,
    closed: Arc<AtomicBool>,
}

struct MockSender {
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSender for MockSender {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::TransportSend("transport closed".into()));
        }
        self.sent.lock().expect("lock").push(message);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockConnector {
    links: Mutex<Vec<MockLink>>,
    fail: bool,
    /// When set, `connect` parks on this gate until notified.
    stall: Option<Arc<tokio::sync::Notify>>,
}

impl MockConnector {
    fn link_count(&self) -> usize {
        self.links.lock().expect("lock").len()
    }

    fn setup(&self, index: usize) -> SessionSetup {
        self.links.lock().expect("lock")[index].setup.clone()
    }

    fn sent(&self, index: usize) -> Vec<ClientMessage> {
        self.links.lock().expect("lock")[index]
            .sent
            .lock()
            .expect("lock")
            .clone()
    }

    fn sender_closed(&self, index: usize) -> bool {
        self.links.lock().expect("lock")[index]
            .closed
            .load(Ordering::SeqCst)
    }

    fn open_sender_count(&self) -> usize {
        self.links
            .lock()
            .expect("lock")
            .iter()
            .filter(|link| !link.closed.load(Ordering::SeqCst))
            .count()
    }

    fn inbound(&self, index: usize) -> mpsc::Sender<TransportEvent> {
        self.links.lock().expect("lock")[index].inbound_tx.clone()
    }

    async fn push(&self, index: usize, event: TransportEvent) {
        self.inbound(index).send(event).await.expect("push inbound");
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self, setup: SessionSetup) -> Result<TransportSession> {
        if let Some(gate) = &self.stall {
            gate.notified().await;
        }
        if self.fail {
            return Err(SessionError::Connection("handshake refused".into()));
        }
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.links.lock().expect("lock").push(MockLink {
            inbound_tx,
            sent: Arc::clone(&sent),
            setup,
            closed: Arc::clone(&closed),
        });
        Ok(TransportSession {
            sender: Arc::new(MockSender { sent, closed }),
            inbound: inbound_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    controller: Arc<SessionController>,
    store: Arc<MemoryStore>,
    connector: Arc<MockConnector>,
    devices: Arc<MockDevices>,
    events: broadcast::Receiver<SessionEvent>,
}

fn harness_with(connector: MockConnector, devices: MockDevices) -> Harness {
    let store = Arc::new(MemoryStore::new(
        Box::new(MemoryBlobStore::new()),
        &MemoryConfig::default(),
    ));
    let connector = Arc::new(connector);
    let devices = Arc::new(devices);
    let controller = Arc::new(SessionController::new(
        KeepsakeConfig::default(),
        Arc::clone(&store),
        Arc::clone(&connector) as Arc<dyn TransportConnector>,
        Arc::clone(&devices) as Arc<dyn AudioDevices>,
    ));
    let events = controller.subscribe();
    Harness {
        controller,
        store,
        connector,
        devices,
        events,
    }
}

fn harness() -> Harness {
    harness_with(MockConnector::default(), MockDevices::default())
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn pcm_payload(values: &[i16]) -> String {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

fn audio_message(values: &[i16]) -> TransportEvent {
    TransportEvent::Message(
        serde_json::from_value(serde_json::json!({
            "audio": {"data": pcm_payload(values), "mime_type": "audio/pcm;rate=24000"}
        }))
        .expect("server message"),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_primes_with_fresh_memory_context_and_tool_schema() {
    let h = harness();
    h.store
        .save("🎣", "Lost dad's fishing pole", &["fish".into()])
        .expect("save");

    h.controller.connect().await.expect("connect");
    assert_eq!(h.controller.state(), SessionState::Streaming);

    let setup = h.connector.setup(0);
    assert!(setup.system_instruction.contains("Lost dad's fishing pole"));
    assert!(setup.system_instruction.contains("TRIGGERS: fish"));
    assert_eq!(setup.tools.len(), 1);
    assert_eq!(setup.tools[0]["name"], "save_memory_symbol");
}

#[tokio::test]
async fn capture_blocks_are_leveled_encoded_and_sent() {
    let mut h = harness();
    h.controller.connect().await.expect("connect");

    h.devices.feed(CaptureBlock {
        samples: vec![0.5, -0.5, 0.25, -0.25],
        sample_rate: 16_000,
    });

    let connector = Arc::clone(&h.connector);
    wait_for("outbound audio frame", || !connector.sent(0).is_empty()).await;

    let sent = h.connector.sent(0);
    let ClientMessage::RealtimeAudio { mime_type, data } = &sent[0] else {
        panic!("expected realtime audio, got {:?}", sent[0]);
    };
    assert_eq!(mime_type, "audio/pcm;rate=16000");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .expect("base64");
    assert_eq!(bytes.len(), 8);

    // The level signal fired for the block: mean |s| = 0.375.
    let events = drain(&mut h.events);
    let level = events.iter().find_map(|e| match e {
        SessionEvent::InputLevel { level } => Some(*level),
        _ => None,
    });
    assert!((level.expect("level event") - 0.375).abs() < 1e-6);
}

#[tokio::test]
async fn inbound_audio_is_decoded_and_scheduled() {
    let h = harness();
    h.controller.connect().await.expect("connect");

    h.connector.push(0, audio_message(&[16384, -16384])).await;

    let sink = h.devices.sink(0);
    {
        let sink = Arc::clone(&sink);
        wait_for("scheduled buffer", move || {
            !sink.enqueued.lock().expect("lock").is_empty()
        })
        .await;
    }

    let enqueued = sink.enqueued.lock().expect("lock").clone();
    assert_eq!(enqueued.len(), 1);
    assert!((enqueued[0][0] - 0.5).abs() < 1e-6);
    assert!((enqueued[0][1] + 0.5).abs() < 1e-6);
}

#[tokio::test]
async fn malformed_inbound_audio_is_dropped_without_teardown() {
    let mut h = harness();
    h.controller.connect().await.expect("connect");

    h.connector
        .push(
            0,
            TransportEvent::Message(
                serde_json::from_value(serde_json::json!({"audio": {"data": "!!!not-base64"}}))
                    .expect("server message"),
            ),
        )
        .await;
    // A good frame after the bad one still plays.
    h.connector.push(0, audio_message(&[1000])).await;

    let sink = h.devices.sink(0);
    {
        let sink = Arc::clone(&sink);
        wait_for("good frame scheduled", move || {
            !sink.enqueued.lock().expect("lock").is_empty()
        })
        .await;
    }
    assert_eq!(sink.enqueued.lock().expect("lock").len(), 1);
    assert_eq!(h.controller.state(), SessionState::Streaming);
    assert!(!drain(&mut h.events).contains(&SessionEvent::Disconnected));
}

#[tokio::test]
async fn interruption_flushes_scheduled_playback() {
    let h = harness();
    h.controller.connect().await.expect("connect");

    h.connector.push(0, audio_message(&[100, 200])).await;
    h.connector.push(0, audio_message(&[300, 400])).await;
    h.connector
        .push(
            0,
            TransportEvent::Message(
                serde_json::from_value(serde_json::json!({"interrupted": true}))
                    .expect("server message"),
            ),
        )
        .await;

    let sink = h.devices.sink(0);
    {
        let sink = Arc::clone(&sink);
        wait_for("flush", move || sink.flushes.load(Ordering::SeqCst) > 0).await;
    }
    assert!(sink.enqueued.lock().expect("lock").is_empty());
    // Interruption never tears the session down; capture keeps streaming.
    assert_eq!(h.controller.state(), SessionState::Streaming);
}

#[tokio::test]
async fn tool_call_saves_memory_and_confirms_on_same_channel() {
    let mut h = harness();
    h.controller.connect().await.expect("connect");

    h.connector
        .push(
            0,
            TransportEvent::Message(
                serde_json::from_value(serde_json::json!({
                    "tool_calls": [{
                        "id": "call-42",
                        "name": "save_memory_symbol",
                        "args": {
                            "symbol": "🐕",
                            "meaning": "Had a dog named Rex",
                            "triggers": ["dog", "rex"]
                        }
                    }]
                }))
                .expect("server message"),
            ),
        )
        .await;

    let store = Arc::clone(&h.store);
    wait_for("memory saved", move || store.load().len() == 1).await;

    let connector = Arc::clone(&h.connector);
    wait_for("tool confirmation", move || {
        connector
            .sent(0)
            .iter()
            .any(|m| matches!(m, ClientMessage::ToolResponse { .. }))
    })
    .await;

    let sent = h.connector.sent(0);
    let response = sent
        .iter()
        .find_map(|m| match m {
            ClientMessage::ToolResponse { id, name, response } => {
                Some((id.clone(), name.clone(), response.clone()))
            }
            _ => None,
        })
        .expect("tool response");
    assert_eq!(response.0, "call-42");
    assert_eq!(response.1, "save_memory_symbol");
    assert!(response.2["result"].as_str().expect("result").contains("Confirmed"));

    assert!(drain(&mut h.events).contains(&SessionEvent::MemoryUpdated));
}

#[tokio::test]
async fn unknown_tool_call_is_ignored() {
    let h = harness();
    h.controller.connect().await.expect("connect");

    h.connector
        .push(
            0,
            TransportEvent::Message(
                serde_json::from_value(serde_json::json!({
                    "tool_calls": [{"id": "c9", "name": "order_pizza", "args": {}}]
                }))
                .expect("server message"),
            ),
        )
        .await;

    // Session keeps running; nothing saved, nothing sent back.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.state(), SessionState::Streaming);
    assert!(h.store.load().is_empty());
    assert!(h.connector.sent(0).is_empty());
}

#[tokio::test]
async fn remote_close_tears_down_exactly_once() {
    let mut h = harness();
    h.controller.connect().await.expect("connect");

    h.connector
        .push(0, TransportEvent::Closed { reason: Some("gone".into()) })
        .await;

    let controller_state = {
        let sink = h.devices.sink(0);
        wait_for("sink closed", move || sink.closed.load(Ordering::SeqCst)).await;
        h.controller.state()
    };
    assert_eq!(controller_state, SessionState::Idle);
    assert!(h.connector.sender_closed(0));

    // Explicit disconnect afterwards is a no-op.
    h.controller.disconnect().await;
    h.controller.disconnect().await;

    let disconnects = drain(&mut h.events)
        .into_iter()
        .filter(|e| *e == SessionEvent::Disconnected)
        .count();
    assert_eq!(disconnects, 1, "disconnect notification must fire exactly once");
}

#[tokio::test]
async fn reconnect_tears_down_previous_session_first() {
    let mut h = harness();
    h.controller.connect().await.expect("connect");
    h.controller.connect().await.expect("reconnect");

    assert_eq!(h.connector.link_count(), 2);
    assert!(h.connector.sender_closed(0), "first transport must be closed");
    assert!(!h.connector.sender_closed(1), "second transport must be live");
    assert!(h.devices.sink(0).closed.load(Ordering::SeqCst));
    assert!(!h.devices.sink(1).closed.load(Ordering::SeqCst));
    assert_eq!(h.controller.state(), SessionState::Streaming);

    let disconnects = drain(&mut h.events)
        .into_iter()
        .filter(|e| *e == SessionEvent::Disconnected)
        .count();
    assert_eq!(disconnects, 1, "only the first session's teardown notifies");
}

#[tokio::test]
async fn failed_handshake_releases_resources_and_stays_idle() {
    let mut h = harness_with(
        MockConnector {
            fail: true,
            ..Default::default()
        },
        MockDevices::default(),
    );

    let err = h.controller.connect().await.expect_err("connect must fail");
    assert!(matches!(err, SessionError::Connection(_)));
    assert_eq!(h.controller.state(), SessionState::Idle);
    // Playback was acquired before the handshake and must be released.
    assert!(h.devices.sink(0).closed.load(Ordering::SeqCst));
    // A failed connect never fires the disconnect notification.
    assert!(!drain(&mut h.events).contains(&SessionEvent::Disconnected));
}

#[tokio::test]
async fn disconnect_interrupts_in_flight_connect() {
    // The handshake parks until the gate is notified, which it never is:
    // the connect attempt can only end by being cancelled.
    let gate = Arc::new(tokio::sync::Notify::new());
    let mut h = harness_with(
        MockConnector {
            stall: Some(Arc::clone(&gate)),
            ..Default::default()
        },
        MockDevices::default(),
    );

    let connect = {
        let controller = Arc::clone(&h.controller);
        tokio::spawn(async move { controller.connect().await })
    };

    // The attempt is in flight once playback has been acquired.
    let devices = Arc::clone(&h.devices);
    wait_for("handshake in flight", move || devices.sink_count() == 1).await;

    h.controller.disconnect().await;

    let err = connect
        .await
        .expect("join")
        .expect_err("connect must be cancelled");
    assert!(matches!(err, SessionError::Connection(_)));
    assert_eq!(h.controller.state(), SessionState::Idle);
    // The partially acquired playback handle was released.
    assert!(h.devices.sink(0).closed.load(Ordering::SeqCst));
    assert_eq!(h.connector.link_count(), 0, "no transport session established");
    // A cancelled connect never fires the disconnect notification.
    assert!(!drain(&mut h.events).contains(&SessionEvent::Disconnected));
}

#[tokio::test]
async fn concurrent_connects_leave_exactly_one_live_session() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let h = harness_with(
        MockConnector {
            stall: Some(Arc::clone(&gate)),
            ..Default::default()
        },
        MockDevices::default(),
    );

    let first = {
        let controller = Arc::clone(&h.controller);
        tokio::spawn(async move { controller.connect().await })
    };
    let second = {
        let controller = Arc::clone(&h.controller);
        tokio::spawn(async move { controller.connect().await })
    };

    let devices = Arc::clone(&h.devices);
    wait_for("both attempts in flight", move || devices.sink_count() == 2).await;
    gate.notify_waiters();

    let (first, second) = (first.await.expect("join"), second.await.expect("join"));
    assert!(first.is_ok() || second.is_ok(), "one attempt must win");

    // Whatever the interleaving, exactly one session survives: no leaked
    // playback handles, no leaked transports.
    assert_eq!(h.controller.state(), SessionState::Streaming);
    assert_eq!(h.devices.open_sink_count(), 1);
    assert_eq!(h.connector.open_sender_count(), 1);

    h.controller.disconnect().await;
    assert_eq!(h.devices.open_sink_count(), 0);
    assert_eq!(h.connector.open_sender_count(), 0);
    assert_eq!(h.controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn tool_call_queued_behind_remote_close_is_not_confirmed() {
    let mut h = harness();
    h.controller.connect().await.expect("connect");

    // The close is queued first, so the tool call arrives after teardown.
    let inbound = h.connector.inbound(0);
    inbound
        .send(TransportEvent::Closed { reason: None })
        .await
        .expect("close");
    let _ = inbound
        .send(TransportEvent::Message(
            serde_json::from_value(serde_json::json!({
                "tool_calls": [{
                    "id": "c3",
                    "name": "save_memory_symbol",
                    "args": {"symbol": "🐕", "meaning": "Had a dog named Rex"}
                }]
            }))
            .expect("server message"),
        ))
        .await;

    let sink = h.devices.sink(0);
    wait_for("teardown", move || sink.closed.load(Ordering::SeqCst)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.store.load().is_empty(), "nothing saved after close");
    assert!(
        !h.connector
            .sent(0)
            .iter()
            .any(|m| matches!(m, ClientMessage::ToolResponse { .. })),
        "no tool confirmation after teardown"
    );
    assert!(!drain(&mut h.events).contains(&SessionEvent::MemoryUpdated));
}

#[tokio::test]
async fn denied_capture_device_fails_connect() {
    let h = harness_with(
        MockConnector::default(),
        MockDevices {
            fail_capture: true,
            ..Default::default()
        },
    );

    let err = h.controller.connect().await.expect_err("connect must fail");
    assert!(matches!(err, SessionError::Connection(_)));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.connector.link_count(), 0, "no transport attempt");
}

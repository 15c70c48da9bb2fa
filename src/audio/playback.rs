//! Gapless scheduled playback via cpal, with immediate barge-in flush.
//!
//! Inbound agent audio arrives in bursts. Each decoded buffer is scheduled
//! to start at `max(now, cursor)` where `now` is the output stream's frame
//! counter and the cursor advances by each buffer's length, so playback is
//! strictly sequential and gapless in arrival order. A flush discards every
//! scheduled-but-unfinished buffer and resets the cursor to now, so the
//! next buffer starts immediately instead of after a stale offset.

use crate::audio::PlaybackSink;
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use base64::Engine as _;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// A buffer scheduled on the output clock.
#[derive(Debug)]
struct ScheduledBuffer {
    samples: Vec<f32>,
    /// Output-clock frame at which this buffer starts.
    start: u64,
    /// Render position within `samples`.
    pos: usize,
}

/// Pure scheduling state driven by the output stream's render callback.
///
/// The output clock is `frames_written`, which advances once per rendered
/// frame. All fields are guarded by a single mutex shared with the cpal
/// callback; `render` holds it only for the duration of one device buffer.
#[derive(Debug)]
pub struct ScheduleState {
    queue: VecDeque<ScheduledBuffer>,
    frames_written: u64,
    next_start: u64,
}

impl ScheduleState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            frames_written: 0,
            next_start: 0,
        }
    }

    /// Schedule `samples` at `max(now, cursor)` and advance the cursor by
    /// the buffer's duration. Returns the start frame.
    pub fn schedule(&mut self, samples: Vec<f32>) -> u64 {
        let start = self.next_start.max(self.frames_written);
        self.next_start = start + samples.len() as u64;
        self.queue.push_back(ScheduledBuffer {
            samples,
            start,
            pos: 0,
        });
        start
    }

    /// Discard every scheduled buffer and reset the cursor to now. Returns
    /// how many buffers were discarded.
    pub fn flush(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        self.next_start = self.frames_written;
        discarded
    }

    /// Number of scheduled-but-unfinished buffers.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.queue.len()
    }

    /// Fill `out` from scheduled buffers, silence where nothing is due.
    /// Buffers leave the queue on natural completion.
    pub fn render(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            let now = self.frames_written;
            *slot = 0.0;
            while let Some(front) = self.queue.front_mut() {
                if front.start > now {
                    break;
                }
                if front.pos < front.samples.len() {
                    *slot = front.samples[front.pos];
                    front.pos += 1;
                    break;
                }
                self.queue.pop_front();
            }
            self.frames_written += 1;
        }
    }
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned playback handle over a dedicated cpal output stream.
///
/// Each consumer acquires its own handle; closing one never affects
/// another. The stream thread holds the `cpal::Stream` (which is `!Send`)
/// and exits when the handle is closed.
pub struct CpalPlayback {
    state: Arc<Mutex<ScheduleState>>,
    shutdown: crossbeam_channel::Sender<()>,
}

impl CpalPlayback {
    /// Acquire the output device and start the render stream on a dedicated
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable output device is available or the
    /// stream cannot be started.
    pub fn spawn(config: &AudioConfig) -> Result<Self> {
        let state = Arc::new(Mutex::new(ScheduleState::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_state = Arc::clone(&state);
        let config = config.clone();
        std::thread::Builder::new()
            .name("keepsake-playback".into())
            .spawn(move || {
                let stream = match build_output_stream(&config, thread_state) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SessionError::Audio(format!(
                        "failed to start output stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                info!("audio playback started: {}Hz", config.output_sample_rate);

                // Hold the stream alive until the handle closes.
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("audio playback stopped");
            })
            .map_err(|e| SessionError::Audio(format!("cannot spawn playback thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| SessionError::Audio("playback thread exited before ready".into()))??;

        Ok(Self {
            state,
            shutdown: shutdown_tx,
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| SessionError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ScheduleState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn enqueue(&self, samples: Vec<f32>) {
        self.lock_state().schedule(samples);
    }

    fn flush(&self) -> usize {
        self.lock_state().flush()
    }

    fn close(&self) {
        self.lock_state().flush();
        // Idempotent: a second close finds the channel full or disconnected.
        let _ = self.shutdown.try_send(());
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.shutdown.try_send(());
    }
}

fn build_output_stream(
    config: &AudioConfig,
    state: Arc<Mutex<ScheduleState>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(ref name) = config.output_device {
        host.output_devices()
            .map_err(|e| SessionError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| SessionError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| SessionError::Audio("no default output device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: config.output_sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut state = match state.lock() {
                    Ok(s) => s,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.render(data);
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| SessionError::Audio(format!("failed to build output stream: {e}")))
}

/// Decode a base64 PCM payload (16-bit signed little-endian) into f32
/// samples normalized by 32768.
///
/// # Errors
///
/// Returns a decode error on invalid base64 or an odd byte count.
pub fn decode_pcm_payload(data: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| SessionError::Decode(format!("invalid base64 audio payload: {e}")))?;
    pcm16_bytes_to_f32(&bytes)
}

/// Convert little-endian 16-bit signed PCM bytes to f32 samples.
///
/// # Errors
///
/// Returns a decode error if the byte count is odd.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Decode(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect())
}

//! Microphone audio capture using cpal.
//!
//! Captures at the device's native sample rate, downsamples to the
//! configured input rate (default 16kHz mono), and re-chunks into fixed-size
//! blocks so the outbound frame cadence is stable regardless of the device's
//! buffer size. Echo cancellation, noise suppression, and gain control are
//! the OS audio stack's concern, not this module's.

use crate::audio::{CaptureBlock, CaptureSource};
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Audio capture from the system microphone via cpal.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    target_sample_rate: u32,
    block_frames: usize,
}

impl CpalCapture {
    /// Create a new capture instance.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then downsamples to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| SessionError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| SessionError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| SessionError::Audio("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| SessionError::Audio(format!("no default input config: {e}")))?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();

        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "native input config: {}Hz, {} channels",
            native_rate, native_channels
        );

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
            block_frames: config.capture_block_frames,
        })
    }

    fn build_and_run(
        &self,
        tx: mpsc::Sender<CaptureBlock>,
        cancel: CancellationToken,
        ready_tx: std::sync::mpsc::Sender<Result<()>>,
    ) {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let block_frames = self.block_frames;
        let mut pending: Vec<f32> = Vec::with_capacity(block_frames * 2);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };

                let samples = if native_rate != target_rate {
                    downsample(&mono, native_rate, target_rate)
                } else {
                    mono
                };

                // Re-chunk into fixed-size blocks for a stable frame cadence.
                pending.extend_from_slice(&samples);
                while pending.len() >= block_frames {
                    let block: Vec<f32> = pending.drain(..block_frames).collect();
                    let chunk = CaptureBlock {
                        samples: block,
                        sample_rate: target_rate,
                    };
                    // try_send keeps the audio thread from ever blocking.
                    if tx.try_send(chunk).is_err() {
                        debug!("capture channel full, dropping block");
                    }
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        );

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(SessionError::Audio(format!(
                    "failed to build input stream: {e}"
                ))));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(SessionError::Audio(format!(
                "failed to start input stream: {e}"
            ))));
            return;
        }

        let _ = ready_tx.send(Ok(()));
        info!(
            "audio capture started: native {}Hz -> target {}Hz",
            native_rate, target_rate
        );

        // The cpal stream is !Send, so it lives and dies on this thread.
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(stream);
        info!("audio capture stopped");
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SessionError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl CaptureSource for CpalCapture {
    fn start(&mut self, tx: mpsc::Sender<CaptureBlock>, cancel: CancellationToken) -> Result<()> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let device = self.device.clone();
        let stream_config = self.stream_config.clone();
        let capture = Self {
            device,
            stream_config,
            target_sample_rate: self.target_sample_rate,
            block_frames: self.block_frames,
        };

        std::thread::Builder::new()
            .name("keepsake-capture".into())
            .spawn(move || capture.build_and_run(tx, cancel, ready_tx))
            .map_err(|e| SessionError::Audio(format!("cannot spawn capture thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| SessionError::Audio("capture thread exited before ready".into()))?
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Sufficient quality for speech (48kHz → 16kHz): speech energy sits below
/// 8kHz, so no anti-alias filter is needed.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

/// Normalized mean absolute amplitude of a block, in [0, 1].
#[must_use]
pub fn mean_abs_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    sum / samples.len() as f32
}

/// Convert f32 samples to little-endian 16-bit signed PCM bytes.
///
/// Samples are clamped to [-1, 1], then scaled symmetrically: negative
/// values by 0x8000, positive by 0x7FFF.
#[must_use]
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let value = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

//! Audio capture and scheduled playback.

pub mod capture;
pub mod playback;

use crate::config::AudioConfig;
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A fixed-size block of mono f32 samples from the capture device.
#[derive(Debug, Clone)]
pub struct CaptureBlock {
    /// Mono samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// A live capture source delivering fixed-size blocks until cancelled.
pub trait CaptureSource: Send {
    /// Start delivering blocks to `tx`. Returns once the underlying stream
    /// is running; delivery stops when the token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture stream cannot be started.
    fn start(&mut self, tx: mpsc::Sender<CaptureBlock>, cancel: CancellationToken) -> Result<()>;
}

/// A playback sink with gapless scheduling and immediate flush.
pub trait PlaybackSink: Send + Sync {
    /// Schedule samples to play immediately after everything already
    /// scheduled (or now, if the queue has drained).
    fn enqueue(&self, samples: Vec<f32>);

    /// Stop and discard every scheduled-but-unfinished buffer and reset the
    /// scheduling cursor to now. Returns how many buffers were discarded.
    fn flush(&self) -> usize;

    /// Release the output device. Further enqueues are silently ignored.
    fn close(&self);
}

/// Factory for capture and playback resources, acquired per session.
///
/// This is the seam between the session controller and real hardware; tests
/// substitute mock devices.
pub trait AudioDevices: Send + Sync {
    /// Acquire the capture device.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable input device is available.
    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn CaptureSource>>;

    /// Acquire an owned playback handle. Each consumer gets its own handle;
    /// closing one never affects another.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable output device is available.
    fn open_playback(&self, config: &AudioConfig) -> Result<Arc<dyn PlaybackSink>>;
}

/// Real hardware via cpal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_capture(&self, config: &AudioConfig) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(capture::CpalCapture::new(config)?))
    }

    fn open_playback(&self, config: &AudioConfig) -> Result<Arc<dyn PlaybackSink>> {
        Ok(Arc::new(playback::CpalPlayback::spawn(config)?))
    }
}

//! Microphone capture pipeline.
//!
//! [`AudioCapture`] owns a [`CaptureDevice`] exclusively and relays every
//! frame the hardware produces to the `record` callback, immediately and in
//! arrival order. Frames that the device delivers after `pause()`/`end()`
//! are discarded.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::error::{ParleyError, Result};

/// Raw sample callback a device invokes from its I/O thread.
pub type SampleCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// One captured buffer of mono PCM16 samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFrame {
    /// Monotonic per-pipeline frame counter.
    pub sequence: u64,
    pub mono: Vec<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CaptureStatus {
    /// No hardware held.
    Idle,
    /// Hardware held, no frames delivered.
    Paused,
    Recording,
}

/// Hardware seam for microphone input.
pub trait CaptureDevice: Send {
    /// Acquire the input device at `sample_rate` (mono).
    fn acquire(&mut self, sample_rate: u32) -> Result<()>;

    /// Start invoking `on_samples` for every buffer the hardware fills.
    fn start_stream(&mut self, on_samples: SampleCallback) -> Result<()>;

    /// Stop delivery. The device stays acquired.
    fn stop_stream(&mut self) -> Result<()>;

    /// Release the hardware.
    fn release(&mut self) -> Result<()>;
}

/// Capture pipeline with `begin`/`record`/`pause`/`end` lifecycle.
pub struct AudioCapture<D: CaptureDevice> {
    device: D,
    sample_rate: u32,
    status: CaptureStatus,
    active: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
}

impl<D: CaptureDevice> fmt::Debug for AudioCapture<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioCapture")
            .field("sample_rate", &self.sample_rate)
            .field("status", &self.status)
            .finish()
    }
}

impl<D: CaptureDevice> AudioCapture<D> {
    pub fn new(device: D, sample_rate: u32) -> Self {
        Self {
            device,
            sample_rate,
            status: CaptureStatus::Idle,
            active: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Acquire the microphone. A no-op when the device is already held.
    pub fn begin(&mut self) -> Result<()> {
        if self.status != CaptureStatus::Idle {
            tracing::debug!(status = %self.status, "capture already acquired");
            return Ok(());
        }
        self.device
            .acquire(self.sample_rate)
            .map_err(|error| match error {
                ParleyError::DeviceUnavailable(_) => error,
                other => ParleyError::DeviceUnavailable(other.to_string()),
            })?;
        self.status = CaptureStatus::Paused;
        tracing::debug!(sample_rate = self.sample_rate, "capture acquired");
        Ok(())
    }

    /// Start continuous frame delivery to `on_frame`.
    pub fn record<F>(&mut self, mut on_frame: F) -> Result<()>
    where
        F: FnMut(CaptureFrame) + Send + 'static,
    {
        match self.status {
            CaptureStatus::Idle => {
                return Err(ParleyError::InvalidState(
                    "Capture not acquired: call begin() first".into(),
                ))
            }
            CaptureStatus::Recording => {
                return Err(ParleyError::InvalidState(
                    "Capture is already recording: call pause() first".into(),
                ))
            }
            CaptureStatus::Paused => {}
        }

        self.active.store(true, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        let sequence = Arc::clone(&self.sequence);
        let relay: SampleCallback = Box::new(move |samples: &[i16]| {
            if !active.load(Ordering::SeqCst) || samples.is_empty() {
                return;
            }
            on_frame(CaptureFrame {
                sequence: sequence.fetch_add(1, Ordering::SeqCst),
                mono: samples.to_vec(),
            });
        });

        if let Err(error) = self.device.start_stream(relay) {
            self.active.store(false, Ordering::SeqCst);
            return Err(error);
        }
        self.status = CaptureStatus::Recording;
        Ok(())
    }

    /// Stop frame delivery while keeping the device acquired.
    pub fn pause(&mut self) -> Result<()> {
        match self.status {
            CaptureStatus::Idle => Err(ParleyError::InvalidState(
                "Capture not acquired: call begin() first".into(),
            )),
            CaptureStatus::Paused => Ok(()),
            CaptureStatus::Recording => {
                self.active.store(false, Ordering::SeqCst);
                self.status = CaptureStatus::Paused;
                self.device.stop_stream()
            }
        }
    }

    /// Release the hardware from any state. Failures are logged, never returned.
    pub fn end(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if self.status == CaptureStatus::Recording {
            if let Err(error) = self.device.stop_stream() {
                tracing::warn!(error = %error, "capture stop failed during end");
            }
        }
        if self.status != CaptureStatus::Idle {
            if let Err(error) = self.device.release() {
                tracing::warn!(error = %error, "capture release failed during end");
            }
        }
        self.status = CaptureStatus::Idle;
    }
}

impl<D: CaptureDevice> Drop for AudioCapture<D> {
    fn drop(&mut self) {
        self.end();
    }
}

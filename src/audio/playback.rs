//! Streamed playback of assistant audio.
//!
//! Chunks are handed to the [`PlaybackSink`] whole and in append order, so
//! audio for one item plays back-to-back and distinct items interleave only
//! at chunk boundaries.

use std::fmt;

use super::pcm::pcm16_from_bytes;
use crate::error::{ParleyError, Result};

/// Hardware seam for audio output.
pub trait PlaybackSink: Send {
    /// Open the output device at `sample_rate` (mono).
    fn open(&mut self, sample_rate: u32) -> Result<()>;

    /// Queue a whole chunk behind everything already queued.
    fn write(&mut self, item_id: &str, samples: &[i16]) -> Result<()>;

    /// Drop queued audio that has not been played yet.
    fn flush(&mut self) -> Result<()>;

    /// Number of queued samples the device has played since `open`.
    fn position(&self) -> u64;
}

/// Where playback stood when it was sampled or interrupted.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOffset {
    pub item_id: String,
    /// Samples of this item already played.
    pub offset_samples: u64,
    /// Seconds of audio played since the sink opened.
    pub current_time: f64,
}

#[derive(Debug, Clone)]
struct TimelineEntry {
    item_id: String,
    start: u64,
    len: u64,
}

pub struct StreamPlayer<S: PlaybackSink> {
    sink: S,
    sample_rate: u32,
    connected: bool,
    timeline: Vec<TimelineEntry>,
    written: u64,
}

impl<S: PlaybackSink> fmt::Debug for StreamPlayer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPlayer")
            .field("sample_rate", &self.sample_rate)
            .field("connected", &self.connected)
            .field("queued_chunks", &self.timeline.len())
            .finish()
    }
}

impl<S: PlaybackSink> StreamPlayer<S> {
    pub fn new(sink: S, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            connected: false,
            timeline: Vec::new(),
            written: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Open the output device. A no-op when already open.
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.sink
            .open(self.sample_rate)
            .map_err(|error| match error {
                ParleyError::DeviceUnavailable(_) => error,
                other => ParleyError::DeviceUnavailable(other.to_string()),
            })?;
        self.written = self.sink.position();
        self.connected = true;
        Ok(())
    }

    /// Append a little-endian PCM16 chunk to the queue for `item_id`.
    pub fn add_16bit_pcm(&mut self, bytes: &[u8], item_id: &str) -> Result<()> {
        if !self.connected {
            return Err(ParleyError::InvalidState(
                "Playback not connected: call connect() first".into(),
            ));
        }
        let samples = pcm16_from_bytes(bytes);
        if samples.is_empty() {
            return Ok(());
        }
        self.sink.write(item_id, &samples)?;
        let len = samples.len() as u64;
        self.timeline.push(TimelineEntry {
            item_id: item_id.to_string(),
            start: self.written,
            len,
        });
        self.written += len;
        Ok(())
    }

    /// Current playback position, if an item is audibly playing.
    pub fn track_offset(&self) -> Option<TrackOffset> {
        let position = self.sink.position();
        let playing = self
            .timeline
            .iter()
            .find(|entry| entry.start <= position && position < entry.start + entry.len)?;
        let offset_samples = self
            .timeline
            .iter()
            .filter(|entry| entry.item_id == playing.item_id && entry.start <= position)
            .map(|entry| (position - entry.start).min(entry.len))
            .sum();
        Some(TrackOffset {
            item_id: playing.item_id.clone(),
            offset_samples,
            current_time: position as f64 / self.sample_rate as f64,
        })
    }

    /// Stop immediately and discard unplayed audio. Returns where playback was cut.
    pub fn interrupt(&mut self) -> Option<TrackOffset> {
        let offset = self.track_offset();
        if let Err(error) = self.sink.flush() {
            tracing::warn!(error = %error, "playback flush failed during interrupt");
        }
        self.timeline.clear();
        self.written = self.sink.position();
        offset
    }
}

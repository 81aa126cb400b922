//! Audio capabilities: microphone capture, streamed playback, PCM helpers.

pub mod capture;
pub mod pcm;
pub mod playback;

#[cfg(feature = "device")]
pub mod device;

pub use capture::{AudioCapture, CaptureDevice, CaptureFrame, CaptureStatus, SampleCallback};
pub use pcm::{decode, DecodedAudio};
pub use playback::{PlaybackSink, StreamPlayer, TrackOffset};

#[cfg(feature = "device")]
pub use device::{CpalMicrophone, CpalSpeaker};

//! Convenience re-exports for common use.

pub use crate::audio::{AudioCapture, CaptureDevice, CaptureStatus, PlaybackSink, StreamPlayer};
pub use crate::config::{SessionConfig, TurnDetection};
pub use crate::error::{ParleyError, Result};
pub use crate::realtime::{
    ConversationItem, ItemDelta, ItemRole, ItemStatus, RealtimeEventRecord, RealtimeTransport,
    WebSocketTransport,
};
pub use crate::session::{ConnectionState, SessionController, SessionUpdate, Subscription};
pub use crate::util::with_timeout;

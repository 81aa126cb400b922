//! Realtime conversation plumbing: wire events, event log, conversation
//! state, and the transport seam.

pub mod conversation;
pub mod events;
pub mod protocol;
pub mod transport;

pub use conversation::{
    Conversation, ConversationItem, ConversationUpdate, ItemDelta, ItemRole, ItemStatus,
};
pub use events::{EventLog, EventSource, RealtimeEventRecord};
pub use protocol::{ClientEvent, ContentPart, ServerEvent, ServerEventKind, SessionParams};
pub use transport::{RealtimeTransport, WebSocketTransport};

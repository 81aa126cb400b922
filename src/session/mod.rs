//! Realtime voice session: controller, connection state, and subscriber updates.

mod controller;
mod subscribers;

pub use controller::SessionController;
pub use subscribers::Subscription;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::realtime::{ConversationUpdate, RealtimeEventRecord};

/// `Disconnected -> Connecting -> Connected -> Disconnected`. No retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What subscribers receive, in the order the controller processed it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    State(ConnectionState),
    /// The log record after the event was pushed (collapsed count included).
    Event(RealtimeEventRecord),
    Conversation(ConversationUpdate),
}

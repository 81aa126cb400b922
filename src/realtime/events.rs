//! Realtime event log with run-length collapsing of adjacent repeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventSource {
    Client,
    Server,
}

/// One log entry. `count` is the length of the run of same-type events it stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEventRecord {
    /// Arrival time of the first event in the run.
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub event_type: String,
    /// Payload of the first event in the run.
    pub payload: Value,
    pub count: u32,
}

/// Append-only, order-preserving event log.
///
/// Unbounded: every distinct run adds a record until `clear()`.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<RealtimeEventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, folding it into the last record if the type repeats.
    pub fn push(
        &mut self,
        source: EventSource,
        event_type: impl Into<String>,
        payload: Value,
    ) -> &RealtimeEventRecord {
        let event_type = event_type.into();
        let repeats = self
            .records
            .last()
            .is_some_and(|last| last.event_type == event_type);
        if repeats {
            let last = self.records.len() - 1;
            self.records[last].count += 1;
        } else {
            self.records.push(RealtimeEventRecord {
                timestamp: Utc::now(),
                source,
                event_type,
                payload,
                count: 1,
            });
        }
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[RealtimeEventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

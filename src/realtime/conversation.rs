//! Conversation item store fed by server events.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use super::protocol::{ServerEvent, ServerEventKind, WireItem};
use crate::audio::pcm::{pcm16_to_bytes, DecodedAudio};

/// Captured input kept while no user turn is open, in milliseconds.
const MAX_UNCLAIMED_INPUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
}

/// Snapshot of a conversation item.
///
/// The raw audio buffer stays in the [`Conversation`]; snapshots carry its length
/// and, once the item completes, the decoded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationItem {
    pub id: String,
    pub role: ItemRole,
    pub status: ItemStatus,
    pub text: String,
    pub transcript: String,
    pub audio_bytes: usize,
    pub artifact: Option<Arc<DecodedAudio>>,
}

impl ConversationItem {
    fn new(id: String, role: ItemRole) -> Self {
        Self {
            id,
            role,
            status: ItemStatus::InProgress,
            text: String::new(),
            transcript: String::new(),
            audio_bytes: 0,
            artifact: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }
}

/// The part of an item that a single event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemDelta {
    /// Raw PCM16 bytes appended to the item's audio.
    Audio(Vec<u8>),
    Transcript(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationUpdate {
    pub item: ConversationItem,
    pub delta: Option<ItemDelta>,
}

struct Entry {
    item: ConversationItem,
    audio: Vec<u8>,
}

impl Entry {
    fn snapshot(&self) -> ConversationItem {
        let mut item = self.item.clone();
        item.audio_bytes = self.audio.len();
        item
    }
}

/// Ordered conversation items with an id index.
pub struct Conversation {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    sample_rate: u32,
    input_audio: Vec<i16>,
    /// Samples dropped from the front of `input_audio` since the session began.
    input_base: u64,
    speech_starts: HashMap<String, u64>,
    pending_user_audio: HashMap<String, Vec<u8>>,
}

impl Conversation {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            sample_rate,
            input_audio: Vec::new(),
            input_base: 0,
            speech_starts: HashMap::new(),
            pending_user_audio: HashMap::new(),
        }
    }

    pub fn items(&self) -> Vec<ConversationItem> {
        self.entries.iter().map(Entry::snapshot).collect()
    }

    pub fn get(&self, id: &str) -> Option<ConversationItem> {
        self.index.get(id).map(|slot| self.entries[*slot].snapshot())
    }

    /// Raw PCM16 bytes buffered for `id`.
    pub fn audio(&self, id: &str) -> Option<&[u8]> {
        self.index
            .get(id)
            .map(|slot| self.entries[*slot].audio.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.reset_input();
    }

    /// Forget queued input and open speech spans. Server speech offsets count
    /// from zero on every new connection, so the queue restarts with it.
    pub fn reset_input(&mut self) {
        self.input_audio.clear();
        self.input_base = 0;
        self.speech_starts.clear();
        self.pending_user_audio.clear();
    }

    /// Queue captured input so user turns can carry their own audio.
    pub fn queue_input_audio(&mut self, samples: &[i16]) {
        self.input_audio.extend_from_slice(samples);
        if self.speech_starts.is_empty() {
            let limit = self.ms_to_samples(MAX_UNCLAIMED_INPUT_MS) as usize;
            if self.input_audio.len() > limit {
                let excess = self.input_audio.len() - limit;
                self.input_audio.drain(..excess);
                self.input_base += excess as u64;
            }
        }
    }

    /// Attach the decoded artifact to a completed item. Only the first attach sticks.
    pub fn attach_artifact(&mut self, id: &str, artifact: DecodedAudio) -> Option<ConversationItem> {
        let slot = *self.index.get(id)?;
        let entry = &mut self.entries[slot];
        if !entry.item.is_completed() || entry.item.artifact.is_some() {
            return None;
        }
        entry.item.artifact = Some(Arc::new(artifact));
        Some(entry.snapshot())
    }

    /// Apply a server event. Returns the changed item, if any.
    pub fn apply(&mut self, event: &ServerEvent) -> Option<ConversationUpdate> {
        match &event.kind {
            ServerEventKind::ItemCreated { item } => Some(self.upsert(item)),
            ServerEventKind::ItemDone { item } => {
                let mut update = self.upsert(item);
                let slot = self.index[&item.id];
                self.entries[slot].item.status = ItemStatus::Completed;
                update.item = self.entries[slot].snapshot();
                Some(update)
            }
            ServerEventKind::AudioDelta { item_id, delta } => {
                let entry = self.open_entry(item_id)?;
                entry.audio.extend_from_slice(delta);
                Some(ConversationUpdate {
                    item: entry.snapshot(),
                    delta: Some(ItemDelta::Audio(delta.clone())),
                })
            }
            ServerEventKind::AudioTranscriptDelta { item_id, delta } => {
                let entry = self.open_entry(item_id)?;
                entry.item.transcript.push_str(delta);
                Some(ConversationUpdate {
                    item: entry.snapshot(),
                    delta: Some(ItemDelta::Transcript(delta.clone())),
                })
            }
            ServerEventKind::TextDelta { item_id, delta } => {
                let entry = self.open_entry(item_id)?;
                entry.item.text.push_str(delta);
                Some(ConversationUpdate {
                    item: entry.snapshot(),
                    delta: Some(ItemDelta::Text(delta.clone())),
                })
            }
            ServerEventKind::InputTranscriptionCompleted {
                item_id,
                transcript,
            } => {
                let slot = *self.index.get(item_id)?;
                let entry = &mut self.entries[slot];
                entry.item.transcript = transcript.clone();
                Some(ConversationUpdate {
                    item: entry.snapshot(),
                    delta: Some(ItemDelta::Transcript(transcript.clone())),
                })
            }
            ServerEventKind::SpeechStarted {
                item_id,
                audio_start_ms,
            } => {
                let start = self.ms_to_samples(*audio_start_ms);
                self.speech_starts.insert(item_id.clone(), start);
                None
            }
            ServerEventKind::SpeechStopped {
                item_id,
                audio_end_ms,
            } => {
                let end = self.ms_to_samples(*audio_end_ms);
                self.claim_user_audio(item_id, end);
                None
            }
            _ => None,
        }
    }

    fn ms_to_samples(&self, ms: u64) -> u64 {
        ms * self.sample_rate as u64 / 1000
    }

    fn upsert(&mut self, wire: &WireItem) -> ConversationUpdate {
        let slot = match self.index.get(&wire.id) {
            Some(slot) => *slot,
            None => {
                let mut entry = Entry {
                    item: ConversationItem::new(wire.id.clone(), wire.role),
                    audio: Vec::new(),
                };
                if let Some(audio) = self.pending_user_audio.remove(&wire.id) {
                    entry.audio = audio;
                }
                self.entries.push(entry);
                self.index.insert(wire.id.clone(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[slot];
        if let Some(text) = &wire.text {
            match entry.item.role {
                ItemRole::User if entry.item.text.is_empty() => entry.item.text = text.clone(),
                ItemRole::Assistant if entry.item.transcript.is_empty() => {
                    entry.item.transcript = text.clone()
                }
                _ => {}
            }
        }
        if wire.status == ItemStatus::Completed {
            entry.item.status = ItemStatus::Completed;
        }
        ConversationUpdate {
            item: entry.snapshot(),
            delta: None,
        }
    }

    /// Entry accepting streamed deltas. Unknown ids get a placeholder assistant item;
    /// completed items reject further deltas.
    fn open_entry(&mut self, id: &str) -> Option<&mut Entry> {
        let slot = match self.index.get(id) {
            Some(slot) => *slot,
            None => {
                self.entries.push(Entry {
                    item: ConversationItem::new(id.to_string(), ItemRole::Assistant),
                    audio: Vec::new(),
                });
                self.index.insert(id.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[slot];
        if entry.item.is_completed() {
            tracing::debug!(item_id = %id, "dropping delta for completed item");
            return None;
        }
        Some(entry)
    }

    fn claim_user_audio(&mut self, item_id: &str, end: u64) {
        let Some(start) = self.speech_starts.remove(item_id) else {
            return;
        };
        let from = start.saturating_sub(self.input_base) as usize;
        let to = (end.saturating_sub(self.input_base) as usize).min(self.input_audio.len());
        let audio = if from < to {
            pcm16_to_bytes(&self.input_audio[from..to])
        } else {
            Vec::new()
        };
        if self.speech_starts.is_empty() {
            self.input_audio.drain(..to);
            self.input_base += to as u64;
        }
        match self.index.get(item_id) {
            Some(slot) => self.entries[*slot].audio = audio,
            None => {
                self.pending_user_audio.insert(item_id.to_string(), audio);
            }
        }
    }
}

//! Realtime wire events (JSON over WebSocket).

use serde::Serialize;
use serde_json::Value;

use super::conversation::{ItemRole, ItemStatus};
use crate::audio::pcm::decode_base64;
use crate::config::TurnDetection;
use crate::error::{ParleyError, Result};

/// Session parameters sent with `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionParams {
    /// Serialized as `null` when turn detection is disabled.
    pub turn_detection: Option<TurnDetectionParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetectionParams {
    #[serde(rename = "type")]
    pub kind: TurnDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionParams {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    InputAudio { audio: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageParams {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: ItemRole,
    pub content: Vec<ContentPart>,
}

impl MessageParams {
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            kind: "message",
            role: ItemRole::User,
            content,
        }
    }
}

/// A client-to-server event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionParams },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: MessageParams },

    #[serde(rename = "response.create")]
    ResponseCreate,

    /// `audio` is base64 PCM16 and can be large; log `event_type()` instead.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

impl ClientEvent {
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate => "response.create",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
        }
    }

    /// Serialize to the wire payload, stamped with a fresh `event_id`.
    pub fn to_payload(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "event_id".into(),
                Value::String(format!("evt_{}", uuid::Uuid::new_v4().simple())),
            );
        }
        Ok(value)
    }
}

/// The wire view of a conversation item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireItem {
    pub id: String,
    pub role: ItemRole,
    pub status: ItemStatus,
    /// Concatenated text and transcript content, if any.
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEventKind {
    SessionCreated { session_id: String },
    SessionUpdated { turn_detection: TurnDetection },
    ItemCreated { item: WireItem },
    ItemDone { item: WireItem },
    AudioDelta { item_id: String, delta: Vec<u8> },
    AudioTranscriptDelta { item_id: String, delta: String },
    TextDelta { item_id: String, delta: String },
    InputTranscriptionCompleted { item_id: String, transcript: String },
    SpeechStarted { item_id: String, audio_start_ms: u64 },
    SpeechStopped { item_id: String, audio_end_ms: u64 },
    Error { message: String },
    Unknown,
}

/// A server-to-client event with its raw payload kept for the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub event_type: String,
    pub payload: Value,
    pub kind: ServerEventKind,
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self> {
        let payload = serde_json::from_str::<Value>(text)?;
        Self::from_payload(payload)
            .ok_or_else(|| ParleyError::Protocol("Realtime event is missing its type".into()))
    }

    /// Classify a payload. Returns `None` when it has no `type`.
    pub fn from_payload(payload: Value) -> Option<Self> {
        let event_type = payload.get("type")?.as_str()?.to_string();
        let kind = classify(&event_type, &payload);
        Some(Self {
            event_type,
            payload,
            kind,
        })
    }
}

fn classify(event_type: &str, payload: &Value) -> ServerEventKind {
    let parsed = match event_type {
        "session.created" => Some(ServerEventKind::SessionCreated {
            session_id: string_at(payload, &["session", "id"])
                .unwrap_or_else(|| "unknown".to_string()),
        }),
        "session.updated" => Some(ServerEventKind::SessionUpdated {
            turn_detection: string_at(payload, &["session", "turn_detection", "type"])
                .and_then(|value| value.parse().ok())
                .unwrap_or(TurnDetection::None),
        }),
        "conversation.item.created" => payload
            .get("item")
            .and_then(wire_item)
            .map(|item| ServerEventKind::ItemCreated { item }),
        "response.output_item.done" => payload
            .get("item")
            .and_then(wire_item)
            .map(|item| ServerEventKind::ItemDone { item }),
        "response.audio.delta" => {
            let item_id = string_field(payload, "item_id");
            let delta = string_field(payload, "delta");
            match (item_id, delta) {
                (Some(item_id), Some(delta)) => Some(match decode_base64(&delta) {
                    Ok(delta) => ServerEventKind::AudioDelta { item_id, delta },
                    Err(error) => ServerEventKind::Error {
                        message: error.to_string(),
                    },
                }),
                _ => None,
            }
        }
        "response.audio_transcript.delta" => {
            item_delta(payload).map(|(item_id, delta)| ServerEventKind::AudioTranscriptDelta {
                item_id,
                delta,
            })
        }
        "response.text.delta" => {
            item_delta(payload).map(|(item_id, delta)| ServerEventKind::TextDelta { item_id, delta })
        }
        "conversation.item.input_audio_transcription.completed" => {
            string_field(payload, "item_id").map(|item_id| {
                ServerEventKind::InputTranscriptionCompleted {
                    item_id,
                    transcript: string_field(payload, "transcript").unwrap_or_default(),
                }
            })
        }
        "input_audio_buffer.speech_started" => string_field(payload, "item_id").map(|item_id| {
            ServerEventKind::SpeechStarted {
                item_id,
                audio_start_ms: u64_field(payload, "audio_start_ms").unwrap_or(0),
            }
        }),
        "input_audio_buffer.speech_stopped" => string_field(payload, "item_id").map(|item_id| {
            ServerEventKind::SpeechStopped {
                item_id,
                audio_end_ms: u64_field(payload, "audio_end_ms").unwrap_or(0),
            }
        }),
        "error" => Some(ServerEventKind::Error {
            message: string_at(payload, &["error", "message"])
                .or_else(|| string_field(payload, "message"))
                .unwrap_or_else(|| "Realtime server error".to_string()),
        }),
        _ => Some(ServerEventKind::Unknown),
    };
    parsed.unwrap_or_else(|| {
        tracing::debug!(event_type, "realtime event missing expected fields");
        ServerEventKind::Unknown
    })
}

fn wire_item(item: &Value) -> Option<WireItem> {
    let id = string_field(item, "id")?;
    let role = match item.get("role").and_then(Value::as_str)? {
        "user" => ItemRole::User,
        "assistant" => ItemRole::Assistant,
        _ => return None,
    };
    let status = match item.get("status").and_then(Value::as_str) {
        Some("completed") | Some("incomplete") => ItemStatus::Completed,
        _ => ItemStatus::InProgress,
    };
    let text: String = item
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| {
                    part.get("text")
                        .or_else(|| part.get("transcript"))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default();
    Some(WireItem {
        id,
        role,
        status,
        text: (!text.is_empty()).then_some(text),
    })
}

fn item_delta(payload: &Value) -> Option<(String, String)> {
    Some((
        string_field(payload, "item_id")?,
        string_field(payload, "delta")?,
    ))
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn u64_field(value: &Value, field: &str) -> Option<u64> {
    value.get(field).and_then(Value::as_u64)
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str().map(ToString::to_string)
}

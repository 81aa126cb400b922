//! Session configuration (layered: code > env > defaults).

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{ParleyError, Result};

/// Sample rate shared by capture, playback, and the remote endpoint.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

const DEFAULT_BASE_URL: &str = "wss://api.openai.com/v1/realtime";
const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// How the remote endpoint decides when a user turn ends.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnDetection {
    /// Turns are committed manually.
    None,
    /// The server detects speech start/stop on the streamed input.
    #[default]
    ServerVad,
}

/// Configuration for a realtime voice session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server-side broker that holds the credential. Preferred over `api_key`.
    pub relay_url: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Only consulted when `relay_url` is unset; falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub sample_rate: u32,
    pub turn_detection: TurnDetection,
    pub transcription_model: Option<String>,
    /// Initial user message sent right after the session is configured.
    pub greeting: Option<String>,
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            turn_detection: TurnDetection::ServerVad,
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            greeting: Some("Hello!".to_string()),
            instructions: None,
            voice: None,
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// Where the transport connects and which credential it presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Broker URL; the broker authenticates upstream.
    Relay { url: String },
    /// Vendor endpoint with a bearer credential.
    Direct { url: String, api_key: String },
}

impl Endpoint {
    pub fn url(&self) -> &str {
        match self {
            Self::Relay { url } | Self::Direct { url, .. } => url,
        }
    }
}

impl SessionConfig {
    /// Load overrides from environment variables (and `.env`, if present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        if let Some(url) = non_empty_var("PARLEY_RELAY_URL") {
            config.relay_url = Some(url);
        }
        if let Some(url) = non_empty_var("PARLEY_REALTIME_URL") {
            config.base_url = url;
        }
        if let Some(model) = non_empty_var("PARLEY_MODEL") {
            config.model = model;
        }
        config
    }

    /// Reject configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ParleyError::Configuration(
                "Sample rate must be greater than zero".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ParleyError::Configuration("Model cannot be empty".into()));
        }
        if self.relay_url.as_deref().map(str::trim) == Some("") {
            return Err(ParleyError::Configuration(
                "Relay URL cannot be empty".into(),
            ));
        }
        if self.relay_url.is_none() && self.base_url.trim().is_empty() {
            return Err(ParleyError::Configuration(
                "Realtime base URL cannot be empty".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ParleyError::Configuration(
                "Heartbeat interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the endpoint. A relay never carries a credential.
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.validate()?;
        if let Some(relay) = &self.relay_url {
            return Ok(Endpoint::Relay {
                url: with_model_query(relay, &self.model),
            });
        }

        let api_key = self
            .api_key
            .clone()
            .or_else(|| env::var("OPENAI_API_KEY").ok())
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                ParleyError::Authentication(
                    "Missing OPENAI_API_KEY and no relay URL configured".into(),
                )
            })?;
        Ok(Endpoint::Direct {
            url: with_model_query(&self.base_url, &self.model),
            api_key,
        })
    }
}

fn with_model_query(base_url: &str, model: &str) -> String {
    let trimmed = base_url.trim();
    if trimmed.contains("model=") {
        return trimmed.to_string();
    }
    let separator = if trimmed.contains('?') { "&" } else { "?" };
    format!("{trimmed}{separator}model={model}")
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

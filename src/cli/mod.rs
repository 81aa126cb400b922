//! CLI entry point for Parley.

use clap::{Parser, Subcommand};

use crate::realtime::{EventSource, ItemDelta, ItemRole, RealtimeEventRecord};
use crate::session::{ConnectionState, SessionUpdate};

/// Parley realtime voice CLI
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Parley: realtime voice sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Talk to the realtime endpoint through the default microphone and speaker
    Console(ConsoleArgs),
}

/// Arguments for the `console` subcommand.
#[derive(Parser, Debug)]
pub struct ConsoleArgs {
    /// Server-side relay that holds the credential (overrides PARLEY_RELAY_URL)
    #[arg(long)]
    pub relay_url: Option<String>,

    /// Realtime model (overrides PARLEY_MODEL)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Skip the initial greeting message
    #[arg(long)]
    pub no_greeting: bool,

    /// Also print each repeat of a collapsed event run
    #[arg(short, long)]
    pub verbose: bool,
}

/// Render one subscriber update as a console line, if it is worth showing.
pub fn render_update(update: &SessionUpdate, verbose: bool) -> Option<String> {
    match update {
        SessionUpdate::State(state) => Some(match state {
            ConnectionState::Connecting => "… connecting".to_string(),
            ConnectionState::Connected => "● connected (server VAD)".to_string(),
            ConnectionState::Disconnected => "○ disconnected".to_string(),
        }),
        SessionUpdate::Event(record) if verbose || record.count == 1 => {
            Some(render_record(record))
        }
        SessionUpdate::Event(_) => None,
        SessionUpdate::Conversation(update) => match &update.delta {
            Some(ItemDelta::Transcript(_)) | Some(ItemDelta::Text(_)) => {
                let speaker = match update.item.role {
                    ItemRole::User => "user",
                    ItemRole::Assistant => "assistant",
                };
                let body = if update.item.transcript.is_empty() {
                    &update.item.text
                } else {
                    &update.item.transcript
                };
                Some(format!("{speaker}: {body}"))
            }
            _ => None,
        },
    }
}

fn render_record(record: &RealtimeEventRecord) -> String {
    let arrow = match record.source {
        EventSource::Client => "↑",
        EventSource::Server => "↓",
    };
    let time = record.timestamp.format("%H:%M:%S%.3f");
    if record.count > 1 {
        format!("{time} {arrow} {} (×{})", record.event_type, record.count)
    } else {
        format!("{time} {arrow} {}", record.event_type)
    }
}

//! Parley: realtime voice session manager
//!
//! Wires a microphone capture pipeline and a streamed playback pipeline to a
//! realtime conversation endpoint running server-side voice activity
//! detection, and keeps a collapsed event log plus the conversation items
//! for display.
//!
//! # Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "device")]
//! # async fn example() -> parley::error::Result<()> {
//! use parley::audio::{CpalMicrophone, CpalSpeaker};
//! use parley::config::SessionConfig;
//! use parley::realtime::WebSocketTransport;
//! use parley::session::SessionController;
//!
//! let config = SessionConfig::from_env();
//! let transport = WebSocketTransport::from_config(&config)?;
//! let mut session =
//!     SessionController::new(config, transport, CpalMicrophone::new(), CpalSpeaker::new())?;
//! session.connect().await?;
//! session.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod prelude;
pub mod realtime;
pub mod session;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

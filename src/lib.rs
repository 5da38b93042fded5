//! Parley - hands-free voice front-end for a remote assistant
//!
//! This library provides the pieces of the voice loop:
//! - Speech capture and output behind the [`voice::VoiceChannel`] seam
//! - The assistant client and command dispatch
//! - The persisted utterance history
//! - The interaction loop that keeps capture and playback apart
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   InteractionLoop                     │
//! │   Idle │ Capturing │ Processing │ Speaking │ Backoff  │
//! └───┬──────────────┬───────────────┬──────────────┬────┘
//!     │              │               │              │
//! ┌───▼────────┐ ┌───▼───────────┐ ┌─▼───────────┐ ┌▼──────────────┐
//! │VoiceChannel│ │AssistantClient│ │CommandRouter│ │ HistoryLedger │
//! │ mic │ TTS  │ │  HTTP server  │ │  launcher   │ │  SQLite (kv)  │
//! └────────────┘ └───────────────┘ └─────────────┘ └───────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod history;
pub mod interaction;
pub mod persona;
pub mod router;
pub mod voice;

pub use assistant::{Assistant, AssistantClient, CommandKind, CommandResult};
pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, KvStore};
pub use error::{Error, Result};
pub use history::{HistoryLedger, Utterance};
pub use interaction::{InteractionLoop, LoopHandle, LoopSettings, LoopState, LoopStatus};
pub use persona::{VoicePersona, classify_persona};
pub use router::{CommandRouter, Launcher, SystemLauncher};

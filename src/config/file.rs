//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Assistant backend configuration
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Interaction loop timing
    #[serde(default, rename = "loop")]
    pub interaction: LoopFileConfig,

    /// Utterance history
    #[serde(default)]
    pub history: HistoryFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Assistant backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// Base URL of the assistant server (e.g. `http://localhost:3000`)
    pub url: Option<String>,

    /// Display name of the assistant; fetched from the profile when absent
    pub name: Option<String>,

    /// Session token sent with every request
    pub session_token: Option<String>,

    /// Request deadline in seconds
    pub timeout_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// Enable speech capture
    pub capture: Option<bool>,

    /// Enable speech output
    pub synthesis: Option<bool>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// How long a playback waits for an empty voice catalog to fill
    pub voice_wait_ms: Option<u64>,

    /// Length of one capture session before the engine ends it
    pub session_limit_secs: Option<u64>,
}

/// Interaction loop timing
#[derive(Debug, Default, Deserialize)]
pub struct LoopFileConfig {
    /// Delay before restarting a failed capture session
    pub backoff_secs: Option<u64>,
}

/// Utterance history configuration
#[derive(Debug, Default, Deserialize)]
pub struct HistoryFileConfig {
    /// Maximum number of retained utterances (0 = unbounded)
    pub max_entries: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            ParleyConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config(content: &str) -> crate::Result<ParleyConfigFile> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}

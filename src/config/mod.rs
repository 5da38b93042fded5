//! Configuration management for Parley

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

/// Default assistant server
pub const DEFAULT_ASSISTANT_URL: &str = "http://localhost:3000";

/// Default assistant request deadline
pub const DEFAULT_ASSISTANT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before a failed capture session is restarted
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Default cap on retained utterances
pub const DEFAULT_HISTORY_MAX: usize = 1000;

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Assistant backend
    pub assistant: AssistantConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Interaction loop timing
    pub interaction: LoopConfig,

    /// History retention
    pub history: HistoryConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Path to data directory (database)
    pub data_dir: PathBuf,
}

/// Assistant backend configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Base URL of the assistant server
    pub url: String,

    /// Configured display name (overrides the profile)
    pub name: Option<String>,

    /// Session token (cookie / bearer)
    pub session_token: Option<SecretString>,

    /// Request deadline
    pub timeout: Duration,
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProviderKind {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl TtsProviderKind {
    /// Parse a provider name, defaulting to `OpenAI` for unknown values
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" | "11labs" => Self::ElevenLabs,
            "openai" => Self::OpenAi,
            other => {
                tracing::warn!(provider = other, "unknown TTS provider, using openai");
                Self::OpenAi
            }
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input and output
    pub enabled: bool,

    /// Enable speech capture
    pub capture: bool,

    /// Enable speech output
    pub synthesis: bool,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS provider
    pub tts_provider: TtsProviderKind,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Bounded wait for a late voice catalog before playing with the default voice
    pub voice_wait: Duration,

    /// Capture sessions end on their own after this long
    pub session_limit: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture: true,
            synthesis: true,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProviderKind::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_speed: 1.0,
            voice_wait: Duration::from_millis(1500),
            session_limit: Duration::from_secs(60),
        }
    }
}

/// Interaction loop timing
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Delay before restarting a failed or ended capture session
    pub backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// History retention
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum retained utterances; `None` keeps everything
    pub max_entries: Option<usize>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(DEFAULT_HISTORY_MAX),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

/// Default data directory: `~/.local/share/parley` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("parley"))
}

fn normalize_url(url: &str) -> Result<String> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!("assistant url must be http(s): {url}")));
    }
    Ok(url.trim_end_matches('/').to_string())
}

impl Config {
    /// Load configuration from env and the optional config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        // env > toml > default
        let fc = file::load_config_file();
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let url = env("PARLEY_ASSISTANT_URL")
            .or(fc.assistant.url)
            .unwrap_or_else(|| DEFAULT_ASSISTANT_URL.to_string());

        let assistant = AssistantConfig {
            url: normalize_url(&url)?,
            name: env("PARLEY_ASSISTANT_NAME").or(fc.assistant.name),
            session_token: env("PARLEY_SESSION_TOKEN")
                .or(fc.assistant.session_token)
                .map(SecretString::from),
            timeout: env("PARLEY_ASSISTANT_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.assistant.timeout_secs)
                .map_or(DEFAULT_ASSISTANT_TIMEOUT, Duration::from_secs),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
        };

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            enabled: !disable_voice && fc.voice.enabled.unwrap_or(true),
            capture: fc.voice.capture.unwrap_or(true),
            synthesis: fc.voice.synthesis.unwrap_or(true),
            stt_model: env("PARLEY_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_provider: fc
                .voice
                .tts_provider
                .as_deref()
                .map(TtsProviderKind::from_name)
                .unwrap_or_default(),
            tts_model: env("PARLEY_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_speed: fc.voice.tts_speed.unwrap_or(defaults.tts_speed).clamp(0.25, 4.0),
            voice_wait: fc
                .voice
                .voice_wait_ms
                .map_or(defaults.voice_wait, Duration::from_millis),
            session_limit: fc
                .voice
                .session_limit_secs
                .map_or(defaults.session_limit, Duration::from_secs),
        };

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        let interaction = LoopConfig {
            backoff: env("PARLEY_BACKOFF_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.interaction.backoff_secs)
                .map_or(DEFAULT_BACKOFF, Duration::from_secs),
        };

        let max_entries = env("PARLEY_HISTORY_MAX")
            .and_then(|s| s.parse().ok())
            .or(fc.history.max_entries)
            .unwrap_or(DEFAULT_HISTORY_MAX);
        let history = HistoryConfig {
            max_entries: (max_entries > 0).then_some(max_entries),
        };

        let data_dir = env("PARLEY_DATA_DIR").map_or_else(default_data_dir, PathBuf::from);
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            tracing::warn!(
                path = %data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(Self {
            assistant,
            voice,
            interaction,
            history,
            api_keys,
            data_dir,
        })
    }

    /// Point the assistant client at another server
    ///
    /// # Errors
    ///
    /// Returns error if `url` is not http(s)
    pub fn set_assistant_url(&mut self, url: &str) -> Result<()> {
        self.assistant.url = normalize_url(url)?;
        Ok(())
    }

    /// Path of the history database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tts_provider_names() {
        assert_eq!(TtsProviderKind::from_name("ElevenLabs"), TtsProviderKind::ElevenLabs);
        assert_eq!(TtsProviderKind::from_name("openai"), TtsProviderKind::OpenAi);
        assert_eq!(TtsProviderKind::from_name("bogus"), TtsProviderKind::OpenAi);
    }

    #[test]
    fn defaults_match_reference_timing() {
        assert_eq!(LoopConfig::default().backoff, Duration::from_secs(10));
        assert_eq!(DEFAULT_ASSISTANT_TIMEOUT, Duration::from_secs(30));
        assert_eq!(HistoryConfig::default().max_entries, Some(1000));
    }

    #[test]
    fn assistant_url_is_normalized() {
        assert_eq!(
            normalize_url(" https://assistant.example.com/ ").unwrap(),
            "https://assistant.example.com"
        );
        assert!(normalize_url("ftp://example.com").is_err());
    }

    #[test]
    fn secrets_are_not_printed() {
        let keys = ApiKeys {
            openai: Some(SecretString::from("sk-very-secret".to_string())),
            elevenlabs: None,
        };
        let debug = format!("{keys:?}");
        assert!(!debug.contains("sk-very-secret"));
    }
}

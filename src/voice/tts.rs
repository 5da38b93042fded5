//! Text-to-speech (TTS) processing

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

use super::{Language, VoiceHandle, VoiceInfo};
use crate::config::{Config, TtsProviderKind};
use crate::{Error, Result};

/// `OpenAI` voice used when the selector falls back to the default
const OPENAI_DEFAULT_VOICE: &str = "alloy";

/// `OpenAI` TTS voices (all of them speak both supported languages)
const OPENAI_VOICES: &[&str] = &[
    "alloy", "ash", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer",
];

/// `ElevenLabs` voice used when the selector falls back to the default ("Rachel")
const ELEVENLABS_DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// `ElevenLabs` model that speaks both supported languages
const ELEVENLABS_DEFAULT_MODEL: &str = "eleven_multilingual_v2";

#[derive(serde::Deserialize)]
struct ElevenLabsVoices {
    voices: Vec<ElevenLabsVoice>,
}

#[derive(serde::Deserialize)]
struct ElevenLabsVoice {
    voice_id: String,
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

/// Synthesizes speech from text (MP3 output)
#[derive(Clone)]
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    speed: f32,
    model: String,
    provider: TtsProviderKind,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: SecretString, model: String, speed: f32) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            speed,
            model,
            provider: TtsProviderKind::OpenAi,
        })
    }

    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// `OpenAI` model names are replaced by the multilingual `ElevenLabs` model.
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        let model = if model.starts_with("eleven_") {
            model
        } else {
            ELEVENLABS_DEFAULT_MODEL.to_string()
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            // ElevenLabs doesn't use speed in the same way
            speed: 1.0,
            model,
            provider: TtsProviderKind::ElevenLabs,
        })
    }

    /// Build the provider selected in config
    ///
    /// Returns `None` when that provider's API key isn't set.
    ///
    /// # Errors
    ///
    /// Returns error if the configured key is empty
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let voice = &config.voice;
        match voice.tts_provider {
            TtsProviderKind::OpenAi => config
                .api_keys
                .openai
                .clone()
                .map(|key| Self::new_openai(key, voice.tts_model.clone(), voice.tts_speed))
                .transpose(),
            TtsProviderKind::ElevenLabs => config
                .api_keys
                .elevenlabs
                .clone()
                .map(|key| Self::new_elevenlabs(key, voice.tts_model.clone()))
                .transpose(),
        }
    }

    #[must_use]
    pub const fn provider(&self) -> TtsProviderKind {
        self.provider
    }

    /// Voices available without a network round-trip
    ///
    /// Empty for providers whose catalog must be fetched.
    #[must_use]
    pub fn builtin_voices(&self) -> Vec<VoiceInfo> {
        match self.provider {
            TtsProviderKind::OpenAi => openai_catalog(),
            TtsProviderKind::ElevenLabs => Vec::new(),
        }
    }

    /// Fetch the provider's full voice catalog
    ///
    /// # Errors
    ///
    /// Returns error if the catalog request fails
    pub async fn fetch_voices(&self) -> Result<Vec<VoiceInfo>> {
        match self.provider {
            TtsProviderKind::OpenAi => Ok(openai_catalog()),
            TtsProviderKind::ElevenLabs => self.fetch_elevenlabs_voices().await,
        }
    }

    /// Synthesize text to speech
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, voice: &VoiceHandle, lang: &str) -> Result<Vec<u8>> {
        tracing::debug!(voice = %voice, lang, chars = text.len(), "synthesizing");
        match self.provider {
            TtsProviderKind::OpenAi => self.synthesize_openai(text, voice).await,
            TtsProviderKind::ElevenLabs => self.synthesize_elevenlabs(text, voice, lang).await,
        }
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str, voice: &VoiceHandle) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let voice = match voice {
            VoiceHandle::Voice(v) => v.id.as_str(),
            VoiceHandle::Default => OPENAI_DEFAULT_VOICE,
        };

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using `ElevenLabs` TTS
    async fn synthesize_elevenlabs(
        &self,
        text: &str,
        voice: &VoiceHandle,
        lang: &str,
    ) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            language_code: &'a str,
        }

        let voice_id = match voice {
            VoiceHandle::Voice(v) => v.id.as_str(),
            VoiceHandle::Default => ELEVENLABS_DEFAULT_VOICE,
        };
        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice_id}");

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            language_code: lang.split(['-', '_']).next().unwrap_or("en"),
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    async fn fetch_elevenlabs_voices(&self) -> Result<Vec<VoiceInfo>> {
        let response = self
            .client
            .get("https://api.elevenlabs.io/v1/voices")
            .header("xi-api-key", self.api_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs voices error {status}: {body}")));
        }

        let voices: ElevenLabsVoices = response.json().await?;
        Ok(voices.voices.into_iter().map(elevenlabs_voice_info).collect())
    }
}

fn openai_catalog() -> Vec<VoiceInfo> {
    [Language::Primary, Language::Secondary]
        .into_iter()
        .flat_map(|language| {
            OPENAI_VOICES.iter().map(move |id| VoiceInfo {
                id: (*id).to_string(),
                name: capitalize(id),
                lang: language.locale().to_string(),
            })
        })
        .collect()
}

/// Map an `ElevenLabs` voice onto a catalog entry
///
/// The gender label is folded into the name so persona matching sees it.
fn elevenlabs_voice_info(voice: ElevenLabsVoice) -> VoiceInfo {
    let name = voice.labels.get("gender").map_or_else(
        || voice.name.clone(),
        |gender| format!("{} ({gender})", voice.name),
    );

    let lang = match voice.labels.get("language").map(|l| l.to_lowercase()) {
        Some(l) if l == "hi" || l == "hindi" || l.starts_with("hi-") => {
            Language::Secondary.locale()
        }
        _ => Language::Primary.locale(),
    };

    VoiceInfo {
        id: voice.voice_id,
        name,
        lang: lang.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from("test-key".to_string())
    }

    #[test]
    fn openai_catalog_covers_both_languages() {
        let tts = TextToSpeech::new_openai(key(), "tts-1".into(), 1.0).unwrap();
        let voices = tts.builtin_voices();
        assert_eq!(voices.len(), OPENAI_VOICES.len() * 2);
        assert!(voices.iter().any(|v| v.name == "Nova" && v.lang == "hi-IN"));
    }

    #[test]
    fn elevenlabs_catalog_starts_empty() {
        let tts = TextToSpeech::new_elevenlabs(key(), "tts-1".into()).unwrap();
        assert!(tts.builtin_voices().is_empty());
        assert_eq!(tts.model, ELEVENLABS_DEFAULT_MODEL);
    }

    #[test]
    fn empty_key_is_rejected() {
        let empty = SecretString::from(String::new());
        assert!(TextToSpeech::new_openai(empty, "tts-1".into(), 1.0).is_err());
    }

    #[test]
    fn elevenlabs_labels_become_catalog_fields() {
        let raw = r#"{"voices":[
            {"voice_id":"a1","name":"Aditi","labels":{"gender":"female","language":"hi"}},
            {"voice_id":"b2","name":"Adam","labels":{"gender":"male"}},
            {"voice_id":"c3","name":"Plain"}
        ]}"#;
        let parsed: ElevenLabsVoices = serde_json::from_str(raw).unwrap();
        let voices: Vec<_> = parsed.voices.into_iter().map(elevenlabs_voice_info).collect();

        assert_eq!(voices[0].name, "Aditi (female)");
        assert_eq!(voices[0].lang, "hi-IN");
        assert_eq!(voices[1].lang, "en-US");
        assert_eq!(voices[2].name, "Plain");
    }
}

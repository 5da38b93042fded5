//! Speech-to-text for finalized utterances

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use super::pcm::samples_to_wav;
use crate::{Error, Result};

/// `OpenAI` transcription endpoint
const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

#[derive(serde::Deserialize)]
struct Transcription {
    text: String,
}

/// Transcribes utterances with `OpenAI` Whisper
#[derive(Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl SpeechToText {
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    /// Transcribe one utterance of mono samples at `sample_rate`
    ///
    /// Returns an empty string when Whisper heard nothing worth reporting.
    ///
    /// # Errors
    ///
    /// Returns error if encoding, the request, or the response fails
    pub async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let wav = samples_to_wav(samples, sample_rate)?;
        tracing::debug!(
            samples = samples.len(),
            wav_bytes = wav.len(),
            "sending utterance to Whisper"
        );

        let response = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(self.form(wav)?)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Whisper request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "Whisper API error");
            return Err(Error::Stt(describe_failure(status, &body)));
        }

        let Transcription { text } = response.json().await?;
        let text = clean_transcript(&text);
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }

    fn form(&self, wav: Vec<u8>) -> Result<Form> {
        let file = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;

        Ok(Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json"))
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    match status {
        StatusCode::UNAUTHORIZED => "OpenAI rejected the API key".to_string(),
        StatusCode::TOO_MANY_REQUESTS => "Whisper rate limit reached".to_string(),
        _ => format!("Whisper API error {status}: {body}"),
    }
}

/// Trim Whisper output; text without letters or digits counts as silence
fn clean_transcript(text: &str) -> String {
    let text = text.trim();
    if text.chars().any(char::is_alphanumeric) {
        text.to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(SpeechToText::new(SecretString::from(""), "whisper-1".into()).is_err());
        assert!(SpeechToText::new(SecretString::from("sk-test"), "whisper-1".into()).is_ok());
    }

    #[test]
    fn punctuation_only_is_silence() {
        assert_eq!(clean_transcript("  open github \n"), "open github");
        assert_eq!(clean_transcript(" ... "), "");
        assert_eq!(clean_transcript("समय क्या है?"), "समय क्या है?");
    }

    #[test]
    fn failure_messages() {
        assert_eq!(
            describe_failure(StatusCode::UNAUTHORIZED, "{}"),
            "OpenAI rejected the API key"
        );
        assert!(describe_failure(StatusCode::BAD_REQUEST, "bad file").contains("bad file"));
    }
}

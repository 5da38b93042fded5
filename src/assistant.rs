//! Remote assistant client
//!
//! The assistant interprets a transcript and answers with a command type,
//! the part of the utterance the command applies to, and a reply to speak.
//! Every failure on this path degrades to an apology the user can hear;
//! see [`ask_or_fallback`].

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AssistantConfig;
use crate::{Error, Result};

/// Spoken when the assistant can't be reached or doesn't answer in time
pub const TRANSPORT_APOLOGY: &str =
    "I'm sorry, but I encountered an error processing your request. Please try again.";

/// Spoken when the assistant answers with an error or an empty reply
pub const PROCESSING_APOLOGY: &str =
    "I'm sorry, but I'm having trouble processing your request right now. Please try again.";

/// Which search engine a search command goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEngine {
    Web,
    Video,
}

/// External resources the assistant can ask to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Calculator,
    Weather,
    Instagram,
    Facebook,
    WhatsApp,
    Maps,
    Gmail,
    Translate,
    GitHub,
    LinkedIn,
}

impl Resource {
    pub const ALL: [Self; 10] = [
        Self::Calculator,
        Self::Weather,
        Self::Instagram,
        Self::Facebook,
        Self::WhatsApp,
        Self::Maps,
        Self::Gmail,
        Self::Translate,
        Self::GitHub,
        Self::LinkedIn,
    ];

    /// App name as it appears in command types
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
            Self::Weather => "weather",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::WhatsApp => "whatsapp",
            Self::Maps => "maps",
            Self::Gmail => "gmail",
            Self::Translate => "translate",
            Self::GitHub => "github",
            Self::LinkedIn => "linkedin",
        }
    }

    /// Resolve `<app>-open`, `open-<app>` and `weather-show`
    fn from_command_type(kind: &str) -> Option<Self> {
        let app = kind
            .strip_suffix("-open")
            .or_else(|| kind.strip_prefix("open-"))
            .or_else(|| kind.strip_suffix("-show"))?;
        Self::ALL.into_iter().find(|r| r.name() == app)
    }
}

/// What the assistant asked us to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Search { engine: SearchEngine, query: String },
    OpenResource(Resource),
    /// Informational reply, nothing to dispatch
    None,
    /// The request failed; speak the reply, never act on it
    Error,
}

/// Interpreted assistant reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub kind: CommandKind,
    pub response_text: Option<String>,
}

impl CommandResult {
    /// Result standing in for a failed request
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            kind: CommandKind::Error,
            response_text: Some(TRANSPORT_APOLOGY.to_string()),
        }
    }

    /// Interpret a raw reply
    #[must_use]
    pub fn from_reply(reply: AssistantReply) -> Self {
        let kind = classify(reply.kind.as_deref(), reply.user_input.as_deref());
        let response_text = reply
            .response
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        // an error must always be audible
        let response_text = match (&kind, response_text) {
            (CommandKind::Error, None) => Some(PROCESSING_APOLOGY.to_string()),
            (_, text) => text,
        };

        Self {
            kind,
            response_text,
        }
    }

    /// Text to speak and display, if any
    #[must_use]
    pub fn response(&self) -> Option<&str> {
        self.response_text.as_deref()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == CommandKind::Error
    }
}

fn classify(kind: Option<&str>, user_input: Option<&str>) -> CommandKind {
    let kind = kind.map(|k| k.trim().to_lowercase()).unwrap_or_default();
    let query = || user_input.unwrap_or_default().trim().to_string();

    match kind.as_str() {
        "" | "error" => CommandKind::Error,
        "google-search" | "search-web" => CommandKind::Search {
            engine: SearchEngine::Web,
            query: query(),
        },
        "youtube-search" | "youtube-play" | "search-video" => CommandKind::Search {
            engine: SearchEngine::Video,
            query: query(),
        },
        other => Resource::from_command_type(other)
            .map_or(CommandKind::None, CommandKind::OpenResource),
    }
}

/// Request body of the query endpoint
#[derive(Debug, Serialize)]
struct AskRequest<'a> {
    command: &'a str,
}

/// Raw reply of the query endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

/// Profile of the signed-in user
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub assistant_name: Option<String>,
}

/// Something that interprets transcripts
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Interpret one transcript
    ///
    /// # Errors
    ///
    /// Returns error on timeout, transport failure or a malformed reply
    async fn ask(&self, transcript: &str) -> Result<CommandResult>;
}

/// Ask with a deadline, turning every failure into the spoken fallback
pub async fn ask_or_fallback(
    assistant: &dyn Assistant,
    transcript: &str,
    deadline: Duration,
) -> CommandResult {
    let outcome = match tokio::time::timeout(deadline, assistant.ask(transcript)).await {
        Ok(result) => result,
        Err(_) => Err(Error::AssistantTimeout(deadline.as_secs())),
    };

    match outcome {
        Ok(result) => result,
        Err(e) if e.is_assistant_failure() => {
            tracing::warn!(error = %e, "assistant request failed, using fallback");
            CommandResult::fallback()
        }
        Err(e) => {
            tracing::error!(error = %e, "unexpected assistant error, using fallback");
            CommandResult::fallback()
        }
    }
}

/// HTTP client for the assistant server
#[derive(Clone)]
pub struct AssistantClient {
    base_url: String,
    client: reqwest::Client,
    session_token: Option<SecretString>,
    timeout: Duration,
}

impl AssistantClient {
    /// Create a client from config
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client can't be built
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            session_token: config.session_token.clone(),
            timeout: config.timeout,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_token {
            Some(token) => builder
                .header(
                    reqwest::header::COOKIE,
                    format!("token={}", token.expose_secret()),
                )
                .bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::AssistantTimeout(self.timeout.as_secs())
        } else {
            Error::AssistantTransport(e.to_string())
        }
    }

    /// Fetch the signed-in user's profile
    ///
    /// Success doubles as the "session active" signal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` when not signed in, transport errors otherwise
    pub async fn current_profile(&self) -> Result<UserProfile> {
        let url = format!("{}/api/user/current", self.base_url);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Session(format!("not signed in ({status})")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Assistant(format!("profile request failed {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Assistant(format!("invalid profile: {e}")))
    }
}

#[async_trait]
impl Assistant for AssistantClient {
    async fn ask(&self, transcript: &str) -> Result<CommandResult> {
        let url = format!("{}/api/user/asktoassistant", self.base_url);
        tracing::debug!(chars = transcript.len(), "asking assistant");

        let response = self
            .request(self.client.post(&url))
            .json(&AskRequest {
                command: transcript,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Assistant(format!("{status}: {body}")));
        }

        let reply: AssistantReply = response
            .json()
            .await
            .map_err(|e| Error::Assistant(format!("invalid reply: {e}")))?;

        let result = CommandResult::from_reply(reply);
        tracing::debug!(kind = ?result.kind, "assistant replied");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(json: &str) -> CommandResult {
        CommandResult::from_reply(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn search_commands() {
        let r = reply(
            r#"{"type":"google-search","userInput":" images of cats ","response":"Searching..."}"#,
        );
        assert_eq!(
            r.kind,
            CommandKind::Search {
                engine: SearchEngine::Web,
                query: "images of cats".into()
            }
        );
        assert_eq!(r.response(), Some("Searching..."));

        let r = reply(r#"{"type":"search-video","userInput":"lofi"}"#);
        assert!(matches!(
            r.kind,
            CommandKind::Search {
                engine: SearchEngine::Video,
                ..
            }
        ));
        assert_eq!(r.response(), None);
    }

    #[test]
    fn resource_spellings() {
        assert_eq!(
            reply(r#"{"type":"instagram-open"}"#).kind,
            CommandKind::OpenResource(Resource::Instagram)
        );
        assert_eq!(
            reply(r#"{"type":"open-github"}"#).kind,
            CommandKind::OpenResource(Resource::GitHub)
        );
        assert_eq!(
            reply(r#"{"type":"weather-show"}"#).kind,
            CommandKind::OpenResource(Resource::Weather)
        );
        assert_eq!(reply(r#"{"type":"open-spaceship"}"#).kind, CommandKind::None);
    }

    #[test]
    fn informational_types_dispatch_nothing() {
        let r = reply(r#"{"type":"get-time","response":"It is noon"}"#);
        assert_eq!(r.kind, CommandKind::None);
        assert_eq!(r.response(), Some("It is noon"));
    }

    #[test]
    fn errors_are_always_audible() {
        let r = reply(r#"{"type":"error"}"#);
        assert!(r.is_error());
        assert_eq!(r.response(), Some(PROCESSING_APOLOGY));

        let r = reply("{}");
        assert!(r.is_error());
        assert_eq!(r.response(), Some(PROCESSING_APOLOGY));

        let r = reply(r#"{"type":"error","response":"Server busy"}"#);
        assert_eq!(r.response(), Some("Server busy"));
    }

    #[test]
    fn fallback_is_transport_apology() {
        let r = CommandResult::fallback();
        assert!(r.is_error());
        assert_eq!(r.response(), Some(TRANSPORT_APOLOGY));
    }

    struct Failing;

    #[async_trait]
    impl Assistant for Failing {
        async fn ask(&self, _: &str) -> Result<CommandResult> {
            Err(Error::AssistantTransport("connection refused".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl Assistant for Hanging {
        async fn ask(&self, _: &str) -> Result<CommandResult> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn transport_failure_falls_back() {
        let r = ask_or_fallback(&Failing, "hello", Duration::from_secs(30)).await;
        assert_eq!(r, CommandResult::fallback());
    }

    struct SignedOut;

    #[async_trait]
    impl Assistant for SignedOut {
        async fn ask(&self, _: &str) -> Result<CommandResult> {
            Err(Error::Session("session expired".into()))
        }
    }

    #[tokio::test]
    async fn other_errors_fall_back_too() {
        assert!(Error::AssistantTimeout(30).is_assistant_failure());
        assert!(!Error::Session(String::new()).is_assistant_failure());
        let r = ask_or_fallback(&SignedOut, "hello", Duration::from_secs(30)).await;
        assert_eq!(r, CommandResult::fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_falls_back() {
        let r = ask_or_fallback(&Hanging, "hello", Duration::from_secs(30)).await;
        assert_eq!(r, CommandResult::fallback());
    }

    #[test]
    fn client_trims_base_url() {
        let config = AssistantConfig {
            url: "http://localhost:3000/".into(),
            name: None,
            session_token: None,
            timeout: Duration::from_secs(5),
        };
        let client = AssistantClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
    }
}

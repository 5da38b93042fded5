//! Daemon - the voice front-end service
//!
//! Wires config, history, assistant, voice channel and command router into
//! an [`InteractionLoop`], acquires the session, and runs until interrupted.

use std::sync::Arc;

use crate::assistant::AssistantClient;
use crate::db::{self, DbPool, KvStore};
use crate::history::HistoryLedger;
use crate::interaction::{InteractionLoop, LoopSettings, LoopState, LoopStatus};
use crate::router::CommandRouter;
use crate::voice::LocalVoiceChannel;
use crate::{Config, Error, Result};

/// Display name used when neither config nor profile provides one
const FALLBACK_ASSISTANT_NAME: &str = "Assistant";

/// The Parley daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config.database_path();
        let db = db::init(&db_path)?;

        tracing::info!(path = %db_path.display(), "database initialized");

        Ok(Self { config, db })
    }

    /// Open the persisted utterance history
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot be read
    pub fn ledger(&self) -> Result<HistoryLedger> {
        HistoryLedger::load(KvStore::new(self.db.clone()), self.config.history.max_entries)
    }

    /// Resolve the assistant's display name, which also proves the session is active
    ///
    /// A configured name skips the profile request.
    async fn acquire_session(&self, client: &AssistantClient) -> Result<String> {
        if let Some(name) = &self.config.assistant.name {
            return Ok(name.clone());
        }

        let profile = client.current_profile().await?;
        let name = profile
            .assistant_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_ASSISTANT_NAME.to_string());
        tracing::info!(user = ?profile.name, assistant = %name, "session acquired");
        Ok(name)
    }

    /// Run the interaction loop until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the session can't be acquired or voice can't be initialized
    pub async fn run(self) -> Result<()> {
        let client = AssistantClient::new(&self.config.assistant)?;
        let assistant_name = self.acquire_session(&client).await.map_err(|e| match e {
            Error::Session(msg) => {
                Error::Session(format!("{msg}; sign in or set PARLEY_SESSION_TOKEN"))
            }
            other => other,
        })?;

        let voice = LocalVoiceChannel::new(&self.config)?;
        let interaction = InteractionLoop::new(
            Box::new(voice),
            Arc::new(client),
            CommandRouter::system(),
            self.ledger()?,
            LoopSettings::from_config(&self.config),
        );
        let (handle, task) = interaction.spawn();
        handle.start(assistant_name.as_str());

        let mut status = handle.subscribe();
        let mut last = status.borrow_and_update().clone();

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    }
                    tracing::info!("shutdown requested");
                    break;
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    report(&last, &current);
                    last = current;
                }
            }
        }

        handle.shutdown();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "interaction loop task failed");
        }
        Ok(())
    }
}

/// Print what the on-screen status line would show
fn report(previous: &LoopStatus, current: &LoopStatus) {
    if current.last_response != previous.last_response
        && let Some(response) = &current.last_response
    {
        println!("{response}");
    }

    let state_changed =
        std::mem::discriminant(&current.state) != std::mem::discriminant(&previous.state);
    if state_changed
        && matches!(current.state, LoopState::Capturing | LoopState::Backoff { .. })
        && let Some(label) = current.label()
    {
        println!("{label}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{ApiKeys, AssistantConfig, HistoryConfig, LoopConfig, VoiceConfig};

    fn daemon(dir: &std::path::Path, name: Option<&str>) -> (Daemon, AssistantClient) {
        let config = Config {
            assistant: AssistantConfig {
                // nothing listens on the discard port
                url: "http://127.0.0.1:9".into(),
                name: name.map(str::to_string),
                session_token: None,
                timeout: Duration::from_secs(2),
            },
            voice: VoiceConfig::default(),
            interaction: LoopConfig::default(),
            history: HistoryConfig::default(),
            api_keys: ApiKeys::default(),
            data_dir: dir.to_path_buf(),
        };
        let client = AssistantClient::new(&config.assistant).unwrap();
        (Daemon::new(config).unwrap(), client)
    }

    #[tokio::test]
    async fn configured_name_skips_profile() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, client) = daemon(dir.path(), Some("Shifra"));
        assert_eq!(daemon.acquire_session(&client).await.unwrap(), "Shifra");
    }

    #[tokio::test]
    async fn failed_profile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, client) = daemon(dir.path(), None);
        assert!(daemon.acquire_session(&client).await.is_err());
    }
}

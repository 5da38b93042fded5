//! Command dispatch
//!
//! Maps an interpreted assistant reply onto an external resource to open.
//! The table is static; anything it doesn't cover is a no-op, and errors are
//! never acted upon.

use std::sync::Arc;

use crate::assistant::{CommandKind, CommandResult, Resource, SearchEngine};
use crate::{Error, Result};

/// Opens external resources (fire-and-forget)
pub trait Launcher: Send + Sync {
    /// Open `url`; returns once the open has been handed off
    ///
    /// # Errors
    ///
    /// Returns error if the open could not be started
    fn open(&self, url: &str) -> Result<()>;
}

#[cfg(target_os = "macos")]
const OPENERS: &[&str] = &["open"];
#[cfg(target_os = "windows")]
const OPENERS: &[&str] = &["explorer"];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const OPENERS: &[&str] = &["xdg-open", "gio", "sensible-browser"];

/// Launcher using the desktop's URL opener
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn open(&self, url: &str) -> Result<()> {
        let opener = OPENERS
            .iter()
            .find_map(|bin| which::which(bin).ok())
            .ok_or_else(|| Error::Launch("no URL opener found on PATH".to_string()))?;

        let mut command = std::process::Command::new(&opener);
        if opener.file_stem().is_some_and(|s| s == "gio") {
            command.arg("open");
        }

        command
            .arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::Launch(format!("failed to run {}: {e}", opener.display())))?;

        Ok(())
    }
}

/// URL for a search, `None` for an empty query
fn search_url(engine: SearchEngine, query: &str) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    let encoded = urlencoding::encode(query);
    Some(match engine {
        SearchEngine::Web => format!("https://www.google.com/search?q={encoded}"),
        SearchEngine::Video => format!("https://www.youtube.com/results?search_query={encoded}"),
    })
}

const fn resource_url(resource: Resource) -> &'static str {
    match resource {
        Resource::Calculator => "https://www.google.com/search?q=calculator",
        Resource::Weather => "https://www.google.com/search?q=weather",
        Resource::Instagram => "https://www.instagram.com/",
        Resource::Facebook => "https://www.facebook.com/",
        Resource::WhatsApp => "https://web.whatsapp.com/",
        Resource::Maps => "https://www.google.com/maps",
        Resource::Gmail => "https://mail.google.com/",
        Resource::Translate => "https://translate.google.com/",
        Resource::GitHub => "https://github.com/",
        Resource::LinkedIn => "https://www.linkedin.com/",
    }
}

/// Resolve the URL a result would open, if any
#[must_use]
pub fn target_url(result: &CommandResult) -> Option<String> {
    match &result.kind {
        CommandKind::Search { engine, query } => search_url(*engine, query),
        CommandKind::OpenResource(resource) => Some(resource_url(*resource).to_string()),
        CommandKind::None | CommandKind::Error => None,
    }
}

/// Dispatches command results to a [`Launcher`]
#[derive(Clone)]
pub struct CommandRouter {
    launcher: Arc<dyn Launcher>,
}

impl CommandRouter {
    #[must_use]
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self { launcher }
    }

    /// Router opening resources with the desktop opener
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(SystemLauncher))
    }

    /// Perform the side effect for `result`
    ///
    /// Launch failures are logged, never returned.
    pub fn dispatch(&self, result: &CommandResult) {
        if result.is_error() {
            return;
        }
        let Some(url) = target_url(result) else {
            tracing::debug!(kind = ?result.kind, "nothing to dispatch");
            return;
        };

        tracing::info!(url = %url, "opening");
        if let Err(e) = self.launcher.open(&url) {
            tracing::warn!(error = %e, url = %url, "failed to open resource");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl Launcher for Recording {
        fn open(&self, url: &str) -> Result<()> {
            self.0.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn result(kind: CommandKind) -> CommandResult {
        CommandResult {
            kind,
            response_text: Some("ok".into()),
        }
    }

    fn dispatched(kind: CommandKind) -> Vec<String> {
        let launcher = Arc::new(Recording::default());
        let router = CommandRouter::new(launcher.clone());
        router.dispatch(&result(kind));
        launcher.0.lock().unwrap().clone()
    }

    #[test]
    fn search_is_percent_encoded() {
        let opened = dispatched(CommandKind::Search {
            engine: SearchEngine::Web,
            query: "images of cats & dogs".into(),
        });
        assert_eq!(
            opened,
            vec!["https://www.google.com/search?q=images%20of%20cats%20%26%20dogs"]
        );
    }

    #[test]
    fn video_search() {
        let opened = dispatched(CommandKind::Search {
            engine: SearchEngine::Video,
            query: "lofi".into(),
        });
        assert_eq!(opened, vec!["https://www.youtube.com/results?search_query=lofi"]);
    }

    #[test]
    fn empty_query_is_noop() {
        assert!(
            dispatched(CommandKind::Search {
                engine: SearchEngine::Web,
                query: "  ".into(),
            })
            .is_empty()
        );
    }

    #[test]
    fn every_resource_has_a_url() {
        for resource in Resource::ALL {
            let opened = dispatched(CommandKind::OpenResource(resource));
            assert_eq!(opened.len(), 1);
            assert!(opened[0].starts_with("https://"));
        }
    }

    #[test]
    fn error_and_none_are_skipped() {
        assert!(dispatched(CommandKind::Error).is_empty());
        assert!(dispatched(CommandKind::None).is_empty());
    }

    struct Broken;

    impl Launcher for Broken {
        fn open(&self, _: &str) -> Result<()> {
            Err(Error::Launch("nope".into()))
        }
    }

    #[test]
    fn launch_failure_is_swallowed() {
        let router = CommandRouter::new(Arc::new(Broken));
        router.dispatch(&result(CommandKind::OpenResource(Resource::Maps)));
    }
}

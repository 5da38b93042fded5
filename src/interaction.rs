//! Voice interaction loop
//!
//! One task owns the [`LoopState`] and every collaborator. Handle commands,
//! voice events and assistant replies share one inbound queue and are handled
//! in the order they were sent; the backoff and voice-wait timers join them
//! at a single `select!`, so at most one input is handled at a time.
//!
//! The state machine keeps the microphone closed while the assistant is
//! thinking or talking:
//!
//! ```text
//! Idle ──start──▶ Capturing ──transcript──▶ Processing ──reply──▶ Speaking
//!                   ▲   │                       │                    │
//!                   │   └─ended/error─▶ Backoff │ (nothing to say)   │
//!                   │                     │     │                    │
//!                   └─────────timer───────┴─────┴──playback done─────┘
//! ```
//!
//! Teardown returns to `Idle` from anywhere. Replies and playback events that
//! belong to a torn-down generation are dropped.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

use crate::assistant::{Assistant, CommandResult, ask_or_fallback};
use crate::config::Config;
use crate::history::HistoryLedger;
use crate::persona::classify_persona;
use crate::router::CommandRouter;
use crate::voice::{
    CaptureErrorCode, PlaybackRequest, VoiceCapabilities, VoiceChannel, VoiceEvent,
    VoiceEventSink, VoiceInfo, VoiceSelection, VoiceSelector,
};

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Capturing,
    /// Assistant request in flight
    Processing,
    Speaking,
    /// Capture restarts at `until`
    Backoff { until: Instant },
}

/// What the loop publishes to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopStatus {
    pub state: LoopState,
    /// Latest reply text, including apologies
    pub last_response: Option<String>,
}

impl LoopStatus {
    /// Short user-facing description of the state
    #[must_use]
    pub fn label(&self) -> Option<String> {
        match self.state {
            LoopState::Capturing => Some("Listening…".to_string()),
            LoopState::Backoff { until } => {
                let remaining = until.saturating_duration_since(Instant::now());
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                Some(format!("Will try again in {secs}s"))
            }
            LoopState::Idle | LoopState::Processing | LoopState::Speaking => None,
        }
    }
}

/// Timing knobs of the loop
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Delay before restarting an ended or failed capture session
    pub backoff: Duration,
    /// Deadline for one assistant request
    pub assistant_timeout: Duration,
    /// How long a reply waits for an empty voice catalog to fill
    pub voice_wait: Duration,
}

impl LoopSettings {
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            backoff: config.interaction.backoff,
            assistant_timeout: config.assistant.timeout,
            voice_wait: config.voice.voice_wait,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            backoff: crate::config::DEFAULT_BACKOFF,
            assistant_timeout: crate::config::DEFAULT_ASSISTANT_TIMEOUT,
            voice_wait: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug)]
enum Command {
    Start { assistant_name: String },
    Teardown,
    Shutdown,
}

/// Everything the loop task receives, in arrival order
enum Inbound {
    Command(Command),
    Voice(VoiceEvent),
    Reply(Reply),
}

/// Assistant reply tagged with the generation that asked
struct Reply {
    generation: u64,
    result: CommandResult,
}

/// Reply waiting for the voice catalog before it is spoken
struct PendingPlayback {
    text: String,
    deadline: Instant,
}

/// Control handle for a running loop
#[derive(Debug, Clone)]
pub struct LoopHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    status: watch::Receiver<LoopStatus>,
}

impl LoopHandle {
    /// A session became active: begin listening
    pub fn start(&self, assistant_name: impl Into<String>) {
        self.send(Command::Start {
            assistant_name: assistant_name.into(),
        });
    }

    /// The session ended: stop everything and return to `Idle`
    pub fn teardown(&self) {
        self.send(Command::Teardown);
    }

    /// Tear down and stop the loop task
    ///
    /// Dropping every handle does not stop the loop; call this instead.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if self.inbound.send(Inbound::Command(command)).is_err() {
            tracing::debug!("interaction loop already stopped");
        }
    }

    #[must_use]
    pub fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.status.borrow().state
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status.clone()
    }
}

/// The interaction loop and everything it owns
pub struct InteractionLoop {
    voice: Box<dyn VoiceChannel>,
    assistant: Arc<dyn Assistant>,
    router: CommandRouter,
    ledger: HistoryLedger,
    settings: LoopSettings,
    selector: VoiceSelector,
    capabilities: VoiceCapabilities,
    assistant_name: String,
    state: LoopState,
    status: watch::Sender<LoopStatus>,
    catalog: watch::Receiver<Vec<VoiceInfo>>,
    generation: u64,
    next_playback_id: u64,
    playback_id: Option<u64>,
    request: Option<JoinHandle<()>>,
    pending: Option<PendingPlayback>,
    backoff: Option<Pin<Box<Sleep>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    unavailable_logged: bool,
}

impl InteractionLoop {
    #[must_use]
    pub fn new(
        voice: Box<dyn VoiceChannel>,
        assistant: Arc<dyn Assistant>,
        router: CommandRouter,
        ledger: HistoryLedger,
        settings: LoopSettings,
    ) -> Self {
        let capabilities = voice.capabilities();
        let catalog = voice.voices();
        let (status, _) = watch::channel(LoopStatus {
            state: LoopState::Idle,
            last_response: None,
        });
        // replaced when the task starts
        let (inbound, _) = mpsc::unbounded_channel();

        Self {
            voice,
            assistant,
            router,
            ledger,
            settings,
            selector: VoiceSelector::new(),
            capabilities,
            assistant_name: String::new(),
            state: LoopState::Idle,
            status,
            catalog,
            generation: 0,
            next_playback_id: 0,
            playback_id: None,
            request: None,
            pending: None,
            backoff: None,
            inbound,
            unavailable_logged: false,
        }
    }

    /// Run the loop on its own task
    #[must_use]
    pub fn spawn(mut self) -> (LoopHandle, JoinHandle<()>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        self.voice.attach(VoiceEventSink::new(inbound_tx.clone(), Inbound::Voice));
        self.inbound = inbound_tx.clone();

        let handle = LoopHandle {
            inbound: inbound_tx,
            status: self.status.subscribe(),
        };
        let task = tokio::spawn(self.run(inbound_rx));
        (handle, task)
    }

    async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        tracing::debug!(
            capture = self.capabilities.capture,
            synthesis = self.capabilities.synthesis,
            "interaction loop running"
        );

        loop {
            let awaiting_catalog = self.pending.is_some();

            tokio::select! {
                message = inbound.recv() => match message {
                    Some(Inbound::Command(Command::Start { assistant_name })) => {
                        self.start(assistant_name);
                    }
                    Some(Inbound::Command(Command::Teardown)) => self.teardown(),
                    Some(Inbound::Command(Command::Shutdown)) => {
                        self.teardown();
                        break;
                    }
                    Some(Inbound::Voice(event)) => self.on_voice_event(event),
                    Some(Inbound::Reply(reply)) => self.on_reply(reply),
                    // unreachable while the loop holds its own sender
                    None => break,
                },
                () = backoff_elapsed(&mut self.backoff) => self.on_backoff_elapsed(),
                changed = self.catalog.changed(), if awaiting_catalog => {
                    self.on_catalog_changed(changed.is_ok());
                }
                () = pending_deadline(self.pending.as_ref()) => {
                    tracing::debug!("voice catalog still empty, using default voice");
                    self.play_pending();
                }
            }
        }

        tracing::debug!("interaction loop stopped");
    }

    fn transition(&mut self, to: LoopState) {
        if self.state != to {
            tracing::debug!(from = ?self.state, to = ?to, "loop state");
        }
        self.state = to;
        self.status.send_modify(|s| s.state = to);
    }

    fn publish_response(&self, text: Option<String>) {
        self.status.send_modify(|s| s.last_response = text);
    }

    fn start(&mut self, assistant_name: String) {
        if self.state != LoopState::Idle {
            tracing::debug!(state = ?self.state, "start ignored, loop already running");
            return;
        }
        if !self.capabilities.capture {
            if !self.unavailable_logged {
                tracing::warn!("speech capture unavailable, interaction loop will not start");
                self.unavailable_logged = true;
            }
            return;
        }

        tracing::info!(
            assistant = %assistant_name,
            persona = ?classify_persona(&assistant_name),
            "session active"
        );
        self.assistant_name = assistant_name;
        self.begin_capture();
    }

    fn begin_capture(&mut self) {
        self.transition(LoopState::Capturing);
        self.voice.start_capture();
    }

    fn teardown(&mut self) {
        self.generation += 1;
        if let Some(request) = self.request.take() {
            request.abort();
        }
        self.backoff = None;
        self.pending = None;
        if self.playback_id.take().is_some() {
            self.voice.cancel_playback();
        }
        self.voice.stop_capture();

        if self.state != LoopState::Idle {
            tracing::info!(from = ?self.state, "interaction loop torn down");
        }
        self.transition(LoopState::Idle);
        self.publish_response(None);
    }

    fn on_voice_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Transcript(text) => self.on_transcript(&text),
            VoiceEvent::CaptureEnded => {
                if self.state == LoopState::Capturing {
                    tracing::debug!("capture session ended");
                    self.enter_backoff();
                } else {
                    tracing::debug!(state = ?self.state, "dropping stray capture end");
                }
            }
            VoiceEvent::CaptureError(code) => {
                if self.state != LoopState::Capturing {
                    tracing::debug!(state = ?self.state, %code, "dropping stray capture error");
                    return;
                }
                if code == CaptureErrorCode::Aborted {
                    tracing::debug!("capture aborted");
                } else {
                    tracing::warn!(%code, "capture error");
                }
                self.enter_backoff();
            }
            VoiceEvent::PlaybackFinished(id) => self.on_playback_done(id),
            VoiceEvent::PlaybackFailed { id, error } => {
                tracing::warn!(id, error = %error, "playback failed");
                self.on_playback_done(id);
            }
        }
    }

    fn on_transcript(&mut self, text: &str) {
        if self.state != LoopState::Capturing {
            tracing::debug!(state = ?self.state, "dropping stray transcript");
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        self.voice.stop_capture();
        if let Err(e) = self.ledger.record(text) {
            tracing::warn!(error = %e, "failed to persist utterance");
        }
        tracing::info!(transcript = %text, "heard");
        self.transition(LoopState::Processing);

        self.generation += 1;
        let generation = self.generation;
        let assistant = Arc::clone(&self.assistant);
        let deadline = self.settings.assistant_timeout;
        let inbound = self.inbound.clone();
        let transcript = text.to_string();

        self.request = Some(tokio::spawn(async move {
            let result = ask_or_fallback(assistant.as_ref(), &transcript, deadline).await;
            let reply = Reply { generation, result };
            if inbound.send(Inbound::Reply(reply)).is_err() {
                tracing::trace!("reply dropped, loop has shut down");
            }
        }));
    }

    fn on_reply(&mut self, reply: Reply) {
        if reply.generation != self.generation || self.state != LoopState::Processing {
            tracing::debug!(generation = reply.generation, "dropping stale assistant reply");
            return;
        }
        self.request = None;
        let result = reply.result;
        let response = result.response().map(str::to_string);
        self.publish_response(response.clone());

        match response {
            None => self.begin_capture(),
            Some(text) if !self.capabilities.synthesis => {
                tracing::info!(response = %text, "speech output unavailable, displaying only");
                self.begin_capture();
            }
            Some(text) => {
                self.transition(LoopState::Speaking);
                self.pending = Some(PendingPlayback {
                    text,
                    deadline: Instant::now() + self.settings.voice_wait,
                });
                if !self.catalog.borrow().is_empty() {
                    self.play_pending();
                }
            }
        }

        self.router.dispatch(&result);
    }

    fn on_catalog_changed(&mut self, sender_alive: bool) {
        let populated = !self.catalog.borrow_and_update().is_empty();
        if populated || !sender_alive {
            self.play_pending();
        }
    }

    fn play_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let persona = classify_persona(&self.assistant_name);
        let VoiceSelection { language, voice } = {
            let catalog = self.catalog.borrow_and_update();
            self.selector.select(&pending.text, persona, &catalog)
        };

        self.next_playback_id += 1;
        let id = self.next_playback_id;
        self.playback_id = Some(id);
        self.voice.play(PlaybackRequest {
            id,
            text: pending.text,
            voice,
            lang: language.locale().to_string(),
        });
    }

    fn on_playback_done(&mut self, id: u64) {
        if self.state != LoopState::Speaking || self.playback_id != Some(id) {
            tracing::debug!(id, state = ?self.state, "dropping stray playback event");
            return;
        }
        self.playback_id = None;
        self.begin_capture();
    }

    fn enter_backoff(&mut self) {
        let until = Instant::now() + self.settings.backoff;
        self.backoff = Some(Box::pin(tokio::time::sleep_until(until)));
        tracing::info!(
            delay_secs = self.settings.backoff.as_secs(),
            "capture restart scheduled"
        );
        self.transition(LoopState::Backoff { until });
    }

    fn on_backoff_elapsed(&mut self) {
        self.backoff = None;
        if matches!(self.state, LoopState::Backoff { .. }) {
            self.begin_capture();
        }
    }
}

async fn backoff_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn pending_deadline(pending_playback: Option<&PendingPlayback>) {
    match pending_playback {
        Some(p) => tokio::time::sleep_until(p.deadline).await,
        None => pending().await,
    }
}

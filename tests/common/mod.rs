//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use parley::assistant::{Assistant, CommandKind, CommandResult};
use parley::voice::{
    CaptureErrorCode, PlaybackRequest, VoiceCapabilities, VoiceChannel, VoiceEvent,
    VoiceEventSink, VoiceInfo,
};
use parley::{
    CommandRouter, DbPool, Error, HistoryLedger, InteractionLoop, KvStore, Launcher, LoopHandle,
    LoopSettings, LoopState, Result, db,
};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Build a catalog entry
pub fn voice(id: &str, name: &str, lang: &str) -> VoiceInfo {
    VoiceInfo {
        id: id.to_string(),
        name: name.to_string(),
        lang: lang.to_string(),
    }
}

/// A small catalog covering both languages and genders
pub fn test_catalog() -> Vec<VoiceInfo> {
    vec![
        voice("en-m", "Microsoft David", "en-US"),
        voice("en-f", "Microsoft Zira", "en-US"),
        voice("hi-m", "Microsoft Hemant", "hi-IN"),
        voice("hi-f", "Google हिन्दी Female", "hi-IN"),
    ]
}

/// Everything the fake platform observed
#[derive(Debug, Clone, Default)]
pub struct FakeVoiceState {
    pub capturing: bool,
    pub playing: Option<u64>,
    pub start_calls: usize,
    pub stop_calls: usize,
    pub cancel_calls: usize,
    pub plays: Vec<PlaybackRequest>,
    /// Capture and playback were active at the same time
    pub overlap: bool,
}

/// Scriptable stand-in for the platform's capture and synthesis
///
/// Clones share state: hand one to the loop and drive the other from the test.
#[derive(Clone)]
pub struct FakeVoiceChannel {
    capabilities: VoiceCapabilities,
    state: Arc<Mutex<FakeVoiceState>>,
    sink: Arc<Mutex<Option<VoiceEventSink>>>,
    voices: Arc<watch::Sender<Vec<VoiceInfo>>>,
}

impl FakeVoiceChannel {
    pub fn new(catalog: Vec<VoiceInfo>) -> Self {
        Self::with_capabilities(
            VoiceCapabilities {
                capture: true,
                synthesis: true,
            },
            catalog,
        )
    }

    pub fn with_capabilities(capabilities: VoiceCapabilities, catalog: Vec<VoiceInfo>) -> Self {
        let (voices, _) = watch::channel(catalog);
        Self {
            capabilities,
            state: Arc::new(Mutex::new(FakeVoiceState::default())),
            sink: Arc::new(Mutex::new(None)),
            voices: Arc::new(voices),
        }
    }

    pub fn snapshot(&self) -> FakeVoiceState {
        self.state.lock().unwrap().clone()
    }

    fn emit(&self, event: VoiceEvent) {
        let sink = self.sink.lock().unwrap();
        sink.as_ref().expect("voice channel not attached").emit(event);
    }

    /// The engine finalized an utterance
    pub fn transcript(&self, text: &str) {
        self.emit(VoiceEvent::Transcript(text.to_string()));
    }

    /// The engine ended the capture session on its own
    pub fn end_capture(&self) {
        self.state.lock().unwrap().capturing = false;
        self.emit(VoiceEvent::CaptureEnded);
    }

    pub fn capture_error(&self, code: CaptureErrorCode) {
        self.state.lock().unwrap().capturing = false;
        self.emit(VoiceEvent::CaptureError(code));
    }

    /// Complete the outstanding playback
    pub fn finish_playback(&self) {
        let id = self
            .state
            .lock()
            .unwrap()
            .playing
            .take()
            .expect("nothing is playing");
        self.emit(VoiceEvent::PlaybackFinished(id));
    }

    /// Report completion for an arbitrary playback id
    pub fn playback_finished(&self, id: u64) {
        self.emit(VoiceEvent::PlaybackFinished(id));
    }

    pub fn set_voices(&self, catalog: Vec<VoiceInfo>) {
        self.voices.send_replace(catalog);
    }
}

impl VoiceChannel for FakeVoiceChannel {
    fn capabilities(&self) -> VoiceCapabilities {
        self.capabilities
    }

    fn attach(&mut self, sink: VoiceEventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn start_capture(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.start_calls += 1;
        if state.playing.is_some() {
            state.overlap = true;
        }
        state.capturing = true;
    }

    fn stop_capture(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stop_calls += 1;
        state.capturing = false;
    }

    fn is_capturing(&self) -> bool {
        self.state.lock().unwrap().capturing
    }

    fn play(&mut self, request: PlaybackRequest) {
        let mut state = self.state.lock().unwrap();
        if state.capturing {
            state.overlap = true;
        }
        state.playing = Some(request.id);
        state.plays.push(request);
    }

    fn cancel_playback(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.cancel_calls += 1;
        state.playing = None;
    }

    fn voices(&self) -> watch::Receiver<Vec<VoiceInfo>> {
        self.voices.subscribe()
    }
}

/// One scripted assistant behavior
pub enum Script {
    Reply(CommandResult),
    Fail(Error),
    /// Reply after a delay
    Delayed(Duration, CommandResult),
    /// Never answer
    Hang,
}

/// Assistant answering from a script, recording what it was asked
#[derive(Default)]
pub struct ScriptedAssistant {
    script: Mutex<VecDeque<Script>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedAssistant {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn ask(&self, transcript: &str) -> Result<CommandResult> {
        self.asked.lock().unwrap().push(transcript.to_string());
        let next = self.script.lock().unwrap().pop_front();

        match next {
            Some(Script::Reply(result)) => Ok(result),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                Ok(result)
            }
            Some(Script::Hang) => std::future::pending().await,
            None => Ok(reply(CommandKind::None, None)),
        }
    }
}

/// Launcher that only records URLs
#[derive(Default)]
pub struct RecordingLauncher {
    opened: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn open(&self, url: &str) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

pub fn reply(kind: CommandKind, text: Option<&str>) -> CommandResult {
    CommandResult {
        kind,
        response_text: text.map(ToString::to_string),
    }
}

/// A running loop wired to fakes
pub struct Harness {
    pub voice: FakeVoiceChannel,
    pub assistant: Arc<ScriptedAssistant>,
    pub launcher: Arc<RecordingLauncher>,
    pub store: KvStore,
    pub handle: LoopHandle,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn spawn(voice: FakeVoiceChannel, assistant: ScriptedAssistant) -> Self {
        let store = KvStore::new(setup_test_db());
        let ledger = HistoryLedger::load(store.clone(), None).expect("failed to load ledger");
        let assistant = Arc::new(assistant);
        let launcher = Arc::new(RecordingLauncher::default());

        let interaction = InteractionLoop::new(
            Box::new(voice.clone()),
            assistant.clone(),
            CommandRouter::new(launcher.clone()),
            ledger,
            LoopSettings::default(),
        );
        let (handle, task) = interaction.spawn();

        Self {
            voice,
            assistant,
            launcher,
            store,
            handle,
            task,
        }
    }

    /// Wait until the loop reaches a state matching `pred`
    pub async fn wait_for(&self, mut pred: impl FnMut(&LoopState) -> bool) {
        let mut status = self.handle.subscribe();
        tokio::time::timeout(Duration::from_secs(300), status.wait_for(|s| pred(&s.state)))
            .await
            .expect("timed out waiting for loop state")
            .expect("interaction loop stopped");
    }

    pub async fn wait_for_state(&self, state: LoopState) {
        self.wait_for(|s| *s == state).await;
    }

    /// Let the loop task drain its queues
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Persisted history as it would be reloaded after a restart
    pub fn history(&self) -> Vec<String> {
        HistoryLedger::load(self.store.clone(), None)
            .expect("failed to reload ledger")
            .entries()
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }
}

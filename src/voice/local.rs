//! Production voice channel: local microphone and speakers
//!
//! Capture runs on a dedicated OS thread (cpal streams aren't `Send`):
//! audio is segmented into utterances and each one is transcribed before the
//! next is taken. A session ends on its own after `session_limit`, like a
//! platform recognizer would. Synthesis fetches MP3 from the TTS provider and
//! plays it on a blocking task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::watch;

use super::{
    AudioCapture, AudioPlayback, CaptureErrorCode, PlaybackRequest, SAMPLE_RATE, SpeechToText,
    TextToSpeech, UtteranceSegmenter, VoiceCapabilities, VoiceChannel, VoiceEvent, VoiceEventSink,
    VoiceInfo,
};
use crate::config::Config;
use crate::{Error, Result};

/// Audio processing chunk size (100ms at 16kHz)
const CHUNK_SIZE: usize = 1600;

/// Poll interval of the capture thread
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct CaptureSession {
    stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    _thread: JoinHandle<()>,
}

struct PlaybackTask {
    id: u64,
    cancel: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

/// Voice channel backed by the default audio devices
pub struct LocalVoiceChannel {
    runtime: Handle,
    capabilities: VoiceCapabilities,
    stt: Option<SpeechToText>,
    tts: Option<TextToSpeech>,
    session_limit: Duration,
    sink: Option<VoiceEventSink>,
    capture: Option<CaptureSession>,
    playback: Option<PlaybackTask>,
    voices_tx: Arc<watch::Sender<Vec<VoiceInfo>>>,
    voices_rx: watch::Receiver<Vec<VoiceInfo>>,
}

impl LocalVoiceChannel {
    /// Probe devices and build the STT/TTS clients from config
    ///
    /// Missing keys or devices disable the matching capability instead of
    /// failing. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if called outside a tokio runtime
    pub fn new(config: &Config) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("voice channel needs a tokio runtime: {e}")))?;
        let voice = &config.voice;

        let stt = if voice.enabled && voice.capture {
            config.api_keys.openai.clone().and_then(|key| {
                SpeechToText::new(key, voice.stt_model.clone())
                    .inspect_err(|e| tracing::warn!(error = %e, "speech-to-text disabled"))
                    .ok()
            })
        } else {
            None
        };

        let tts = if voice.enabled && voice.synthesis {
            TextToSpeech::from_config(config)
                .inspect_err(|e| tracing::warn!(error = %e, "text-to-speech disabled"))
                .ok()
                .flatten()
        } else {
            None
        };

        let capabilities = VoiceCapabilities {
            capture: stt.is_some() && AudioCapture::input_available(),
            synthesis: tts.is_some() && AudioPlayback::output_available(),
        };
        tracing::info!(
            capture = capabilities.capture,
            synthesis = capabilities.synthesis,
            "voice channel initialized"
        );

        let (voices_tx, voices_rx) = watch::channel(Vec::new());
        let voices_tx = Arc::new(voices_tx);

        if let Some(tts) = &tts {
            voices_tx.send_replace(tts.builtin_voices());

            if voices_rx.borrow().is_empty() {
                let tts = tts.clone();
                let tx = Arc::clone(&voices_tx);
                runtime.spawn(async move {
                    match tts.fetch_voices().await {
                        Ok(voices) => {
                            tracing::info!(count = voices.len(), "voice catalog loaded");
                            tx.send_replace(voices);
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to load voice catalog"),
                    }
                });
            }
        }

        Ok(Self {
            runtime,
            capabilities,
            stt,
            tts,
            session_limit: voice.session_limit,
            sink: None,
            capture: None,
            playback: None,
            voices_tx,
            voices_rx,
        })
    }

    fn emit(&self, event: VoiceEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }
}

impl VoiceChannel for LocalVoiceChannel {
    fn capabilities(&self) -> VoiceCapabilities {
        self.capabilities
    }

    fn attach(&mut self, sink: VoiceEventSink) {
        self.sink = Some(sink);
    }

    fn start_capture(&mut self) {
        if self.is_capturing() {
            tracing::warn!("capture already active, ignoring start");
            return;
        }
        let (Some(stt), Some(sink)) = (self.stt.clone(), self.sink.clone()) else {
            tracing::warn!("capture unavailable, ignoring start");
            return;
        };

        let stop = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(true));
        let worker = CaptureWorker {
            stop: Arc::clone(&stop),
            active: Arc::clone(&active),
            sink,
            stt,
            runtime: self.runtime.clone(),
            session_limit: self.session_limit,
        };

        match std::thread::Builder::new()
            .name("parley-capture".to_string())
            .spawn(move || worker.run())
        {
            Ok(thread) => {
                self.capture = Some(CaptureSession {
                    stop,
                    active,
                    _thread: thread,
                });
                tracing::debug!("capture session started");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn capture thread");
                self.emit(VoiceEvent::CaptureError(CaptureErrorCode::AudioCapture));
            }
        }
    }

    fn stop_capture(&mut self) {
        if let Some(session) = self.capture.take() {
            session.stop.store(true, Ordering::Release);
            session.active.store(false, Ordering::Release);
            tracing::debug!("capture session stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|s| s.active.load(Ordering::Acquire))
    }

    fn play(&mut self, request: PlaybackRequest) {
        let Some(tts) = self.tts.clone() else {
            self.emit(VoiceEvent::PlaybackFailed {
                id: request.id,
                error: Error::SynthesisUnavailable("no TTS provider".to_string()).to_string(),
            });
            return;
        };
        if let Some(previous) = &self.playback
            && !previous.task.is_finished()
        {
            tracing::warn!(previous = previous.id, "overlapping playback, cancelling previous");
            self.cancel_playback();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let task_cancel = Arc::clone(&cancel);
        let sink = self.sink.clone();
        let id = request.id;

        let task = self.runtime.spawn(async move {
            let result = speak(&tts, request, Arc::clone(&task_cancel)).await;
            if task_cancel.load(Ordering::Acquire) {
                return;
            }
            let event = match result {
                Ok(()) => VoiceEvent::PlaybackFinished(id),
                Err(e) => {
                    tracing::warn!(error = %e, id, "playback failed");
                    VoiceEvent::PlaybackFailed {
                        id,
                        error: e.to_string(),
                    }
                }
            };
            if let Some(sink) = sink {
                sink.emit(event);
            }
        });

        self.playback = Some(PlaybackTask { id, cancel, task });
    }

    fn cancel_playback(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.cancel.store(true, Ordering::Release);
            playback.task.abort();
            tracing::debug!(id = playback.id, "playback cancelled");
        }
    }

    fn voices(&self) -> watch::Receiver<Vec<VoiceInfo>> {
        self.voices_rx.clone()
    }
}

impl Drop for LocalVoiceChannel {
    fn drop(&mut self) {
        self.stop_capture();
        self.cancel_playback();
        tracing::trace!(receivers = self.voices_tx.receiver_count(), "voice channel dropped");
    }
}

/// Synthesize and play one request
async fn speak(
    tts: &TextToSpeech,
    request: PlaybackRequest,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let audio = tts
        .synthesize(&request.text, &request.voice, &request.lang)
        .await?;
    if cancel.load(Ordering::Acquire) {
        return Ok(());
    }

    tokio::task::spawn_blocking(move || {
        let playback = AudioPlayback::new()?;
        playback.play_mp3(&audio, &cancel)
    })
    .await
    .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
}

/// State owned by the capture thread
struct CaptureWorker {
    stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    sink: VoiceEventSink,
    stt: SpeechToText,
    runtime: Handle,
    session_limit: Duration,
}

impl CaptureWorker {
    fn run(self) {
        let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open microphone");
                self.finish(Some(VoiceEvent::CaptureError(CaptureErrorCode::AudioCapture)));
                return;
            }
        };

        let mut segmenter = UtteranceSegmenter::new();
        let started = Instant::now();

        let outcome = loop {
            if self.stopped() {
                break None;
            }
            if let Some(err) = capture.take_error() {
                tracing::warn!(error = %err, "capture stream failed");
                break Some(VoiceEvent::CaptureError(CaptureErrorCode::AudioCapture));
            }
            if started.elapsed() >= self.session_limit {
                tracing::debug!("capture session reached its limit");
                break Some(VoiceEvent::CaptureEnded);
            }

            std::thread::sleep(POLL_INTERVAL);

            let samples = match capture.take_buffer() {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to resample captured audio");
                    break Some(VoiceEvent::CaptureError(CaptureErrorCode::AudioCapture));
                }
            };
            let mut failure = None;
            for chunk in samples.chunks(CHUNK_SIZE) {
                if let Some(utterance) = segmenter.push(chunk)
                    && let Err(code) = self.transcribe(&utterance)
                {
                    failure = Some(code);
                    break;
                }
            }
            if let Some(code) = failure {
                break Some(VoiceEvent::CaptureError(code));
            }
        };

        capture.stop();
        self.finish(outcome);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Transcribe one utterance and report it unless capture was stopped meanwhile
    fn transcribe(&self, samples: &[f32]) -> std::result::Result<(), CaptureErrorCode> {
        // drop fragments shorter than half a second
        if samples.len() < SAMPLE_RATE as usize / 2 || self.stopped() {
            return Ok(());
        }

        match self.runtime.block_on(self.stt.transcribe(samples, SAMPLE_RATE)) {
            Ok(text) if text.is_empty() => Ok(()),
            Ok(text) => {
                if !self.stopped() {
                    self.sink.emit(VoiceEvent::Transcript(text));
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                Err(CaptureErrorCode::Network)
            }
        }
    }

    /// End the session; unsolicited endings are reported, stops are not
    fn finish(&self, event: Option<VoiceEvent>) {
        self.active.store(false, Ordering::Release);
        if let Some(event) = event
            && !self.stopped()
        {
            self.sink.emit(event);
        }
    }
}

//! Voice channel: speech capture and speech output
//!
//! [`VoiceChannel`] is the seam between the interaction loop and the
//! platform's capture/synthesis primitives. Everything the platform reports
//! back (transcripts, capture end, errors, playback completion) arrives as a
//! [`VoiceEvent`] on the sink handed over in [`VoiceChannel::attach`], so the
//! loop processes it at its single event-handling point.
//!
//! [`LocalVoiceChannel`] is the production implementation: microphone capture
//! with Whisper transcription, and TTS played on the default output device.

mod capture;
mod local;
mod pcm;
mod playback;
mod segmenter;
mod selector;
mod stt;
mod tts;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

pub use capture::{AudioCapture, SAMPLE_RATE};
pub use local::LocalVoiceChannel;
pub use pcm::{Pcm, samples_to_wav};
pub use playback::AudioPlayback;
pub use segmenter::{SegmenterState, UtteranceSegmenter};
pub use selector::{VoiceSelection, VoiceSelector};
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

/// The two supported spoken languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    /// English
    Primary,
    /// Hindi (Devanagari script)
    Secondary,
}

impl Language {
    /// Detect the language of `text` by script
    ///
    /// Any Devanagari code point means the secondary language; other
    /// alphabetic text is the primary one. Text without letters is `None`.
    #[must_use]
    pub fn detect(text: &str) -> Option<Self> {
        if text.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c)) {
            Some(Self::Secondary)
        } else if text.chars().any(char::is_alphabetic) {
            Some(Self::Primary)
        } else {
            None
        }
    }

    /// BCP 47 locale used for synthesis
    #[must_use]
    pub const fn locale(self) -> &'static str {
        match self {
            Self::Primary => "en-US",
            Self::Secondary => "hi-IN",
        }
    }

    const fn code(self) -> &'static str {
        match self {
            Self::Primary => "en",
            Self::Secondary => "hi",
        }
    }

    /// Whether a voice tagged `lang` speaks this language (any region)
    #[must_use]
    pub fn matches(self, lang: &str) -> bool {
        let normalized = normalize_lang(lang);
        normalized == self.code() || normalized.starts_with(&format!("{}-", self.code()))
    }

    /// Whether a voice tagged `lang` matches this language's exact locale
    #[must_use]
    pub fn matches_exactly(self, lang: &str) -> bool {
        normalize_lang(lang) == self.locale().to_lowercase()
    }
}

fn normalize_lang(lang: &str) -> String {
    lang.trim().replace('_', "-").to_lowercase()
}

/// One entry of the synthesis voice catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Engine identifier passed back to synthesis
    pub id: String,
    /// Human-readable name, used for persona matching
    pub name: String,
    /// Locale tag (e.g. "en-US", "hi_IN")
    pub lang: String,
}

/// Voice to synthesize with
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VoiceHandle {
    /// Whatever the synthesis engine uses when not told otherwise
    #[default]
    Default,
    Voice(VoiceInfo),
}

impl fmt::Display for VoiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Voice(v) => write!(f, "{} ({})", v.name, v.lang),
        }
    }
}

/// A single speech output request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    /// Echoed back in the completion event
    pub id: u64,
    pub text: String,
    pub voice: VoiceHandle,
    /// Locale tag, e.g. "hi-IN"
    pub lang: String,
}

/// Capture failure reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureErrorCode {
    /// Capture was aborted by the engine
    Aborted,
    /// No usable input device / stream failure
    AudioCapture,
    /// Microphone permission denied
    NotAllowed,
    /// Transcription backend unreachable
    Network,
    Other(String),
}

impl fmt::Display for CaptureErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => f.write_str("aborted"),
            Self::AudioCapture => f.write_str("audio-capture"),
            Self::NotAllowed => f.write_str("not-allowed"),
            Self::Network => f.write_str("network"),
            Self::Other(code) => f.write_str(code),
        }
    }
}

/// Something the platform reported back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// One finalized utterance (never a partial result)
    Transcript(String),
    /// The capture session ended without `stop_capture` being called
    CaptureEnded,
    /// The capture session failed
    CaptureError(CaptureErrorCode),
    /// Playback with this id finished
    PlaybackFinished(u64),
    /// Playback with this id could not be completed
    PlaybackFailed { id: u64, error: String },
}

/// Where a voice channel delivers its events
///
/// Events are wrapped into the receiver's own message type, so the loop can
/// take them from the same queue as its other inputs and see them in the
/// order they were sent.
#[derive(Clone)]
pub struct VoiceEventSink {
    deliver: Arc<dyn Fn(VoiceEvent) -> bool + Send + Sync>,
}

impl VoiceEventSink {
    #[must_use]
    pub fn new<T: Send + 'static>(
        tx: mpsc::UnboundedSender<T>,
        wrap: fn(VoiceEvent) -> T,
    ) -> Self {
        Self {
            deliver: Arc::new(move |event| tx.send(wrap(event)).is_ok()),
        }
    }

    /// Deliver an event; a closed receiver means the loop is gone and is ignored
    pub fn emit(&self, event: VoiceEvent) {
        if !(self.deliver)(event) {
            tracing::trace!("voice event dropped, loop has shut down");
        }
    }
}

impl fmt::Debug for VoiceEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceEventSink").finish_non_exhaustive()
    }
}

/// What the platform can do at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceCapabilities {
    pub capture: bool,
    pub synthesis: bool,
}

/// Platform speech capture and speech output
///
/// Capture sessions end on their own; callers must not assume a started
/// session stays active. Only one playback may be outstanding; preventing
/// overlap is the caller's job.
pub trait VoiceChannel: Send {
    /// Capabilities of the underlying platform
    fn capabilities(&self) -> VoiceCapabilities;

    /// Register the event sink (replaces any previous one)
    fn attach(&mut self, sink: VoiceEventSink);

    /// Begin a capture session; logs and does nothing if one is active
    fn start_capture(&mut self);

    /// End the capture session; safe to call when not capturing
    fn stop_capture(&mut self);

    fn is_capturing(&self) -> bool;

    /// Begin speech output; completion is reported as a [`VoiceEvent`]
    fn play(&mut self, request: PlaybackRequest);

    /// Abandon any outstanding playback without reporting completion
    fn cancel_playback(&mut self);

    /// Live voice catalog; may be empty until the engine has populated it
    fn voices(&self) -> watch::Receiver<Vec<VoiceInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Wrapped {
        Voice(VoiceEvent),
    }

    #[test]
    fn sink_wraps_events_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = VoiceEventSink::new(tx, Wrapped::Voice);
        sink.emit(VoiceEvent::Transcript("hello".to_string()));
        sink.clone().emit(VoiceEvent::CaptureEnded);

        assert_eq!(
            rx.try_recv().unwrap(),
            Wrapped::Voice(VoiceEvent::Transcript("hello".to_string()))
        );
        assert_eq!(rx.try_recv().unwrap(), Wrapped::Voice(VoiceEvent::CaptureEnded));

        drop(rx);
        sink.emit(VoiceEvent::CaptureEnded);
    }

    #[test]
    fn detect_language_by_script() {
        assert_eq!(Language::detect("what time is it"), Some(Language::Primary));
        assert_eq!(Language::detect("समय क्या है"), Some(Language::Secondary));
        assert_eq!(Language::detect("play गाना please"), Some(Language::Secondary));
        assert_eq!(Language::detect("123 ?!"), None);
    }

    #[test]
    fn locale_matching() {
        assert!(Language::Primary.matches("en-GB"));
        assert!(Language::Primary.matches("en_US"));
        assert!(Language::Primary.matches("EN"));
        assert!(!Language::Primary.matches("hi-IN"));
        assert!(!Language::Primary.matches("eng"));
        assert!(Language::Secondary.matches_exactly("hi_in"));
        assert!(!Language::Primary.matches_exactly("en-GB"));
    }

    #[test]
    fn voice_handle_display() {
        assert_eq!(VoiceHandle::Default.to_string(), "default");
        let v = VoiceHandle::Voice(VoiceInfo {
            id: "nova".into(),
            name: "Nova".into(),
            lang: "en-US".into(),
        });
        assert_eq!(v.to_string(), "Nova (en-US)");
    }
}

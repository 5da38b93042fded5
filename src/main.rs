use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley::assistant::{Assistant, AssistantClient};
use parley::voice::{
    AudioCapture, AudioPlayback, Pcm, SAMPLE_RATE, SegmenterState, SpeechToText, TextToSpeech,
    UtteranceSegmenter, VoiceSelector,
};
use parley::{CommandRouter, Config, Daemon, classify_persona};

/// Parley - hands-free voice front-end for your assistant
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (no microphone or speaker use)
    #[arg(long, env = "PARLEY_DISABLE_VOICE")]
    disable_voice: bool,

    /// Assistant server base URL
    #[arg(long)]
    assistant_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one utterance to the assistant and print the reply
    Ask {
        /// What you would have said
        text: String,
        /// Don't open the resource the assistant asks for
        #[arg(long)]
        no_dispatch: bool,
    },
    /// Show recent utterances, newest first
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Delete the utterance history
    HistoryClear,
    /// List the synthesis voice catalog
    Voices,
    /// Show microphone level and detected utterances
    TestMic {
        /// How long to listen, in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
        /// Send each utterance to Whisper and print the transcript
        #[arg(long)]
        transcribe: bool,
    },
    /// Play a chime on the default output device
    TestSpeaker,
    /// Synthesize and play a sentence
    TestTts {
        #[arg(default_value = "Hello, I am listening.")]
        text: String,
        /// Assistant name whose voice persona to use
        #[arg(long, default_value = "Assistant")]
        persona: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(cli.disable_voice)?;
    if let Some(url) = &cli.assistant_url {
        config.set_assistant_url(url)?;
    }
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Ask { text, no_dispatch } => ask(&config, &text, no_dispatch).await,
            Command::History { limit } => history(config, limit),
            Command::HistoryClear => history_clear(config),
            Command::Voices => voices(&config).await,
            Command::TestMic {
                duration,
                transcribe,
            } => test_mic(&config, duration, transcribe).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text, persona } => test_tts(&config, &text, &persona).await,
        };
    }

    tracing::info!(
        assistant = %config.assistant.url,
        voice = config.voice.enabled,
        "starting parley"
    );

    let daemon = Daemon::new(config)?;
    daemon.run().await?;

    Ok(())
}

/// One assistant round-trip
async fn ask(config: &Config, text: &str, no_dispatch: bool) -> anyhow::Result<()> {
    let client = AssistantClient::new(&config.assistant)?;
    let result = client.ask(text).await?;

    println!("type: {:?}", result.kind);
    match result.response() {
        Some(response) => println!("{response}"),
        None => println!("(no reply text)"),
    }

    if !no_dispatch {
        CommandRouter::system().dispatch(&result);
    }
    Ok(())
}

/// Print recent utterances
fn history(config: Config, limit: usize) -> anyhow::Result<()> {
    let ledger = Daemon::new(config)?.ledger()?;
    if ledger.is_empty() {
        println!("No utterances recorded");
        return Ok(());
    }

    for utterance in ledger.entries().iter().take(limit) {
        println!(
            "{}  {}",
            utterance.timestamp.format("%Y-%m-%d %H:%M:%S"),
            utterance.text
        );
    }
    Ok(())
}

/// Clear the utterance history
fn history_clear(config: Config) -> anyhow::Result<()> {
    let mut ledger = Daemon::new(config)?.ledger()?;
    let count = ledger.len();
    ledger.clear()?;
    println!("Cleared {count} utterances");
    Ok(())
}

/// Print the synthesis voice catalog
async fn voices(config: &Config) -> anyhow::Result<()> {
    let tts = TextToSpeech::from_config(config)?
        .ok_or_else(|| anyhow::anyhow!("no API key for the configured TTS provider"))?;

    let voices = tts.fetch_voices().await?;
    println!("{} voices ({:?})", voices.len(), tts.provider());
    for voice in voices {
        println!("  {:<24} {:<8} {}", voice.name, voice.lang, voice.id);
    }
    Ok(())
}

/// Watch the microphone through the utterance segmenter
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, transcribe: bool) -> anyhow::Result<()> {
    let stt = if transcribe {
        let key = config
            .api_keys
            .openai
            .clone()
            .ok_or_else(|| anyhow::anyhow!("transcription needs OPENAI_API_KEY"))?;
        Some(SpeechToText::new(key, config.voice.stt_model.clone())?)
    } else {
        None
    };

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    println!(
        "Listening for {duration}s (device rate {} Hz, segmenting at {SAMPLE_RATE} Hz)",
        capture.sample_rate()
    );

    let mut segmenter = UtteranceSegmenter::new();
    let mut utterances = 0_usize;

    for second in 1..=duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer()?;
        let level = rms(&samples);
        for chunk in samples.chunks(SAMPLE_RATE as usize / 10) {
            let Some(utterance) = segmenter.push(chunk) else {
                continue;
            };
            utterances += 1;
            #[allow(clippy::cast_precision_loss)]
            let secs = utterance.len() as f32 / SAMPLE_RATE as f32;
            println!("  utterance #{utterances}: {secs:.1}s");

            if let Some(stt) = &stt {
                match stt.transcribe(&utterance, SAMPLE_RATE).await {
                    Ok(text) if text.is_empty() => println!("    (nothing recognized)"),
                    Ok(text) => println!("    \"{text}\""),
                    Err(e) => println!("    transcription failed: {e}"),
                }
            }
        }

        let state = match segmenter.state() {
            SegmenterState::Idle => "silence",
            SegmenterState::InSpeech => "speech",
        };
        println!("[{second:>3}s] {:<7} {}", state, meter(level));
    }

    if let Some(err) = capture.take_error() {
        println!("stream error: {err}");
    }
    capture.stop();

    if utterances == 0 {
        println!("No utterance detected. Check the default source with `pactl info`.");
    }
    Ok(())
}

/// Root-mean-square level of a block
#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        0.0
    } else {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }
}

/// Forty-column level bar
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn meter(level: f32) -> String {
    const WIDTH: usize = 40;
    let filled = ((level * 200.0) as usize).min(WIDTH);
    format!("|{}{}| {level:.4}", "=".repeat(filled), " ".repeat(WIDTH - filled))
}

/// Two-note chime, the same cue at any device rate
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn chime(sample_rate: u32) -> Pcm {
    let note = |freq: f32, secs: f32| {
        let len = (sample_rate as f32 * secs) as usize;
        (0..len).map(move |i| {
            let t = i as f32 / sample_rate as f32;
            // short linear fade out avoids a click at the note boundary
            let fade = 1.0 - i as f32 / len as f32;
            (std::f32::consts::TAU * freq * t).sin() * 0.3 * fade
        })
    };

    Pcm {
        samples: note(660.0, 0.4).chain(note(880.0, 0.6)).collect(),
        sample_rate,
    }
}

/// Play a chime on the default output device
async fn test_speaker() -> anyhow::Result<()> {
    let pcm = chime(44_100);
    println!(
        "Playing a two-note chime ({} samples at {} Hz)",
        pcm.samples.len(),
        pcm.sample_rate
    );

    tokio::task::spawn_blocking(move || {
        AudioPlayback::new()?.play_pcm(pcm, &AtomicBool::new(false))
    })
    .await??;

    println!("Done. Silence means the default sink is wrong (see `pactl list sinks short`).");
    Ok(())
}

/// Speak `text` with the voice a persona would get
async fn test_tts(config: &Config, text: &str, persona: &str) -> anyhow::Result<()> {
    let tts = TextToSpeech::from_config(config)?
        .ok_or_else(|| anyhow::anyhow!("no API key for the configured TTS provider"))?;

    let catalog = match tts.builtin_voices() {
        voices if voices.is_empty() => tts.fetch_voices().await?,
        voices => voices,
    };
    let selection = VoiceSelector::new().select(text, classify_persona(persona), &catalog);
    println!(
        "{:?} voice for \"{persona}\": {} [{}]",
        tts.provider(),
        selection.voice,
        selection.locale()
    );

    let audio = tts
        .synthesize(text, &selection.voice, selection.locale())
        .await?;
    println!("Synthesized {} bytes of MP3", audio.len());

    tokio::task::spawn_blocking(move || {
        AudioPlayback::new()?.play_mp3(&audio, &AtomicBool::new(false))
    })
    .await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chime_length_follows_rate() {
        assert_eq!(chime(16_000).samples.len(), 16_000);
        assert!(chime(48_000).samples.iter().all(|s| s.abs() <= 0.3));
    }

    #[test]
    fn meter_is_bounded() {
        assert!(meter(0.0).starts_with(&format!("|{}|", " ".repeat(40))));
        assert!(meter(5.0).starts_with(&format!("|{}|", "=".repeat(40))));
        assert!(rms(&[]).abs() < f32::EPSILON);
    }
}

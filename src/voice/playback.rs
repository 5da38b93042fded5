//! Audio playback to speakers

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};

use super::pcm::{Pcm, decode_mp3, resample};
use crate::{Error, Result};

/// Rate assumed for raw samples handed to [`AudioPlayback::play`]
const RAW_SAMPLE_RATE: u32 = 24000;

/// How often the blocking wait checks for completion or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Extra time allowed past the nominal clip length before giving up
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Plays audio to the default output device
///
/// Playback blocks the calling thread; run it on a blocking task.
pub struct AudioPlayback {
    device: Device,
}

impl AudioPlayback {
    /// Whether the host has any output device at all
    #[must_use]
    pub fn output_available() -> bool {
        cpal::default_host().default_output_device().is_some()
    }

    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if there is no output device
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::SynthesisUnavailable("no output device available".to_string()))?;
        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );
        Ok(Self { device })
    }

    /// Play mono samples at 24 kHz until done or cancelled
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub fn play(&self, samples: Vec<f32>, cancel: &AtomicBool) -> Result<()> {
        self.play_pcm(
            Pcm {
                samples,
                sample_rate: RAW_SAMPLE_RATE,
            },
            cancel,
        )
    }

    /// Decode and play MP3 bytes until done or cancelled
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_mp3(&self, data: &[u8], cancel: &AtomicBool) -> Result<()> {
        self.play_pcm(decode_mp3(data)?, cancel)
    }

    /// Play decoded audio at its own rate, resampling only if the device can't
    ///
    /// # Errors
    ///
    /// Returns error if no output stream can be opened or the device fails
    pub fn play_pcm(&self, pcm: Pcm, cancel: &AtomicBool) -> Result<()> {
        if pcm.samples.is_empty() {
            return Ok(());
        }

        let (config, samples) = match self.config_for(pcm.sample_rate)? {
            Some(config) => (config, pcm.samples),
            None => {
                let config = self.default_config()?;
                let samples = resample(&pcm.samples, pcm.sample_rate, config.sample_rate.0)?;
                (config, samples)
            }
        };

        let channels = usize::from(config.channels);
        let rate = config.sample_rate.0;
        let samples: Arc<[f32]> = samples.into();
        let cursor = Arc::new(AtomicUsize::new(0));
        let failure = Arc::new(OnceLock::<String>::new());

        let stream = {
            let samples = Arc::clone(&samples);
            let cursor = Arc::clone(&cursor);
            let failure = Arc::clone(&failure);
            self.device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = cursor.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            frame.fill(samples.get(pos).copied().unwrap_or(0.0));
                            pos = pos.saturating_add(1);
                        }
                        cursor.store(pos, Ordering::Release);
                    },
                    move |err| {
                        tracing::error!(error = %err, "audio playback error");
                        let _ = failure.set(err.to_string());
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let deadline = Instant::now() + clip_length(samples.len(), rate) + DRAIN_GRACE;
        let outcome = loop {
            if cancel.load(Ordering::Acquire) {
                tracing::debug!("playback cancelled");
                break Ok(());
            }
            if let Some(err) = failure.get() {
                break Err(Error::Audio(err.clone()));
            }
            // one extra period of silence so the tail isn't clipped
            if cursor.load(Ordering::Acquire) > samples.len() {
                break Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!("playback did not drain in time");
                break Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        drop(stream);
        tracing::debug!(samples = samples.len(), rate, "playback complete");
        outcome
    }

    /// An f32 output config running at exactly `rate`, mono preferred
    fn config_for(&self, rate: u32) -> Result<Option<StreamConfig>> {
        let target = SampleRate(rate);
        let config = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.sample_format() == SampleFormat::F32
                    && c.channels() <= 2
                    && c.min_sample_rate() <= target
                    && c.max_sample_rate() >= target
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .map(|c| c.with_sample_rate(target).config());
        Ok(config)
    }

    fn default_config(&self) -> Result<StreamConfig> {
        let default = self
            .device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        if default.sample_format() != SampleFormat::F32 {
            return Err(Error::Audio(format!(
                "unsupported output sample format {:?}",
                default.sample_format()
            )));
        }
        Ok(default.config())
    }
}

/// Nominal duration of `frames` mono frames at `rate`
fn clip_length(frames: usize, rate: u32) -> Duration {
    let millis = (frames as u64).saturating_mul(1000) / u64::from(rate.max(1));
    Duration::from_millis(millis)
}

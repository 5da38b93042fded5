//! Microphone capture, normalized to 16 kHz mono

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use super::pcm::{StreamResampler, downmix};
use crate::{Error, Result};

/// Rate every consumer of captured audio works at
pub const SAMPLE_RATE: u32 = 16000;

/// State written by the device callbacks
#[derive(Default)]
struct Shared {
    /// Mono samples at the device rate
    buffer: Mutex<Vec<f32>>,
    error: Mutex<Option<String>>,
}

/// Captures audio from the default input device
///
/// Devices that can't run at [`SAMPLE_RATE`] are opened at their own rate and
/// the audio is resampled on the way out of [`take_buffer`](Self::take_buffer).
/// Not `Send`: cpal streams must stay on the thread that created them.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    shared: Arc<Shared>,
    resampler: StreamResampler,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Whether the host has any input device at all
    #[must_use]
    pub fn input_available() -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if there is no input device or it offers no float format
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::CaptureUnavailable("no input device available".to_string()))?;
        let config = preferred_config(&device)?;
        let resampler = StreamResampler::new(config.sample_rate.0, SAMPLE_RATE)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            shared: Arc::new(Shared::default()),
            resampler,
            stream: None,
        })
    }

    /// Start the input stream; no-op if already running
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let on_data = Arc::clone(&self.shared);
        let on_error = Arc::clone(&self.shared);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buffer) = on_data.buffer.lock() {
                        buffer.extend(downmix(data, channels));
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if let Ok(mut slot) = on_error.error.lock() {
                        *slot = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Capture(e.to_string()))?;

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop the input stream
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Drain captured audio, resampled to [`SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn take_buffer(&mut self) -> Result<Vec<f32>> {
        let raw = self
            .shared
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        self.resampler.push(&raw)
    }

    /// Take the last stream error reported by the device, if any
    #[must_use]
    pub fn take_error(&self) -> Option<String> {
        self.shared.error.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Rate the device actually runs at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

/// Pick an f32 input config, favouring mono at [`SAMPLE_RATE`]
fn preferred_config(device: &Device) -> Result<StreamConfig> {
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::CaptureUnavailable(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let target = SampleRate(SAMPLE_RATE);
    let fits = |c: &&cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= target && c.max_sample_rate() >= target
    };

    let exact = ranges
        .iter()
        .filter(fits)
        .min_by_key(|c| c.channels())
        .map(|c| c.with_sample_rate(target).config());
    if let Some(config) = exact {
        return Ok(config);
    }

    // no 16 kHz support; take the device default and resample later
    let default = device
        .default_input_config()
        .map_err(|e| Error::CaptureUnavailable(e.to_string()))?;
    if default.sample_format() != SampleFormat::F32 {
        return Err(Error::CaptureUnavailable(format!(
            "unsupported input sample format {:?}",
            default.sample_format()
        )));
    }
    Ok(default.config())
}

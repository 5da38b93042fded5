//! PCM helpers shared by capture and playback

use std::io::Cursor;

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Mono samples at a known rate
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Input frames per resampler call
const RESAMPLE_CHUNK: usize = 1024;

/// Incremental mono resampler for audio that arrives in pieces
///
/// Input is buffered until a full chunk is available, so output lags input
/// by up to one chunk. Equal rates pass through untouched.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// # Errors
    ///
    /// Returns error if rubato rejects the rate pair
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = if from == to {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
                    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?,
            )
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Feed samples, returning whatever full chunks produced
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = &mut self.inner else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= inner.input_frames_next() {
            let chunk: Vec<f32> = self.pending.drain(..inner.input_frames_next()).collect();
            out.extend(first_channel(inner.process(&[chunk], None))?);
        }
        Ok(out)
    }

    /// Drain buffered input and the filter tail
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(inner) = &mut self.inner else {
            return Ok(std::mem::take(&mut self.pending));
        };

        let rest = [std::mem::take(&mut self.pending)];
        let mut out = first_channel(inner.process_partial(Some(&rest[..]), None))?;
        out.extend(first_channel(inner.process_partial::<Vec<f32>>(None, None))?);
        Ok(out)
    }

    /// Frames of leading filter delay in the output
    #[must_use]
    pub fn delay(&self) -> usize {
        match &self.inner {
            Some(inner) => inner.output_delay(),
            None => 0,
        }
    }
}

fn first_channel(result: rubato::ResampleResult<Vec<Vec<f32>>>) -> Result<Vec<f32>> {
    result
        .map(|mut channels| channels.swap_remove(0))
        .map_err(|e| Error::Audio(format!("resampling failed: {e}")))
}

/// Resample a whole clip, compensating for the filter delay
///
/// # Errors
///
/// Returns error if rubato rejects the rate pair or fails
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = StreamResampler::new(from, to)?;
    let mut out = resampler.push(samples)?;
    out.extend(resampler.flush()?);

    let expected = (samples.len() as f64 * f64::from(to) / f64::from(from)).round() as usize;
    out.drain(..resampler.delay().min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

/// Convert f32 samples to 16-bit mono WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let pcm = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_sample(pcm)
            .map_err(|e| Error::Audio(e.to_string()))?;
    }
    writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;

    Ok(cursor.into_inner())
}

/// Decode MP3 bytes to mono samples at the stream's own rate
///
/// # Errors
///
/// Returns error if the data holds no decodable frames
pub fn decode_mp3(data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let channels = frame.channels.max(1);
                let rate = u32::try_from(frame.sample_rate).map_err(|_| {
                    Error::Audio(format!("bad MP3 sample rate {}", frame.sample_rate))
                })?;
                if *sample_rate.get_or_insert(rate) != rate {
                    tracing::debug!(rate, "MP3 sample rate changed mid-stream");
                }

                let interleaved: Vec<f32> = frame
                    .data
                    .iter()
                    .map(|&s| f32::from(s) / 32768.0)
                    .collect();
                samples.extend(downmix(&interleaved, channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| Error::Audio("no MP3 frames".to_string()))?;
    Ok(Pcm {
        samples,
        sample_rate,
    })
}

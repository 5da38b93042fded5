//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use parley::classify_persona;
use parley::persona::Gender;
use parley::voice::{
    Language, SAMPLE_RATE, SegmenterState, UtteranceSegmenter, VoiceHandle, VoiceSelector,
    samples_to_wav,
};
use std::io::Cursor;

mod common;

use common::test_catalog;

/// Chunk size the capture worker feeds the segmenter (100ms)
const CHUNK: usize = 1600;

fn samples_for(secs: f32) -> usize {
    (SAMPLE_RATE as f32 * secs) as usize
}

/// A voiced stand-in: 220 Hz at a conversational level
fn speech(secs: f32) -> Vec<f32> {
    let rate = SAMPLE_RATE as f32;
    (0..samples_for(secs))
        .map(|i| 0.3 * (std::f32::consts::TAU * 220.0 * i as f32 / rate).sin())
        .collect()
}

fn silence(secs: f32) -> Vec<f32> {
    vec![0.0; samples_for(secs)]
}

/// Feed audio chunk by chunk, collecting finished utterances
fn feed(segmenter: &mut UtteranceSegmenter, samples: &[f32]) -> Vec<Vec<f32>> {
    samples
        .chunks(CHUNK)
        .filter_map(|chunk| segmenter.push(chunk))
        .collect()
}

#[test]
fn test_segmenter_starts_idle() {
    let segmenter = UtteranceSegmenter::new();
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_silence_is_ignored() {
    let mut segmenter = UtteranceSegmenter::new();
    assert!(feed(&mut segmenter, &silence(2.0)).is_empty());
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_speech_then_silence_closes_utterance() {
    let mut segmenter = UtteranceSegmenter::new();

    let voiced = speech(0.5);
    assert!(feed(&mut segmenter, &voiced).is_empty());
    assert_eq!(segmenter.state(), SegmenterState::InSpeech);

    let utterances = feed(&mut segmenter, &silence(1.0));
    assert_eq!(utterances.len(), 1);
    // speech plus the trailing silence that closed it
    assert_eq!(utterances[0].len(), voiced.len() + 6 * CHUNK);
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_short_noise_is_discarded() {
    let mut segmenter = UtteranceSegmenter::new();

    let click = speech(0.1);
    feed(&mut segmenter, &click);
    assert_eq!(segmenter.state(), SegmenterState::InSpeech);

    assert!(feed(&mut segmenter, &silence(1.5)).is_empty());
    assert_eq!(segmenter.state(), SegmenterState::Idle);
}

#[test]
fn test_long_speech_is_cut() {
    let mut segmenter = UtteranceSegmenter::new();
    let utterances = feed(&mut segmenter, &speech(16.0));

    assert_eq!(utterances.len(), 1);
    assert_eq!(utterances[0].len(), SAMPLE_RATE as usize * 15);
}

#[test]
fn test_reset_drops_partial_utterance() {
    let mut segmenter = UtteranceSegmenter::new();
    feed(&mut segmenter, &speech(0.5));

    segmenter.reset();
    assert_eq!(segmenter.state(), SegmenterState::Idle);
    assert!(feed(&mut segmenter, &silence(1.0)).is_empty());
}

#[test]
fn test_utterance_encodes_as_16k_mono_wav() {
    let mut segmenter = UtteranceSegmenter::new();
    let mut audio = speech(0.8);
    audio.extend(silence(1.0));
    let utterance = feed(&mut segmenter, &audio).pop().unwrap();

    let wav = samples_to_wav(&utterance, SAMPLE_RATE).unwrap();
    assert_eq!(&wav[0..4], b"RIFF");

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!((spec.sample_rate, spec.channels, spec.bits_per_sample), (SAMPLE_RATE, 1, 16));
    assert_eq!(reader.len() as usize, utterance.len());
}

#[test]
fn test_persona_drives_voice_choice() {
    let selector = VoiceSelector::new();
    let catalog = test_catalog();

    let jarvis = classify_persona("Jarvis");
    assert_eq!(jarvis.gender_preference, Some(Gender::Male));
    let selection = selector.select("Good evening, sir", jarvis, &catalog);
    assert_eq!(selection.language, Language::Primary);
    assert!(matches!(selection.voice, VoiceHandle::Voice(ref v) if v.id == "en-m"));

    let shifra = classify_persona("Shifra");
    let selection = selector.select("नमस्ते, मैं आपकी कैसे मदद कर सकती हूँ", shifra, &catalog);
    assert_eq!(selection.locale(), "hi-IN");
    assert!(matches!(selection.voice, VoiceHandle::Voice(ref v) if v.id == "hi-f"));
}

#[test]
fn test_selection_without_catalog_is_default() {
    let selection = VoiceSelector::new().select("hello", classify_persona("Shifra"), &[]);
    assert_eq!(selection.voice, VoiceHandle::Default);
}

//! Synthesis voice selection
//!
//! Picks a voice for one reply from whatever the catalog holds right now.
//! Catalogs fill asynchronously, so callers re-run selection when the
//! catalog changes before playback has started.

use crate::persona::{Gender, VoicePersona};

use super::{Language, VoiceHandle, VoiceInfo};

/// Voice-name fragments that mark a female voice
const FEMALE_VOICE_HINTS: &[&str] = &[
    "female", "woman", "zira", "samantha", "victoria", "karen", "moira", "tessa", "fiona", "susan",
    "hazel", "heera", "kalpana", "swara", "lekha", "aditi", "raveena", "veena", "nova", "shimmer",
    "coral", "sage",
];

/// Voice-name fragments that mark a male voice
const MALE_VOICE_HINTS: &[&str] = &[
    "male", "david", "mark", "daniel", "fred", "ravi", "hemant", "madhur", "rishi", "prabhat",
    "onyx", "echo", "fable", "ash",
];

/// Result of one selection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSelection {
    pub language: Language,
    pub voice: VoiceHandle,
}

impl VoiceSelection {
    /// Locale tag the synthesis engine should speak in
    #[must_use]
    pub const fn locale(&self) -> &'static str {
        self.language.locale()
    }
}

/// Chooses the best available synthesis voice for a reply
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceSelector;

impl VoiceSelector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Select a voice for `text` spoken by `persona`
    ///
    /// Falls back to [`VoiceHandle::Default`] when nothing in the catalog
    /// speaks the detected language (including an empty catalog).
    #[must_use]
    pub fn select(
        &self,
        text: &str,
        persona: VoicePersona,
        catalog: &[VoiceInfo],
    ) -> VoiceSelection {
        let language = Language::detect(text).unwrap_or_else(|| persona.locale_hint.language());

        let mut candidates: Vec<&VoiceInfo> = catalog
            .iter()
            .filter(|v| language.matches(&v.lang))
            .collect();
        // exact locale before regional variants, otherwise catalog order
        candidates.sort_by_key(|v| !language.matches_exactly(&v.lang));

        let preferred = match persona.gender_preference {
            Some(Gender::Female) => candidates.iter().find(|v| is_female(&v.name)),
            Some(Gender::Male) => candidates
                .iter()
                .find(|v| is_male(&v.name) && !is_female(&v.name)),
            None => None,
        };

        let voice = preferred
            .or_else(|| candidates.first())
            .map_or(VoiceHandle::Default, |v| VoiceHandle::Voice((*v).clone()));

        tracing::debug!(
            language = language.locale(),
            voice = %voice,
            catalog = catalog.len(),
            "voice selected"
        );

        VoiceSelection { language, voice }
    }
}

fn is_female(name: &str) -> bool {
    let lower = name.to_lowercase();
    FEMALE_VOICE_HINTS.iter().any(|h| lower.contains(h))
}

fn is_male(name: &str) -> bool {
    let lower = name.to_lowercase();
    MALE_VOICE_HINTS.iter().any(|h| lower.contains(h))
}

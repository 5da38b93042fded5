//! Voice persona inferred from the assistant's display name
//!
//! The inference is a naming heuristic and is only ever used to rank
//! synthesis voices. A wrong guess means a different voice, nothing more.

use crate::voice::Language;

/// Preferred gender of the synthesis voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
}

/// Which of the two supported languages the persona leans towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocaleHint {
    #[default]
    Primary,
    Secondary,
}

impl LocaleHint {
    /// Language this hint stands for
    #[must_use]
    pub const fn language(self) -> Language {
        match self {
            Self::Primary => Language::Primary,
            Self::Secondary => Language::Secondary,
        }
    }
}

/// Voice preferences for one utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoicePersona {
    pub locale_hint: LocaleHint,
    pub gender_preference: Option<Gender>,
}

/// Assistant names that are unambiguously female
const FEMALE_NAMES: &[&str] = &[
    "alexa", "siri", "cortana", "friday", "shifra", "sara", "sarah", "maya", "priya", "ananya",
    "kavya", "nova", "aria", "luna", "zara", "ira", "diya", "riya", "tara", "swara",
];

/// Assistant names that are unambiguously male
const MALE_NAMES: &[&str] = &[
    "jarvis", "alfred", "hal", "max", "arjun", "rohan", "karan", "vikram", "dev", "adam", "orin",
    "kitt", "bixby", "jeeves",
];

/// Name endings that usually mark a female name
const FEMALE_SUFFIXES: &[&str] = &["a", "i", "ee", "ya", "elle", "ine", "ette", "y"];

/// Infer voice preferences from the assistant's display name
///
/// Explicit name lists win over suffix rules; names in Devanagari lean
/// towards the secondary language.
#[must_use]
pub fn classify_persona(name: &str) -> VoicePersona {
    let trimmed = name.trim();

    let locale_hint = if Language::detect(trimmed) == Some(Language::Secondary) {
        LocaleHint::Secondary
    } else {
        LocaleHint::Primary
    };

    let lower = trimmed.to_lowercase();
    let first = lower
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    let gender_preference = if first.is_empty() {
        None
    } else if FEMALE_NAMES.contains(&first) {
        Some(Gender::Female)
    } else if MALE_NAMES.contains(&first) {
        Some(Gender::Male)
    } else if first.chars().all(|c| c.is_ascii_alphabetic())
        && FEMALE_SUFFIXES.iter().any(|s| first.ends_with(s))
    {
        Some(Gender::Female)
    } else if first.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(Gender::Male)
    } else {
        None
    };

    VoicePersona {
        locale_hint,
        gender_preference,
    }
}

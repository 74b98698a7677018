use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;
// Boundary types shared with backend implementations
pub use interfaces::defs::{
    AlphabetEntry, BoundingRegion, ImageBackend, ImageBackendError, ImageQuality, ImageRequest,
    ImageSize, OcrBackend, OcrError, OcrSpan,
};

use crate::validator::LegibilityVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Validated,
    UnvalidatedAccepted,
    Failed,
}

impl CardStatus {
    /// Whether a card image exists for this outcome.
    pub fn has_image(&self) -> bool {
        matches!(self, CardStatus::Validated | CardStatus::UnvalidatedAccepted)
    }
}

impl std::fmt::Display for CardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CardStatus::Validated => "validated",
            CardStatus::UnvalidatedAccepted => "unvalidated_accepted",
            CardStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Terminal outcome for one alphabet entry. Never mutated after it is written;
/// a later record for the same letter supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub letter: String,
    pub word: String,
    pub file_path: Option<PathBuf>,
    pub attempts_used: u32,
    pub final_status: CardStatus,
    pub ocr_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

impl CardRecord {
    pub fn failed(entry: &AlphabetEntry, attempts_used: u32, run_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            letter: entry.letter.clone(),
            word: entry.word.clone(),
            file_path: None,
            attempts_used,
            final_status: CardStatus::Failed,
            ocr_confidence: None,
            error: Some(error.into()),
            run_id,
            recorded_at: Utc::now(),
        }
    }

    pub fn entry(&self) -> AlphabetEntry {
        AlphabetEntry::new(self.letter.clone(), self.word.clone())
    }
}

/// One call to the image backend that produced bytes, plus its verdict.
/// Lives only while a single entry is being processed.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub entry: AlphabetEntry,
    pub attempt_index: u32,
    pub prompt_used: String,
    pub image_bytes: Vec<u8>,
    pub verdict: LegibilityVerdict,
    pub passed: bool,
}

/// Persisted progress of a coordinator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub processed_letters: BTreeSet<String>,
    pub remaining_letters: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub last_checkpoint_at: DateTime<Utc>,
}

impl RunState {
    /// Every configured letter pending, in configured order.
    pub fn fresh(entries: &[AlphabetEntry]) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            processed_letters: BTreeSet::new(),
            remaining_letters: entries.iter().map(|e| e.letter.clone()).collect(),
            started_at: now,
            last_checkpoint_at: now,
        }
    }

    /// Rebuilds the pending sequence from a persisted state and the configured
    /// alphabet. Letters no longer configured are dropped from the processed
    /// set; configured letters not yet processed stay pending in configured order.
    pub fn resume(persisted: RunState, entries: &[AlphabetEntry]) -> Self {
        let configured: BTreeSet<&str> = entries.iter().map(|e| e.letter.as_str()).collect();
        let processed_letters: BTreeSet<String> = persisted
            .processed_letters
            .into_iter()
            .filter(|letter| configured.contains(letter.as_str()))
            .collect();
        let remaining_letters = entries
            .iter()
            .filter(|e| !processed_letters.contains(&e.letter))
            .map(|e| e.letter.clone())
            .collect();

        Self {
            run_id: persisted.run_id,
            processed_letters,
            remaining_letters,
            started_at: persisted.started_at,
            last_checkpoint_at: persisted.last_checkpoint_at,
        }
    }

    pub fn next_pending(&self) -> Option<&str> {
        self.remaining_letters.first().map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_letters.is_empty()
    }

    /// Moves `letter` from pending to processed.
    pub fn complete_entry(mut self, letter: &str, at: DateTime<Utc>) -> Self {
        self.remaining_letters.retain(|l| l != letter);
        self.processed_letters.insert(letter.to_string());
        self.last_checkpoint_at = at;
        self
    }
}

/// Knobs for the adaptive card generator.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub image_size: ImageSize,
    pub image_quality: ImageQuality,
    pub max_attempts: u32,
    pub max_transient_retries: u32,
    pub retry_delay_ms: u64,
    pub rate_limit_ms: u64,
    pub confidence_threshold: f32,
    pub ocr_language: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            image_size: ImageSize::Square,
            image_quality: ImageQuality::High,
            max_attempts: 3,
            max_transient_retries: 3,
            retry_delay_ms: 1000,
            rate_limit_ms: 2000,
            confidence_threshold: 0.6,
            ocr_language: "rus+eng".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PosterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid alphabet: {0}")]
    InvalidAlphabet(String),

    #[error("Image backend failed after {attempts} calls: {source}")]
    BackendExhausted {
        attempts: u32,
        #[source]
        source: ImageBackendError,
    },

    #[error("OCR unavailable after {attempts} calls: {source}")]
    OcrUnavailable {
        attempts: u32,
        #[source]
        source: OcrError,
    },

    #[error("Illegal coordinator transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: crate::coordinator::CoordinatorState,
        to: crate::coordinator::CoordinatorState,
    },

    #[error("Letter not in alphabet: {0}")]
    UnknownLetter(String),
}

pub type Result<T> = std::result::Result<T, PosterError>;

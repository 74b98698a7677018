use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One (letter, word) pair of the configured alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlphabetEntry {
    pub letter: String,
    pub word: String,
}

impl AlphabetEntry {
    pub fn new(letter: impl Into<String>, word: impl Into<String>) -> Self {
        Self {
            letter: letter.into(),
            word: word.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    Square,
    Portrait,
    Landscape,
}

impl ImageSize {
    /// Pixel dimensions understood by the image API.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Portrait => "1024x1536",
            ImageSize::Landscape => "1536x1024",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Low,
    Medium,
    High,
}

impl ImageQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageQuality::Low => "low",
            ImageQuality::Medium => "medium",
            ImageQuality::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub quality: ImageQuality,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageBackendError {
    #[error("rate limited by image backend")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("image backend rejected the API key")]
    InvalidKey,

    #[error("image backend server error: {0}")]
    Server(String),

    #[error("image backend unreachable: {0}")]
    Transport(String),
}

/// Pixel box of a detected text span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSpan {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f32,
    pub region: BoundingRegion,
}

impl OcrSpan {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            region: BoundingRegion::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),
}

// Object style note:
// Backends are called strictly one at a time by the coordinator, but they
// are held behind `Arc<dyn ...>` so implementations must be Send + Sync.
// Neither trait carries retry logic; retrying and rate limiting belong to
// the caller.

/// Turns a prompt into raw image bytes.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn backend_name(&self) -> String;

    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>, ImageBackendError>;
}

/// Detects text in raw image bytes for a target script/language.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn engine_name(&self) -> String;

    async fn recognize(&self, image: &[u8], language: &str) -> Result<Vec<OcrSpan>, OcrError>;
}

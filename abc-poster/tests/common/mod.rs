#![allow(dead_code)]

// Shared test doubles and helpers
pub use abc_poster::{
    AlphabetEntry, CardGenerator, CardStore, GenerationConfig, ImageBackend, ImageBackendError,
    ImageRequest, LegibilityValidator, OcrBackend, OcrError, OcrSpan,
};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use tokio::time::Instant;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Bytes that the quoted-text OCR reads back as the given letter and word.
pub fn legible_image(letter: &str, word: &str) -> Vec<u8> {
    format!("\"{}\" \"{}\"", letter, word).into_bytes()
}

#[derive(Debug, Clone)]
pub struct ImageCall {
    pub at: Instant,
    pub prompt: String,
}

/// Image backend that plays back a script, then echoes the prompt as the
/// image. An echoed prompt always reads as legible to [`QuotedTextOcr`]
/// because prompts quote the letter and the word.
pub struct MockImageBackend {
    script: Mutex<VecDeque<Result<Vec<u8>, ImageBackendError>>>,
    always_fail: Option<ImageBackendError>,
    fail_when_prompt_contains: Option<(String, ImageBackendError)>,
    calls: Mutex<Vec<ImageCall>>,
}

impl MockImageBackend {
    pub fn echo() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            always_fail: None,
            fail_when_prompt_contains: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ImageBackendError) -> Self {
        Self {
            always_fail: Some(error),
            ..Self::echo()
        }
    }

    pub fn with_script(self, script: Vec<Result<Vec<u8>, ImageBackendError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn failing_for(mut self, prompt_fragment: &str, error: ImageBackendError) -> Self {
        self.fail_when_prompt_contains = Some((prompt_fragment.to_string(), error));
        self
    }

    pub fn calls(&self) -> Vec<ImageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageBackend for MockImageBackend {
    fn backend_name(&self) -> String {
        "Mock Image Backend".to_string()
    }

    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>, ImageBackendError> {
        self.calls.lock().unwrap().push(ImageCall {
            at: Instant::now(),
            prompt: request.prompt.clone(),
        });

        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }
        if let Some((fragment, error)) = &self.fail_when_prompt_contains {
            if request.prompt.contains(fragment.as_str()) {
                return Err(error.clone());
            }
        }
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        Ok(request.prompt.clone().into_bytes())
    }
}

/// OCR that reads every double-quoted segment of the image bytes as a span
/// with confidence 0.9. Can be told to be unavailable for the first N calls.
pub struct QuotedTextOcr {
    unavailable_for: Mutex<Option<u32>>,
    calls: Mutex<u32>,
}

impl QuotedTextOcr {
    pub fn new() -> Self {
        Self {
            unavailable_for: Mutex::new(Some(0)),
            calls: Mutex::new(0),
        }
    }

    pub fn unavailable_for(calls: u32) -> Self {
        Self {
            unavailable_for: Mutex::new(Some(calls)),
            calls: Mutex::new(0),
        }
    }

    pub fn always_unavailable() -> Self {
        Self {
            unavailable_for: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

pub fn quoted_spans(image: &[u8]) -> Vec<OcrSpan> {
    String::from_utf8_lossy(image)
        .split('"')
        .skip(1)
        .step_by(2)
        .filter(|s| !s.is_empty())
        .map(|s| OcrSpan::new(s, 0.9))
        .collect()
}

#[async_trait]
impl OcrBackend for QuotedTextOcr {
    fn engine_name(&self) -> String {
        "Quoted Text OCR".to_string()
    }

    async fn recognize(&self, image: &[u8], _language: &str) -> Result<Vec<OcrSpan>, OcrError> {
        *self.calls.lock().unwrap() += 1;

        let mut remaining = self.unavailable_for.lock().unwrap();
        match remaining.as_mut() {
            None => return Err(OcrError::EngineUnavailable("engine offline".to_string())),
            Some(n) if *n > 0 => {
                *n -= 1;
                return Err(OcrError::EngineUnavailable("engine busy".to_string()));
            }
            Some(_) => {}
        }

        Ok(quoted_spans(image))
    }
}

pub fn test_config() -> GenerationConfig {
    GenerationConfig {
        max_attempts: 3,
        max_transient_retries: 2,
        retry_delay_ms: 100,
        rate_limit_ms: 0,
        ..Default::default()
    }
}

pub fn generator(
    backend: Arc<MockImageBackend>,
    ocr: Arc<QuotedTextOcr>,
    storage: &Path,
    config: GenerationConfig,
) -> CardGenerator {
    let validator = LegibilityValidator::new(ocr, "eng");
    CardGenerator::new(backend, validator, CardStore::new(storage), config)
}

use crate::types::{OcrBackend, OcrError, OcrSpan};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one legibility check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegibilityVerdict {
    pub letter_detected: bool,
    pub word_detected: bool,
    pub confidence: f32,
}

impl LegibilityVerdict {
    pub fn passed(&self) -> bool {
        self.letter_detected && self.word_detected
    }
}

/// Case-folds and drops whitespace and punctuation. Diacritics are kept, so
/// `Ё` and `Е` stay different letters.
pub fn normalize_token(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits spans into normalized tokens, each carrying its span's confidence.
fn tokens(spans: &[OcrSpan]) -> Vec<(String, f32)> {
    spans
        .iter()
        .flat_map(|span| {
            span.text
                .split_whitespace()
                .map(normalize_token)
                .filter(|t| !t.is_empty())
                .map(move |t| (t, span.confidence))
        })
        .collect()
}

/// Decides legibility from detected spans.
///
/// The letter must appear as an isolated token; the word must appear as a
/// token equal to it or starting with it. Only tokens at or above `threshold`
/// count. The reported confidence is the weaker of the two matches when both
/// are found, otherwise the best confidence of whatever did match.
pub fn judge(spans: &[OcrSpan], expected_letter: &str, expected_word: &str, threshold: f32) -> LegibilityVerdict {
    let letter = normalize_token(expected_letter);
    let word = normalize_token(expected_word);
    let tokens = tokens(spans);

    let best = |matches: &dyn Fn(&str) -> bool| -> Option<f32> {
        tokens
            .iter()
            .filter(|(t, _)| matches(t))
            .map(|(_, c)| *c)
            .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.max(c))))
    };

    let letter_conf = if letter.is_empty() { None } else { best(&|t| t == letter) };
    let word_conf = if word.is_empty() { None } else { best(&|t| t.starts_with(word.as_str())) };

    let letter_detected = letter_conf.is_some_and(|c| c >= threshold);
    let word_detected = word_conf.is_some_and(|c| c >= threshold);

    let confidence = match (letter_conf, word_conf) {
        (Some(l), Some(w)) => l.min(w),
        (Some(c), None) | (None, Some(c)) => c,
        (None, None) => 0.0,
    };

    LegibilityVerdict {
        letter_detected,
        word_detected,
        confidence,
    }
}

/// Wraps an OCR backend and applies [`judge`] to what it reads.
#[derive(Clone)]
pub struct LegibilityValidator {
    ocr: Arc<dyn OcrBackend>,
    language: String,
}

impl LegibilityValidator {
    pub fn new(ocr: Arc<dyn OcrBackend>, language: impl Into<String>) -> Self {
        Self {
            ocr,
            language: language.into(),
        }
    }

    /// An unreachable engine comes back as `Err`; a readable image without a
    /// match comes back as `Ok` with a failing verdict.
    pub async fn validate(
        &self,
        image: &[u8],
        expected_letter: &str,
        expected_word: &str,
        confidence_threshold: f32,
    ) -> Result<LegibilityVerdict, OcrError> {
        debug!(
            "Running {} on {} bytes for {} - {}",
            self.ocr.engine_name(),
            image.len(),
            expected_letter,
            expected_word
        );

        let spans = self.ocr.recognize(image, &self.language).await?;
        let verdict = judge(&spans, expected_letter, expected_word, confidence_threshold);

        if verdict.passed() {
            info!(
                "OCR confirmed {} - {} (confidence {:.2})",
                expected_letter, expected_word, verdict.confidence
            );
        } else {
            let detected: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
            warn!(
                "OCR could not confirm {} - {} (letter: {}, word: {}); detected {:?}",
                expected_letter, expected_word, verdict.letter_detected, verdict.word_detected, detected
            );
        }

        Ok(verdict)
    }
}

//! Adaptive card generation.
//!
//! Two failure kinds flow through here and must not be confused:
//! - infrastructure failures (image backend or OCR engine not answering) are
//!   retried in place with exponential backoff and never consume a legibility
//!   attempt;
//! - content failures (an image OCR cannot read) move to the next attempt
//!   index, which always means a more emphatic prompt.

use crate::prompt::{build_prompt_for_size, EmphasisLevel, MAX_ESCALATION_ATTEMPTS};
use crate::store::CardStore;
use crate::throttle::{retry_backoff, RateLimiter};
use crate::types::{
    AlphabetEntry, CardRecord, CardStatus, GenerationAttempt, GenerationConfig, ImageBackend,
    ImageBackendError, ImageRequest, PosterError, Result,
};
use crate::validator::{LegibilityValidator, LegibilityVerdict};
use backoff::backoff::Backoff;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How one attempt index ended.
enum AttemptOutcome {
    Legible(GenerationAttempt),
    Illegible(GenerationAttempt),
    BackendExhausted(PosterError),
}

pub struct CardGenerator {
    image_backend: Arc<dyn ImageBackend>,
    validator: LegibilityValidator,
    store: CardStore,
    limiter: RateLimiter,
    config: GenerationConfig,
}

impl CardGenerator {
    pub fn new(
        image_backend: Arc<dyn ImageBackend>,
        validator: LegibilityValidator,
        store: CardStore,
        config: GenerationConfig,
    ) -> Self {
        let limiter = RateLimiter::from_millis(config.rate_limit_ms);
        Self {
            image_backend,
            validator,
            store,
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn store(&self) -> &CardStore {
        &self.store
    }

    /// Runs the escalation ladder for one entry and returns its terminal record.
    ///
    /// `Err` is reserved for the card store failing; every backend or OCR
    /// problem ends up in the returned record.
    pub async fn generate(&mut self, entry: &AlphabetEntry, max_attempts: u32, run_id: Uuid) -> Result<CardRecord> {
        // Past the top rung a retry would repeat the same prompt.
        if max_attempts > MAX_ESCALATION_ATTEMPTS {
            warn!(
                "Capping {} attempts to the {} escalation levels",
                max_attempts, MAX_ESCALATION_ATTEMPTS
            );
        }
        let max_attempts = max_attempts.min(MAX_ESCALATION_ATTEMPTS);

        info!(
            "Starting adaptive generation for {} - {} (up to {} attempts)",
            entry.letter, entry.word, max_attempts
        );

        let mut last_image: Option<GenerationAttempt> = None;
        let mut last_error: Option<PosterError> = None;

        for attempt_index in 0..max_attempts {
            info!(
                "Attempt {}/{} for {} - {} ({:?} emphasis)",
                attempt_index + 1,
                max_attempts,
                entry.letter,
                entry.word,
                EmphasisLevel::for_attempt(attempt_index)
            );

            let outcome = match self.run_attempt(entry, attempt_index).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // OCR engine never answered: infrastructure, not content, so
                    // this attempt does not count.
                    error!("Giving up on {} - {}: {}", entry.letter, entry.word, e);
                    return Ok(CardRecord::failed(entry, attempt_index, run_id, e.to_string()));
                }
            };

            match outcome {
                AttemptOutcome::Legible(attempt) => {
                    let path = self.store.write_card(entry, &attempt.image_bytes)?;
                    info!(
                        "Validated {} - {} in {} attempt(s)",
                        entry.letter,
                        entry.word,
                        attempt_index + 1
                    );
                    return Ok(CardRecord {
                        letter: entry.letter.clone(),
                        word: entry.word.clone(),
                        file_path: Some(path),
                        attempts_used: attempt_index + 1,
                        final_status: CardStatus::Validated,
                        ocr_confidence: Some(attempt.verdict.confidence),
                        error: None,
                        run_id,
                        recorded_at: Utc::now(),
                    });
                }
                AttemptOutcome::Illegible(attempt) => {
                    if attempt_index + 1 < max_attempts {
                        info!("Escalating prompt for {} - {}", entry.letter, entry.word);
                    }
                    last_image = Some(attempt);
                }
                AttemptOutcome::BackendExhausted(e) => {
                    warn!(
                        "Attempt {} for {} - {} produced no image: {}",
                        attempt_index + 1,
                        entry.letter,
                        entry.word,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_image {
            Some(attempt) => {
                let path = self.store.write_card(entry, &attempt.image_bytes)?;
                warn!(
                    "Keeping unvalidated card for {} - {} from attempt {} after {} attempts",
                    entry.letter,
                    entry.word,
                    attempt.attempt_index + 1,
                    max_attempts
                );
                Ok(CardRecord {
                    letter: entry.letter.clone(),
                    word: entry.word.clone(),
                    file_path: Some(path),
                    attempts_used: max_attempts,
                    final_status: CardStatus::UnvalidatedAccepted,
                    ocr_confidence: Some(attempt.verdict.confidence),
                    error: None,
                    run_id,
                    recorded_at: Utc::now(),
                })
            }
            None => {
                let message = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no attempts were made".to_string());
                error!("No image produced for {} - {}: {}", entry.letter, entry.word, message);
                Ok(CardRecord::failed(entry, max_attempts, run_id, message))
            }
        }
    }

    /// One attempt index: build the prompt, get an image, judge it.
    /// `Err` means the OCR engine stayed unavailable.
    async fn run_attempt(&mut self, entry: &AlphabetEntry, attempt_index: u32) -> Result<AttemptOutcome> {
        let prompt = build_prompt_for_size(&entry.letter, &entry.word, attempt_index, self.config.image_size);

        let image_bytes = match self.request_image(&prompt).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(AttemptOutcome::BackendExhausted(e)),
        };

        let verdict = self.validate_with_retry(&image_bytes, entry).await?;
        let passed = verdict.passed();
        let attempt = GenerationAttempt {
            entry: entry.clone(),
            attempt_index,
            prompt_used: prompt,
            image_bytes,
            verdict,
            passed,
        };

        Ok(if passed {
            AttemptOutcome::Legible(attempt)
        } else {
            AttemptOutcome::Illegible(attempt)
        })
    }

    /// Calls the image backend, retrying transient failures on the same prompt
    /// up to the retry ceiling.
    async fn request_image(&mut self, prompt: &str) -> Result<Vec<u8>> {
        let request = ImageRequest {
            prompt: prompt.to_string(),
            size: self.config.image_size,
            quality: self.config.image_quality,
        };

        let mut backoff = retry_backoff(self.config.retry_delay_ms);
        let max_retries = self.config.max_transient_retries;
        let mut last_error = None;
        let mut calls = 0;

        for retry in 0..=max_retries {
            self.limiter.acquire().await;
            calls += 1;

            match self.image_backend.generate(&request).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    let floor = match &e {
                        ImageBackendError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => Duration::ZERO,
                    };
                    if retry < max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            let delay = delay.max(floor);
                            warn!(
                                "{} call {} failed: {}; retrying in {:?}",
                                self.image_backend.backend_name(),
                                calls,
                                e,
                                delay
                            );
                            last_error = Some(e);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    last_error = Some(e);
                    break;
                }
            }
        }

        Err(PosterError::BackendExhausted {
            attempts: calls,
            source: last_error.unwrap_or_else(|| ImageBackendError::Server("no response".to_string())),
        })
    }

    async fn validate_with_retry(&self, image: &[u8], entry: &AlphabetEntry) -> Result<LegibilityVerdict> {
        let mut backoff = retry_backoff(self.config.retry_delay_ms);
        let max_retries = self.config.max_transient_retries;
        let mut calls = 0;

        loop {
            calls += 1;
            match self
                .validator
                .validate(image, &entry.letter, &entry.word, self.config.confidence_threshold)
                .await
            {
                Ok(verdict) => return Ok(verdict),
                Err(e) => {
                    if calls <= max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("OCR call {} failed: {}; retrying in {:?}", calls, e, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Err(PosterError::OcrUnavailable { attempts: calls, source: e });
                }
            }
        }
    }
}

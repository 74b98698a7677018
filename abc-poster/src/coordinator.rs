//! Run coordinator.
//!
//! Walks the configured alphabet one entry at a time, hands each entry to the
//! card generator, logs the terminal record and checkpoints after every entry.
//! Progress lives in an explicit [`RunState`] that [`Coordinator::step`] takes
//! and returns, so resuming is a function of the persisted state plus the
//! configured alphabet and nothing else.

use crate::alphabet::Alphabet;
use crate::generator::CardGenerator;
use crate::store::{CardStore, CheckpointStore, MetadataLog};
use crate::types::{AlphabetEntry, CardRecord, CardStatus, PosterError, Result, RunState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    LoadingState,
    Processing,
    Checkpointing,
    Completed,
    Aborted,
}

impl CoordinatorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CoordinatorState::Completed | CoordinatorState::Aborted)
    }
}

pub fn allowed_transitions(from: CoordinatorState) -> Vec<CoordinatorState> {
    use CoordinatorState::*;
    match from {
        Idle => vec![LoadingState, Aborted],
        // Nothing pending after a resume goes straight to Completed.
        LoadingState => vec![Processing, Completed, Aborted],
        Processing => vec![Checkpointing, Aborted],
        Checkpointing => vec![Processing, Completed, Aborted],
        Completed => vec![],
        Aborted => vec![],
    }
}

pub fn validate_transition(from: CoordinatorState, to: CoordinatorState) -> Result<()> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PosterError::IllegalTransition { from, to })
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub max_attempts: u32,
    pub resume: bool,
    /// Stop after this many entries in this run, leaving the rest pending.
    pub limit: Option<usize>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            resume: false,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub final_state: CoordinatorState,
    pub processed_this_run: usize,
    pub validated: usize,
    pub degraded: usize,
    pub failed: usize,
    pub remaining: usize,
}

pub struct Coordinator {
    alphabet: Alphabet,
    generator: CardGenerator,
    log: MetadataLog,
    checkpoints: CheckpointStore,
    options: CoordinatorOptions,
    interrupt: Arc<AtomicBool>,
    state: CoordinatorState,
    outcomes: Vec<CardStatus>,
}

impl Coordinator {
    pub fn new(
        alphabet: Alphabet,
        generator: CardGenerator,
        log: MetadataLog,
        checkpoints: CheckpointStore,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            alphabet,
            generator,
            log,
            checkpoints,
            options,
            interrupt: Arc::new(AtomicBool::new(false)),
            state: CoordinatorState::Idle,
            outcomes: Vec::new(),
        }
    }

    /// Flag that stops the run once the in-flight entry is checkpointed.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    fn transition(&mut self, to: CoordinatorState) -> Result<()> {
        validate_transition(self.state, to)?;
        debug!("Coordinator: {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    fn should_stop(&self) -> bool {
        if self.interrupt.load(Ordering::SeqCst) {
            warn!("Interrupt received, stopping after the last checkpoint");
            return true;
        }
        if let Some(limit) = self.options.limit {
            if self.outcomes.len() >= limit {
                info!("Reached limit of {} entries for this run", limit);
                return true;
            }
        }
        false
    }

    /// Initial run state: the persisted one when resuming, else a fresh one.
    fn load_run_state(&self) -> Result<RunState> {
        if !self.options.resume {
            return Ok(RunState::fresh(self.alphabet.entries()));
        }

        match self.checkpoints.load()? {
            Some(persisted) => {
                let run = RunState::resume(persisted, self.alphabet.entries());
                info!(
                    "Resuming run {}: {} processed, {} remaining",
                    run.run_id,
                    run.processed_letters.len(),
                    run.remaining_letters.len()
                );
                Ok(run)
            }
            None => {
                warn!(
                    "No checkpoint at {}, starting a fresh run",
                    self.checkpoints.path().display()
                );
                Ok(RunState::fresh(self.alphabet.entries()))
            }
        }
    }

    /// Drives the run until every entry has a terminal record, the limit is
    /// reached or an interrupt arrives.
    pub async fn run(&mut self) -> Result<RunSummary> {
        match self.drive().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("Run aborted: {}", e);
                self.state = CoordinatorState::Aborted;
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<RunSummary> {
        self.transition(CoordinatorState::LoadingState)?;
        let mut run = self.load_run_state()?;
        self.checkpoints.save(&run)?;

        info!(
            "Run {} over {} letters, {} pending",
            run.run_id,
            self.alphabet.len(),
            run.remaining_letters.len()
        );

        if run.is_complete() {
            self.transition(CoordinatorState::Completed)?;
            self.checkpoints.clear()?;
            return Ok(self.summary(&run));
        }

        self.transition(CoordinatorState::Processing)?;
        loop {
            if self.should_stop() {
                self.transition(CoordinatorState::Aborted)?;
                info!(
                    "Run {} stopped with {} letters pending; resume to continue",
                    run.run_id,
                    run.remaining_letters.len()
                );
                break;
            }

            run = self.step(run).await?;

            if run.is_complete() {
                self.transition(CoordinatorState::Completed)?;
                self.checkpoints.clear()?;
                break;
            }
            self.transition(CoordinatorState::Processing)?;
        }

        let summary = self.summary(&run);
        info!(
            "Run {} finished as {:?}: {} validated, {} degraded, {} failed, {} remaining",
            summary.run_id,
            summary.final_state,
            summary.validated,
            summary.degraded,
            summary.failed,
            summary.remaining
        );
        Ok(summary)
    }

    /// Processes the first pending entry of `run` and returns the advanced
    /// state, already logged and checkpointed.
    pub async fn step(&mut self, run: RunState) -> Result<RunState> {
        let letter = match run.next_pending() {
            Some(letter) => letter.to_string(),
            None => return Ok(run),
        };
        let entry = self
            .alphabet
            .get(&letter)
            .cloned()
            .ok_or_else(|| PosterError::UnknownLetter(letter.clone()))?;

        let position = run.processed_letters.len() + 1;
        info!(
            "[{}/{}] Processing {} - {}",
            position,
            self.alphabet.len(),
            entry.letter,
            entry.word
        );

        let record = match self
            .generator
            .generate(&entry, self.options.max_attempts, run.run_id)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                // One letter never takes the rest of the run down with it.
                error!("Card for {} - {} failed: {}", entry.letter, entry.word, e);
                CardRecord::failed(&entry, 0, run.run_id, e.to_string())
            }
        };

        self.transition(CoordinatorState::Checkpointing)?;
        self.log.append(&record)?;
        self.outcomes.push(record.final_status);

        let run = run.complete_entry(&entry.letter, Utc::now());
        self.checkpoints.save(&run)?;
        Ok(run)
    }

    fn summary(&self, run: &RunState) -> RunSummary {
        let count = |status: CardStatus| self.outcomes.iter().filter(|s| **s == status).count();
        RunSummary {
            run_id: run.run_id,
            final_state: self.state,
            processed_this_run: self.outcomes.len(),
            validated: count(CardStatus::Validated),
            degraded: count(CardStatus::UnvalidatedAccepted),
            failed: count(CardStatus::Failed),
            remaining: run.remaining_letters.len(),
        }
    }
}

/// Generates one card outside a full run and logs its record.
pub async fn generate_single(
    generator: &mut CardGenerator,
    log: &MetadataLog,
    entry: &AlphabetEntry,
    max_attempts: u32,
) -> Result<CardRecord> {
    let record = generator.generate(entry, max_attempts, Uuid::new_v4()).await?;
    log.append(&record)?;
    Ok(record)
}

/// Per-letter view of the card store for the configured alphabet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationStatus {
    pub total: usize,
    pub validated: Vec<String>,
    pub degraded: Vec<String>,
    pub failed: Vec<String>,
    pub missing: Vec<String>,
}

impl GenerationStatus {
    /// Share of letters that have a card image, in percent.
    pub fn completion_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.validated.len() + self.degraded.len()) as f64 * 100.0 / self.total as f64
    }
}

pub fn generation_status(alphabet: &Alphabet, store: &CardStore, log: &MetadataLog) -> Result<GenerationStatus> {
    let records = store.scan(alphabet, log)?;
    let mut status = GenerationStatus {
        total: alphabet.len(),
        ..Default::default()
    };

    for entry in alphabet.entries() {
        let letter = entry.letter.clone();
        match records.get(&entry.letter).map(|r| r.final_status) {
            Some(CardStatus::Validated) => status.validated.push(letter),
            Some(CardStatus::UnvalidatedAccepted) => status.degraded.push(letter),
            Some(CardStatus::Failed) => status.failed.push(letter),
            None => status.missing.push(letter),
        }
    }

    Ok(status)
}

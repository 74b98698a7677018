//! Card store, metadata log and checkpoint file.
//!
//! All three live under the storage directory. Only the coordinator writes
//! them and only the assembler reads the cards back, so nothing here locks.

use crate::alphabet::Alphabet;
use crate::types::{AlphabetEntry, CardRecord, CardStatus, Result, RunState};
use chrono::Utc;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const METADATA_LOG_FILE: &str = "metadata.jsonl";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Replaces `path` with `bytes` without exposing a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// One image file per letter at a stable, letter-derived path.
#[derive(Debug, Clone)]
pub struct CardStore {
    root: PathBuf,
}

impl CardStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn card_path(&self, entry: &AlphabetEntry) -> PathBuf {
        self.root.join(format!("{}_{}.png", entry.letter, entry.word))
    }

    /// Writes (or overwrites) the card for `entry`.
    pub fn write_card(&self, entry: &AlphabetEntry, image: &[u8]) -> Result<PathBuf> {
        let path = self.card_path(entry);
        write_atomic(&path, image)?;
        info!("Saved card {} ({} bytes)", path.display(), image.len());
        Ok(path)
    }

    /// Latest record per letter, plus degraded stand-ins for card files that
    /// exist on disk without any record.
    pub fn scan(&self, alphabet: &Alphabet, log: &MetadataLog) -> Result<HashMap<String, CardRecord>> {
        let mut records = log.latest_by_letter()?;

        for entry in alphabet.entries() {
            if records.contains_key(&entry.letter) {
                continue;
            }
            let path = self.card_path(entry);
            if path.is_file() {
                debug!("Found unrecorded card on disk: {}", path.display());
                records.insert(
                    entry.letter.clone(),
                    CardRecord {
                        letter: entry.letter.clone(),
                        word: entry.word.clone(),
                        file_path: Some(path),
                        attempts_used: 0,
                        final_status: CardStatus::UnvalidatedAccepted,
                        ocr_confidence: None,
                        error: None,
                        run_id: Uuid::nil(),
                        recorded_at: Utc::now(),
                    },
                );
            }
        }

        Ok(records)
    }

    /// Deletes card images, the metadata log and the checkpoint. Returns the
    /// number of files removed.
    pub fn clean(&self) -> Result<usize> {
        if !self.root.is_dir() {
            return Ok(0);
        }

        let mut deleted = 0;
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            let is_card = path.extension().is_some_and(|ext| ext == "png");
            let is_bookkeeping = path
                .file_name()
                .is_some_and(|name| name == METADATA_LOG_FILE || name == CHECKPOINT_FILE);
            if path.is_file() && (is_card || is_bookkeeping) {
                fs::remove_file(&path)?;
                deleted += 1;
            }
        }

        info!("Cleanup completed: {} files deleted", deleted);
        Ok(deleted)
    }
}

/// Append-only JSON-lines log of terminal card records.
#[derive(Debug, Clone)]
pub struct MetadataLog {
    path: PathBuf,
}

impl MetadataLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(METADATA_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &CardRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let mut line = String::new();
        // A write cut short leaves no trailing newline; terminate it so this
        // record starts on a line of its own.
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                warn!("Terminating a partial line in {}", self.path.display());
                line.push('\n');
            }
        }
        line.push_str(&serde_json::to_string(record)?);
        line.push('\n');

        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        debug!("Logged {} - {} as {}", record.letter, record.word, record.final_status);
        Ok(())
    }

    /// Every readable record in write order. A line that does not parse (a
    /// write cut short by a crash) is skipped.
    pub fn read_all(&self) -> Result<Vec<CardRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut records = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CardRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable metadata line {}: {}", index + 1, e),
            }
        }

        Ok(records)
    }

    /// Most recent record per letter.
    pub fn latest_by_letter(&self) -> Result<HashMap<String, CardRecord>> {
        let mut latest = HashMap::new();
        for record in self.read_all()? {
            latest.insert(record.letter.clone(), record);
        }
        Ok(latest)
    }
}

/// The single checkpoint file holding the current [`RunState`].
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CHECKPOINT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<RunState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &RunState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json)?;
        debug!(
            "Checkpoint saved: {} processed, {} remaining",
            state.processed_letters.len(),
            state.remaining_letters.len()
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

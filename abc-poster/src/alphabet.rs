use crate::types::{AlphabetEntry, PosterError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

const RUSSIAN: &[(&str, &str)] = &[
    ("А", "арбуз"),
    ("Б", "барабан"),
    ("В", "волк"),
    ("Г", "гриб"),
    ("Д", "дом"),
    ("Е", "ель"),
    ("Ё", "ёжик"),
    ("Ж", "жираф"),
    ("З", "зебра"),
    ("И", "игрушка"),
    ("Й", "йогурт"),
    ("К", "кот"),
    ("Л", "лев"),
    ("М", "медведь"),
    ("Н", "нос"),
    ("О", "облако"),
    ("П", "пингвин"),
    ("Р", "рыба"),
    ("С", "солнце"),
    ("Т", "тигр"),
    ("У", "утка"),
    ("Ф", "флаг"),
    ("Х", "хлеб"),
    ("Ц", "цветок"),
    ("Ч", "часы"),
    ("Ш", "шар"),
    ("Щ", "щенок"),
    // No common nouns start with the signs or Ы; these contain them instead.
    ("Ъ", "съезд"),
    ("Ы", "сыр"),
    ("Ь", "конь"),
    ("Э", "экскаватор"),
    ("Ю", "юла"),
    ("Я", "яблоко"),
];

const ENGLISH: &[(&str, &str)] = &[
    ("A", "apple"),
    ("B", "ball"),
    ("C", "cat"),
    ("D", "dog"),
    ("E", "elephant"),
    ("F", "fish"),
    ("G", "giraffe"),
    ("H", "house"),
    ("I", "igloo"),
    ("J", "juice"),
    ("K", "kite"),
    ("L", "lion"),
    ("M", "moon"),
    ("N", "nest"),
    ("O", "owl"),
    ("P", "penguin"),
    ("Q", "queen"),
    ("R", "rabbit"),
    ("S", "sun"),
    ("T", "tiger"),
    ("U", "umbrella"),
    ("V", "violin"),
    ("W", "whale"),
    ("X", "xylophone"),
    ("Y", "yacht"),
    ("Z", "zebra"),
];

/// Override files come either as `{"А": "арбуз", ...}` (file order kept) or as a
/// list of `{"letter": ..., "word": ...}` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum AlphabetFile {
    List(Vec<AlphabetEntry>),
    Table(serde_json::Map<String, serde_json::Value>),
}

/// The ordered, validated letter sequence for a poster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    entries: Vec<AlphabetEntry>,
}

impl Alphabet {
    pub fn russian() -> Self {
        Self::from_table(RUSSIAN)
    }

    pub fn english() -> Self {
        Self::from_table(ENGLISH)
    }

    fn from_table(table: &[(&str, &str)]) -> Self {
        Self {
            entries: table
                .iter()
                .map(|(letter, word)| AlphabetEntry::new(*letter, *word))
                .collect(),
        }
    }

    /// Normalizes and validates a user-supplied sequence.
    pub fn from_entries(entries: Vec<AlphabetEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(PosterError::InvalidAlphabet("alphabet has no entries".to_string()));
        }

        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(entries.len());

        for entry in entries {
            let letter = entry.letter.trim().to_uppercase();
            let word = entry.word.trim().to_lowercase();

            if letter.chars().count() != 1 {
                return Err(PosterError::InvalidAlphabet(format!(
                    "'{}' is not a single letter",
                    entry.letter
                )));
            }
            if !letter.chars().all(char::is_alphabetic) {
                return Err(PosterError::InvalidAlphabet(format!(
                    "'{}' is not a letter",
                    entry.letter
                )));
            }
            if word.is_empty() {
                return Err(PosterError::InvalidAlphabet(format!("letter {} has an empty word", letter)));
            }
            // Words become part of card file names.
            if word.contains(['/', '\\']) || word.contains("..") || word.chars().any(char::is_control) {
                return Err(PosterError::InvalidAlphabet(format!(
                    "word {:?} for letter {} cannot be used in a file name",
                    word, letter
                )));
            }
            if !word.contains(&letter.to_lowercase()) {
                return Err(PosterError::InvalidAlphabet(format!(
                    "word '{}' does not contain letter {}",
                    word, letter
                )));
            }
            if !seen.insert(letter.clone()) {
                return Err(PosterError::InvalidAlphabet(format!("letter {} appears twice", letter)));
            }

            normalized.push(AlphabetEntry { letter, word });
        }

        Ok(Self { entries: normalized })
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: AlphabetFile = serde_json::from_str(content)
            .map_err(|e| PosterError::InvalidAlphabet(format!("unreadable alphabet file: {}", e)))?;

        let entries = match file {
            AlphabetFile::List(entries) => entries,
            AlphabetFile::Table(table) => table
                .into_iter()
                .map(|(letter, word)| match word.as_str() {
                    Some(word) => Ok(AlphabetEntry::new(letter, word)),
                    None => Err(PosterError::InvalidAlphabet(format!(
                        "word for letter {} is not a string",
                        letter
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Self::from_entries(entries)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading alphabet override from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            PosterError::InvalidAlphabet(format!("cannot read {}: {}", path.display(), e))
        })?;
        let alphabet = Self::from_json(&content)?;
        info!("Loaded {} alphabet entries from {}", alphabet.len(), path.display());
        Ok(alphabet)
    }

    pub fn entries(&self) -> &[AlphabetEntry] {
        &self.entries
    }

    pub fn get(&self, letter: &str) -> Option<&AlphabetEntry> {
        self.entries.iter().find(|e| e.letter == letter)
    }

    /// Position of `letter` in canonical order.
    pub fn position(&self, letter: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.letter == letter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::russian()
    }
}

//! Prompt escalation ladder.
//!
//! Each attempt index maps to an [`EmphasisLevel`]; every level keeps all the
//! legibility directives of the levels below it and adds its own, so every
//! attempt asks for more readable text than the one before. The ladder has
//! [`MAX_ESCALATION_ATTEMPTS`] rungs and attempt counts are capped to it.

use crate::types::ImageSize;
use serde::{Deserialize, Serialize};

/// One attempt per rung of the ladder.
pub const MAX_ESCALATION_ATTEMPTS: u32 = EmphasisLevel::ALL.len() as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EmphasisLevel {
    Baseline,
    Focus,
    Emergency,
    Maximum,
}

impl EmphasisLevel {
    pub const ALL: [EmphasisLevel; 4] = [
        EmphasisLevel::Baseline,
        EmphasisLevel::Focus,
        EmphasisLevel::Emergency,
        EmphasisLevel::Maximum,
    ];

    /// Indices past the top rung map to the top rung; callers cap attempt
    /// counts at [`MAX_ESCALATION_ATTEMPTS`] so that never happens in a run.
    pub fn for_attempt(attempt_index: u32) -> Self {
        match attempt_index {
            0 => EmphasisLevel::Baseline,
            1 => EmphasisLevel::Focus,
            2 => EmphasisLevel::Emergency,
            _ => EmphasisLevel::Maximum,
        }
    }

    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Share of the image height the big letter should occupy.
    pub fn letter_height_percent(self) -> u8 {
        match self {
            EmphasisLevel::Baseline => 20,
            EmphasisLevel::Focus => 25,
            EmphasisLevel::Emergency => 30,
            EmphasisLevel::Maximum => 35,
        }
    }

    /// Share of the image height the word should occupy.
    pub fn word_height_percent(self) -> u8 {
        match self {
            EmphasisLevel::Baseline => 10,
            EmphasisLevel::Focus => 12,
            EmphasisLevel::Emergency => 15,
            EmphasisLevel::Maximum => 18,
        }
    }

    fn headline(self) -> &'static str {
        match self {
            EmphasisLevel::Baseline => "",
            EmphasisLevel::Focus => "TEXT FOCUS: the lettering must be easy to read.",
            EmphasisLevel::Emergency => {
                "TEXT EMERGENCY: previous cards had unreadable lettering. Readability comes first."
            }
            EmphasisLevel::Maximum => {
                "MAXIMUM TEXT ENFORCEMENT: every earlier card was unreadable. Text clarity matters more than the picture."
            }
        }
    }

    fn own_directives(self) -> &'static [&'static str] {
        match self {
            EmphasisLevel::Baseline => &[],
            EmphasisLevel::Focus => &[
                "Render all text in solid black on a white or very light background.",
                "Use a plain sans-serif typeface such as Arial or Helvetica.",
                "Leave clear space between the letters of the word.",
            ],
            EmphasisLevel::Emergency => &[
                "No decorative fonts, outlines, shadows, gradients or effects on any text.",
                "Keep the background flat and plain; no texture or scenery behind the text.",
                "Keep the illustration away from the text zones; nothing may overlap the text.",
            ],
            EmphasisLevel::Maximum => &[
                "Use a completely white background for the whole card.",
                "Draw the illustration as a small, simple icon in the middle band only.",
                "The card must read like a page from a school primer, not a piece of art.",
            ],
        }
    }
}

/// All legibility directives in force at `level`, lowest level first.
pub fn legibility_directives(level: EmphasisLevel) -> Vec<&'static str> {
    EmphasisLevel::ALL
        .iter()
        .filter(|l| **l <= level)
        .flat_map(|l| l.own_directives().iter().copied())
        .collect()
}

/// Shape description for letters that image models tend to confuse with Latin
/// look-alikes.
pub fn glyph_hint(letter: &str) -> Option<&'static str> {
    let hint = match letter {
        "А" => "Cyrillic А: same shape as Latin A",
        "Б" => "Cyrillic Б: a vertical stem with a flat top bar and one round bowl at the bottom, not Latin B",
        "В" => "Cyrillic В: shaped like Latin B with two bowls",
        "Г" => "Cyrillic Г: a vertical stem with a single bar to the right at the top, like Greek Gamma",
        "Д" => "Cyrillic Д: a trapezoid with two short legs below the baseline",
        "Е" => "Cyrillic Е: same shape as Latin E",
        "Ё" => "Cyrillic Ё: Е with two dots above, dots the same colour as the letter",
        "Ж" => "Cyrillic Ж: a vertical stem with two arms up and two legs down, like a snowflake",
        "З" => "Cyrillic З: like the digit 3",
        "И" => "Cyrillic И: a mirrored Latin N, diagonal rising from bottom left to top right",
        "Й" => "Cyrillic Й: И with a small curved breve above",
        "К" => "Cyrillic К: same shape as Latin K",
        "Л" => "Cyrillic Л: an upside-down V with a small hook on the left foot",
        "М" => "Cyrillic М: same shape as Latin M",
        "Н" => "Cyrillic Н: same shape as Latin H",
        "О" => "Cyrillic О: a plain round O",
        "П" => "Cyrillic П: two vertical stems joined by a bar at the top, like Greek Pi",
        "Р" => "Cyrillic Р: same shape as Latin P",
        "С" => "Cyrillic С: same shape as Latin C",
        "Т" => "Cyrillic Т: same shape as Latin T",
        "У" => "Cyrillic У: like Latin y with a straight stroke, not Latin Y",
        "Ф" => "Cyrillic Ф: a circle with a vertical stroke through the centre, like Greek Phi",
        "Х" => "Cyrillic Х: same shape as Latin X",
        "Ц" => "Cyrillic Ц: like П turned over with a small tail at the bottom right",
        "Ч" => "Cyrillic Ч: like the digit 4 with a flat top",
        "Ш" => "Cyrillic Ш: three vertical stems joined by a bar at the bottom, not a rounded W",
        "Щ" => "Cyrillic Щ: Ш with a small tail at the bottom right",
        "Ъ" => "Cyrillic hard sign Ъ: a bar at top left, a stem and a bowl at the bottom",
        "Ы" => "Cyrillic Ы: a soft sign Ь followed by a separate vertical stroke",
        "Ь" => "Cyrillic soft sign Ь: a stem with one bowl at the bottom, like a small b",
        "Э" => "Cyrillic Э: a mirrored C with a short bar in the middle",
        "Ю" => "Cyrillic Ю: a vertical stem joined by a short bar to an O",
        "Я" => "Cyrillic Я: a mirrored Latin R",
        _ => return None,
    };
    Some(hint)
}

fn shape(size: ImageSize) -> &'static str {
    match size {
        ImageSize::Square => "square",
        ImageSize::Portrait => "tall portrait",
        ImageSize::Landscape => "wide landscape",
    }
}

/// Prompt for `attempt_index` (0-based) on a square card. Pure: the same
/// inputs always give the same prompt.
pub fn build_prompt(letter: &str, word: &str, attempt_index: u32) -> String {
    build_prompt_for_size(letter, word, attempt_index, ImageSize::Square)
}

/// Same as [`build_prompt`], describing the card in the shape of `size`.
pub fn build_prompt_for_size(letter: &str, word: &str, attempt_index: u32, size: ImageSize) -> String {
    let level = EmphasisLevel::for_attempt(attempt_index);
    let mut lines: Vec<String> = Vec::new();

    if !level.headline().is_empty() {
        lines.push(level.headline().to_string());
    }

    lines.push(format!(
        "Create a {} children's alphabet card for the letter \"{}\" and the word \"{}\".",
        shape(size),
        letter,
        word
    ));
    lines.push(format!(
        "Top: the capital letter \"{}\", about {}% of the image height, centred.",
        letter,
        level.letter_height_percent()
    ));
    lines.push(format!(
        "Middle: a friendly, colourful illustration of a {}.",
        word
    ));
    lines.push(format!(
        "Bottom: the word \"{}\", about {}% of the image height, centred, fully inside the frame.",
        word,
        level.word_height_percent()
    ));

    if level >= EmphasisLevel::Focus {
        if let Some(hint) = glyph_hint(letter) {
            lines.push(format!("Letter shape: {}.", hint));
        }
    }

    let directives = legibility_directives(level);
    if !directives.is_empty() {
        lines.push("Text legibility rules:".to_string());
        for directive in directives {
            lines.push(format!("- {}", directive));
        }
    }

    lines.join("\n")
}

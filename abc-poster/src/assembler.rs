//! Poster assembly.
//!
//! Lays every configured letter out on a fixed grid in canonical alphabet
//! order. A letter without a usable card image gets a placeholder cell, so the
//! grid is always full. Placeholders depend only on the entry, the cell size
//! and the font, which keeps repeated assemblies bit-identical.

use crate::alphabet::Alphabet;
use crate::store::write_atomic;
use crate::types::{AlphabetEntry, CardRecord, CardStatus, PosterError, Result};
use ab_glyph::FontVec;
use chrono::{DateTime, Utc};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const POSTER_FILE: &str = "abc_poster.png";
pub const GENERATION_INFO_FILE: &str = "generation_info.json";

const CARD_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([240, 240, 240]);
const PLACEHOLDER_TEXT: Rgb<u8> = Rgb([100, 100, 100]);
const PLACEHOLDER_CAPTION: Rgb<u8> = Rgb([150, 150, 150]);
const PLACEHOLDER_BORDER: Rgb<u8> = Rgb([200, 200, 200]);
const BORDER_WIDTH: u32 = 3;

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub cell_size: u32,
    /// Fixed column count; derived from the alphabet size when unset.
    pub grid_cols: Option<u32>,
    pub font_path: Option<PathBuf>,
}

/// Largest accepted cell edge in pixels.
pub const MAX_CELL_SIZE: u32 = 4096;
/// Largest accepted poster edge in pixels.
pub const MAX_POSTER_SIDE: u64 = 65_535;

impl LayoutConfig {
    /// Checks the settings that do not depend on the alphabet.
    pub fn validate(&self) -> Result<()> {
        if self.cell_size == 0 || self.cell_size > MAX_CELL_SIZE {
            return Err(PosterError::Config(format!(
                "CELL_SIZE must be between 1 and {}, got {}",
                MAX_CELL_SIZE, self.cell_size
            )));
        }
        if let Some(cols) = self.grid_cols {
            if cols as u64 * self.cell_size as u64 > MAX_POSTER_SIDE {
                return Err(PosterError::Config(format!(
                    "POSTER_COLS x CELL_SIZE = {} x {} exceeds {} pixels",
                    cols, self.cell_size, MAX_POSTER_SIDE
                )));
            }
        }
        Ok(())
    }

    /// Checks that a poster for `letter_count` letters fits the size limit.
    pub fn validate_for(&self, letter_count: usize) -> Result<()> {
        self.validate()?;
        let dims = GridDims::for_count(letter_count, self.grid_cols);
        let side = dims.cols.max(dims.rows) as u64 * self.cell_size as u64;
        if side > MAX_POSTER_SIDE {
            return Err(PosterError::Config(format!(
                "a {}x{} grid of {}px cells exceeds {} pixels",
                dims.cols, dims.rows, self.cell_size, MAX_POSTER_SIDE
            )));
        }
        Ok(())
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            cell_size: 400,
            grid_cols: None,
            font_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridDims {
    pub rows: u32,
    pub cols: u32,
}

impl GridDims {
    /// Smallest near-square grid holding `count` cells: `ceil(sqrt(n))`
    /// columns unless overridden, then as many rows as needed.
    pub fn for_count(count: usize, cols_override: Option<u32>) -> Self {
        let count = count.max(1) as u32;
        let cols = cols_override
            .unwrap_or_else(|| (count as f64).sqrt().ceil() as u32)
            .clamp(1, count);
        let rows = count.div_ceil(cols);
        Self { rows, cols }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Validated,
    Degraded,
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct PosterCell {
    pub row: u32,
    pub col: u32,
    pub entry: AlphabetEntry,
    pub kind: CellKind,
    pub record: Option<CardRecord>,
}

/// The grid as planned from records, before any file is read.
#[derive(Debug, Clone)]
pub struct PosterLayout {
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub cell_size: u32,
    pub cells: Vec<PosterCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CellCounts {
    pub validated: usize,
    pub degraded: usize,
    pub placeholder: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CellInfo {
    pub position: usize,
    pub row: u32,
    pub col: u32,
    pub letter: String,
    pub word: String,
    pub kind: CellKind,
    pub final_status: Option<CardStatus>,
    pub attempts_used: Option<u32>,
    pub ocr_confidence: Option<f32>,
}

/// Structured summary written next to the poster image.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationInfo {
    pub generated_at: DateTime<Utc>,
    pub total_letters: usize,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub cell_size: u32,
    pub counts: CellCounts,
    pub failed_letters: Vec<String>,
    pub cells: Vec<CellInfo>,
}

pub struct AssembledPoster {
    pub image: RgbImage,
    pub info: GenerationInfo,
}

pub struct PosterAssembler {
    layout: LayoutConfig,
    font: Option<FontVec>,
}

impl PosterAssembler {
    /// Loads the configured font, or the first system font found.
    pub fn new(layout: LayoutConfig) -> Result<Self> {
        let font = match &layout.font_path {
            Some(path) => Some(load_font(path)?),
            None => find_system_font(),
        };
        if font.is_none() {
            warn!("No font available; placeholders will carry no text");
        }
        Ok(Self::with_font(layout, font))
    }

    pub fn with_font(layout: LayoutConfig, font: Option<FontVec>) -> Self {
        Self { layout, font }
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Assigns every letter a cell in canonical order and decides from its
    /// record whether the cell should hold a card.
    pub fn plan(&self, alphabet: &Alphabet, records: &HashMap<String, CardRecord>) -> PosterLayout {
        let dims = GridDims::for_count(alphabet.len(), self.layout.grid_cols);

        let cells = alphabet
            .entries()
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                // A record for a different word belongs to an older alphabet.
                let record = records
                    .get(&entry.letter)
                    .filter(|r| r.word == entry.word)
                    .cloned();
                let kind = match record.as_ref() {
                    Some(r) if r.file_path.is_some() && r.final_status == CardStatus::Validated => {
                        CellKind::Validated
                    }
                    Some(r) if r.file_path.is_some() && r.final_status == CardStatus::UnvalidatedAccepted => {
                        CellKind::Degraded
                    }
                    _ => CellKind::Placeholder,
                };
                PosterCell {
                    row: index as u32 / dims.cols,
                    col: index as u32 % dims.cols,
                    entry: entry.clone(),
                    kind,
                    record,
                }
            })
            .collect();

        PosterLayout {
            grid_rows: dims.rows,
            grid_cols: dims.cols,
            cell_size: self.layout.cell_size,
            cells,
        }
    }

    pub fn assemble(&self, alphabet: &Alphabet, records: &HashMap<String, CardRecord>) -> AssembledPoster {
        let layout = self.plan(alphabet, records);
        let cell_size = layout.cell_size;
        info!(
            "Assembling {}x{} poster ({} letters, {}px cells)",
            layout.grid_cols,
            layout.grid_rows,
            layout.cells.len(),
            cell_size
        );

        let mut poster = RgbImage::from_pixel(layout.grid_cols * cell_size, layout.grid_rows * cell_size, CARD_BACKGROUND);
        let mut counts = CellCounts::default();
        let mut cells = Vec::with_capacity(layout.cells.len());

        for (position, cell) in layout.cells.iter().enumerate() {
            let card = match (cell.kind, cell.record.as_ref().and_then(|r| r.file_path.as_deref())) {
                (CellKind::Placeholder, _) | (_, None) => None,
                (_, Some(path)) => match self.load_card(path) {
                    Ok(card) => Some(card),
                    Err(e) => {
                        warn!("Cannot use card {}: {}; using placeholder", path.display(), e);
                        None
                    }
                },
            };

            let (tile, kind) = match card {
                Some(tile) => (tile, cell.kind),
                None => {
                    debug!("Placeholder for {} - {}", cell.entry.letter, cell.entry.word);
                    (self.render_placeholder(&cell.entry), CellKind::Placeholder)
                }
            };

            match kind {
                CellKind::Validated => counts.validated += 1,
                CellKind::Degraded => counts.degraded += 1,
                CellKind::Placeholder => counts.placeholder += 1,
            }

            imageops::replace(
                &mut poster,
                &tile,
                (cell.col * cell_size) as i64,
                (cell.row * cell_size) as i64,
            );

            cells.push(CellInfo {
                position,
                row: cell.row,
                col: cell.col,
                letter: cell.entry.letter.clone(),
                word: cell.entry.word.clone(),
                kind,
                final_status: cell.record.as_ref().map(|r| r.final_status),
                attempts_used: cell.record.as_ref().map(|r| r.attempts_used),
                ocr_confidence: cell.record.as_ref().and_then(|r| r.ocr_confidence),
            });
        }

        let failed_letters = layout
            .cells
            .iter()
            .filter(|c| c.record.as_ref().is_some_and(|r| r.final_status == CardStatus::Failed))
            .map(|c| c.entry.letter.clone())
            .collect();

        info!(
            "Poster cells: {} validated, {} degraded, {} placeholders",
            counts.validated, counts.degraded, counts.placeholder
        );

        AssembledPoster {
            image: poster,
            info: GenerationInfo {
                generated_at: Utc::now(),
                total_letters: layout.cells.len(),
                grid_rows: layout.grid_rows,
                grid_cols: layout.grid_cols,
                cell_size,
                counts,
                failed_letters,
                cells,
            },
        }
    }

    /// Reads a card and fits it into one cell, centred on white.
    fn load_card(&self, path: &Path) -> Result<RgbImage> {
        let size = self.layout.cell_size;
        let card = image::open(path)?;
        let fitted = card.resize(size, size, FilterType::Lanczos3).to_rgb8();

        let mut tile = RgbImage::from_pixel(size, size, CARD_BACKGROUND);
        let x = (size - fitted.width().min(size)) / 2;
        let y = (size - fitted.height().min(size)) / 2;
        imageops::overlay(&mut tile, &fitted, x as i64, y as i64);
        Ok(tile)
    }

    /// Flat cell with a border, the letter, the word and a caption.
    pub fn render_placeholder(&self, entry: &AlphabetEntry) -> RgbImage {
        let size = self.layout.cell_size;
        let mut tile = RgbImage::from_pixel(size, size, PLACEHOLDER_BORDER);

        if size > BORDER_WIDTH * 2 {
            let inner = Rect::at(BORDER_WIDTH as i32, BORDER_WIDTH as i32)
                .of_size(size - BORDER_WIDTH * 2, size - BORDER_WIDTH * 2);
            draw_filled_rect_mut(&mut tile, inner, PLACEHOLDER_BACKGROUND);
        }

        if let Some(font) = &self.font {
            let size_f = size as f32;
            draw_centered(&mut tile, font, &entry.letter, size_f / 4.0, size_f * 0.35, PLACEHOLDER_TEXT);
            draw_centered(&mut tile, font, &entry.word, size_f / 8.0, size_f * 0.62, PLACEHOLDER_TEXT);
            draw_centered(&mut tile, font, "(placeholder)", size_f / 16.0, size_f * 0.80, PLACEHOLDER_CAPTION);
        }

        tile
    }

    /// Writes the poster image and its generation info, replacing any earlier
    /// output. Returns the poster path.
    pub fn write(&self, poster: &AssembledPoster, output_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let mut png = Cursor::new(Vec::new());
        poster.image.write_to(&mut png, ImageFormat::Png)?;
        let poster_path = output_dir.join(POSTER_FILE);
        write_atomic(&poster_path, png.get_ref())?;

        let info_path = output_dir.join(GENERATION_INFO_FILE);
        write_atomic(&info_path, &serde_json::to_vec_pretty(&poster.info)?)?;

        info!("Poster saved to {} ({})", poster_path.display(), info_path.display());
        Ok(poster_path)
    }
}

/// Draws `text` horizontally centred with its vertical centre at `center_y`.
fn draw_centered(tile: &mut RgbImage, font: &FontVec, text: &str, scale: f32, center_y: f32, color: Rgb<u8>) {
    let (width, height) = text_size(scale, font, text);
    let x = (tile.width() as i32 - width as i32) / 2;
    let y = center_y as i32 - height as i32 / 2;
    draw_text_mut(tile, color, x, y, scale, font, text);
}

pub fn load_font(path: &Path) -> Result<FontVec> {
    let data = std::fs::read(path)
        .map_err(|e| PosterError::Config(format!("cannot read font {}: {}", path.display(), e)))?;
    FontVec::try_from_vec(data)
        .map_err(|_| PosterError::Config(format!("cannot parse font {}", path.display())))
}

pub fn find_system_font() -> Option<FontVec> {
    for path in SYSTEM_FONTS {
        if let Ok(data) = std::fs::read(path) {
            if let Ok(font) = FontVec::try_from_vec(data) {
                info!("Loaded system font: {}", path);
                return Some(font);
            }
        }
    }
    debug!("No system font found");
    None
}

mod common;

use abc_poster::assembler::{CellKind, GridDims, GENERATION_INFO_FILE, MAX_CELL_SIZE, POSTER_FILE};
use abc_poster::{
    Alphabet, AlphabetEntry, CardRecord, CardStatus, CardStore, LayoutConfig, MetadataLog,
    PosterAssembler, PosterError,
};
use chrono::Utc;
use common::init_tracing;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const CELL: u32 = 50;

fn assembler() -> PosterAssembler {
    PosterAssembler::with_font(
        LayoutConfig {
            cell_size: CELL,
            ..Default::default()
        },
        None,
    )
}

fn record(entry: &AlphabetEntry, status: CardStatus, file: Option<&Path>) -> CardRecord {
    CardRecord {
        letter: entry.letter.clone(),
        word: entry.word.clone(),
        file_path: file.map(Path::to_path_buf),
        attempts_used: 2,
        final_status: status,
        ocr_confidence: Some(0.8),
        error: None,
        run_id: Uuid::new_v4(),
        recorded_at: Utc::now(),
    }
}

fn solid_card(store: &CardStore, entry: &AlphabetEntry, color: Rgb<u8>) -> std::path::PathBuf {
    let path = store.card_path(entry);
    std::fs::create_dir_all(store.root()).unwrap();
    RgbImage::from_pixel(80, 40, color).save(&path).unwrap();
    path
}

fn cell_center(poster: &RgbImage, row: u32, col: u32) -> Rgb<u8> {
    *poster.get_pixel(col * CELL + CELL / 2, row * CELL + CELL / 2)
}

#[test]
fn test_grid_dimensions() {
    assert_eq!(GridDims::for_count(26, None), GridDims { rows: 5, cols: 6 });
    assert_eq!(GridDims::for_count(33, None), GridDims { rows: 6, cols: 6 });
    assert_eq!(GridDims::for_count(1, None), GridDims { rows: 1, cols: 1 });
    assert_eq!(GridDims::for_count(0, None), GridDims { rows: 1, cols: 1 });
    assert_eq!(GridDims::for_count(26, Some(13)), GridDims { rows: 2, cols: 13 });
    assert_eq!(GridDims::for_count(3, Some(10)), GridDims { rows: 1, cols: 3 });
}

#[test]
fn test_poster_size_is_bounded() {
    let layout = |cell_size, grid_cols| LayoutConfig {
        cell_size,
        grid_cols,
        ..Default::default()
    };

    assert!(layout(MAX_CELL_SIZE, None).validate_for(33).is_ok());
    assert!(matches!(layout(MAX_CELL_SIZE + 1, None).validate(), Err(PosterError::Config(_))));
    assert!(matches!(layout(0, None).validate(), Err(PosterError::Config(_))));
    assert!(matches!(layout(400, Some(200)).validate(), Err(PosterError::Config(_))));

    // A single column stacks every letter, so the height is what overflows
    let single_column = layout(MAX_CELL_SIZE, Some(1));
    assert!(single_column.validate().is_ok());
    assert!(matches!(single_column.validate_for(33), Err(PosterError::Config(_))));
}

#[test]
fn test_empty_records_fill_grid_with_placeholders() {
    init_tracing();
    let alphabet = Alphabet::english();

    let poster = assembler().assemble(&alphabet, &HashMap::new());

    assert_eq!(poster.image.dimensions(), (6 * CELL, 5 * CELL));
    assert_eq!(poster.info.counts.placeholder, 26);
    assert_eq!(poster.info.counts.validated, 0);
    assert_eq!(poster.info.cells.len(), 26);
    assert!(poster.info.cells.iter().all(|c| c.kind == CellKind::Placeholder));

    // Border and flat background of the first placeholder
    assert_eq!(*poster.image.get_pixel(0, 0), Rgb([200, 200, 200]));
    assert_eq!(*poster.image.get_pixel(10, 10), Rgb([240, 240, 240]));
}

#[test]
fn test_russian_poster_dimensions() {
    let poster = assembler().assemble(&Alphabet::russian(), &HashMap::new());
    assert_eq!(poster.image.dimensions(), (6 * CELL, 6 * CELL));
    assert_eq!(poster.info.total_letters, 33);
}

#[test]
fn test_cards_are_placed_in_canonical_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = CardStore::new(dir.path());
    let alphabet = Alphabet::english();

    let c = alphabet.get("C").unwrap().clone();
    let h = alphabet.get("H").unwrap().clone();
    let mut records = HashMap::new();
    let c_path = solid_card(&store, &c, Rgb([255, 0, 0]));
    let h_path = solid_card(&store, &h, Rgb([0, 0, 255]));
    records.insert("H".to_string(), record(&h, CardStatus::UnvalidatedAccepted, Some(&h_path)));
    records.insert("C".to_string(), record(&c, CardStatus::Validated, Some(&c_path)));

    let poster = assembler().assemble(&alphabet, &records);

    assert_eq!(poster.info.counts.validated, 1);
    assert_eq!(poster.info.counts.degraded, 1);
    assert_eq!(poster.info.counts.placeholder, 24);

    // C is the third letter: row 0, col 2. H is the eighth: row 1, col 1.
    let red = cell_center(&poster.image, 0, 2);
    assert!(red[0] > 200 && red[1] < 50 && red[2] < 50);
    let blue = cell_center(&poster.image, 1, 1);
    assert!(blue[2] > 200 && blue[0] < 50);

    // The wide card is letterboxed on white
    assert_eq!(*poster.image.get_pixel(2 * CELL + CELL / 2, 2), Rgb([255, 255, 255]));

    assert_eq!(poster.info.cells[2].letter, "C");
    assert_eq!(poster.info.cells[2].kind, CellKind::Validated);
    assert_eq!(poster.info.cells[7].kind, CellKind::Degraded);
    assert_eq!(poster.info.cells[7].attempts_used, Some(2));
}

#[test]
fn test_failed_and_unreadable_cards_become_placeholders() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = CardStore::new(dir.path());
    let alphabet = Alphabet::english();

    let a = alphabet.get("A").unwrap().clone();
    let b = alphabet.get("B").unwrap().clone();
    let broken = store.write_card(&b, b"not an image").unwrap();

    let mut records = HashMap::new();
    records.insert("A".to_string(), record(&a, CardStatus::Failed, None));
    records.insert("B".to_string(), record(&b, CardStatus::Validated, Some(&broken)));

    let poster = assembler().assemble(&alphabet, &records);

    assert_eq!(poster.info.counts.placeholder, 26);
    assert_eq!(poster.info.failed_letters, vec!["A".to_string()]);
    assert_eq!(poster.info.cells[1].kind, CellKind::Placeholder);
    assert_eq!(poster.info.cells[1].final_status, Some(CardStatus::Validated));
}

#[test]
fn test_placeholders_are_deterministic() {
    let alphabet = Alphabet::russian();
    let first = assembler().assemble(&alphabet, &HashMap::new());
    let second = assembler().assemble(&alphabet, &HashMap::new());
    assert_eq!(first.image.as_raw(), second.image.as_raw());
}

#[test]
fn test_unrecorded_card_on_disk_counts_as_degraded() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = CardStore::new(dir.path());
    let alphabet = Alphabet::english();

    let z = alphabet.get("Z").unwrap().clone();
    solid_card(&store, &z, Rgb([0, 200, 0]));

    let records = store.scan(&alphabet, &MetadataLog::in_dir(dir.path())).unwrap();
    let poster = assembler().assemble(&alphabet, &records);

    assert_eq!(poster.info.counts.degraded, 1);
    assert_eq!(poster.info.cells[25].kind, CellKind::Degraded);
}

#[test]
fn test_write_produces_poster_and_info() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let alphabet = Alphabet::english();
    let assembler = assembler();

    let poster = assembler.assemble(&alphabet, &HashMap::new());
    let path = assembler.write(&poster, dir.path()).unwrap();

    assert_eq!(path, dir.path().join(POSTER_FILE));
    let reloaded = image::open(&path).unwrap().to_rgb8();
    assert_eq!(reloaded.as_raw(), poster.image.as_raw());

    let info: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(GENERATION_INFO_FILE)).unwrap()).unwrap();
    assert_eq!(info["total_letters"], 26);
    assert_eq!(info["counts"]["placeholder"], 26);
    assert_eq!(info["cells"][0]["letter"], "A");
    assert_eq!(info["cells"][0]["kind"], "placeholder");

    // A second write replaces the first
    assembler.write(&poster, dir.path()).unwrap();
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 2);
}

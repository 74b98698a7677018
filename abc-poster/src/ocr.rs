use crate::types::{BoundingRegion, OcrBackend, OcrError, OcrSpan};
use async_trait::async_trait;
use std::io::Write;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_TESSERACT_CMD: &str = "tesseract";
/// Sparse text: cards carry a few large words scattered around a picture.
pub const DEFAULT_PSM: u8 = 11;

/// OCR through the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: String,
    psm: u8,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>, psm: u8) -> Self {
        Self {
            command: command.into(),
            psm,
        }
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new(DEFAULT_TESSERACT_CMD, DEFAULT_PSM)
    }
}

/// Turns `tesseract ... tsv` output into spans. Only word rows (level 5) with
/// text and a non-negative confidence are kept.
pub fn parse_tsv(tsv: &str) -> Vec<OcrSpan> {
    let mut lines = tsv.lines();
    let header: Vec<&str> = match lines.next() {
        Some(line) => line.split('\t').collect(),
        None => return Vec::new(),
    };
    let column = |name: &str| header.iter().position(|h| *h == name);

    let (Some(level), Some(left), Some(top), Some(width), Some(height), Some(conf), Some(text)) = (
        column("level"),
        column("left"),
        column("top"),
        column("width"),
        column("height"),
        column("conf"),
        column("text"),
    ) else {
        return Vec::new();
    };

    lines
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.get(level).copied() != Some("5") {
                return None;
            }
            let text = fields.get(text)?.trim();
            let confidence: f32 = fields.get(conf)?.trim().parse().ok()?;
            if text.is_empty() || confidence < 0.0 {
                return None;
            }
            let number = |i: usize| fields.get(i).and_then(|v| v.trim().parse::<u32>().ok()).unwrap_or(0);

            Some(OcrSpan {
                text: text.to_string(),
                confidence: (confidence / 100.0).clamp(0.0, 1.0),
                region: BoundingRegion {
                    left: number(left),
                    top: number(top),
                    width: number(width),
                    height: number(height),
                },
            })
        })
        .collect()
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    fn engine_name(&self) -> String {
        format!("Tesseract ({})", self.command)
    }

    async fn recognize(&self, image: &[u8], language: &str) -> Result<Vec<OcrSpan>, OcrError> {
        let mut file = tempfile::Builder::new()
            .prefix("abc-card-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::EngineUnavailable(format!("cannot stage image: {}", e)))?;
        file.write_all(image)
            .and_then(|_| file.flush())
            .map_err(|e| OcrError::EngineUnavailable(format!("cannot stage image: {}", e)))?;

        let output = Command::new(&self.command)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .output()
            .await
            .map_err(|e| OcrError::EngineUnavailable(format!("cannot run {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineUnavailable(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let spans = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!("Tesseract found {} words", spans.len());
        Ok(spans)
    }
}

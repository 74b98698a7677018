use crate::alphabet::Alphabet;
use crate::assembler::LayoutConfig;
use crate::image_backend::{OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::ocr::{DEFAULT_PSM, DEFAULT_TESSERACT_CMD};
use crate::prompt::MAX_ESCALATION_ATTEMPTS;
use crate::types::{GenerationConfig, ImageQuality, ImageSize, PosterError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Everything the binary needs, read from the environment.
#[derive(Debug, Clone)]
pub struct PosterConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub image_model: String,
    pub request_timeout_seconds: u64,
    pub storage_path: PathBuf,
    pub output_path: PathBuf,
    pub tesseract_cmd: String,
    pub tesseract_psm: u8,
    pub alphabet_file: Option<PathBuf>,
    pub generation: GenerationConfig,
    pub layout: LayoutConfig,
}

impl Default for PosterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            image_model: DEFAULT_MODEL.to_string(),
            request_timeout_seconds: 180,
            storage_path: PathBuf::from("./generated_images"),
            output_path: PathBuf::from("./output"),
            tesseract_cmd: DEFAULT_TESSERACT_CMD.to_string(),
            tesseract_psm: DEFAULT_PSM,
            alphabet_file: None,
            generation: GenerationConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PosterError::Config(format!("{}={:?}: {}", key, value, e)))
}

fn parse_size(value: &str) -> Result<ImageSize> {
    match value.trim().to_lowercase().as_str() {
        "square" | "1024x1024" => Ok(ImageSize::Square),
        "portrait" | "1024x1536" => Ok(ImageSize::Portrait),
        "landscape" | "1536x1024" => Ok(ImageSize::Landscape),
        other => Err(PosterError::Config(format!("IMAGE_SIZE={:?} is not square, portrait or landscape", other))),
    }
}

fn parse_quality(value: &str) -> Result<ImageQuality> {
    match value.trim().to_lowercase().as_str() {
        "low" => Ok(ImageQuality::Low),
        "medium" => Ok(ImageQuality::Medium),
        "high" => Ok(ImageQuality::High),
        other => Err(PosterError::Config(format!("IMAGE_QUALITY={:?} is not low, medium or high", other))),
    }
}

impl PosterConfig {
    /// Builds the configuration from `lookup`, which maps a variable name to
    /// its value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.api_key = get("OPENAI_API_KEY").map(|v| v.trim().to_string());
        if let Some(v) = get("OPENAI_BASE_URL") {
            config.base_url = v.trim().to_string();
        }
        if let Some(v) = get("IMAGE_MODEL") {
            config.image_model = v.trim().to_string();
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = parse("REQUEST_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("STORAGE_PATH") {
            config.storage_path = PathBuf::from(v);
        }
        if let Some(v) = get("POSTER_OUTPUT_PATH") {
            config.output_path = PathBuf::from(v);
        }
        if let Some(v) = get("TESSERACT_CMD") {
            config.tesseract_cmd = v;
        }
        if let Some(v) = get("TESSERACT_PSM") {
            config.tesseract_psm = parse("TESSERACT_PSM", &v)?;
        }
        config.alphabet_file = get("ALPHABET_FILE").map(PathBuf::from);

        let generation = &mut config.generation;
        if let Some(v) = get("IMAGE_SIZE") {
            generation.image_size = parse_size(&v)?;
        }
        if let Some(v) = get("IMAGE_QUALITY") {
            generation.image_quality = parse_quality(&v)?;
        }
        if let Some(v) = get("RATE_LIMIT_MS") {
            generation.rate_limit_ms = parse("RATE_LIMIT_MS", &v)?;
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            generation.max_attempts = parse("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("MAX_TRANSIENT_RETRIES") {
            generation.max_transient_retries = parse("MAX_TRANSIENT_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY_MS") {
            generation.retry_delay_ms = parse("RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("OCR_CONFIDENCE_THRESHOLD") {
            generation.confidence_threshold = parse("OCR_CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("OCR_LANGUAGE") {
            generation.ocr_language = v.trim().to_string();
        }

        if let Some(v) = get("CELL_SIZE") {
            config.layout.cell_size = parse("CELL_SIZE", &v)?;
        }
        if let Some(v) = get("POSTER_COLS") {
            config.layout.grid_cols = Some(parse("POSTER_COLS", &v)?);
        }
        config.layout.font_path = get("POSTER_FONT").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(PosterError::Config(format!("cannot read .env: {}", e))),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if generation.max_attempts == 0 || generation.max_attempts > MAX_ESCALATION_ATTEMPTS {
            return Err(PosterError::Config(format!(
                "MAX_ATTEMPTS must be between 1 and {}, got {}",
                MAX_ESCALATION_ATTEMPTS, generation.max_attempts
            )));
        }
        if !(0.0..=1.0).contains(&generation.confidence_threshold) {
            return Err(PosterError::Config(format!(
                "OCR_CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                generation.confidence_threshold
            )));
        }
        if generation.ocr_language.is_empty() {
            return Err(PosterError::Config("OCR_LANGUAGE must not be empty".to_string()));
        }
        if self.layout.grid_cols == Some(0) {
            return Err(PosterError::Config("POSTER_COLS must be positive".to_string()));
        }
        self.layout.validate()?;
        if self.request_timeout_seconds == 0 {
            return Err(PosterError::Config("REQUEST_TIMEOUT_SECONDS must be positive".to_string()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| PosterError::Config(format!("OPENAI_BASE_URL={:?}: {}", self.base_url, e)))?;
        Ok(())
    }

    /// Image backend settings; fails when no API key is configured.
    pub fn openai(&self) -> Result<OpenAiConfig> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| PosterError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Ok(OpenAiConfig {
            api_key,
            base_url: self.base_url.clone(),
            model: self.image_model.clone(),
            timeout_seconds: self.request_timeout_seconds,
        })
    }

    /// The override file when one is configured, else the built-in Russian table.
    pub fn alphabet(&self) -> Result<Alphabet> {
        match &self.alphabet_file {
            Some(path) => Alphabet::load(path),
            None => Ok(Alphabet::russian()),
        }
    }
}

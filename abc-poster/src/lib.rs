pub mod types;
pub mod alphabet;
pub mod prompt;
pub mod validator;
pub mod throttle;
pub mod store;
pub mod generator;
pub mod coordinator;
pub mod assembler;
pub mod image_backend;
pub mod ocr;
pub mod config;

pub use types::*;
pub use alphabet::Alphabet;
pub use prompt::{build_prompt, build_prompt_for_size, EmphasisLevel, MAX_ESCALATION_ATTEMPTS};
pub use validator::{LegibilityValidator, LegibilityVerdict};
pub use throttle::RateLimiter;
pub use store::{CardStore, CheckpointStore, MetadataLog};
pub use generator::CardGenerator;
pub use coordinator::{Coordinator, CoordinatorOptions, CoordinatorState, RunSummary};
pub use assembler::{LayoutConfig, PosterAssembler};
pub use image_backend::{OpenAiConfig, OpenAiImageBackend};
pub use ocr::TesseractOcr;
pub use config::PosterConfig;

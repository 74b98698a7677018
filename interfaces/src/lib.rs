pub mod defs;

pub use defs::{
    AlphabetEntry, BoundingRegion, ImageBackend, ImageBackendError, ImageQuality, ImageRequest,
    ImageSize, OcrBackend, OcrError, OcrSpan,
};

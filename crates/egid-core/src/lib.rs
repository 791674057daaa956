//! egid-core — Egyptian national ID card extraction.
//!
//! Detects the card, its fields and the national ID digits with YOLO models,
//! reads the Arabic text fields with a CTC recognizer (both via ONNX Runtime),
//! and decodes birth date, governorate and gender from the ID number.

pub mod decoder;
pub mod detector;
pub mod imaging;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use decoder::{
    decode, decode_or_empty, decode_strict, decode_strict_or_empty, DecodeError, DecodedId,
    NationalId,
};
pub use detector::{DetectorOptions, ObjectDetector, YoloDetector};
pub use pipeline::{ExtractError, Extraction, ExtractionReport, IdExtractor};
pub use recognizer::{TextReader, TextRecognizer};
pub use types::{BoundingBox, FieldKind, IdCardData};

use std::path::PathBuf;

/// Default directory for ONNX models: `$XDG_DATA_HOME/egid/models`,
/// falling back to `~/.local/share/egid/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("egid")
        .join("models")
}

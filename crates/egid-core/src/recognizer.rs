//! CTC text-line recognizer via ONNX Runtime.
//!
//! Reads the Arabic text fields of the card (names, address) and the serial
//! from cropped field images, using a CRNN-style recognition model with a
//! character dictionary.

use crate::imaging;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const REC_INPUT_HEIGHT: usize = 48;
const REC_MAX_WIDTH: usize = 320;
const REC_MEAN: f32 = 0.5;
const REC_STD: f32 = 0.5;
const CTC_BLANK: usize = 0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("dictionary file not found: {0}")]
    DictionaryNotFound(String),
    #[error("failed to read dictionary {path}: {source}")]
    Dictionary {
        path: String,
        source: std::io::Error,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Something that reads a single line of text from an image.
pub trait TextReader {
    fn read_text(&mut self, image: &DynamicImage) -> Result<String, RecognizerError>;
}

/// Recognized text with its mean per-character confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
}

/// CRNN-based text recognizer.
pub struct TextRecognizer {
    session: Session,
    /// Index 0 is the CTC blank.
    dictionary: Vec<String>,
}

impl TextRecognizer {
    /// Load the recognition model and its character dictionary.
    pub fn load(model_path: &str, dict_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }
        if !Path::new(dict_path).exists() {
            return Err(RecognizerError::DictionaryNotFound(dict_path.to_string()));
        }

        let contents = std::fs::read_to_string(dict_path).map_err(|source| RecognizerError::Dictionary {
            path: dict_path.to_string(),
            source,
        })?;
        let dictionary = parse_dictionary(&contents);

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            dictionary = dict_path,
            symbols = dictionary.len(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded text recognition model"
        );

        Ok(Self { session, dictionary })
    }

    /// Recognize one line of text in an image crop.
    pub fn recognize(&mut self, image: &DynamicImage) -> Result<RecognizedText, RecognizerError> {
        if imaging::is_empty(image) {
            return Ok(RecognizedText { text: String::new(), confidence: 0.0 });
        }

        let gray = imaging::to_grayscale(image);
        let input = Self::preprocess(&gray);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, probs) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("probabilities: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let (steps, classes) = match dims[..] {
            [1, t, k] => (t, k),
            ref other => {
                return Err(RecognizerError::InferenceFailed(format!(
                    "expected [1, T, K] output, got {other:?}"
                )))
            }
        };

        if classes > self.dictionary.len() {
            tracing::warn!(
                classes,
                dictionary = self.dictionary.len(),
                "model emits more classes than the dictionary holds; extra classes are dropped"
            );
        }

        let recognized = ctc_greedy_decode(probs, steps, classes, &self.dictionary);
        tracing::debug!(text = %recognized.text, confidence = recognized.confidence, "recognized text");
        Ok(recognized)
    }

    /// Resize a grayscale crop to the model height, pad right to the fixed width,
    /// and normalize into a 3-channel NCHW tensor.
    fn preprocess(gray: &GrayImage) -> Array4<f32> {
        let (width, height) = gray.dimensions();
        let ratio = width as f32 / height.max(1) as f32;
        let target_w = ((REC_INPUT_HEIGHT as f32 * ratio).ceil() as usize).clamp(1, REC_MAX_WIDTH);

        let resized = imageops::resize(gray, target_w as u32, REC_INPUT_HEIGHT as u32, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, REC_INPUT_HEIGHT, REC_MAX_WIDTH));

        for y in 0..REC_INPUT_HEIGHT {
            for x in 0..target_w {
                let pixel = resized.get_pixel(x as u32, y as u32).0[0] as f32;
                let normalized = (pixel / 255.0 - REC_MEAN) / REC_STD;
                // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

impl TextReader for TextRecognizer {
    fn read_text(&mut self, image: &DynamicImage) -> Result<String, RecognizerError> {
        Ok(self.recognize(image)?.text)
    }
}

/// Parse a dictionary file: one symbol per line, blank prepended, space appended if missing.
fn parse_dictionary(contents: &str) -> Vec<String> {
    let mut dictionary = vec![String::new()];
    dictionary.extend(
        contents
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    if !dictionary.iter().any(|s| s == " ") {
        dictionary.push(" ".to_string());
    }
    dictionary
}

/// Greedy CTC decoding over a `[T, K]` probability matrix.
///
/// Takes the argmax per step, collapses repeats and drops blanks. Confidence is
/// the mean probability of the emitted steps.
fn ctc_greedy_decode(probs: &[f32], steps: usize, classes: usize, dictionary: &[String]) -> RecognizedText {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut prev = None;

    for t in 0..steps {
        let Some(row) = probs.get(t * classes..(t + 1) * classes) else {
            break;
        };
        let (idx, p) = row
            .iter()
            .copied()
            .enumerate()
            .fold((CTC_BLANK, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if idx != CTC_BLANK && prev != Some(idx) {
            if let Some(symbol) = dictionary.get(idx) {
                text.push_str(symbol);
                scores.push(p);
            }
        }
        prev = Some(idx);
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };

    RecognizedText {
        text: text.trim().to_string(),
        confidence,
    }
}

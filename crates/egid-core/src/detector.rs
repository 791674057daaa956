//! YOLO object detector via ONNX Runtime.
//!
//! The same detector type runs all three detection stages: the ID card in the
//! photo, the text fields on the card, and the individual digits of the
//! national ID. Each stage is a separate model with its own class labels.

use crate::imaging;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (Ultralytics export defaults) ---
const YOLO_INPUT_SIZE: usize = 640;
const YOLO_PAD_VALUE: f32 = 114.0;
const YOLO_BOX_CHANNELS: usize = 4;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (export the YOLO weights to ONNX and place them in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Something that localizes labelled boxes in an image.
pub trait ObjectDetector {
    /// Detect objects, returning boxes sorted by confidence (highest first).
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError>;

    /// Highest-confidence detection, if any.
    fn detect_first(&mut self, image: &DynamicImage) -> Result<Option<BoundingBox>, DetectorError> {
        Ok(self.detect(image)?.into_iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        }))
    }
}

/// Thresholds applied during post-processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Layout of the prediction tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredictionLayout {
    /// `[1, 4 + classes, anchors]`, the default Ultralytics export.
    ChannelsFirst,
    /// `[1, anchors, 4 + classes]`.
    ChannelsLast,
}

/// YOLO-based object detector.
pub struct YoloDetector {
    session: Session,
    labels: Vec<String>,
    options: DetectorOptions,
}

impl YoloDetector {
    /// Load a YOLO ONNX model. `labels[i]` is the name of class `i`.
    pub fn load(
        model_path: &str,
        labels: Vec<String>,
        options: DetectorOptions,
    ) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }
        if labels.is_empty() {
            return Err(DetectorError::InferenceFailed(format!(
                "no class labels configured for {model_path}"
            )));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            classes = labels.len(),
            "loaded YOLO model"
        );

        Ok(Self {
            session,
            labels,
            options,
        })
    }

    /// Preprocess an image into a NCHW RGB float tensor with letterbox padding.
    fn preprocess(image: &DynamicImage) -> (Array4<f32>, LetterboxInfo) {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let scale_w = YOLO_INPUT_SIZE as f32 / width as f32;
        let scale_h = YOLO_INPUT_SIZE as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = ((width as f32 * scale).round() as usize).clamp(1, YOLO_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, YOLO_INPUT_SIZE);
        let pad_x = (YOLO_INPUT_SIZE - new_w) as f32 / 2.0;
        let pad_y = (YOLO_INPUT_SIZE - new_h) as f32 / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        // Triangle = bilinear
        let resized = imageops::resize(&rgb, new_w as u32, new_h as u32, FilterType::Triangle);

        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        let mut tensor = Array4::<f32>::zeros((1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE));

        for y in 0..YOLO_INPUT_SIZE {
            for x in 0..YOLO_INPUT_SIZE {
                let inside = y >= pad_y_start
                    && y < pad_y_start + new_h
                    && x >= pad_x_start
                    && x < pad_x_start + new_w;

                for c in 0..3 {
                    let value = if inside {
                        resized.get_pixel((x - pad_x_start) as u32, (y - pad_y_start) as u32).0[c] as f32
                    } else {
                        YOLO_PAD_VALUE
                    };
                    tensor[[0, c, y, x]] = value / 255.0;
                }
            }
        }

        (tensor, letterbox)
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if imaging::is_empty(image) {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, predictions) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("predictions: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let candidates = decode_predictions(
            predictions,
            &dims,
            &self.labels,
            &letterbox,
            (image.width(), image.height()),
            self.options.confidence_threshold,
        )?;
        let candidate_count = candidates.len();

        let mut result = nms(candidates, self.options.iou_threshold);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(
            candidates = candidate_count,
            kept = result.len(),
            "YOLO detections"
        );

        Ok(result)
    }
}

/// Decode raw predictions into boxes in original image coordinates.
fn decode_predictions(
    predictions: &[f32],
    dims: &[usize],
    labels: &[String],
    letterbox: &LetterboxInfo,
    image_size: (u32, u32),
    threshold: f32,
) -> Result<Vec<BoundingBox>, DetectorError> {
    let channels = YOLO_BOX_CHANNELS + labels.len();

    let (layout, num_anchors) = match dims {
        [1, c, n] if *c == channels => (PredictionLayout::ChannelsFirst, *n),
        [1, n, c] if *c == channels => (PredictionLayout::ChannelsLast, *n),
        _ => {
            return Err(DetectorError::InferenceFailed(format!(
                "expected prediction shape [1, {channels}, N] for {} classes, got {dims:?}",
                labels.len()
            )))
        }
    };

    if predictions.len() < channels * num_anchors {
        return Err(DetectorError::InferenceFailed(format!(
            "prediction tensor has {} values, expected {}",
            predictions.len(),
            channels * num_anchors
        )));
    }

    let value = |anchor: usize, channel: usize| -> f32 {
        match layout {
            PredictionLayout::ChannelsFirst => predictions[channel * num_anchors + anchor],
            PredictionLayout::ChannelsLast => predictions[anchor * channels + channel],
        }
    };

    let (image_w, image_h) = (image_size.0 as f32, image_size.1 as f32);
    let to_image_x = |x: f32| ((x - letterbox.pad_x) / letterbox.scale).clamp(0.0, image_w) as u32;
    let to_image_y = |y: f32| ((y - letterbox.pad_y) / letterbox.scale).clamp(0.0, image_h) as u32;

    let mut detections = Vec::new();

    for anchor in 0..num_anchors {
        let (class_idx, score) = (0..labels.len())
            .map(|c| (c, value(anchor, YOLO_BOX_CHANNELS + c)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < threshold {
            continue;
        }

        let cx = value(anchor, 0);
        let cy = value(anchor, 1);
        let w = value(anchor, 2);
        let h = value(anchor, 3);

        detections.push(BoundingBox {
            x1: to_image_x(cx - w / 2.0),
            y1: to_image_y(cy - h / 2.0),
            x2: to_image_x(cx + w / 2.0),
            y2: to_image_y(cy + h / 2.0),
            label: labels[class_idx].clone(),
            confidence: score,
        });
    }

    Ok(detections)
}

/// Class-aware Non-Maximum Suppression: only boxes with the same label suppress each other.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[j].label != detections[i].label {
                continue;
            }
            if detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Read a national ID from digit detections: order left to right and join the labels.
pub fn assemble_digits(boxes: &[BoundingBox]) -> String {
    let mut ordered: Vec<&BoundingBox> = boxes.iter().collect();
    ordered.sort_by_key(|b| b.x1);
    ordered.iter().map(|b| b.label.as_str()).collect()
}

/// Class labels of the digit detector: class `i` is the digit `i`.
pub fn digit_labels() -> Vec<String> {
    (0..10).map(|d: u32| d.to_string()).collect()
}

//! End-to-end extraction: card → fields → text and digits → decoded ID.

use crate::decoder::decode_or_empty;
use crate::detector::{assemble_digits, DetectorError, ObjectDetector};
use crate::imaging;
use crate::recognizer::TextReader;
use crate::types::{BoundingBox, FieldKind, IdCardData};
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

/// Vertical growth applied to the `nid` field before digit detection.
pub const DEFAULT_NID_EXPAND_SCALE: f32 = 1.5;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no ID card detected in the image")]
    NoCardDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Everything produced for one photo.
pub struct Extraction {
    pub data: IdCardData,
    /// Card location in the input photo.
    pub card: BoundingBox,
    /// Field locations in `cropped_card` coordinates.
    pub fields: Vec<BoundingBox>,
    pub cropped_card: DynamicImage,
}

/// JSON envelope reported per input image.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<IdCardData>,
}

impl ExtractionReport {
    pub fn from_result(result: &Result<Extraction, ExtractError>) -> Self {
        match result {
            Ok(extraction) => Self {
                success: true,
                error: None,
                data: Some(extraction.data.clone()),
            },
            Err(ExtractError::NoCardDetected) => Self::failure(
                "No ID card detected in the image. Please ensure the ID card is clearly visible.",
            ),
            Err(e) => Self::failure(format!("An error occurred during processing: {e}")),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }
}

/// Chains the card, field and digit detectors with a text reader.
pub struct IdExtractor<D, R> {
    card_detector: D,
    field_detector: D,
    digit_detector: D,
    reader: R,
    nid_expand_scale: f32,
}

impl<D: ObjectDetector, R: TextReader> IdExtractor<D, R> {
    pub fn new(card_detector: D, field_detector: D, digit_detector: D, reader: R) -> Self {
        Self {
            card_detector,
            field_detector,
            digit_detector,
            reader,
            nid_expand_scale: DEFAULT_NID_EXPAND_SCALE,
        }
    }

    pub fn with_nid_expand_scale(mut self, scale: f32) -> Self {
        self.nid_expand_scale = scale;
        self
    }

    /// Extract card data from a photo.
    pub fn extract(&mut self, image: &DynamicImage) -> Result<Extraction, ExtractError> {
        let card = self
            .card_detector
            .detect_first(image)?
            .ok_or(ExtractError::NoCardDetected)?;

        tracing::info!(
            confidence = card.confidence,
            x1 = card.x1, y1 = card.y1, x2 = card.x2, y2 = card.y2,
            "card detected"
        );

        let cropped_card = imaging::crop(image, &card);
        let fields = self.field_detector.detect(&cropped_card)?;
        tracing::debug!(count = fields.len(), "fields detected");

        let data = self.extract_fields(&cropped_card, &fields)?;

        Ok(Extraction {
            data,
            card,
            fields,
            cropped_card,
        })
    }

    fn extract_fields(
        &mut self,
        card: &DynamicImage,
        fields: &[BoundingBox],
    ) -> Result<IdCardData, ExtractError> {
        let mut data = IdCardData::default();

        for field in fields {
            let Some(kind) = FieldKind::from_label(&field.label) else {
                tracing::debug!(label = %field.label, "ignoring unrecognized field");
                continue;
            };

            match kind {
                FieldKind::FirstName => data.first_name = self.read_field(card, field),
                FieldKind::LastName => data.second_name = self.read_field(card, field),
                FieldKind::Serial => data.serial = self.read_field(card, field),
                FieldKind::Address => data.address = self.read_field(card, field),
                FieldKind::NationalId => {
                    let expanded = field.expand_height(self.nid_expand_scale, card.height());
                    let region = imaging::crop(card, &expanded);
                    let digits = self.digit_detector.detect(&region)?;
                    data.national_id = assemble_digits(&digits);
                    tracing::debug!(digits = digits.len(), national_id = %data.national_id, "national ID read");
                }
            }
        }

        data.full_name = format!("{} {}", data.first_name, data.second_name)
            .trim()
            .to_string();

        if data.is_valid() {
            let decoded = decode_or_empty(Some(&data.national_id));
            data.birth_date = decoded.birth_date;
            data.governorate = decoded.governorate;
            data.gender = decoded.gender;
        } else if !data.national_id.is_empty() {
            tracing::warn!(
                national_id = %data.national_id,
                length = data.national_id.chars().count(),
                "national ID is not 14 digits; skipping decode"
            );
        }

        Ok(data)
    }

    /// OCR one field. Recognition failures leave the field empty.
    fn read_field(&mut self, card: &DynamicImage, field: &BoundingBox) -> String {
        let region = imaging::crop(card, field);
        match self.reader.read_text(&region) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(field = %field.label, error = %e, "text recognition failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::RecognizerError;
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;

    fn bbox(x1: u32, y1: u32, x2: u32, y2: u32, label: &str, conf: f32) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2, label: label.into(), confidence: conf }
    }

    /// Returns queued responses in order and records the size of each image it saw.
    #[derive(Default)]
    struct ScriptedDetector {
        responses: VecDeque<Result<Vec<BoundingBox>, DetectorError>>,
        seen: Vec<(u32, u32)>,
    }

    impl ScriptedDetector {
        fn with(responses: Vec<Vec<BoundingBox>>) -> Self {
            Self {
                responses: responses.into_iter().map(Ok).collect(),
                seen: Vec::new(),
            }
        }
    }

    impl ObjectDetector for ScriptedDetector {
        fn detect(&mut self, image: &DynamicImage) -> Result<Vec<BoundingBox>, DetectorError> {
            self.seen.push((image.width(), image.height()));
            self.responses.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    /// Reads back a fixed text per crop width, so fields can be told apart.
    struct WidthReader {
        by_width: Vec<(u32, Result<String, String>)>,
    }

    impl TextReader for WidthReader {
        fn read_text(&mut self, image: &DynamicImage) -> Result<String, RecognizerError> {
            match self.by_width.iter().find(|(w, _)| *w == image.width()) {
                Some((_, Ok(text))) => Ok(text.clone()),
                Some((_, Err(msg))) => Err(RecognizerError::InferenceFailed(msg.clone())),
                None => Ok(String::new()),
            }
        }
    }

    fn photo() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(800, 600, Rgb([200, 200, 200])))
    }

    fn nid_digits(id: &str) -> Vec<BoundingBox> {
        // emit digits right-to-left to exercise ordering
        id.chars()
            .collect::<Vec<_>>()
            .into_iter()
            .enumerate()
            .rev()
            .map(|(i, c)| bbox(i as u32 * 10, 0, i as u32 * 10 + 8, 20, &c.to_string(), 0.9))
            .collect()
    }

    fn card_fields() -> Vec<BoundingBox> {
        vec![
            bbox(300, 20, 400, 50, "firstName", 0.9),  // width 100
            bbox(250, 60, 400, 90, "lastName", 0.9),   // width 150
            bbox(100, 100, 400, 130, "address", 0.8),  // width 300
            bbox(10, 250, 90, 270, "serial", 0.7),     // width 80
            bbox(150, 200, 400, 220, "nid", 0.95),
            bbox(10, 10, 80, 100, "photo", 0.9),
        ]
    }

    fn reader() -> WidthReader {
        WidthReader {
            by_width: vec![
                (100, Ok("محمد".into())),
                (150, Ok("احمد علي".into())),
                (300, Ok("القاهرة".into())),
                (80, Ok("AB1234".into())),
            ],
        }
    }

    #[test]
    fn test_extract_full_card() {
        let card = ScriptedDetector::with(vec![vec![
            bbox(50, 50, 550, 400, "id_card", 0.6),
            bbox(100, 100, 600, 420, "id_card", 0.97),
        ]]);
        let fields = ScriptedDetector::with(vec![card_fields()]);
        let digits = ScriptedDetector::with(vec![nid_digits("29501011234567")]);

        let mut extractor = IdExtractor::new(card, fields, digits, reader());
        let extraction = extractor.extract(&photo()).unwrap();

        // highest-confidence card wins
        assert_eq!(extraction.card.confidence, 0.97);
        assert_eq!((extraction.cropped_card.width(), extraction.cropped_card.height()), (500, 320));

        let data = &extraction.data;
        assert_eq!(data.first_name, "محمد");
        assert_eq!(data.second_name, "احمد علي");
        assert_eq!(data.full_name, "محمد احمد علي");
        assert_eq!(data.address, "القاهرة");
        assert_eq!(data.serial, "AB1234");
        assert_eq!(data.national_id, "29501011234567");
        assert_eq!(data.birth_date, "1995-01-01");
        assert_eq!(data.governorate, "Dakahlia");
        assert_eq!(data.gender, "Female");
        assert_eq!(extraction.fields.len(), 6);
    }

    #[test]
    fn test_nid_region_is_expanded() {
        let card = ScriptedDetector::with(vec![vec![bbox(0, 0, 800, 600, "id_card", 0.9)]]);
        let fields = ScriptedDetector::with(vec![vec![bbox(100, 200, 500, 220, "nid", 0.9)]]);
        let digits = ScriptedDetector::default();

        let mut extractor = IdExtractor::new(card, fields, digits, reader());
        extractor.extract(&photo()).unwrap();

        // height 20 * 1.5 = 30
        assert_eq!(extractor.digit_detector.seen, vec![(400, 30)]);
    }

    #[test]
    fn test_no_card_detected() {
        let card = ScriptedDetector::default();
        let mut extractor = IdExtractor::new(
            card,
            ScriptedDetector::default(),
            ScriptedDetector::default(),
            reader(),
        );
        let result = extractor.extract(&photo());
        assert!(matches!(result, Err(ExtractError::NoCardDetected)));

        let report = ExtractionReport::from_result(&result);
        assert!(!report.success);
        assert!(report.data.is_none());
        assert!(report.error.unwrap().starts_with("No ID card detected"));
    }

    #[test]
    fn test_invalid_century_yields_empty_derived_fields() {
        let card = ScriptedDetector::with(vec![vec![bbox(0, 0, 800, 600, "id_card", 0.9)]]);
        let fields = ScriptedDetector::with(vec![vec![bbox(100, 200, 500, 220, "nid", 0.9)]]);
        let digits = ScriptedDetector::with(vec![nid_digits("59501011234567")]);

        let mut extractor = IdExtractor::new(card, fields, digits, reader());
        let data = extractor.extract(&photo()).unwrap().data;

        assert_eq!(data.national_id, "59501011234567");
        assert!(data.birth_date.is_empty());
        assert!(data.governorate.is_empty());
        assert!(data.gender.is_empty());
    }

    #[test]
    fn test_short_national_id_is_not_decoded() {
        let card = ScriptedDetector::with(vec![vec![bbox(0, 0, 800, 600, "id_card", 0.9)]]);
        let fields = ScriptedDetector::with(vec![vec![bbox(100, 200, 500, 220, "nid", 0.9)]]);
        let digits = ScriptedDetector::with(vec![nid_digits("2950101123")]);

        let mut extractor = IdExtractor::new(card, fields, digits, reader());
        let data = extractor.extract(&photo()).unwrap().data;

        assert_eq!(data.national_id, "2950101123");
        assert!(!data.is_valid());
        assert!(data.birth_date.is_empty());
    }

    #[test]
    fn test_ocr_failure_leaves_field_empty() {
        let card = ScriptedDetector::with(vec![vec![bbox(0, 0, 800, 600, "id_card", 0.9)]]);
        let fields = ScriptedDetector::with(vec![vec![
            bbox(300, 20, 400, 50, "firstName", 0.9),
            bbox(250, 60, 400, 90, "lastName", 0.9),
        ]]);
        let failing = WidthReader {
            by_width: vec![
                (100, Err("session poisoned".into())),
                (150, Ok("علي".into())),
            ],
        };

        let mut extractor = IdExtractor::new(card, fields, ScriptedDetector::default(), failing);
        let data = extractor.extract(&photo()).unwrap().data;

        assert_eq!(data.first_name, "");
        assert_eq!(data.second_name, "علي");
        // merged name is trimmed
        assert_eq!(data.full_name, "علي");
    }

    #[test]
    fn test_detector_error_propagates() {
        let card = ScriptedDetector::with(vec![vec![bbox(0, 0, 800, 600, "id_card", 0.9)]]);
        let mut fields = ScriptedDetector::default();
        fields
            .responses
            .push_back(Err(DetectorError::InferenceFailed("bad shape".into())));

        let mut extractor = IdExtractor::new(card, fields, ScriptedDetector::default(), reader());
        let result = extractor.extract(&photo());
        assert!(matches!(result, Err(ExtractError::Detector(_))));

        let report = ExtractionReport::from_result(&result);
        assert!(report.error.unwrap().contains("bad shape"));
    }

    #[test]
    fn test_report_serializes() {
        let report = ExtractionReport {
            success: true,
            error: None,
            data: Some(IdCardData::default()),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["error"].is_null());
        assert_eq!(json["data"]["national_id"], "");
    }
}

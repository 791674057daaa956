use serde::{Deserialize, Serialize};

/// Axis-aligned detection box in integer pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    /// Class label reported by the detector (e.g., "nid", "7").
    pub label: String,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> f32 {
        self.width() as f32 * self.height() as f32
    }

    /// Scale the box height around its vertical center, keeping x unchanged.
    ///
    /// The top edge is clamped at 0 and the bottom edge at `image_height`.
    pub fn expand_height(&self, scale: f32, image_height: u32) -> BoundingBox {
        let height = self.height();
        let center_y = self.y1 + height / 2;
        let new_height = (height as f32 * scale) as u32;
        let half = new_height / 2;

        BoundingBox {
            y1: center_y.saturating_sub(half),
            y2: (center_y + half).min(image_height),
            label: self.label.clone(),
            ..*self
        }
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let inter_w = x2.saturating_sub(x1) as f32;
        let inter_h = y2.saturating_sub(y1) as f32;
        let inter_area = inter_w * inter_h;
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// Card fields the field detector can localize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    FirstName,
    LastName,
    Serial,
    Address,
    NationalId,
}

impl FieldKind {
    /// Map a field-detector class label to a field. Unrecognized labels return `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "firstName" => Some(FieldKind::FirstName),
            "lastName" => Some(FieldKind::LastName),
            "serial" => Some(FieldKind::Serial),
            "address" => Some(FieldKind::Address),
            "nid" => Some(FieldKind::NationalId),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::FirstName => "firstName",
            FieldKind::LastName => "lastName",
            FieldKind::Serial => "serial",
            FieldKind::Address => "address",
            FieldKind::NationalId => "nid",
        }
    }
}

/// Information extracted from one national ID card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdCardData {
    pub first_name: String,
    pub second_name: String,
    pub full_name: String,
    pub national_id: String,
    pub address: String,
    pub serial: String,
    pub birth_date: String,
    pub governorate: String,
    pub gender: String,
}

impl IdCardData {
    /// True when a full 14-character national ID was read.
    pub fn is_valid(&self) -> bool {
        self.national_id.chars().count() == 14
    }
}

use anyhow::{Context, Result};
use egid_core::detector::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD};
use egid_core::pipeline::DEFAULT_NID_EXPAND_SCALE;
use egid_core::DetectorOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then `EGID_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing the ONNX models and the dictionary.
    pub model_dir: PathBuf,
    pub card_model: String,
    pub field_model: String,
    pub digit_model: String,
    pub recognizer_model: String,
    /// Character dictionary for the recognizer, one symbol per line.
    pub dictionary: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Vertical growth of the `nid` field before digit detection.
    pub nid_expand_scale: f32,
    /// Class names of the card detector, in model order.
    pub card_labels: Vec<String>,
    /// Class names of the field detector, in model order.
    pub field_labels: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: egid_core::default_model_dir(),
            card_model: "detect_id_card.onnx".to_string(),
            field_model: "detect_fields.onnx".to_string(),
            digit_model: "detect_digits.onnx".to_string(),
            recognizer_model: "rec_arabic.onnx".to_string(),
            dictionary: "arabic_dict.txt".to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            nid_expand_scale: DEFAULT_NID_EXPAND_SCALE,
            card_labels: vec!["id_card".to_string()],
            field_labels: ["address", "firstName", "lastName", "nid", "serial"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };

        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `EGID_*` overrides read through `lookup`. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("EGID_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        self.confidence_threshold =
            parse_or(&lookup, "EGID_CONFIDENCE_THRESHOLD", self.confidence_threshold);
        self.iou_threshold = parse_or(&lookup, "EGID_IOU_THRESHOLD", self.iou_threshold);
        self.nid_expand_scale = parse_or(&lookup, "EGID_NID_EXPAND_SCALE", self.nid_expand_scale);
        self
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
        }
    }

    pub fn card_model_path(&self) -> String {
        self.model_path(&self.card_model)
    }

    pub fn field_model_path(&self) -> String {
        self.model_path(&self.field_model)
    }

    pub fn digit_model_path(&self) -> String {
        self.model_path(&self.digit_model)
    }

    pub fn recognizer_model_path(&self) -> String {
        self.model_path(&self.recognizer_model)
    }

    pub fn dictionary_path(&self) -> String {
        self.model_path(&self.dictionary)
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = include_str!("../../../contrib/egid.toml");

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/usr/share/egid/models"));
        assert_eq!(config.card_labels, vec!["id_card"]);
        assert_eq!(config.field_labels.len(), 5);
        assert_eq!(config.card_model_path(), "/usr/share/egid/models/detect_id_card.onnx");
        assert_eq!(config.dictionary_path(), "/usr/share/egid/models/arabic_dict.txt");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("confidence_threshold = 0.5\n").unwrap();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.iou_threshold, DEFAULT_IOU_THRESHOLD);
        assert_eq!(config.digit_model, "detect_digits.onnx");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("confidence = 0.5\n").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let config = Config::from_toml(SAMPLE).unwrap().with_overrides(env(&[
            ("EGID_MODEL_DIR", "/opt/models"),
            ("EGID_CONFIDENCE_THRESHOLD", "0.4"),
            ("EGID_NID_EXPAND_SCALE", " 1.8 "),
        ]));
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.confidence_threshold, 0.4);
        assert_eq!(config.nid_expand_scale, 1.8);
        assert_eq!(config.iou_threshold, 0.7);
        assert_eq!(config.recognizer_model_path(), "/opt/models/rec_arabic.onnx");
    }

    #[test]
    fn test_unparseable_env_ignored() {
        let config = Config::default().with_overrides(env(&[("EGID_IOU_THRESHOLD", "high")]));
        assert_eq!(config.iou_threshold, DEFAULT_IOU_THRESHOLD);
    }

    #[test]
    fn test_detector_options() {
        let config = Config::default();
        let options = config.detector_options();
        assert_eq!(options, DetectorOptions::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "digit_model = \"digits_v2.onnx\"").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.digit_model, "digits_v2.onnx");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/egid.toml"))).is_err());
    }
}

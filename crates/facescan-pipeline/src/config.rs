use crate::error::PipelineError;
use facescan_core::detector::{DEFAULT_MIN_CONFIDENCE, DEFAULT_NMS_THRESHOLD};
use facescan_core::extractor::DEFAULT_PATCH_SIZE;
use facescan_core::recognizer::DEFAULT_NEIGHBORS;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Pipeline configuration.
///
/// Loaded from an optional TOML file, then overridden by `FACESCAN_*`
/// environment variables. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path to the SQLite face database.
    pub db_path: PathBuf,
    /// Training context label attached to written embeddings.
    pub context: String,
    /// Capacity of every inter-stage channel.
    pub channel_capacity: usize,
    /// Number of detection stage instances sharing the image queue.
    pub detection_workers: usize,
    /// Threads in the extraction fan-out pool.
    pub extraction_workers: usize,
    /// Embeddings per durable write.
    pub write_batch_size: usize,
    /// Side length of the square face patch given to the extractor.
    pub patch_size: usize,
    /// Detections scoring below this are dropped.
    pub min_confidence: f32,
    /// IoU above which overlapping detections are merged.
    pub nms_threshold: f32,
    /// Maximum embedding distance for a positive recognition.
    pub recognition_threshold: f32,
    /// Neighbours consulted per recognition vote.
    pub recognition_neighbors: usize,
    /// The cache projection is skipped at or above this many embeddings.
    pub projection_max_items: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            context: "default".to_string(),
            channel_capacity: 32,
            detection_workers: 1,
            extraction_workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            write_batch_size: 64,
            patch_size: DEFAULT_PATCH_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            recognition_threshold: 0.6,
            recognition_neighbors: DEFAULT_NEIGHBORS,
            projection_max_items: 2_000,
        }
    }
}

fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facescan")
        .join("faces.db")
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `path` if given, then `FACESCAN_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `FACESCAN_*` overrides read through `lookup`. Unparseable
    /// values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACESCAN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACESCAN_CONTEXT") {
            self.context = v;
        }
        override_parsed(&lookup, "FACESCAN_CHANNEL_CAPACITY", &mut self.channel_capacity);
        override_parsed(&lookup, "FACESCAN_DETECTION_WORKERS", &mut self.detection_workers);
        override_parsed(&lookup, "FACESCAN_EXTRACTION_WORKERS", &mut self.extraction_workers);
        override_parsed(&lookup, "FACESCAN_WRITE_BATCH_SIZE", &mut self.write_batch_size);
        override_parsed(&lookup, "FACESCAN_PATCH_SIZE", &mut self.patch_size);
        override_parsed(&lookup, "FACESCAN_MIN_CONFIDENCE", &mut self.min_confidence);
        override_parsed(&lookup, "FACESCAN_NMS_THRESHOLD", &mut self.nms_threshold);
        override_parsed(&lookup, "FACESCAN_RECOGNITION_THRESHOLD", &mut self.recognition_threshold);
        override_parsed(&lookup, "FACESCAN_RECOGNITION_NEIGHBORS", &mut self.recognition_neighbors);
        override_parsed(&lookup, "FACESCAN_PROJECTION_MAX_ITEMS", &mut self.projection_max_items);
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let counts = [
            ("channel_capacity", self.channel_capacity),
            ("detection_workers", self.detection_workers),
            ("extraction_workers", self.extraction_workers),
            ("write_batch_size", self.write_batch_size),
            ("patch_size", self.patch_size),
            ("recognition_neighbors", self.recognition_neighbors),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(PipelineError::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(PipelineError::InvalidConfig(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "nms_threshold must be within [0, 1], got {}",
                self.nms_threshold
            )));
        }
        if !self.recognition_threshold.is_finite() || self.recognition_threshold < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "recognition_threshold must be a non-negative number, got {}",
                self.recognition_threshold
            )));
        }
        if self.context.is_empty() {
            return Err(PipelineError::InvalidConfig("context must not be empty".into()));
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable configuration override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            context = "family"
            write_batch_size = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.context, "family");
        assert_eq!(config.write_batch_size, 8);
        assert_eq!(config.channel_capacity, PipelineConfig::default().channel_capacity);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facescan.toml");
        fs::write(&path, "db_path = \"/var/lib/facescan/faces.db\"\nrecognition_threshold = 0.35\n").unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/facescan/faces.db"));
        assert_eq!(config.recognition_threshold, 0.35);
    }

    #[test]
    fn test_overrides_applied() {
        let vars: HashMap<&str, &str> = [
            ("FACESCAN_CONTEXT", "review"),
            ("FACESCAN_WRITE_BATCH_SIZE", "5"),
            ("FACESCAN_RECOGNITION_THRESHOLD", "0.25"),
            ("FACESCAN_CHANNEL_CAPACITY", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.context, "review");
        assert_eq!(config.write_batch_size, 5);
        assert_eq!(config.recognition_threshold, 0.25);
        assert_eq!(config.channel_capacity, PipelineConfig::default().channel_capacity);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = PipelineConfig { write_batch_size: 0, ..PipelineConfig::default() };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let config = PipelineConfig { min_confidence: 1.5, ..PipelineConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "write_batch_size = \"many\"").unwrap();
        assert!(matches!(PipelineConfig::from_file(&path), Err(PipelineError::TomlParse(_))));
    }
}

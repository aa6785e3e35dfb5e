//! Application Configuration
//!
//! Scanner settings stored in TOML format. Every section has defaults, so a
//! partial file only overrides what it names.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::classifier::ClassifierConfig;
use crate::vision::face::FaceConfig;
use crate::vision::filter::FilterConfig;
use crate::vision::learned::LearnedConfig;
use crate::vision::ocr::RecognitionConfig;
use crate::vision::rectangles::RectangleConfig;
use crate::vision::DetectorStrategy;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Detector selection and model location
    pub detection: DetectionSettings,
    /// Geometric rectangle detector thresholds
    pub rectangle: RectangleConfig,
    /// Scan frame filtering thresholds
    pub filter: FilterConfig,
    /// Card-likeness rule
    pub classifier: ClassifierConfig,
    /// Text recognition settings
    pub recognition: RecognitionConfig,
    /// Face detection settings
    pub face: FaceConfig,
    /// Per-image scan settings
    pub scan: ScanSettings,
    /// Card store settings
    pub storage: StorageSettings,
}

/// Detector strategy and model lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Which region detector to run
    pub strategy: DetectorStrategy,
    /// Directory holding model files (defaults to the data directory)
    pub models_dir: Option<PathBuf>,
    /// Learned detector settings
    pub learned: LearnedConfig,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            strategy: DetectorStrategy::Geometric,
            models_dir: None,
            learned: LearnedConfig::default(),
        }
    }
}

/// Per-image scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Deadline for one pipeline invocation in milliseconds (0 disables it)
    pub timeout_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self { timeout_ms: 15_000 }
    }
}

/// Card store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Card store file (defaults to `cards.json` in the data directory)
    pub store_path: Option<PathBuf>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::ocr::RecognitionLevel;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.detection.strategy, DetectorStrategy::Geometric);
        assert!(config.detection.models_dir.is_none());
        assert_eq!(config.detection.learned.model_name, "card_detector");

        assert!((config.rectangle.min_aspect_ratio - 0.4).abs() < 1e-9);
        assert!((config.rectangle.max_aspect_ratio - 0.85).abs() < 1e-9);
        assert_eq!(config.rectangle.max_observations, 5);

        assert!((config.filter.center_margin - 20.0).abs() < 1e-9);
        assert_eq!(config.classifier.min_dimension, 50);

        assert_eq!(config.recognition.level, RecognitionLevel::Accurate);
        assert!(config.recognition.language_correction);
        assert_eq!(config.scan.timeout_ms, 15_000);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.detection.strategy, parsed.detection.strategy);
        assert_eq!(config.rectangle.max_observations, parsed.rectangle.max_observations);
        assert_eq!(config.recognition.languages, parsed.recognition.languages);
        assert_eq!(config.scan.timeout_ms, parsed.scan.timeout_ms);
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[detection]\nstrategy = \"learned\"\n\n[rectangle]\nminimum_size = 0.05\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();

        assert_eq!(config.detection.strategy, DetectorStrategy::Learned);
        assert!((config.rectangle.minimum_size - 0.05).abs() < 1e-9);
        // Untouched fields keep their defaults
        assert!((config.rectangle.max_aspect_ratio - 0.85).abs() < 1e-9);
        assert_eq!(config.scan.timeout_ms, 15_000);
    }

    #[test]
    fn test_save_and_load_config() {
        let file = NamedTempFile::new().unwrap();
        let mut config = AppConfig::default();
        config.filter.candidate_overlap = 0.3;
        config.storage.store_path = Some(PathBuf::from("/tmp/cards.json"));

        save_config(&config, file.path()).unwrap();
        let loaded = load_config(file.path()).unwrap();

        assert!((loaded.filter.candidate_overlap - 0.3).abs() < 1e-9);
        assert_eq!(loaded.storage.store_path, Some(PathBuf::from("/tmp/cards.json")));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[detection]\nstrategy = 42").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}

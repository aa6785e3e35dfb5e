//! Card-likeness classification
//!
//! A cheap shape rule decides most crops. Crops failing the rule are handed
//! to an injected [`CardOracle`], the extension point for a learned classifier.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::geometry::side_ratio;
use crate::capture::ScanImage;

/// Shape rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Minimum short/long side ratio (inclusive)
    pub min_aspect_ratio: f64,
    /// Maximum short/long side ratio (inclusive)
    pub max_aspect_ratio: f64,
    /// Minimum width and height in pixels
    pub min_dimension: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_aspect_ratio: 0.45,
            max_aspect_ratio: 0.85,
            min_dimension: 50,
        }
    }
}

/// Second opinion for crops the shape rule rejects
pub trait CardOracle: Send + Sync {
    fn is_card(&self, crop: &ScanImage) -> bool;
}

/// Oracle that never overrides the shape rule
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl CardOracle for RejectAll {
    fn is_card(&self, _crop: &ScanImage) -> bool {
        false
    }
}

/// Oracle that accepts every crop; used for mock setups and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl CardOracle for AcceptAll {
    fn is_card(&self, _crop: &ScanImage) -> bool {
        true
    }
}

/// Decides whether a cropped region looks like a card
#[derive(Clone)]
pub struct CardClassifier {
    config: ClassifierConfig,
    oracle: Arc<dyn CardOracle>,
}

impl CardClassifier {
    pub fn new(config: ClassifierConfig, oracle: Arc<dyn CardOracle>) -> Self {
        Self { config, oracle }
    }

    /// Shape rule alone, on pixel dimensions
    pub fn matches_shape(&self, width: u32, height: u32) -> bool {
        if width < self.config.min_dimension || height < self.config.min_dimension {
            return false;
        }
        let ratio = side_ratio(width as f64, height as f64);
        ratio >= self.config.min_aspect_ratio && ratio <= self.config.max_aspect_ratio
    }

    pub fn is_card_like(&self, crop: &ScanImage) -> bool {
        let (width, height) = crop.dimensions();
        if self.matches_shape(width, height) {
            return true;
        }

        let accepted = self.oracle.is_card(crop);
        debug!("Shape rule rejected {}x{} crop, oracle says {}", width, height, accepted);
        accepted
    }
}

impl Default for CardClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default(), Arc::new(RejectAll))
    }
}

impl std::fmt::Debug for CardClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardClassifier").field("config", &self.config).finish()
    }
}

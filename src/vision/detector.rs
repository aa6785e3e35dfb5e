//! Region detector strategy

use anyhow::Result;

use super::region::DetectedRegion;
use crate::capture::ScanImage;

/// Finds card candidates in an image
///
/// Implementations are shared across tasks and run on the blocking pool.
pub trait RegionDetector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether the detector can run right now (models loaded, etc.)
    fn is_ready(&self) -> bool {
        true
    }

    /// Detect candidate regions, normalized to `image`
    fn detect(&self, image: &ScanImage) -> Result<Vec<DetectedRegion>>;
}

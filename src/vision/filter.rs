//! Scan frame filtering
//!
//! Keeps only candidates that sit in or overlap the on-screen "put the card
//! here" guide. Thresholds lean loose: a moving camera rarely lines the card up
//! exactly, and a missed card costs more than an extra candidate.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::geometry::{Rect, Size};
use super::region::DetectedRegion;

/// Scan frame acceptance thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Margin added around the scan frame for the center test, in viewport points
    pub center_margin: f64,
    /// Minimum intersection as a fraction of the candidate's own area
    pub candidate_overlap: f64,
    /// Minimum intersection as a fraction of the scan frame's area
    pub frame_overlap: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            center_margin: 20.0,
            candidate_overlap: 0.1,
            frame_overlap: 0.1,
        }
    }
}

/// Whether a candidate's viewport rectangle matches the scan frame
pub fn accepts(candidate: &Rect, scan_frame: &Rect, config: &FilterConfig) -> bool {
    if scan_frame.expanded(config.center_margin).contains(candidate.center()) {
        return true;
    }

    let Some(overlap) = candidate.intersection(scan_frame) else {
        return false;
    };
    let overlap = overlap.area();

    (candidate.area() > 0.0 && overlap > config.candidate_overlap * candidate.area())
        || (scan_frame.area() > 0.0 && overlap > config.frame_overlap * scan_frame.area())
}

/// Restrict candidates to those matching the scan frame
///
/// Passes everything through when there is no scan frame or no viewport size
/// to map regions into. Filtering is idempotent.
pub fn filter_by_scan_frame(
    regions: Vec<DetectedRegion>,
    scan_frame: Option<&Rect>,
    viewport_size: Option<Size>,
    config: &FilterConfig,
) -> Vec<DetectedRegion> {
    let (Some(frame), Some(viewport)) = (scan_frame, viewport_size) else {
        return regions;
    };

    let before = regions.len();
    let kept: Vec<DetectedRegion> = regions
        .into_iter()
        .map(|region| region.with_viewport(Some(viewport)))
        .filter(|region| {
            region
                .viewport_rect()
                .map(|rect| accepts(&rect, frame, config))
                .unwrap_or(false)
        })
        .collect();

    debug!("Scan frame filter kept {}/{} candidates", kept.len(), before);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::geometry::NormalizedBox;

    fn region(x: f64, y: f64, w: f64, h: f64) -> DetectedRegion {
        // Square image and viewport of the same size, so viewport == pixels
        DetectedRegion::from_box(NormalizedBox::new(x, y, w, h), 0.9, Size::new(1000.0, 1000.0))
    }

    #[test]
    fn test_no_frame_passes_through() {
        let regions = vec![region(0.0, 0.0, 0.1, 0.1), region(0.8, 0.8, 0.1, 0.1)];
        let config = FilterConfig::default();

        let out = filter_by_scan_frame(regions.clone(), None, Some(Size::new(1000.0, 1000.0)), &config);
        assert_eq!(out, regions);

        let frame = Rect::new(0.0, 0.0, 10.0, 10.0);
        let out = filter_by_scan_frame(regions.clone(), Some(&frame), None, &config);
        assert_eq!(out, regions);
    }

    #[test]
    fn test_center_inside_expanded_frame() {
        let frame = Rect::new(100.0, 100.0, 200.0, 200.0);
        let config = FilterConfig::default();

        // Center at (310, 200): outside the frame but within the 20pt margin
        assert!(accepts(&Rect::new(305.0, 150.0, 10.0, 100.0), &frame, &config));
        // Center at (330, 200): too far, and no overlap
        assert!(!accepts(&Rect::new(325.0, 150.0, 10.0, 100.0), &frame, &config));
    }

    #[test]
    fn test_overlap_ratios() {
        let frame = Rect::new(0.0, 0.0, 100.0, 100.0);
        let config = FilterConfig {
            center_margin: 0.0,
            candidate_overlap: 0.3,
            frame_overlap: 0.3,
        };

        // 50x100 overlap of a 200x100 candidate: 25% of candidate, 50% of frame
        assert!(accepts(&Rect::new(50.0, 0.0, 200.0, 100.0), &frame, &config));

        // 5x100 overlap of a 12x100 candidate: ~42% of candidate, 5% of frame
        assert!(accepts(&Rect::new(95.0, 0.0, 12.0, 100.0), &frame, &config));

        // 10x10 corner overlap of a 100x100 candidate: 1% of either
        assert!(!accepts(&Rect::new(90.0, 90.0, 100.0, 100.0), &frame, &config));
    }

    #[test]
    fn test_filter_keeps_matching_regions() {
        // Viewport frame covers the top-left quarter of the preview
        let frame = Rect::new(0.0, 0.0, 500.0, 500.0);
        let viewport = Size::new(1000.0, 1000.0);
        let config = FilterConfig::default();

        // Normalized y is bottom-up: y = 0.6 sits in the top half
        let inside = region(0.1, 0.6, 0.3, 0.3);
        let outside = region(0.7, 0.0, 0.2, 0.2);

        let out = filter_by_scan_frame(vec![inside.clone(), outside], Some(&frame), Some(viewport), &config);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, inside.id);
        assert_eq!(out[0].viewport_size, Some(viewport));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let frame = Rect::new(200.0, 250.0, 400.0, 300.0);
        let viewport = Size::new(800.0, 800.0);
        let config = FilterConfig::default();

        let mut regions = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                regions.push(region(i as f64 * 0.09, j as f64 * 0.09, 0.12, 0.18));
            }
        }

        let once = filter_by_scan_frame(regions, Some(&frame), Some(viewport), &config);
        let twice = filter_by_scan_frame(once.clone(), Some(&frame), Some(viewport), &config);

        assert!(!once.is_empty());
        assert!(once.len() < 100);
        assert_eq!(once, twice);
    }
}

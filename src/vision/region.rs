//! Detected card candidates

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geometry::{to_viewport_rect, NormalizedBox, Point, Rect, Size};

/// Corner points of a detected quadrilateral, normalized with origin bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Corners {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_left: Point,
    pub bottom_right: Point,
}

impl Corners {
    /// Corners of an axis-aligned box
    pub fn from_box(bbox: &NormalizedBox) -> Self {
        let (x0, y0) = (bbox.x, bbox.y);
        let (x1, y1) = (bbox.x + bbox.width, bbox.y + bbox.height);
        Self {
            top_left: Point::new(x0, y1),
            top_right: Point::new(x1, y1),
            bottom_left: Point::new(x0, y0),
            bottom_right: Point::new(x1, y0),
        }
    }
}

/// A region of an image hypothesized to contain a card
///
/// Coordinates stay normalized to the source image until converted with
/// [`DetectedRegion::viewport_rect`] or [`DetectedRegion::pixel_rect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    /// Only used to diff region lists between frames
    pub id: Uuid,
    pub bounding_box: NormalizedBox,
    /// Detector confidence (0.0 - 1.0)
    pub confidence: f32,
    pub corners: Corners,
    /// Pixel size of the image that produced this region
    pub image_size: Size,
    /// Preview size, only needed for display conversion
    pub viewport_size: Option<Size>,
    /// Class label reported by the learned detector
    pub label: Option<String>,
}

impl DetectedRegion {
    pub fn new(bounding_box: NormalizedBox, confidence: f32, corners: Corners, image_size: Size) -> Self {
        Self {
            id: Uuid::new_v4(),
            bounding_box,
            confidence,
            corners,
            image_size,
            viewport_size: None,
            label: None,
        }
    }

    /// Region whose corners are those of its bounding box
    pub fn from_box(bounding_box: NormalizedBox, confidence: f32, image_size: Size) -> Self {
        Self::new(bounding_box, confidence, Corners::from_box(&bounding_box), image_size)
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn with_viewport(mut self, viewport_size: Option<Size>) -> Self {
        self.viewport_size = viewport_size;
        self
    }

    /// Top-left origin pixel rectangle inside the source image
    pub fn pixel_rect(&self) -> Rect {
        self.bounding_box.to_pixel_rect(self.image_size)
    }

    /// Rectangle in viewport coordinates, `None` without a viewport size
    pub fn viewport_rect(&self) -> Option<Rect> {
        self.viewport_size
            .map(|viewport| to_viewport_rect(&self.bounding_box, self.image_size, viewport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corners_from_box() {
        let corners = Corners::from_box(&NormalizedBox::new(0.2, 0.1, 0.5, 0.6));
        assert_eq!(corners.bottom_left, Point::new(0.2, 0.1));
        assert_eq!(corners.top_right, Point::new(0.7, 0.7));
    }

    #[test]
    fn test_viewport_rect_requires_viewport() {
        let region = DetectedRegion::from_box(
            NormalizedBox::new(0.0, 0.0, 1.0, 1.0),
            0.9,
            Size::new(100.0, 100.0),
        );
        assert!(region.viewport_rect().is_none());

        let region = region.with_viewport(Some(Size::new(50.0, 50.0)));
        assert_eq!(region.viewport_rect(), Some(Rect::new(0.0, 0.0, 50.0, 50.0)));
    }

    #[test]
    fn test_regions_get_distinct_ids() {
        let a = DetectedRegion::from_box(NormalizedBox::default(), 0.5, Size::new(1.0, 1.0));
        let b = DetectedRegion::from_box(NormalizedBox::default(), 0.5, Size::new(1.0, 1.0));
        assert_ne!(a.id, b.id);
    }
}

//! Coordinate mapping between detector, image and viewport spaces
//!
//! Detectors report boxes normalized to the image with the origin at the
//! bottom-left corner. Everything downstream (cropping, overlays, scan frame
//! filtering) works in top-left origin pixel space, so conversions happen here
//! and nowhere else.

use serde::{Deserialize, Serialize};

/// Width/height pair in pixels (image or viewport)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both dimensions strictly positive and finite
    pub fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width as f64, height as f64)
    }
}

/// A point in some coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned rectangle, origin top-left
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const ZERO: Rect = Rect { x: 0.0, y: 0.0, width: 0.0, height: 0.0 };

    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Inclusive containment test
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.max_x() && point.y >= self.y && point.y <= self.max_y()
    }

    /// Grow the rectangle by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Overlapping region, `None` when the rectangles do not overlap
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());

        if x1 > x0 && y1 > y0 {
            Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
        } else {
            None
        }
    }

    /// Intersection over union, 0.0 for disjoint or empty rectangles
    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection(other).map(|r| r.area()).unwrap_or(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Short side over long side, 0.0 for empty rectangles
    pub fn side_ratio(&self) -> f64 {
        side_ratio(self.width, self.height)
    }
}

/// Short side divided by long side; orientation independent
pub fn side_ratio(a: f64, b: f64) -> f64 {
    let long = a.max(b);
    if long <= 0.0 {
        return 0.0;
    }
    a.min(b) / long
}

/// Detector box normalized to image dimensions, origin bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// All components inside [0, 1] and the box does not leave the unit square
    pub fn is_valid(&self) -> bool {
        let unit = 0.0..=1.0;
        unit.contains(&self.x)
            && unit.contains(&self.y)
            && unit.contains(&self.width)
            && unit.contains(&self.height)
            && self.x + self.width <= 1.0 + 1e-9
            && self.y + self.height <= 1.0 + 1e-9
    }

    /// Clip to the unit square
    pub fn clamped(&self) -> NormalizedBox {
        let x0 = self.x.clamp(0.0, 1.0);
        let y0 = self.y.clamp(0.0, 1.0);
        let x1 = (self.x + self.width).clamp(0.0, 1.0);
        let y1 = (self.y + self.height).clamp(0.0, 1.0);
        NormalizedBox::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }

    /// Image pixel rectangle with top-left origin
    pub fn to_pixel_rect(&self, image_size: Size) -> Rect {
        let width = self.width * image_size.width;
        let height = self.height * image_size.height;
        let x = self.x * image_size.width;
        let y = image_size.height - self.y * image_size.height - height;
        Rect::new(x, y, width, height)
    }

    /// Inverse of [`NormalizedBox::to_pixel_rect`]
    pub fn from_pixel_rect(rect: &Rect, image_size: Size) -> NormalizedBox {
        if !image_size.is_positive() {
            return NormalizedBox::default();
        }
        let width = rect.width / image_size.width;
        let height = rect.height / image_size.height;
        let x = rect.x / image_size.width;
        let y = (image_size.height - rect.y - rect.height) / image_size.height;
        NormalizedBox::new(x, y, width, height)
    }

    /// Convert a top-left origin pixel point into a normalized bottom-left point
    pub fn normalize_point(point: Point, image_size: Size) -> Point {
        Point::new(
            point.x / image_size.width,
            (image_size.height - point.y) / image_size.height,
        )
    }
}

/// Aspect-fill mapping from image pixels onto a viewport
///
/// The image is scaled uniformly until it covers the viewport and centered;
/// the overflowing axis is cropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectFill {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl AspectFill {
    /// `None` when either size is degenerate
    pub fn new(image_size: Size, viewport_size: Size) -> Option<Self> {
        if !image_size.is_positive() || !viewport_size.is_positive() {
            return None;
        }

        let fill = if image_size.aspect() > viewport_size.aspect() {
            // Wider than the viewport: fit height, crop left/right
            let scale = viewport_size.height / image_size.height;
            AspectFill {
                scale,
                offset_x: (viewport_size.width - image_size.width * scale) / 2.0,
                offset_y: 0.0,
            }
        } else {
            let scale = viewport_size.width / image_size.width;
            AspectFill {
                scale,
                offset_x: 0.0,
                offset_y: (viewport_size.height - image_size.height * scale) / 2.0,
            }
        };

        Some(fill)
    }

    /// Image pixels to viewport points
    pub fn apply(&self, rect: &Rect) -> Rect {
        Rect::new(
            rect.x * self.scale + self.offset_x,
            rect.y * self.scale + self.offset_y,
            rect.width * self.scale,
            rect.height * self.scale,
        )
    }

    /// Viewport points back to image pixels
    pub fn invert(&self, rect: &Rect) -> Rect {
        Rect::new(
            (rect.x - self.offset_x) / self.scale,
            (rect.y - self.offset_y) / self.scale,
            rect.width / self.scale,
            rect.height / self.scale,
        )
    }
}

/// Map a detector box onto the viewport the image is previewed in
///
/// Returns [`Rect::ZERO`] when the image or viewport size is degenerate.
pub fn to_viewport_rect(bbox: &NormalizedBox, image_size: Size, viewport_size: Size) -> Rect {
    match AspectFill::new(image_size, viewport_size) {
        Some(fill) => fill.apply(&bbox.to_pixel_rect(image_size)),
        None => Rect::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_pixel_rect_flips_y() {
        let bbox = NormalizedBox::new(0.1, 0.2, 0.5, 0.25);
        let rect = bbox.to_pixel_rect(Size::new(1000.0, 800.0));

        assert!(approx(rect.x, 100.0));
        assert!(approx(rect.width, 500.0));
        assert!(approx(rect.height, 200.0));
        // 800 - 160 - 200
        assert!(approx(rect.y, 440.0));
    }

    #[test]
    fn test_from_pixel_rect_inverts_to_pixel_rect() {
        let size = Size::new(640.0, 480.0);
        let bbox = NormalizedBox::new(0.3, 0.1, 0.4, 0.6);
        let back = NormalizedBox::from_pixel_rect(&bbox.to_pixel_rect(size), size);

        assert!(approx(back.x, bbox.x));
        assert!(approx(back.y, bbox.y));
        assert!(approx(back.width, bbox.width));
        assert!(approx(back.height, bbox.height));
    }

    #[test]
    fn test_wide_image_fits_height_and_centers_horizontally() {
        // 4:3 landscape image into a 9:16 portrait viewport
        let fill = AspectFill::new(Size::new(1600.0, 1200.0), Size::new(390.0, 844.0)).unwrap();

        assert!(approx(fill.scale, 844.0 / 1200.0));
        assert!(approx(fill.offset_x, (390.0 - 1600.0 * fill.scale) / 2.0));
        assert!(fill.offset_x < 0.0);
        assert!(approx(fill.offset_y, 0.0));
    }

    #[test]
    fn test_tall_image_fits_width_and_centers_vertically() {
        let fill = AspectFill::new(Size::new(1080.0, 1920.0), Size::new(400.0, 400.0)).unwrap();

        assert!(approx(fill.scale, 400.0 / 1080.0));
        assert!(approx(fill.offset_x, 0.0));
        assert!(approx(fill.offset_y, (400.0 - 1920.0 * fill.scale) / 2.0));
    }

    #[test]
    fn test_full_box_covers_viewport() {
        let rect = to_viewport_rect(
            &NormalizedBox::new(0.0, 0.0, 1.0, 1.0),
            Size::new(1920.0, 1080.0),
            Size::new(1000.0, 1000.0),
        );

        // Height fits exactly, width overflows symmetrically
        assert!(approx(rect.y, 0.0));
        assert!(approx(rect.height, 1000.0));
        assert!(approx(rect.center().x, 500.0));
        assert!(rect.width > 1000.0);
    }

    #[test]
    fn test_degenerate_sizes_yield_zero_rect() {
        let bbox = NormalizedBox::new(0.1, 0.1, 0.5, 0.5);
        assert_eq!(to_viewport_rect(&bbox, Size::new(0.0, 10.0), Size::new(10.0, 10.0)), Rect::ZERO);
        assert_eq!(to_viewport_rect(&bbox, Size::new(10.0, 10.0), Size::new(10.0, -1.0)), Rect::ZERO);
    }

    #[test]
    fn test_viewport_rect_inverse_recovers_pixels() {
        let image_sizes = [(1920.0, 1080.0), (1080.0, 1920.0), (3024.0, 4032.0), (500.0, 500.0)];
        let viewports = [(390.0, 844.0), (1024.0, 768.0), (300.0, 300.0)];
        let boxes = [
            NormalizedBox::new(0.0, 0.0, 1.0, 1.0),
            NormalizedBox::new(0.25, 0.4, 0.3, 0.45),
            NormalizedBox::new(0.9, 0.05, 0.1, 0.2),
            NormalizedBox::new(0.5, 0.5, 0.0, 0.0),
        ];

        for &(iw, ih) in &image_sizes {
            for &(vw, vh) in &viewports {
                let image_size = Size::new(iw, ih);
                let viewport = Size::new(vw, vh);
                let fill = AspectFill::new(image_size, viewport).unwrap();

                for bbox in &boxes {
                    let pixels = bbox.to_pixel_rect(image_size);
                    let view = to_viewport_rect(bbox, image_size, viewport);
                    assert!(view.width >= 0.0 && view.height >= 0.0);

                    let back = fill.invert(&view);
                    assert!((back.x - pixels.x).abs() < 1e-6, "{:?} vs {:?}", back, pixels);
                    assert!((back.y - pixels.y).abs() < 1e-6);
                    assert!((back.width - pixels.width).abs() < 1e-6);
                    assert!((back.height - pixels.height).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_rect_intersection_and_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        let inter = a.intersection(&b).unwrap();

        assert_eq!(inter, Rect::new(5.0, 5.0, 5.0, 5.0));
        assert!(approx(a.iou(&b), 25.0 / 175.0));
        assert!(a.intersection(&Rect::new(20.0, 20.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn test_clamped_box_stays_in_unit_square() {
        let b = NormalizedBox::new(-0.1, 0.8, 0.5, 0.4).clamped();
        assert!(b.is_valid());
        assert!(approx(b.x, 0.0));
        assert!(approx(b.width, 0.4));
        assert!(approx(b.height, 0.2));
    }
}

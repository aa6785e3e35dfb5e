//! Geometric rectangle detection
//!
//! Finds card-shaped quadrilaterals directly from image content:
//! grayscale -> blur -> Canny edges -> dilation -> contours -> polygon
//! approximation -> quad checks. Filtering happens twice. The engine pass uses
//! loose, detector-level bounds; the card pass then applies the product's
//! card-shape band to whatever the engine returned.

use anyhow::Result;
use image::imageops::FilterType;
use image::GrayImage;
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::detector::RegionDetector;
use super::geometry::{side_ratio, NormalizedBox, Point, Rect, Size};
use super::region::{Corners, DetectedRegion};
use crate::capture::ScanImage;

/// Polygon approximation epsilon as fraction of perimeter (2%)
const POLY_APPROX_EPSILON: f64 = 0.02;

/// Quads overlapping more than this are treated as the same rectangle
const DUPLICATE_IOU: f64 = 0.8;

/// Maximum samples taken along each side when scoring edge support
const SAMPLES_PER_SIDE: usize = 48;

/// Rectangle detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RectangleConfig {
    /// Engine-level minimum short/long side ratio
    pub min_aspect_ratio: f64,
    /// Engine-level maximum short/long side ratio
    pub max_aspect_ratio: f64,
    /// Minimum short side relative to the smaller image dimension (0.05 - 0.15)
    pub minimum_size: f64,
    /// Minimum edge support for a quad to count (0.0 - 1.0)
    pub minimum_confidence: f32,
    /// Maximum number of quads returned by the engine pass
    pub max_observations: usize,
    /// Allowed deviation of each corner angle from 90 degrees
    pub quadrature_tolerance: f64,
    /// Card-shape band applied after the engine pass (short/long ratio)
    pub card_min_aspect: f64,
    pub card_max_aspect: f64,
    /// Longest side of the working image; larger inputs are downscaled
    pub working_size: u32,
    /// Gaussian blur sigma before edge detection
    pub blur_sigma: f32,
    /// Canny hysteresis thresholds
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for RectangleConfig {
    fn default() -> Self {
        Self {
            min_aspect_ratio: 0.4,
            max_aspect_ratio: 0.85,
            minimum_size: 0.1,
            minimum_confidence: 0.6,
            max_observations: 5,
            quadrature_tolerance: 30.0,
            card_min_aspect: 0.45,
            card_max_aspect: 0.85,
            working_size: 640,
            blur_sigma: 1.5,
            canny_low: 20.0,
            canny_high: 60.0,
        }
    }
}

/// A quadrilateral found by the engine pass, in image pixels (top-left origin)
#[derive(Debug, Clone, PartialEq)]
pub struct Quad {
    /// Corners ordered top-left, top-right, bottom-right, bottom-left
    pub points: [Point; 4],
    /// Fraction of the outline supported by edge pixels
    pub confidence: f32,
}

impl Quad {
    /// Axis-aligned bounding rectangle
    pub fn bounds(&self) -> Rect {
        let min_x = self.points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = self.points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_x = self.points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = self.points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Mean lengths of the two pairs of opposite sides
    pub fn side_lengths(&self) -> (f64, f64) {
        let p = &self.points;
        let a = (p[0].distance(&p[1]) + p[2].distance(&p[3])) / 2.0;
        let b = (p[1].distance(&p[2]) + p[3].distance(&p[0])) / 2.0;
        (a, b)
    }

    fn scaled(&self, factor: f64) -> Quad {
        Quad {
            points: self.points.map(|p| Point::new(p.x * factor, p.y * factor)),
            confidence: self.confidence,
        }
    }

    /// Convert to a region normalized to an image of `image_size`
    pub fn to_region(&self, image_size: Size) -> DetectedRegion {
        let bbox = NormalizedBox::from_pixel_rect(&self.bounds(), image_size).clamped();
        let [tl, tr, br, bl] = self.points.map(|p| NormalizedBox::normalize_point(p, image_size));
        let corners = Corners {
            top_left: tl,
            top_right: tr,
            bottom_left: bl,
            bottom_right: br,
        };
        DetectedRegion::new(bbox, self.confidence, corners, image_size)
    }
}

/// Card detector based on rectangle geometry
#[derive(Debug, Clone, Default)]
pub struct RectangleDetector {
    config: RectangleConfig,
}

impl RectangleDetector {
    pub fn new(config: RectangleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RectangleConfig {
        &self.config
    }

    /// Card-shape pass over engine output
    pub fn passes_card_shape(&self, region: &DetectedRegion) -> bool {
        let ratio = region.pixel_rect().side_ratio();
        ratio >= self.config.card_min_aspect && ratio <= self.config.card_max_aspect
    }
}

impl RegionDetector for RectangleDetector {
    fn name(&self) -> &'static str {
        "geometric"
    }

    fn detect(&self, image: &ScanImage) -> Result<Vec<DetectedRegion>> {
        if image.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let quads = find_quads(&image.to_luma8(), &self.config);
        let engine_count = quads.len();

        let size = image.size();
        let regions: Vec<DetectedRegion> = quads
            .iter()
            .map(|q| q.to_region(size))
            .filter(|r| self.passes_card_shape(r))
            .collect();

        debug!(
            "Rectangle detection complete in {:?}: {} quads, {} card-shaped",
            start.elapsed(),
            engine_count,
            regions.len()
        );

        Ok(regions)
    }
}

/// Engine pass: find quadrilaterals in a grayscale image
///
/// Results are in the input image's pixel coordinates, sorted by confidence
/// and capped at `max_observations`.
pub fn find_quads(gray: &GrayImage, config: &RectangleConfig) -> Vec<Quad> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return vec![];
    }

    // Work on a bounded resolution; quads are scaled back at the end
    let longest = width.max(height);
    let (work, factor) = if config.working_size > 0 && longest > config.working_size {
        let s = config.working_size as f64 / longest as f64;
        let w = ((width as f64 * s).round() as u32).max(1);
        let h = ((height as f64 * s).round() as u32).max(1);
        (image::imageops::resize(gray, w, h, FilterType::Triangle), longest as f64 / config.working_size as f64)
    } else {
        (gray.clone(), 1.0)
    };

    let blurred = imageproc::filter::gaussian_blur_f32(&work, config.blur_sigma.max(0.1));
    let edges = imageproc::edges::canny(&blurred, config.canny_low, config.canny_high);
    let closed = imageproc::morphology::dilate(&edges, Norm::LInf, 1);

    let (work_w, work_h) = work.dimensions();
    let min_dim = work_w.min(work_h) as f64;
    let min_side = config.minimum_size * min_dim;

    let mut quads = Vec::new();
    for contour in find_contours::<i32>(&closed) {
        if contour.points.len() < 4 {
            continue;
        }

        let points: Vec<Point> = contour
            .points
            .iter()
            .map(|p| Point::new(p.x as f64, p.y as f64))
            .collect();

        let perimeter = closed_length(&points);
        if perimeter < 4.0 * min_side {
            continue;
        }

        let epsilon = POLY_APPROX_EPSILON * perimeter;
        let polygon = drop_collinear(simplify_closed(&points, epsilon), epsilon);
        if polygon.len() != 4 {
            continue;
        }

        let corners = order_corners([polygon[0], polygon[1], polygon[2], polygon[3]]);
        if !is_convex(&corners) || !angles_within(&corners, config.quadrature_tolerance) {
            continue;
        }

        let mut quad = Quad { points: corners, confidence: 0.0 };
        let (a, b) = quad.side_lengths();
        let ratio = side_ratio(a, b);
        if ratio < config.min_aspect_ratio || ratio > config.max_aspect_ratio {
            continue;
        }
        if a.min(b) < min_side {
            continue;
        }

        quad.confidence = edge_support(&closed, &quad.points);
        if quad.confidence < config.minimum_confidence {
            continue;
        }

        quads.push(quad);
    }

    let mut quads = suppress_duplicates(quads);
    quads.truncate(config.max_observations);

    if factor != 1.0 {
        quads = quads.iter().map(|q| q.scaled(factor)).collect();
    }

    quads
}

/// Keep the most confident quad out of each group of overlapping ones
fn suppress_duplicates(mut quads: Vec<Quad>) -> Vec<Quad> {
    quads.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.bounds().area().total_cmp(&a.bounds().area()))
    });

    let mut kept: Vec<Quad> = Vec::new();
    for quad in quads {
        let bounds = quad.bounds();
        if kept.iter().all(|k| k.bounds().iou(&bounds) <= DUPLICATE_IOU) {
            kept.push(quad);
        }
    }
    kept
}

/// Perimeter of a closed polyline
fn closed_length(points: &[Point]) -> f64 {
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.distance(b))
        .sum()
}

/// Douglas-Peucker simplification of a closed contour
///
/// The contour is split at the point farthest from its first point, and both
/// halves are simplified as open curves.
pub fn simplify_closed(points: &[Point], epsilon: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let first = points[0];
    let split = points
        .iter()
        .enumerate()
        .max_by(|a, b| first.distance(a.1).total_cmp(&first.distance(b.1)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    if split == 0 {
        return vec![first];
    }

    let mut second_half: Vec<Point> = points[split..].to_vec();
    second_half.push(first);

    let mut result = simplify_open(&points[..=split], epsilon);
    result.pop();
    let mut tail = simplify_open(&second_half, epsilon);
    tail.pop();
    result.extend(tail);
    result
}

/// Remove vertices lying within `epsilon` of the chord between their neighbours
///
/// Catches the extra vertex left where a contour starts mid-edge.
fn drop_collinear(mut polygon: Vec<Point>, epsilon: f64) -> Vec<Point> {
    while polygon.len() > 3 {
        let n = polygon.len();
        let flattest = (0..n)
            .map(|i| {
                let d = perpendicular_distance(&polygon[i], &polygon[(i + n - 1) % n], &polygon[(i + 1) % n]);
                (i, d)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match flattest {
            Some((i, d)) if d <= epsilon => {
                polygon.remove(i);
            }
            _ => break,
        }
    }
    polygon
}

fn simplify_open(points: &[Point], epsilon: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let start = points[0];
    let end = points[points.len() - 1];
    let (index, dmax) = points[1..points.len() - 1]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, perpendicular_distance(p, &start, &end)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if dmax > epsilon {
        let mut left = simplify_open(&points[..=index], epsilon);
        let right = simplify_open(&points[index..], epsilon);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![start, end]
    }
}

fn perpendicular_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = dx.hypot(dy);
    if len < 1e-9 {
        return p.distance(a);
    }
    ((dy * p.x - dx * p.y + b.x * a.y - b.y * a.x) / len).abs()
}

/// Order four corners as top-left, top-right, bottom-right, bottom-left
fn order_corners(points: [Point; 4]) -> [Point; 4] {
    let top_left = extreme(&points, |p| p.x + p.y, false);
    let bottom_right = extreme(&points, |p| p.x + p.y, true);
    let top_right = extreme(&points, |p| p.y - p.x, false);
    let bottom_left = extreme(&points, |p| p.y - p.x, true);
    [top_left, top_right, bottom_right, bottom_left]
}

fn extreme(points: &[Point; 4], key: impl Fn(&Point) -> f64, largest: bool) -> Point {
    let mut best = points[0];
    for p in &points[1..] {
        let better = if largest { key(p) > key(&best) } else { key(p) < key(&best) };
        if better {
            best = *p;
        }
    }
    best
}

fn is_convex(points: &[Point; 4]) -> bool {
    let mut sign = 0.0;
    for i in 0..4 {
        let a = points[i];
        let b = points[(i + 1) % 4];
        let c = points[(i + 2) % 4];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() < 1e-9 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Every interior angle within `tolerance` degrees of a right angle
fn angles_within(points: &[Point; 4], tolerance: f64) -> bool {
    (0..4).all(|i| {
        let prev = points[(i + 3) % 4];
        let cur = points[i];
        let next = points[(i + 1) % 4];
        let (ux, uy) = (prev.x - cur.x, prev.y - cur.y);
        let (vx, vy) = (next.x - cur.x, next.y - cur.y);
        let norm = ux.hypot(uy) * vx.hypot(vy);
        if norm < 1e-9 {
            return false;
        }
        let angle = ((ux * vx + uy * vy) / norm).clamp(-1.0, 1.0).acos().to_degrees();
        (angle - 90.0).abs() <= tolerance
    })
}

/// Fraction of outline samples that land on (or next to) an edge pixel
fn edge_support(edges: &GrayImage, points: &[Point; 4]) -> f32 {
    let (w, h) = edges.dimensions();
    let on_edge = |x: f64, y: f64| {
        let cx = x.round() as i64;
        let cy = y.round() as i64;
        (-1..=1).any(|dy| {
            (-1..=1).any(|dx| {
                let px = cx + dx;
                let py = cy + dy;
                px >= 0
                    && py >= 0
                    && (px as u32) < w
                    && (py as u32) < h
                    && edges.get_pixel(px as u32, py as u32).0[0] > 0
            })
        })
    };

    let mut total = 0usize;
    let mut hits = 0usize;
    for i in 0..4 {
        let a = points[i];
        let b = points[(i + 1) % 4];
        let samples = (a.distance(&b).ceil() as usize / 2).clamp(2, SAMPLES_PER_SIDE);
        for s in 0..samples {
            let t = s as f64 / samples as f64;
            total += 1;
            if on_edge(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t) {
                hits += 1;
            }
        }
    }

    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

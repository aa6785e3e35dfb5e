//! Image data structures for scanned photos

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, RgbaImage};
use std::path::Path;
use std::time::Instant;

use crate::vision::geometry::{Rect, Size};

/// A still image handed to the scanning pipeline (camera frame or library photo)
#[derive(Debug, Clone)]
pub struct ScanImage {
    /// Identifier of the source photo, used for card deduplication
    pub id: String,
    /// RGBA pixel data
    image: RgbaImage,
    /// Display scale factor of the source (points to pixels)
    pub scale: f32,
    /// When the image was captured or loaded
    pub timestamp: Instant,
}

impl ScanImage {
    /// Wrap an already decoded RGBA image
    pub fn new(id: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            id: id.into(),
            image,
            scale: 1.0,
            timestamp: Instant::now(),
        }
    }

    /// Build from raw RGBA bytes
    pub fn from_rgba(id: impl Into<String>, data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let image = RgbaImage::from_raw(width, height, data)
            .context("Pixel buffer does not match the given dimensions")?;
        Ok(Self::new(id, image))
    }

    pub fn from_dynamic(id: impl Into<String>, image: DynamicImage) -> Self {
        Self::new(id, image.to_rgba8())
    }

    /// Decode an image file; the path becomes the image identifier
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to decode image: {:?}", path))?;
        Ok(Self::from_dynamic(path.to_string_lossy(), image))
    }

    /// Set the display scale factor
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get image dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Pixel size as floating point
    pub fn size(&self) -> Size {
        Size::from(self.dimensions())
    }

    /// True when there are no pixels to work with
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn rgba(&self) -> &RgbaImage {
        &self.image
    }

    /// Raw RGBA bytes, row-major
    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn to_luma8(&self) -> GrayImage {
        DynamicImage::ImageRgba8(self.image.clone()).to_luma8()
    }

    /// Crop a top-left origin pixel rectangle
    ///
    /// The rectangle is clipped to the image. Returns `None` when nothing of it
    /// lies inside the image.
    pub fn crop(&self, rect: &Rect) -> Option<ScanImage> {
        let bounds = Rect::new(0.0, 0.0, self.width() as f64, self.height() as f64);
        let clipped = rect.intersection(&bounds)?;

        // Both edges round the same way so the crop keeps the rect's size
        let x = clipped.x.round() as u32;
        let y = clipped.y.round() as u32;
        let x1 = (clipped.max_x().round() as u32).min(self.width());
        let y1 = (clipped.max_y().round() as u32).min(self.height());
        if x1 <= x || y1 <= y {
            return None;
        }

        let cropped = image::imageops::crop_imm(&self.image, x, y, x1 - x, y1 - y).to_image();

        Some(ScanImage {
            id: self.id.clone(),
            image: cropped,
            scale: self.scale,
            timestamp: self.timestamp,
        })
    }
}

//! Image preprocessing for ONNX models
//!
//! Handles image resizing, normalization, and tensor conversion for the
//! PaddleOCR, card detection and face detection models.

use ndarray::{s, Array3, Array4};

use super::geometry::Rect;

/// Preprocessing configuration for the OCR models
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side for the detection model input (typically 640 or 960)
    pub det_target_size: u32,
    /// Target height for recognition model (typically 32 or 48)
    pub rec_target_height: u32,
    /// Maximum width for recognition
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_target_size: 960,
            rec_target_height: 48,
            rec_max_width: 640,
            // PaddleOCR maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Mapping from a letterboxed square input back to the source image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source pixels to input pixels
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    /// Side of the square model input
    pub input_size: u32,
}

impl Letterbox {
    /// Input-space point back to source pixels
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Convert RGBA image data to RGB f32 array in [0, 1]
pub fn rgba_to_rgb_f32(data: &[u8], width: u32, height: u32) -> Array3<f32> {
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for y in 0..height as usize {
        for x in 0..width as usize {
            let idx = (y * width as usize + x) * 4;
            if idx + 2 < data.len() {
                rgb[[y, x, 0]] = data[idx] as f32 / 255.0;
                rgb[[y, x, 1]] = data[idx + 1] as f32 / 255.0;
                rgb[[y, x, 2]] = data[idx + 2] as f32 / 255.0;
            }
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let mut normalized = image.clone();
    for c in 0..3 {
        normalized
            .slice_mut(s![.., .., c])
            .mapv_inplace(|v| (v - mean[c]) / std[c]);
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Bilinear resize to exactly `new_w` x `new_h`
pub fn resize_bilinear(image: &Array3<f32>, new_w: usize, new_h: usize) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));
    if h == 0 || w == 0 || new_h == 0 || new_w == 0 {
        return resized;
    }

    let scale_y = new_h as f32 / h as f32;
    let scale_x = new_w as f32 / w as f32;

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 / scale_y).min(h as f32 - 1.0);
            let src_x = (x as f32 / scale_x).min(w as f32 - 1.0);

            let y0 = src_y.floor() as usize;
            let y1 = (y0 + 1).min(h - 1);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);

            let fy = src_y - y0 as f32;
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let v00 = image[[y0, x0, ch]];
                let v01 = image[[y0, x1, ch]];
                let v10 = image[[y1, x0, ch]];
                let v11 = image[[y1, x1, ch]];

                let v0 = v00 * (1.0 - fx) + v01 * fx;
                let v1 = v10 * (1.0 - fx) + v11 * fx;
                resized[[y, x, ch]] = v0 * (1.0 - fy) + v1 * fy;
            }
        }
    }

    resized
}

/// Resize so the longest side is `target_size`, padded to multiples of 32
/// Returns (resized_image, scale_factor)
pub fn resize_for_detection(image: &Array3<f32>, target_size: u32) -> (Array3<f32>, f32) {
    let (h, w, c) = image.dim();
    let scale = target_size as f32 / (h.max(w).max(1)) as f32;
    let new_h = ((h as f32 * scale) as usize).max(1);
    let new_w = ((w as f32 * scale) as usize).max(1);

    // Pad to make dimensions divisible by 32 (required by model)
    let padded_h = new_h.div_ceil(32) * 32;
    let padded_w = new_w.div_ceil(32) * 32;

    let resized = resize_bilinear(image, new_w, new_h);
    let mut padded = Array3::<f32>::zeros((padded_h, padded_w, c));
    padded.slice_mut(s![..new_h, ..new_w, ..]).assign(&resized);

    (padded, scale)
}

/// Resize image for recognition model (fixed height, variable width)
pub fn resize_for_recognition(image: &Array3<f32>, target_height: u32, max_width: u32) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let scale = target_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).ceil() as u32).clamp(1, max_width) as usize;
    resize_bilinear(image, new_w, target_height as usize)
}

/// Crop a pixel rectangle, clipped to the image
///
/// Returns `None` when nothing of the rectangle lies inside the image.
pub fn crop_rect(image: &Array3<f32>, rect: &Rect) -> Option<Array3<f32>> {
    let (img_h, img_w, _) = image.dim();
    let bounds = Rect::new(0.0, 0.0, img_w as f64, img_h as f64);
    let clipped = rect.intersection(&bounds)?;

    let x0 = clipped.x.floor() as usize;
    let y0 = clipped.y.floor() as usize;
    let x1 = (clipped.max_x().ceil() as usize).min(img_w);
    let y1 = (clipped.max_y().ceil() as usize).min(img_h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(image.slice(s![y0..y1, x0..x1, ..]).to_owned())
}

/// Full preprocessing pipeline for text detection
pub fn preprocess_for_detection(
    data: &[u8],
    width: u32,
    height: u32,
    config: &PreprocessConfig,
) -> (Array4<f32>, f32) {
    let rgb = rgba_to_rgb_f32(data, width, height);
    let (resized, scale) = resize_for_detection(&rgb, config.det_target_size);
    let normalized = normalize(&resized, &config.mean, &config.std);
    (hwc_to_nchw(&normalized), scale)
}

/// Full preprocessing pipeline for text recognition
pub fn preprocess_for_recognition(image: &Array3<f32>, config: &PreprocessConfig) -> Array4<f32> {
    let resized = resize_for_recognition(image, config.rec_target_height, config.rec_max_width);
    let normalized = normalize(&resized, &config.mean, &config.std);
    hwc_to_nchw(&normalized)
}

/// Letterbox into a square input: scale to fit, center, pad with gray
pub fn letterbox(image: &Array3<f32>, input_size: u32) -> (Array4<f32>, Letterbox) {
    let (h, w, c) = image.dim();
    let size = input_size as usize;
    let scale = input_size as f32 / (h.max(w).max(1)) as f32;
    let new_w = ((w as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = resize_bilinear(image, new_w, new_h);
    let mut canvas = Array3::<f32>::from_elem((size, size, c), 114.0 / 255.0);
    canvas
        .slice_mut(s![pad_y..pad_y + new_h, pad_x..pad_x + new_w, ..])
        .assign(&resized);

    (
        hwc_to_nchw(&canvas),
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            input_size,
        },
    )
}

/// Stretch to a fixed input size and normalize (face detector input)
pub fn preprocess_fixed(
    image: &Array3<f32>,
    width: u32,
    height: u32,
    mean: &[f32; 3],
    std: &[f32; 3],
) -> Array4<f32> {
    let resized = resize_bilinear(image, width as usize, height as usize);
    hwc_to_nchw(&normalize(&resized, mean, std))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_to_rgb() {
        let rgba = vec![
            255, 0, 0, 255,     // Red pixel (RGBA)
            0, 255, 0, 255,     // Green pixel
            0, 0, 255, 255,     // Blue pixel
            128, 128, 128, 255, // Gray pixel
        ];

        let rgb = rgba_to_rgb_f32(&rgba, 2, 2);

        assert!((rgb[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(rgb[[0, 0, 1]].abs() < 0.01);
        assert!(rgb[[0, 1, 0]].abs() < 0.01);
        assert!((rgb[[0, 1, 1]] - 1.0).abs() < 0.01);
        assert!((rgb[[1, 0, 2]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| (h * 100 + w * 10 + c) as f32);
        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize() {
        let image = Array3::<f32>::from_elem((2, 2, 3), 0.5);
        let normalized = normalize(&image, &[0.485, 0.456, 0.406], &[0.229, 0.224, 0.225]);
        assert!((normalized[[0, 0, 0]] - (0.5 - 0.485) / 0.229).abs() < 0.01);
        assert!((normalized[[1, 1, 2]] - (0.5 - 0.406) / 0.225).abs() < 0.01);
    }

    #[test]
    fn test_detection_resize_pads_to_32() {
        let image = Array3::<f32>::from_elem((300, 500, 3), 1.0);
        let (resized, scale) = resize_for_detection(&image, 640);

        assert!((scale - 1.28).abs() < 1e-4);
        let (h, w, _) = resized.dim();
        assert_eq!(w, 640);
        assert_eq!(h % 32, 0);
        assert!(h >= 384);
        // Padding stays zero
        assert_eq!(resized[[h - 1, 0, 0]], 0.0);
    }

    #[test]
    fn test_recognition_resize_keeps_height() {
        let image = Array3::<f32>::from_elem((24, 100, 3), 0.3);
        let resized = resize_for_recognition(&image, 48, 640);
        assert_eq!(resized.dim(), (48, 200, 3));

        let wide = Array3::<f32>::from_elem((10, 2000, 3), 0.3);
        assert_eq!(resize_for_recognition(&wide, 48, 640).dim(), (48, 640, 3));
    }

    #[test]
    fn test_crop_rect() {
        let image = Array3::<f32>::from_shape_fn((50, 80, 3), |(y, x, _)| (y * 1000 + x) as f32);
        let crop = crop_rect(&image, &Rect::new(10.0, 5.0, 20.0, 10.0)).unwrap();

        assert_eq!(crop.dim(), (10, 20, 3));
        assert_eq!(crop[[0, 0, 0]], 5010.0);
        assert!(crop_rect(&image, &Rect::new(100.0, 0.0, 5.0, 5.0)).is_none());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let image = Array3::<f32>::from_elem((480, 640, 3), 1.0);
        let (tensor, lb) = letterbox(&image, 320);

        assert_eq!(tensor.dim(), (1, 3, 320, 320));
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 40.0);

        let (x, y) = lb.to_source(160.0, 160.0);
        assert!((x - 320.0).abs() < 1e-3);
        assert!((y - 240.0).abs() < 1e-3);
    }
}

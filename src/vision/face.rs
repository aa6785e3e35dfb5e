//! Face presence detection on card crops

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::geometry::{NormalizedBox, Rect, Size};
use super::models::{ModelError, ModelManager, OnnxSession};
use super::preprocess::{preprocess_fixed, rgba_to_rgb_f32};
use crate::capture::ScanImage;

/// Face detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub enabled: bool,
    pub model_name: String,
    pub input_width: u32,
    pub input_height: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: "face_detector".to_string(),
            input_width: 320,
            input_height: 240,
            score_threshold: 0.7,
            nms_threshold: 0.3,
        }
    }
}

/// Whether a face was found, and where (normalized, origin bottom-left)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FacePresence {
    pub present: bool,
    pub bounds: Option<NormalizedBox>,
}

impl FacePresence {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn at(bounds: NormalizedBox) -> Self {
        Self {
            present: true,
            bounds: Some(bounds),
        }
    }
}

pub trait FaceDetector: Send + Sync {
    /// First face only
    fn detect_face(&self, image: &ScanImage) -> Result<FacePresence>;
}

/// Used when no face model is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect_face(&self, _image: &ScanImage) -> Result<FacePresence> {
        Ok(FacePresence::absent())
    }
}

/// UltraFace-style detector: `scores [1, N, 2]`, `boxes [1, N, 4]`
pub struct OnnxFaceDetector {
    session: OnnxSession,
    config: FaceConfig,
}

impl OnnxFaceDetector {
    pub fn load(manager: &ModelManager, config: &FaceConfig) -> Result<Self> {
        let session = manager.load_session(&config.model_name)?;
        Ok(Self {
            session,
            config: config.clone(),
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect_face(&self, image: &ScanImage) -> Result<FacePresence> {
        if image.is_empty() {
            return Ok(FacePresence::absent());
        }

        let rgb = rgba_to_rgb_f32(image.data(), image.width(), image.height());
        // (pixel - 127) / 128
        let mean = [127.0 / 255.0; 3];
        let std = [128.0 / 255.0; 3];
        let tensor = preprocess_fixed(&rgb, self.config.input_width, self.config.input_height, &mean, &std);

        let outputs = self.session.run(tensor)?;
        let [scores, boxes] = outputs.as_slice() else {
            return Err(ModelError::UnexpectedOutput(format!("face detector returned {} outputs", outputs.len())).into());
        };
        if scores.shape.last() != Some(&2) || boxes.shape.last() != Some(&4) {
            return Err(ModelError::UnexpectedOutput(format!(
                "face shapes {:?} / {:?}",
                scores.shape, boxes.shape
            ))
            .into());
        }

        let presence = first_face(
            &scores.data,
            &boxes.data,
            self.config.score_threshold,
            self.config.nms_threshold,
        );
        debug!("Face detection: present = {}", presence.present);
        Ok(presence)
    }
}

/// Pick the first face, in model order, that survives thresholding and NMS
///
/// `boxes` hold `(x1, y1, x2, y2)` normalized with a top-left origin. The
/// result is flipped to the bottom-left convention used by regions.
pub fn first_face(scores: &[f32], boxes: &[f32], score_threshold: f32, nms_threshold: f32) -> FacePresence {
    let count = (scores.len() / 2).min(boxes.len() / 4);
    let mut candidates: Vec<(usize, f32, Rect)> = (0..count)
        .filter_map(|i| {
            let score = scores[i * 2 + 1];
            if score <= score_threshold {
                return None;
            }
            let b = &boxes[i * 4..i * 4 + 4];
            let rect = Rect::new(
                b[0] as f64,
                b[1] as f64,
                (b[2] - b[0]) as f64,
                (b[3] - b[1]) as f64,
            );
            (!rect.is_empty()).then_some((i, score, rect))
        })
        .collect();

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut kept: Vec<(usize, Rect)> = Vec::new();
    for (index, _, rect) in candidates {
        if kept.iter().all(|(_, k)| k.iou(&rect) <= nms_threshold as f64) {
            kept.push((index, rect));
        }
    }

    match kept.iter().min_by_key(|(index, _)| *index) {
        Some((_, rect)) => {
            let unit = Size::new(1.0, 1.0);
            FacePresence::at(NormalizedBox::from_pixel_rect(rect, unit).clamped())
        }
        None => FacePresence::absent(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_face_detector() {
        let image = ScanImage::new("crop", image::RgbaImage::new(100, 140));
        let presence = NoFaceDetector.detect_face(&image).unwrap();
        assert!(!presence.present);
        assert!(presence.bounds.is_none());
    }

    #[test]
    fn test_first_face_flips_to_bottom_left() {
        let scores = vec![0.9, 0.1, 0.05, 0.95];
        let boxes = vec![0.0, 0.0, 0.1, 0.1, 0.2, 0.1, 0.6, 0.5];

        let presence = first_face(&scores, &boxes, 0.7, 0.3);
        assert!(presence.present);
        let bounds = presence.bounds.unwrap();
        assert!((bounds.x - 0.2).abs() < 1e-6);
        assert!((bounds.y - 0.5).abs() < 1e-6);
        assert!((bounds.width - 0.4).abs() < 1e-6);
        assert!((bounds.height - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_strongest() {
        let scores = vec![0.2, 0.8, 0.1, 0.9];
        let boxes = vec![0.1, 0.1, 0.5, 0.5, 0.12, 0.12, 0.52, 0.52];

        let presence = first_face(&scores, &boxes, 0.7, 0.3);
        let bounds = presence.bounds.unwrap();
        assert!((bounds.x - 0.12).abs() < 1e-6);
    }

    #[test]
    fn test_below_threshold_is_absent() {
        let presence = first_face(&[0.5, 0.5], &[0.1, 0.1, 0.3, 0.3], 0.7, 0.3);
        assert_eq!(presence, FacePresence::absent());
        assert_eq!(first_face(&[], &[], 0.7, 0.3), FacePresence::absent());
    }
}

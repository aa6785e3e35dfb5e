//! Learned card detector
//!
//! Runs an ONNX object detection model over a letterboxed copy of the image.
//! The model is loaded in the background; until it is ready the pipeline
//! falls back to the geometric detector.

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::detector::RegionDetector;
use super::geometry::{NormalizedBox, Rect, Size};
use super::models::{ModelError, ModelManager, OnnxSession};
use super::preprocess::{letterbox, rgba_to_rgb_f32, Letterbox};
use super::region::DetectedRegion;
use crate::capture::ScanImage;

/// Learned detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnedConfig {
    /// Model base name, looked up as `<name>.onnx` then `<name>.ort`
    pub model_name: String,
    /// Side of the square model input
    pub input_size: u32,
    /// Detections at or below this score are dropped
    pub confidence_threshold: f32,
    /// Class labels indexed by class id
    pub labels: Vec<String>,
}

impl Default for LearnedConfig {
    fn default() -> Self {
        Self {
            model_name: "card_detector".to_string(),
            input_size: 640,
            confidence_threshold: 0.5,
            labels: vec!["card".to_string()],
        }
    }
}

enum LoadState {
    Unloaded,
    Ready(Arc<OnnxSession>),
    Failed(String),
}

/// Card detector backed by an ONNX model
pub struct LearnedDetector {
    config: LearnedConfig,
    state: RwLock<LoadState>,
}

impl LearnedDetector {
    /// Detector with no model yet; see [`LearnedDetector::load`]
    pub fn new(config: LearnedConfig) -> Self {
        Self {
            config,
            state: RwLock::new(LoadState::Unloaded),
        }
    }

    pub fn with_session(config: LearnedConfig, session: OnnxSession) -> Self {
        Self {
            config,
            state: RwLock::new(LoadState::Ready(Arc::new(session))),
        }
    }

    pub fn config(&self) -> &LearnedConfig {
        &self.config
    }

    /// Load the model on the blocking pool
    ///
    /// Failure is recorded and leaves the detector not ready; it is also
    /// returned so callers can report it.
    pub async fn load(&self, manager: ModelManager) -> Result<()> {
        let name = self.config.model_name.clone();
        let start = Instant::now();
        let loaded = tokio::task::spawn_blocking(move || manager.load_session(&name)).await?;

        match loaded {
            Ok(session) => {
                info!("Card detector '{}' loaded in {:?}", self.config.model_name, start.elapsed());
                *self.state.write() = LoadState::Ready(Arc::new(session));
                Ok(())
            }
            Err(e) => {
                warn!("Card detector '{}' failed to load: {:#}", self.config.model_name, e);
                *self.state.write() = LoadState::Failed(format!("{:#}", e));
                Err(e)
            }
        }
    }

    /// Load error, if the last load attempt failed
    pub fn load_error(&self) -> Option<String> {
        match &*self.state.read() {
            LoadState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    fn session(&self) -> Option<Arc<OnnxSession>> {
        match &*self.state.read() {
            LoadState::Ready(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }
}

impl RegionDetector for LearnedDetector {
    fn name(&self) -> &'static str {
        "learned"
    }

    fn is_ready(&self) -> bool {
        matches!(&*self.state.read(), LoadState::Ready(_))
    }

    fn detect(&self, image: &ScanImage) -> Result<Vec<DetectedRegion>> {
        let session = self
            .session()
            .ok_or_else(|| ModelError::NotLoaded(self.config.model_name.clone()))?;
        if image.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let rgb = rgba_to_rgb_f32(image.data(), image.width(), image.height());
        let (tensor, lb) = letterbox(&rgb, self.config.input_size);
        let outputs = session.run(tensor)?;
        let output = outputs
            .first()
            .ok_or_else(|| ModelError::UnexpectedOutput("card detector returned nothing".into()))?;

        let regions = decode_detections(
            &output.data,
            &output.shape,
            &lb,
            image.size(),
            self.config.confidence_threshold,
            &self.config.labels,
        )?;

        debug!("Learned detection complete in {:?}: {} regions", start.elapsed(), regions.len());
        Ok(regions)
    }
}

impl std::fmt::Debug for LearnedDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnedDetector")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Decode `[1, N, 6]` or `[N, 6]` rows of `(x1, y1, x2, y2, score, class)`
///
/// Boxes are in letterboxed input pixels. Output regions are sorted by
/// descending confidence.
pub fn decode_detections(
    data: &[f32],
    shape: &[usize],
    lb: &Letterbox,
    image_size: Size,
    threshold: f32,
    labels: &[String],
) -> Result<Vec<DetectedRegion>, ModelError> {
    let (rows, cols) = match shape {
        [1, n, c] => (*n, *c),
        [n, c] => (*n, *c),
        _ => return Err(ModelError::UnexpectedOutput(format!("detection shape {:?}", shape))),
    };
    if cols < 6 || data.len() < rows * cols {
        return Err(ModelError::UnexpectedOutput(format!(
            "detection shape {:?} with {} values",
            shape,
            data.len()
        )));
    }

    let bounds = Rect::new(0.0, 0.0, image_size.width, image_size.height);
    let mut regions: Vec<DetectedRegion> = data
        .chunks_exact(cols)
        .take(rows)
        .filter(|row| row[4] > threshold)
        .filter_map(|row| {
            let (x1, y1) = lb.to_source(row[0], row[1]);
            let (x2, y2) = lb.to_source(row[2], row[3]);
            let rect = Rect::new(x1 as f64, y1 as f64, (x2 - x1) as f64, (y2 - y1) as f64);
            let clipped = rect.intersection(&bounds)?;
            if clipped.is_empty() {
                return None;
            }

            let bbox = NormalizedBox::from_pixel_rect(&clipped, image_size).clamped();
            let label = labels.get(row[5].max(0.0) as usize).cloned();
            Some(DetectedRegion::from_box(bbox, row[4], image_size).with_label(label))
        })
        .collect();

    regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            input_size: 640,
        }
    }

    #[test]
    fn test_decode_threshold_and_order() {
        let data = vec![
            10.0, 10.0, 110.0, 160.0, 0.7, 0.0, //
            200.0, 100.0, 300.0, 250.0, 0.5, 0.0, // at threshold: dropped
            300.0, 300.0, 400.0, 450.0, 0.95, 0.0,
        ];
        let regions = decode_detections(
            &data,
            &[1, 3, 6],
            &identity(),
            Size::new(640.0, 640.0),
            0.5,
            &["card".to_string()],
        )
        .unwrap();

        assert_eq!(regions.len(), 2);
        assert!((regions[0].confidence - 0.95).abs() < 1e-6);
        assert!((regions[1].confidence - 0.7).abs() < 1e-6);
        assert_eq!(regions[0].label.as_deref(), Some("card"));
    }

    #[test]
    fn test_decode_inverts_letterbox() {
        // 1280x960 image letterboxed into 640: scale 0.5, 80px bars top and bottom
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 80.0,
            input_size: 640,
        };
        let data = vec![100.0, 130.0, 200.0, 330.0, 0.9, 0.0];
        let regions =
            decode_detections(&data, &[1, 6], &lb, Size::new(1280.0, 960.0), 0.5, &[]).unwrap();

        let rect = regions[0].pixel_rect();
        assert!((rect.x - 200.0).abs() < 1e-6);
        assert!((rect.y - 100.0).abs() < 1e-6);
        assert!((rect.width - 200.0).abs() < 1e-6);
        assert!((rect.height - 400.0).abs() < 1e-6);
        assert_eq!(regions[0].label, None);
    }

    #[test]
    fn test_decode_clips_to_image() {
        let data = vec![-50.0, -50.0, 100.0, 100.0, 0.9, 0.0, 700.0, 700.0, 800.0, 800.0, 0.9, 0.0];
        let regions =
            decode_detections(&data, &[2, 6], &identity(), Size::new(640.0, 640.0), 0.5, &[]).unwrap();

        assert_eq!(regions.len(), 1);
        let rect = regions[0].pixel_rect();
        assert!(rect.x.abs() < 1e-6);
        assert!((rect.width - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        let lb = identity();
        let size = Size::new(10.0, 10.0);
        assert!(decode_detections(&[0.0; 4], &[1, 4], &lb, size, 0.5, &[]).is_err());
        assert!(decode_detections(&[0.0; 12], &[2, 1, 6], &lb, size, 0.5, &[]).is_err());
        assert!(decode_detections(&[0.0; 6], &[2, 6], &lb, size, 0.5, &[]).is_err());
    }

    #[test]
    fn test_unloaded_detector_is_not_ready() {
        let detector = LearnedDetector::new(LearnedConfig::default());
        assert!(!detector.is_ready());

        let image = ScanImage::new("blank", image::RgbaImage::new(64, 64));
        assert!(detector.detect(&image).is_err());
    }

    #[tokio::test]
    async fn test_failed_load_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        let detector = LearnedDetector::new(LearnedConfig::default());

        assert!(detector.load(manager).await.is_err());
        assert!(!detector.is_ready());
        assert!(detector.load_error().unwrap().contains("card_detector"));
    }
}

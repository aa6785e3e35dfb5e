//! Vision Layer
//!
//! Card detection and extraction pipeline: locates card-shaped regions in a
//! photo, filters them against the scan frame, reads their text and parses it
//! into player, year and team. Two region detectors are available:
//! - Geometric rectangle detection (edges and contours)
//! - Learned object detection via ONNX Runtime

pub mod classifier;
pub mod detector;
pub mod face;
pub mod filter;
pub mod geometry;
pub mod learned;
pub mod models;
pub mod ocr;
pub mod parser;
pub mod pipeline;
pub mod preprocess;
pub mod rectangles;
pub mod region;

use serde::{Deserialize, Serialize};

pub use classifier::{AcceptAll, CardClassifier, CardOracle, RejectAll};
pub use detector::RegionDetector;
pub use face::{FaceDetector, FacePresence, NoFaceDetector, OnnxFaceDetector};
pub use filter::filter_by_scan_frame;
pub use geometry::{to_viewport_rect, NormalizedBox, Point, Rect, Size};
pub use learned::LearnedDetector;
pub use models::{ModelError, ModelManager, ModelType, OnnxSession};
pub use ocr::{NoTextRecognizer, PaddleOcr, RecognizedTextLine, TextRecognizer};
pub use parser::{parse, ParsedFields};
pub use pipeline::{CardPipeline, ExtractedCardInfo, ScanOutcome};
pub use rectangles::RectangleDetector;
pub use region::{Corners, DetectedRegion};

/// Region detector selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStrategy {
    /// Rectangle geometry from image content
    #[default]
    Geometric,
    /// Pre-trained object detection model
    Learned,
}

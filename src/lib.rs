//! card-scanner - trading card detection and text extraction
//!
//! Locates card-shaped regions in photos, reads each card's text and parses
//! it into player, year and team. The binary wraps [`batch::BatchScanner`]
//! around [`vision::CardPipeline`] for scanning files and folders.

pub mod batch;
pub mod capture;
pub mod config;
pub mod storage;
pub mod vision;

pub use capture::ScanImage;
pub use config::AppConfig;
pub use vision::{CardPipeline, DetectorStrategy, ExtractedCardInfo, ScanOutcome};

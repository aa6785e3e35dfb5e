//! Card scanning pipeline
//!
//! detect regions -> scan frame filter -> per candidate: crop, classify, then
//! text recognition and face detection side by side -> first usable card info.
//!
//! Engines are blocking and run on the blocking pool. Every stage failure is
//! logged and degraded to an empty result; nothing here returns an error to
//! the caller once the pipeline is built.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classifier::CardClassifier;
use super::detector::RegionDetector;
use super::face::{FaceDetector, FacePresence, NoFaceDetector, OnnxFaceDetector};
use super::filter::{filter_by_scan_frame, FilterConfig};
use super::geometry::{NormalizedBox, Rect, Size};
use super::learned::LearnedDetector;
use super::models::{ModelManager, ModelType};
use super::ocr::{NoTextRecognizer, PaddleOcr, TextRecognizer};
use super::parser::{FieldParser, ParsedFields};
use super::rectangles::RectangleDetector;
use super::region::DetectedRegion;
use super::DetectorStrategy;
use crate::capture::ScanImage;
use crate::config::AppConfig;

/// Stand-in deadline when the configured timeout is zero
const UNBOUNDED: Duration = Duration::from_secs(86_400 * 365);

/// Structured information read from one card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCardInfo {
    pub player_name: Option<String>,
    pub year: Option<i32>,
    pub team: Option<String>,
    /// All recognized lines joined with newlines
    pub all_text: String,
    pub has_face: bool,
    /// Face bounds normalized to the crop, origin bottom-left
    pub face_bounds: Option<NormalizedBox>,
}

impl ExtractedCardInfo {
    pub fn new(fields: ParsedFields, face: FacePresence) -> Self {
        Self {
            player_name: fields.player_name,
            year: fields.year,
            team: fields.team,
            all_text: fields.all_text,
            has_face: face.present,
            face_bounds: face.bounds,
        }
    }

    /// No parsed field, no text and no face
    pub fn is_empty(&self) -> bool {
        self.player_name.is_none()
            && self.year.is_none()
            && self.team.is_none()
            && self.all_text.is_empty()
            && !self.has_face
    }
}

/// Result of one scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Every candidate that passed the scan frame filter
    pub regions: Vec<DetectedRegion>,
    /// Info from the first candidate, in detection order, that yielded any
    pub card_info: Option<ExtractedCardInfo>,
}

/// Pipeline over shared engine handles; cheap to clone
#[derive(Clone)]
pub struct CardPipeline {
    geometric: Arc<dyn RegionDetector>,
    learned: Option<Arc<dyn RegionDetector>>,
    recognizer: Arc<dyn TextRecognizer>,
    face_detector: Arc<dyn FaceDetector>,
    classifier: CardClassifier,
    parser: Arc<FieldParser>,
    filter: FilterConfig,
    strategy: DetectorStrategy,
    timeout: Duration,
}

impl CardPipeline {
    pub fn builder() -> CardPipelineBuilder {
        CardPipelineBuilder::default()
    }

    /// Build the pipeline described by `config`, loading models from `manager`
    ///
    /// Missing text or face models leave that stage reading nothing. The
    /// learned detector loads in the background so scans can start on the
    /// geometric fallback. Must be called inside a tokio runtime.
    pub fn from_config(config: &AppConfig, manager: ModelManager) -> Result<Self> {
        let start = Instant::now();

        let recognizer: Arc<dyn TextRecognizer> = match PaddleOcr::load(&manager, &config.recognition) {
            Ok(ocr) => Arc::new(ocr),
            Err(e) => {
                warn!("Text recognition disabled: {:#}", e);
                Arc::new(NoTextRecognizer)
            }
        };

        let face_detector: Arc<dyn FaceDetector> = if !config.face.enabled {
            Arc::new(NoFaceDetector)
        } else {
            match OnnxFaceDetector::load(&manager, &config.face) {
                Ok(detector) => Arc::new(detector),
                Err(e) => {
                    info!("Face detection disabled: {:#}", e);
                    Arc::new(NoFaceDetector)
                }
            }
        };

        let mut builder = Self::builder()
            .geometric_detector(Arc::new(RectangleDetector::new(config.rectangle.clone())))
            .recognizer(recognizer)
            .face_detector(face_detector)
            .classifier(CardClassifier::new(config.classifier.clone(), Arc::new(super::RejectAll)))
            .filter_config(config.filter.clone())
            .strategy(config.detection.strategy)
            .timeout(Duration::from_millis(config.scan.timeout_ms));

        if config.detection.strategy == DetectorStrategy::Learned
            || manager.locate(&config.detection.learned.model_name).is_some()
        {
            let learned = Arc::new(LearnedDetector::new(config.detection.learned.clone()));
            let loader = Arc::clone(&learned);
            tokio::spawn(async move {
                // Failure is recorded on the detector and logged there
                let _ = loader.load(manager).await;
            });
            builder = builder.learned_detector(learned);
        } else {
            debug!(
                "No {} model found, learned detection unavailable",
                ModelType::CardDetector.display_name()
            );
        }

        let pipeline = builder.build()?;
        info!("Card pipeline ready in {:?}", start.elapsed());
        Ok(pipeline)
    }

    pub fn strategy(&self) -> DetectorStrategy {
        self.strategy
    }

    /// Primary entry point using the configured strategy
    ///
    /// `image_size`, when given, replaces the image's own pixel size for
    /// coordinate conversion (for callers whose preview uses another
    /// resolution). Scan frame filtering and the returned regions both use it;
    /// cropping always uses the real pixels.
    pub async fn detect(
        &self,
        image: Arc<ScanImage>,
        image_size: Option<Size>,
        scan_frame: Option<Rect>,
        viewport_size: Option<Size>,
    ) -> ScanOutcome {
        self.run_scan(image, image_size, scan_frame, viewport_size, self.strategy)
            .await
    }

    /// Full scan of one image under the configured deadline
    ///
    /// When the deadline passes, candidates still queued for text or face
    /// recognition are skipped. An engine call already running finishes on
    /// the blocking pool and its result is dropped.
    pub async fn scan(
        &self,
        image: Arc<ScanImage>,
        scan_frame: Option<Rect>,
        viewport_size: Option<Size>,
        strategy: DetectorStrategy,
    ) -> ScanOutcome {
        self.run_scan(image, None, scan_frame, viewport_size, strategy).await
    }

    async fn run_scan(
        &self,
        image: Arc<ScanImage>,
        image_size: Option<Size>,
        scan_frame: Option<Rect>,
        viewport_size: Option<Size>,
        strategy: DetectorStrategy,
    ) -> ScanOutcome {
        let start = Instant::now();
        if image.is_empty() {
            warn!("Skipping empty image {}", image.id);
            return ScanOutcome::default();
        }

        let deadline = tokio::time::Instant::now() + self.timeout;

        let regions = match tokio::time::timeout_at(deadline, self.detect_regions(&image, strategy)).await {
            Ok(regions) => regions,
            Err(_) => {
                warn!("Detection on {} timed out after {:?}", image.id, self.timeout);
                return ScanOutcome::default();
            }
        };
        let regions = match image_size.filter(Size::is_positive) {
            Some(size) => regions
                .into_iter()
                .map(|mut region| {
                    region.image_size = size;
                    region
                })
                .collect(),
            None => regions,
        };
        let regions = filter_by_scan_frame(regions, scan_frame.as_ref(), viewport_size, &self.filter);

        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();
        let extraction = self.extract_from_regions(&image, &regions, &cancel);
        let card_info = match tokio::time::timeout_at(deadline, extraction).await {
            Ok(info) => info,
            Err(_) => {
                warn!("Extraction on {} timed out after {:?}", image.id, self.timeout);
                None
            }
        };

        info!(
            "Scanned {} in {:?}: {} regions, card info {}",
            image.id,
            start.elapsed(),
            regions.len(),
            if card_info.is_some() { "found" } else { "missing" }
        );

        ScanOutcome { regions, card_info }
    }

    /// Extraction only, on the whole image
    pub async fn extract_info(&self, image: Arc<ScanImage>) -> Option<ExtractedCardInfo> {
        if image.is_empty() {
            return None;
        }
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();
        match tokio::time::timeout(self.timeout, self.extract(image, &cancel)).await {
            Ok(info) => info,
            Err(_) => {
                warn!("Extraction timed out after {:?}", self.timeout);
                None
            }
        }
    }

    fn select_detector(&self, strategy: DetectorStrategy) -> Arc<dyn RegionDetector> {
        match (strategy, &self.learned) {
            (DetectorStrategy::Geometric, _) => Arc::clone(&self.geometric),
            (DetectorStrategy::Learned, Some(learned)) if learned.is_ready() => Arc::clone(learned),
            (DetectorStrategy::Learned, Some(_)) => {
                warn!("Learned detector not ready, using geometric detection");
                Arc::clone(&self.geometric)
            }
            (DetectorStrategy::Learned, None) => {
                warn!("No learned detector configured, using geometric detection");
                Arc::clone(&self.geometric)
            }
        }
    }

    async fn detect_regions(&self, image: &Arc<ScanImage>, strategy: DetectorStrategy) -> Vec<DetectedRegion> {
        let detector = self.select_detector(strategy);
        let name = detector.name();
        let image = Arc::clone(image);

        let joined = tokio::task::spawn_blocking(move || detector.detect(&image)).await;
        let regions = stage_result(joined, name);
        debug!("{} detector returned {} regions", name, regions.len());
        regions
    }

    async fn extract_from_regions(
        &self,
        image: &Arc<ScanImage>,
        regions: &[DetectedRegion],
        cancel: &CancellationToken,
    ) -> Option<ExtractedCardInfo> {
        let mut tasks = JoinSet::new();
        for (index, region) in regions.iter().enumerate() {
            // Crop in the image's own pixel space
            let rect = region.bounding_box.to_pixel_rect(image.size());
            let pipeline = self.clone();
            let image = Arc::clone(image);
            let cancel = cancel.clone();
            tasks.spawn(async move { (index, pipeline.process_candidate(image, rect, &cancel).await) });
        }

        let mut results = Vec::with_capacity(regions.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Candidate task failed: {}", e),
            }
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().find_map(|(_, info)| info)
    }

    async fn process_candidate(
        &self,
        image: Arc<ScanImage>,
        rect: Rect,
        cancel: &CancellationToken,
    ) -> Option<ExtractedCardInfo> {
        let classifier = self.classifier.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let crop = image.crop(&rect)?;
            classifier.is_card_like(&crop).then_some(crop)
        })
        .await;

        let crop = match joined {
            Ok(Some(crop)) => crop,
            Ok(None) => {
                debug!("Candidate at {:?} skipped (out of bounds or not card-like)", rect);
                return None;
            }
            Err(e) => {
                warn!("Classification task failed: {}", e);
                return None;
            }
        };

        self.extract(Arc::new(crop), cancel).await
    }

    /// Text and face stages side by side; skipped once `cancel` fires
    async fn extract(&self, crop: Arc<ScanImage>, cancel: &CancellationToken) -> Option<ExtractedCardInfo> {
        let recognizer = Arc::clone(&self.recognizer);
        let text_crop = Arc::clone(&crop);
        let text_cancel = cancel.clone();
        let text = tokio::task::spawn_blocking(move || {
            if text_cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            recognizer.recognize(&text_crop)
        });

        let face_detector = Arc::clone(&self.face_detector);
        let face_cancel = cancel.clone();
        let face = tokio::task::spawn_blocking(move || {
            if face_cancel.is_cancelled() {
                return Ok(FacePresence::absent());
            }
            face_detector.detect_face(&crop)
        });

        let (lines, face) = tokio::join!(text, face);
        let lines = stage_result(lines, "text recognition");
        let face = stage_result(face, "face detection");

        let info = ExtractedCardInfo::new(self.parser.parse_lines(&lines), face);
        (!info.is_empty()).then_some(info)
    }
}

impl std::fmt::Debug for CardPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardPipeline")
            .field("strategy", &self.strategy)
            .field("learned", &self.learned.is_some())
            .field("classifier", &self.classifier)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Unwrap a blocking stage, degrading failures to the empty value
fn stage_result<T: Default>(joined: Result<Result<T>, JoinError>, stage: &str) -> T {
    match joined {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!("{} failed: {:#}", stage, e);
            T::default()
        }
        Err(e) => {
            warn!("{} task failed: {}", stage, e);
            T::default()
        }
    }
}

/// Builder for [`CardPipeline`]
#[derive(Default)]
pub struct CardPipelineBuilder {
    geometric: Option<Arc<dyn RegionDetector>>,
    learned: Option<Arc<dyn RegionDetector>>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    face_detector: Option<Arc<dyn FaceDetector>>,
    classifier: Option<CardClassifier>,
    parser: Option<FieldParser>,
    filter: FilterConfig,
    strategy: DetectorStrategy,
    timeout: Option<Duration>,
}

impl CardPipelineBuilder {
    pub fn geometric_detector(mut self, detector: Arc<dyn RegionDetector>) -> Self {
        self.geometric = Some(detector);
        self
    }

    pub fn learned_detector(mut self, detector: Arc<dyn RegionDetector>) -> Self {
        self.learned = Some(detector);
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn face_detector(mut self, face_detector: Arc<dyn FaceDetector>) -> Self {
        self.face_detector = Some(face_detector);
        self
    }

    pub fn classifier(mut self, classifier: CardClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn parser(mut self, parser: FieldParser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn filter_config(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn strategy(mut self, strategy: DetectorStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fails only when no text recognizer was supplied
    pub fn build(self) -> Result<CardPipeline> {
        let Some(recognizer) = self.recognizer else {
            bail!("card pipeline needs a text recognizer");
        };

        Ok(CardPipeline {
            geometric: self
                .geometric
                .unwrap_or_else(|| Arc::new(RectangleDetector::default())),
            learned: self.learned,
            recognizer,
            face_detector: self.face_detector.unwrap_or_else(|| Arc::new(NoFaceDetector)),
            classifier: self.classifier.unwrap_or_default(),
            parser: Arc::new(self.parser.unwrap_or_default()),
            filter: self.filter,
            strategy: self.strategy,
            timeout: match self.timeout {
                Some(timeout) if timeout.is_zero() => UNBOUNDED,
                Some(timeout) => timeout,
                None => Duration::from_millis(15_000),
            },
        })
    }
}

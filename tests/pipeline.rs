//! End-to-end scans of synthetic photos with a fake text recognizer

use anyhow::Result;
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect as PixelRect;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use card_scanner::vision::{
    CardPipeline, DetectorStrategy, LearnedDetector, RecognizedTextLine, Rect, RectangleDetector, Size,
    TextRecognizer,
};
use card_scanner::ScanImage;

/// Returns fixed lines and counts calls
struct ScriptedRecognizer {
    lines: Vec<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    fn new(lines: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            lines,
            calls: AtomicUsize::new(0),
        })
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(&self, _image: &ScanImage) -> Result<Vec<RecognizedTextLine>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lines
            .iter()
            .map(|text| RecognizedTextLine::new(*text, 0.95))
            .collect())
    }
}

fn photo(cards: &[(i32, i32, u32, u32)]) -> Arc<ScanImage> {
    let mut img = RgbaImage::from_pixel(640, 480, Rgba([230, 230, 230, 255]));
    for &(x, y, w, h) in cards {
        draw_filled_rect_mut(&mut img, PixelRect::at(x, y).of_size(w, h), Rgba([40, 40, 40, 255]));
    }
    Arc::new(ScanImage::new("photo.jpg", img))
}

fn curry() -> Arc<ScriptedRecognizer> {
    ScriptedRecognizer::new(vec!["Stephen Curry", "2021", "Golden State Warriors"])
}

#[tokio::test]
async fn test_scan_extracts_card_fields() {
    let recognizer = curry();
    let pipeline = CardPipeline::builder()
        .recognizer(recognizer.clone())
        .build()
        .unwrap();

    let outcome = pipeline
        .scan(photo(&[(220, 90, 200, 300)]), None, None, DetectorStrategy::Geometric)
        .await;

    assert_eq!(outcome.regions.len(), 1);
    let rect = outcome.regions[0].pixel_rect();
    assert!((rect.x - 220.0).abs() < 8.0);
    assert!((rect.width - 200.0).abs() < 12.0);

    let info = outcome.card_info.expect("card info");
    assert_eq!(info.player_name.as_deref(), Some("Stephen Curry"));
    assert_eq!(info.year, Some(2021));
    assert_eq!(info.team.as_deref(), Some("Golden State Warriors"));
    assert_eq!(info.all_text, "Stephen Curry\n2021\nGolden State Warriors");
    assert!(!info.has_face);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unready_learned_detector_matches_geometric() {
    let pipeline = CardPipeline::builder()
        .geometric_detector(Arc::new(RectangleDetector::default()))
        .learned_detector(Arc::new(LearnedDetector::new(Default::default())))
        .recognizer(curry())
        .build()
        .unwrap();

    let image = photo(&[(220, 90, 200, 300)]);
    let learned = pipeline.scan(image.clone(), None, None, DetectorStrategy::Learned).await;
    let geometric = pipeline.scan(image, None, None, DetectorStrategy::Geometric).await;

    let boxes = |outcome: &card_scanner::ScanOutcome| {
        outcome.regions.iter().map(|r| r.bounding_box).collect::<Vec<_>>()
    };
    assert_eq!(boxes(&learned), boxes(&geometric));
    assert_eq!(learned.card_info, geometric.card_info);
    assert!(learned.card_info.is_some());
}

#[tokio::test]
async fn test_every_candidate_is_processed() {
    let recognizer = curry();
    let pipeline = CardPipeline::builder()
        .recognizer(recognizer.clone())
        .build()
        .unwrap();

    let outcome = pipeline
        .scan(
            photo(&[(60, 90, 200, 300), (380, 90, 200, 300)]),
            None,
            None,
            DetectorStrategy::Geometric,
        )
        .await;

    assert_eq!(outcome.regions.len(), 2);
    assert!(outcome.card_info.is_some());
    // Both candidates ran even though the first already yielded info
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_scan_frame_limits_candidates() {
    let recognizer = curry();
    let pipeline = CardPipeline::builder()
        .recognizer(recognizer.clone())
        .build()
        .unwrap();

    // Viewport matches the photo, frame covers the left card only
    let frame = Rect::new(40.0, 70.0, 240.0, 340.0);
    let outcome = pipeline
        .detect(
            photo(&[(60, 90, 200, 300), (380, 90, 200, 300)]),
            None,
            Some(frame),
            Some(Size::new(640.0, 480.0)),
        )
        .await;

    assert_eq!(outcome.regions.len(), 1);
    let viewport_rect = outcome.regions[0].viewport_rect().unwrap();
    assert!(viewport_rect.x < 100.0);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
}

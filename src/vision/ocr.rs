//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime: DBNet finds text lines, CRNN reads
//! them with greedy CTC decoding.

use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use super::geometry::Rect;
use super::models::{ModelError, ModelManager, ModelType, OnnxSession};
use super::preprocess::{
    crop_rect, preprocess_for_detection, preprocess_for_recognition, rgba_to_rgb_f32, PreprocessConfig,
};
use crate::capture::ScanImage;

/// Boxes whose tops differ by less than this are read left to right
const SAME_LINE_TOLERANCE: f64 = 10.0;

/// One line of recognized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedTextLine {
    pub text: String,
    pub confidence: f32,
    /// Pixel bounds in the recognized image, when the engine reports them
    pub bounds: Option<Rect>,
}

impl RecognizedTextLine {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bounds: None,
        }
    }
}

/// Text recognition engine
pub trait TextRecognizer: Send + Sync {
    /// Recognized lines in reading order, one entry per detected line
    fn recognize(&self, image: &ScanImage) -> Result<Vec<RecognizedTextLine>>;
}

/// Used when no text models are available; reads nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTextRecognizer;

impl TextRecognizer for NoTextRecognizer {
    fn recognize(&self, _image: &ScanImage) -> Result<Vec<RecognizedTextLine>> {
        Ok(Vec::new())
    }
}

/// Speed/accuracy trade-off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionLevel {
    #[default]
    Accurate,
    Fast,
}

impl RecognitionLevel {
    /// Longest side of the text detection input
    pub fn detection_size(&self) -> u32 {
        match self {
            RecognitionLevel::Accurate => 960,
            RecognitionLevel::Fast => 640,
        }
    }
}

/// Text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub level: RecognitionLevel,
    /// Repair digit/letter confusions inside words and numbers
    pub language_correction: bool,
    /// Recognition languages in preference order; the first with models wins
    pub languages: Vec<String>,
    /// Lines below this confidence are dropped
    pub min_confidence: f32,
    /// Probability threshold for the text map
    pub det_threshold: f32,
    /// Minimum mean probability inside a text box
    pub box_threshold: f32,
    /// Box expansion factor
    pub unclip_ratio: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            level: RecognitionLevel::Accurate,
            language_correction: true,
            languages: vec!["en".to_string()],
            min_confidence: 0.5,
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
        }
    }
}

/// PaddleOCR engine
pub struct PaddleOcr {
    det_session: OnnxSession,
    rec_session: OnnxSession,
    /// Index 0 is the CTC blank
    characters: Vec<String>,
    language: String,
    preprocess: PreprocessConfig,
    config: RecognitionConfig,
}

impl PaddleOcr {
    /// Load detection plus the first recognition model available for the
    /// configured languages
    pub fn load(manager: &ModelManager, config: &RecognitionConfig) -> Result<Self> {
        let det_session = manager.load_session(ModelType::TextDetection.base_name())?;

        let (language, rec_name, dict_path) = Self::select_language(manager, &config.languages)?;
        let rec_session = manager.load_session(&rec_name)?;
        let characters = load_character_dict(&dict_path)?;

        info!(
            "PaddleOCR ready: language {}, {} characters, level {:?}",
            language,
            characters.len(),
            config.level
        );

        let preprocess = PreprocessConfig {
            det_target_size: config.level.detection_size(),
            ..PreprocessConfig::default()
        };

        Ok(Self {
            det_session,
            rec_session,
            characters,
            language,
            preprocess,
            config: config.clone(),
        })
    }

    fn select_language(
        manager: &ModelManager,
        languages: &[String],
    ) -> Result<(String, String, std::path::PathBuf), ModelError> {
        for language in languages {
            let rec_name = ModelType::TextRecognition.language_name(language);
            let dict_path = manager.file_path(&format!(
                "{}.txt",
                ModelType::Dictionary.language_name(language)
            ));
            if manager.locate(&rec_name).is_some() && dict_path.is_file() {
                return Ok((language.clone(), rec_name, dict_path));
            }
            warn!("No recognition model for language '{}'", language);
        }

        // Unsuffixed model pair
        let rec_name = ModelType::TextRecognition.base_name().to_string();
        let dict_path = manager.file_path(&format!("{}.txt", ModelType::Dictionary.base_name()));
        if manager.locate(&rec_name).is_some() && dict_path.is_file() {
            return Ok(("default".to_string(), rec_name, dict_path));
        }

        Err(ModelError::NotFound {
            name: rec_name,
            dir: manager.models_dir().to_path_buf(),
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn detect_lines(&self, image: &ScanImage) -> Result<Vec<Rect>> {
        let (tensor, scale) = preprocess_for_detection(image.data(), image.width(), image.height(), &self.preprocess);
        let outputs = self.det_session.run(tensor)?;
        let map = outputs
            .first()
            .ok_or_else(|| ModelError::UnexpectedOutput("text detection returned nothing".into()))?;

        // [1, 1, H, W]
        if map.shape.len() != 4 {
            return Err(ModelError::UnexpectedOutput(format!("text map shape {:?}", map.shape)).into());
        }
        let (map_h, map_w) = (map.shape[2], map.shape[3]);

        let boxes = boxes_from_probability_map(&map.data, map_w, map_h, &self.config);
        let bounds = Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64);
        let mut lines: Vec<Rect> = boxes
            .into_iter()
            .filter_map(|rect| {
                let scaled = Rect::new(
                    rect.x / scale as f64,
                    rect.y / scale as f64,
                    rect.width / scale as f64,
                    rect.height / scale as f64,
                );
                scaled.intersection(&bounds)
            })
            .collect();

        sort_reading_order(&mut lines);
        Ok(lines)
    }

    fn read_line(&self, rgb: &Array3<f32>, rect: &Rect) -> Result<Option<RecognizedTextLine>> {
        let Some(crop) = crop_rect(rgb, rect) else {
            return Ok(None);
        };
        let tensor = preprocess_for_recognition(&crop, &self.preprocess);
        let outputs = self.rec_session.run(tensor)?;
        let preds = outputs
            .first()
            .ok_or_else(|| ModelError::UnexpectedOutput("text recognition returned nothing".into()))?;

        // [1, T, C]
        if preds.shape.len() != 3 {
            return Err(ModelError::UnexpectedOutput(format!("recognition shape {:?}", preds.shape)).into());
        }
        let (steps, classes) = (preds.shape[1], preds.shape[2]);

        Ok(ctc_decode(&preds.data, steps, classes, &self.characters).map(|(text, confidence)| {
            RecognizedTextLine {
                text,
                confidence,
                bounds: Some(*rect),
            }
        }))
    }
}

impl TextRecognizer for PaddleOcr {
    fn recognize(&self, image: &ScanImage) -> Result<Vec<RecognizedTextLine>> {
        if image.is_empty() {
            return Ok(Vec::new());
        }

        let line_boxes = self.detect_lines(image)?;
        debug!("Text detection found {} lines", line_boxes.len());

        let rgb = rgba_to_rgb_f32(image.data(), image.width(), image.height());
        let mut lines = Vec::with_capacity(line_boxes.len());
        for rect in &line_boxes {
            let Some(mut line) = self.read_line(&rgb, rect)? else {
                continue;
            };
            if line.confidence < self.config.min_confidence {
                debug!("Dropping low-confidence line {:?} ({:.2})", line.text, line.confidence);
                continue;
            }
            if self.config.language_correction {
                line.text = correct_confusions(&line.text);
            }
            lines.push(line);
        }

        Ok(lines)
    }
}

impl std::fmt::Debug for PaddleOcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaddleOcr")
            .field("language", &self.language)
            .field("level", &self.config.level)
            .finish()
    }
}

/// Dictionary with the CTC blank at 0 and a trailing space
pub fn load_character_dict(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open character dictionary {:?}", path))?;
    Ok(parse_character_dict(&content))
}

pub fn parse_character_dict(content: &str) -> Vec<String> {
    let mut characters = vec!["blank".to_string()];
    characters.extend(
        content
            .lines()
            .map(|line| line.trim_end_matches(['\r', '\n']))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    characters.push(" ".to_string());
    characters
}

/// Text line boxes from a DBNet probability map, in map pixels
pub fn boxes_from_probability_map(
    map: &[f32],
    width: usize,
    height: usize,
    config: &RecognitionConfig,
) -> Vec<Rect> {
    if width == 0 || height == 0 || map.len() < width * height {
        return Vec::new();
    }

    let binary = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let p = map[y as usize * width + x as usize];
        Luma([if p > config.det_threshold { 255 } else { 0 }])
    });
    let binary = dilate(&binary, Norm::LInf, 1);

    let mut boxes = Vec::new();
    for contour in find_contours::<i32>(&binary) {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }

        let (mut min_x, mut min_y) = (i32::MAX, i32::MAX);
        let (mut max_x, mut max_y) = (i32::MIN, i32::MIN);
        for p in &contour.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let w = (max_x - min_x + 1) as f64;
        let h = (max_y - min_y + 1) as f64;
        if w.min(h) < 3.0 {
            continue;
        }

        let score = mean_probability(map, width, min_x as usize, min_y as usize, max_x as usize, max_y as usize);
        if score < config.box_threshold {
            continue;
        }

        // Unclip: grow by area * ratio / perimeter
        let distance = (w * h) * config.unclip_ratio as f64 / (2.0 * (w + h));
        boxes.push(Rect::new(min_x as f64, min_y as f64, w, h).expanded(distance));
    }

    boxes
}

fn mean_probability(map: &[f32], width: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for y in y0..=y1 {
        for x in x0..=x1 {
            sum += map[y * width + x];
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Top-to-bottom, then left-to-right for boxes on the same line
pub fn sort_reading_order(boxes: &mut [Rect]) {
    boxes.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    for i in 0..boxes.len() {
        let mut j = i;
        while j > 0
            && (boxes[j].y - boxes[j - 1].y).abs() < SAME_LINE_TOLERANCE
            && boxes[j].x < boxes[j - 1].x
        {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Greedy CTC decode of a `[steps, classes]` row-major score matrix
///
/// Returns `None` when nothing but blanks was emitted.
pub fn ctc_decode(preds: &[f32], steps: usize, classes: usize, characters: &[String]) -> Option<(String, f32)> {
    if classes == 0 || preds.len() < steps * classes {
        return None;
    }

    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut previous = usize::MAX;

    for t in 0..steps {
        let row = &preds[t * classes..(t + 1) * classes];
        let (index, prob) = row
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .unwrap_or((0, 0.0));

        if index != 0 && index != previous {
            if let Some(ch) = characters.get(index) {
                text.push_str(ch);
                confidences.push(prob);
            }
        }
        previous = index;
    }

    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    let confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;
    Some((text, confidence))
}

/// Repair digit/letter confusions and collapse whitespace
///
/// Mostly-letter words get `0 1 5 8` read as `O l S B`; mostly-digit words get
/// `O o I l S B` read as `0 1 5 8`. Mixed words are left alone.
pub fn correct_confusions(text: &str) -> String {
    text.split_whitespace()
        .map(correct_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn correct_word(word: &str) -> String {
    let letters = word.chars().filter(|c| c.is_alphabetic()).count();
    let digits = word.chars().filter(|c| c.is_ascii_digit()).count();

    if letters >= 2 && letters > digits && digits > 0 {
        let lowercase = word.chars().filter(|c| c.is_lowercase()).count() * 2 > letters;
        word.chars()
            .map(|c| match c {
                '0' => if lowercase { 'o' } else { 'O' },
                '1' => if lowercase { 'l' } else { 'I' },
                '5' => if lowercase { 's' } else { 'S' },
                '8' => 'B',
                other => other,
            })
            .collect()
    } else if digits >= 2 && digits > letters && letters > 0 {
        word.chars()
            .map(|c| match c {
                'O' | 'o' | 'D' => '0',
                'I' | 'l' | 'i' => '1',
                'S' | 's' => '5',
                'B' => '8',
                other => other,
            })
            .collect()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> Vec<String> {
        parse_character_dict("a\nb\nc\n")
    }

    fn one_hot(indices: &[usize], classes: usize) -> Vec<f32> {
        let mut preds = vec![0.0; indices.len() * classes];
        for (t, &i) in indices.iter().enumerate() {
            preds[t * classes + i] = 0.9;
        }
        preds
    }

    #[test]
    fn test_dictionary_layout() {
        let characters = dict();
        assert_eq!(characters, vec!["blank", "a", "b", "c", " "]);
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let characters = dict();
        // a a _ a b b _ _ c
        let preds = one_hot(&[1, 1, 0, 1, 2, 2, 0, 0, 3], 5);
        let (text, confidence) = ctc_decode(&preds, 9, 5, &characters).unwrap();

        assert_eq!(text, "aabc");
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_space_and_blank_only() {
        let characters = dict();
        let preds = one_hot(&[1, 4, 2], 5);
        assert_eq!(ctc_decode(&preds, 3, 5, &characters).unwrap().0, "a b");

        let blanks = one_hot(&[0, 0, 0], 5);
        assert!(ctc_decode(&blanks, 3, 5, &characters).is_none());
    }

    #[test]
    fn test_probability_map_boxes() {
        let (w, h) = (100usize, 60usize);
        let mut map = vec![0.0f32; w * h];
        // Two text lines
        for y in 10..20 {
            for x in 10..70 {
                map[y * w + x] = 0.9;
            }
        }
        for y in 35..45 {
            for x in 20..50 {
                map[y * w + x] = 0.8;
            }
        }
        // Speckle below the size limit
        map[55 * w + 90] = 0.9;

        let mut boxes = boxes_from_probability_map(&map, w, h, &RecognitionConfig::default());
        sort_reading_order(&mut boxes);

        assert_eq!(boxes.len(), 2);
        assert!(boxes[0].contains(crate::vision::geometry::Point::new(40.0, 15.0)));
        assert!(boxes[1].contains(crate::vision::geometry::Point::new(35.0, 40.0)));
        // Unclipped boxes are larger than the raw blobs
        assert!(boxes[0].width > 60.0);
    }

    #[test]
    fn test_weak_regions_are_dropped() {
        let (w, h) = (40usize, 40usize);
        let mut map = vec![0.0f32; w * h];
        for y in 5..30 {
            for x in 5..30 {
                map[y * w + x] = 0.4;
            }
        }
        let boxes = boxes_from_probability_map(&map, w, h, &RecognitionConfig::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_reading_order() {
        let mut boxes = vec![
            Rect::new(200.0, 52.0, 50.0, 20.0),
            Rect::new(10.0, 120.0, 50.0, 20.0),
            Rect::new(10.0, 55.0, 50.0, 20.0),
        ];
        sort_reading_order(&mut boxes);

        assert_eq!(boxes[0].x, 10.0);
        assert_eq!(boxes[0].y, 55.0);
        assert_eq!(boxes[1].x, 200.0);
        assert_eq!(boxes[2].y, 120.0);
    }

    #[test]
    fn test_correct_confusions() {
        assert_eq!(correct_confusions("2O21"), "2021");
        assert_eq!(correct_confusions("l996"), "1996");
        assert_eq!(correct_confusions("Cu11y"), "Cully");
        assert_eq!(correct_confusions("B0STON"), "BOSTON");
        assert_eq!(correct_confusions("  Stephen   Curry "), "Stephen Curry");
        // Plain numbers and words are untouched
        assert_eq!(correct_confusions("2021 Warriors"), "2021 Warriors");
        assert_eq!(correct_confusions("#30"), "#30");
    }

    #[test]
    fn test_recognition_defaults() {
        let config = RecognitionConfig::default();
        assert_eq!(config.level, RecognitionLevel::Accurate);
        assert!(config.language_correction);
        assert_eq!(config.languages, vec!["en".to_string()]);
        assert_eq!(RecognitionLevel::Fast.detection_size(), 640);
    }

    #[test]
    fn test_load_without_models_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(PaddleOcr::load(&manager, &RecognitionConfig::default()).is_err());
    }
}

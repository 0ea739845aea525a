//! Aircraft registration (tail number) detection and OCR.
//!
//! A two-stage pipeline: a YOLO-style detector locates the registration
//! marking on the fuselage, then a CRNN recognizer reads the cropped region
//! with CTC decoding. The decoded text is normalized and matched against
//! common civil registration formats.

use std::path::PathBuf;
use std::sync::Mutex;

use aerovision_common::ReviewError;
use image::RgbImage;
use ndarray::Array4;
use once_cell::sync::Lazy;
use ort::session::Session;
use ort::value::TensorRef;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Recognizer alphabet. Index 0 is the CTC blank, characters start at 1.
const CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-";

// US N-numbers, Japanese JA series, Korean HL series, and the generic
// hyphenated prefix form used by most other registries (B-1234, G-ABCD,
// PH-BQC, 9V-SKA, ...).
const REGISTRATION_FORMATS: &str =
    r"N[1-9][0-9]{0,4}[A-Z]{0,2}|JA[0-9]{3,4}[A-Z]?|HL[0-9]{4}|[A-Z0-9]{1,2}-[A-Z0-9]{1,5}";

static FULL_REGISTRATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^(?:{REGISTRATION_FORMATS})$")).expect("valid registration regex")
});

static EMBEDDED_REGISTRATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("(?:{REGISTRATION_FORMATS})")).expect("valid registration regex")
});

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// Model assets are missing; the reader cannot start.
    #[error("registration reader unavailable: {0}")]
    Unavailable(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected output shape {shape:?} from {stage}")]
    InvalidOutputShape { stage: &'static str, shape: Vec<i64> },
}

impl From<OcrError> for ReviewError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::Unavailable(reason) => ReviewError::AdapterUnavailable {
                name: "registration".to_string(),
                reason,
            },
            other => ReviewError::Inference {
                task: "registration".to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Detected text region in original image coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TextBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl TextBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// Intersection-over-union of two boxes.
pub fn iou(a: &TextBox, b: &TextBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut boxes: Vec<TextBox>, iou_threshold: f32) -> Vec<TextBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<TextBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Configuration for the two-stage registration reader.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    /// Square detector input resolution.
    pub detector_size: u32,
    /// Recognizer input height and width.
    pub recognizer_height: u32,
    pub recognizer_width: u32,
    /// Minimum detector confidence to keep a box.
    pub confidence_threshold: f32,
    /// IoU threshold for non-maximum suppression.
    pub iou_threshold: f32,
    /// Minimum clarity score for the registration check to pass.
    pub clarity_threshold: f32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        let dir: PathBuf = std::env::var("AEROVISION_MODEL_DIR")
            .unwrap_or_else(|_| "models".to_string())
            .into();
        let clarity_threshold = std::env::var("AEROVISION_REGISTRATION_CLARITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.80);

        Self {
            detector_path: dir.join("registration_detector.onnx"),
            recognizer_path: dir.join("registration_recognizer.onnx"),
            detector_size: 640,
            recognizer_height: 48,
            recognizer_width: 320,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            clarity_threshold,
        }
    }
}

/// Outcome of reading the registration from one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationReadout {
    /// Whether the registration check passed (detected, parsed, and clear).
    pub passed: bool,
    /// Whether a registration region was detected at all.
    pub detected: bool,
    /// Parsed registration, e.g. "B-1234" or "N12345".
    pub value: Option<String>,
    /// OCR confidence for the recognized text.
    pub confidence: f32,
    /// Combined detection and OCR confidence.
    pub clarity_score: f32,
    /// Best detection box, if any.
    pub bbox: Option<TextBox>,
    /// Raw normalized OCR text before format matching.
    pub raw_text: String,
    /// Every registration candidate found in the text, best first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<String>,
    /// Human-readable failure reason.
    pub reason: Option<String>,
}

impl RegistrationReadout {
    fn not_detected() -> Self {
        Self {
            passed: false,
            detected: false,
            value: None,
            confidence: 0.0,
            clarity_score: 0.0,
            bbox: None,
            raw_text: String::new(),
            matches: Vec::new(),
            reason: Some("no registration region detected".to_string()),
        }
    }
}

/// Two-stage registration reader over a pair of ONNX sessions.
pub struct RegistrationReader {
    config: RegistrationConfig,
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
}

impl RegistrationReader {
    pub fn new(config: RegistrationConfig) -> Result<Self, OcrError> {
        if !config.detector_path.is_file() {
            return Err(OcrError::Unavailable(format!(
                "detector model not found: {}",
                config.detector_path.display()
            )));
        }
        if !config.recognizer_path.is_file() {
            return Err(OcrError::Unavailable(format!(
                "recognizer model not found: {}",
                config.recognizer_path.display()
            )));
        }

        info!(
            "Loading registration models from {:?} / {:?}",
            config.detector_path, config.recognizer_path
        );

        let detector = Session::builder()
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?
            .commit_from_file(&config.detector_path)
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?;
        let recognizer = Session::builder()
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?
            .commit_from_file(&config.recognizer_path)
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?;

        Ok(Self {
            config,
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }

    /// Read the registration from a single image.
    pub fn read(&self, image: &RgbImage) -> Result<RegistrationReadout, OcrError> {
        let boxes = self.detect(image)?;

        let Some(best) = boxes.first().copied() else {
            debug!("No registration region found");
            return Ok(RegistrationReadout::not_detected());
        };

        let crop = crop_box(image, &best);
        let (raw_text, ocr_confidence) = self.recognize(&crop)?;
        let matches = registration_matches(&raw_text);
        let value = matches.first().cloned();

        let clarity_score = (best.confidence + ocr_confidence) / 2.0;
        let clear = clarity_score >= self.config.clarity_threshold;
        let passed = value.is_some() && clear;

        let reason = if value.is_none() {
            Some(format!("OCR text '{raw_text}' is not a valid registration"))
        } else if !clear {
            Some(format!(
                "clarity score {clarity_score:.2} below threshold {:.2}",
                self.config.clarity_threshold
            ))
        } else {
            None
        };

        Ok(RegistrationReadout {
            passed,
            detected: true,
            value,
            confidence: ocr_confidence,
            clarity_score,
            bbox: Some(best),
            raw_text,
            matches,
            reason,
        })
    }

    /// Read registrations from several images.
    ///
    /// Detection boxes vary per image, so each image runs the full two-stage
    /// pipeline; there is no cross-image batching to exploit here.
    pub fn read_batch(&self, images: &[&RgbImage]) -> Result<Vec<RegistrationReadout>, OcrError> {
        images.iter().map(|img| self.read(img)).collect()
    }

    /// Run the detector and return kept boxes, best first, in image coordinates.
    fn detect(&self, image: &RgbImage) -> Result<Vec<TextBox>, OcrError> {
        let size = self.config.detector_size;
        let resized = image::imageops::resize(
            image,
            size,
            size,
            image::imageops::FilterType::Triangle,
        );

        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for y in 0..size as usize {
            for x in 0..size as usize {
                let pixel = resized.get_pixel(x as u32, y as u32);
                input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
                input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
                input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
            }
        }

        let mut session = self
            .detector
            .lock()
            .map_err(|_| OcrError::Inference("detector lock poisoned".to_string()))?;

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| OcrError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| OcrError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OcrError::Inference(format!("failed to extract tensor: {e}")))?;

        let dims = shape.as_ref();
        // Single-class YOLO head: (1, 5, anchors) with rows x, y, w, h, conf.
        if dims.len() != 3 || dims[1] != 5 {
            return Err(OcrError::InvalidOutputShape {
                stage: "detector",
                shape: dims.to_vec(),
            });
        }
        let num_anchors = dims[2] as usize;

        let scale_x = image.width() as f32 / size as f32;
        let scale_y = image.height() as f32 / size as f32;

        let mut candidates = Vec::new();
        for anchor in 0..num_anchors {
            let get = |row: usize| data[row * num_anchors + anchor];
            let confidence = get(4);
            if confidence < self.config.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (get(0), get(1), get(2), get(3));
            candidates.push(TextBox {
                x1: (cx - w / 2.0) * scale_x,
                y1: (cy - h / 2.0) * scale_y,
                x2: (cx + w / 2.0) * scale_x,
                y2: (cy + h / 2.0) * scale_y,
                confidence,
            });
        }

        let kept = non_max_suppression(candidates, self.config.iou_threshold);
        debug!("Detector kept {} registration boxes", kept.len());
        Ok(kept)
    }

    /// Run the CRNN recognizer over a cropped text region.
    fn recognize(&self, crop: &RgbImage) -> Result<(String, f32), OcrError> {
        let h = self.config.recognizer_height;
        let w = self.config.recognizer_width;
        let resized =
            image::imageops::resize(crop, w, h, image::imageops::FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
        for y in 0..h as usize {
            for x in 0..w as usize {
                let pixel = resized.get_pixel(x as u32, y as u32);
                // Recognizer expects [-1, 1] per channel.
                input[[0, 0, y, x]] = f32::from(pixel[0]) / 127.5 - 1.0;
                input[[0, 1, y, x]] = f32::from(pixel[1]) / 127.5 - 1.0;
                input[[0, 2, y, x]] = f32::from(pixel[2]) / 127.5 - 1.0;
            }
        }

        let mut session = self
            .recognizer
            .lock()
            .map_err(|_| OcrError::Inference("recognizer lock poisoned".to_string()))?;

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| OcrError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| OcrError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OcrError::Inference(format!("failed to extract tensor: {e}")))?;

        let dims = shape.as_ref();
        // CTC logits: (1, timesteps, charset + blank).
        if dims.len() != 3 || dims[2] as usize != CHARSET.chars().count() + 1 {
            return Err(OcrError::InvalidOutputShape {
                stage: "recognizer",
                shape: dims.to_vec(),
            });
        }

        let (text, confidence) = ctc_greedy_decode(data, dims[1] as usize, dims[2] as usize);
        if text.is_empty() {
            warn!("Recognizer produced empty text for detected region");
        }
        Ok((text, confidence))
    }
}

/// Crop a detection box out of the image, clamped to image bounds.
fn crop_box(image: &RgbImage, bbox: &TextBox) -> RgbImage {
    let (w, h) = (image.width(), image.height());
    let x1 = (bbox.x1.max(0.0) as u32).min(w.saturating_sub(1));
    let y1 = (bbox.y1.max(0.0) as u32).min(h.saturating_sub(1));
    let crop_w = (bbox.x2.max(0.0) as u32).min(w).saturating_sub(x1).max(1);
    let crop_h = (bbox.y2.max(0.0) as u32).min(h).saturating_sub(y1).max(1);
    image::imageops::crop_imm(image, x1, y1, crop_w, crop_h).to_image()
}

/// Greedy CTC decode over a `(timesteps, num_classes)` logit matrix.
///
/// Per timestep, take the argmax; drop blanks (class 0) and collapse
/// consecutive repeats. Confidence is the mean softmax probability of the
/// emitted characters, or 0.0 when nothing was emitted.
pub fn ctc_greedy_decode(data: &[f32], timesteps: usize, num_classes: usize) -> (String, f32) {
    let charset: Vec<char> = CHARSET.chars().collect();
    let mut text = String::new();
    let mut prob_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut previous = 0usize;

    for t in 0..timesteps {
        let row = &data[t * num_classes..(t + 1) * num_classes];
        let (best, best_logit) = row.iter().copied().enumerate().fold(
            (0usize, f32::NEG_INFINITY),
            |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) },
        );

        if best != 0 && best != previous {
            if let Some(ch) = charset.get(best - 1) {
                text.push(*ch);
                // Softmax probability of the winning class at this timestep.
                let max = best_logit;
                let denom: f32 = row.iter().map(|&v| (v - max).exp()).sum();
                prob_sum += 1.0 / denom.max(f32::EPSILON);
                emitted += 1;
            }
        }
        previous = best;
    }

    let confidence = if emitted > 0 {
        prob_sum / emitted as f32
    } else {
        0.0
    };
    (text, confidence)
}

/// All plausible registrations in the OCR output, best candidates first.
///
/// The text is uppercased and split into tokens on anything outside the
/// recognizer alphabet. Tokens that are entirely a registration rank ahead
/// of registrations embedded inside a longer token.
pub fn registration_matches(raw: &str) -> Vec<String> {
    let upper = raw.to_uppercase();
    let tokens: Vec<&str> = upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .filter(|t| !t.is_empty())
        .collect();

    let full: Vec<String> = tokens
        .iter()
        .filter(|t| FULL_REGISTRATION.is_match(t))
        .map(|t| (*t).to_string())
        .collect();
    if !full.is_empty() {
        return full;
    }

    tokens
        .iter()
        .filter(|t| !FULL_REGISTRATION.is_match(t))
        .filter_map(|t| EMBEDDED_REGISTRATION.find(t).map(|m| m.as_str().to_string()))
        .collect()
}

/// The best registration candidate in the OCR output, if any.
pub fn extract_registration(raw: &str) -> Option<String> {
    registration_matches(raw).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> TextBox {
        TextBox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bx(0.0, 0.0, 10.0, 10.0, 0.9);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bx(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = bx(20.0, 20.0, 30.0, 30.0, 0.9);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_boxes() {
        let boxes = vec![
            bx(0.0, 0.0, 10.0, 10.0, 0.5),
            bx(1.0, 1.0, 11.0, 11.0, 0.9),
            bx(50.0, 50.0, 60.0, 60.0, 0.7),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn ctc_decode_collapses_repeats_and_blanks() {
        // 3 classes: blank, '0', '1'. Sequence: blank, '0', '0', blank, '1'.
        let num_classes = CHARSET.chars().count() + 1;
        let mut data = vec![0.0f32; 5 * num_classes];
        let hot = |data: &mut [f32], t: usize, class: usize| {
            data[t * num_classes + class] = 10.0;
        };
        hot(&mut data, 0, 0);
        hot(&mut data, 1, 1); // '0'
        hot(&mut data, 2, 1); // repeat, collapsed
        hot(&mut data, 3, 0);
        hot(&mut data, 4, 2); // '1'

        let (text, confidence) = ctc_greedy_decode(&data, 5, num_classes);
        assert_eq!(text, "01");
        assert!(confidence > 0.9);
    }

    #[test]
    fn ctc_decode_empty_sequence_has_zero_confidence() {
        let num_classes = CHARSET.chars().count() + 1;
        let mut data = vec![0.0f32; 2 * num_classes];
        data[0] = 10.0;
        data[num_classes] = 10.0;
        let (text, confidence) = ctc_greedy_decode(&data, 2, num_classes);
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn extracts_hyphenated_registration() {
        assert_eq!(extract_registration("B-1234"), Some("B-1234".to_string()));
        assert_eq!(extract_registration("ph-bqc"), Some("PH-BQC".to_string()));
        assert_eq!(
            extract_registration("reg 9V-SKA seen"),
            Some("9V-SKA".to_string())
        );
    }

    #[test]
    fn extracts_n_number() {
        assert_eq!(extract_registration("N12345"), Some("N12345".to_string()));
        assert_eq!(extract_registration("N714EX"), Some("N714EX".to_string()));
    }

    #[test]
    fn collects_all_candidates_best_first() {
        let matches = registration_matches("B-1234 N714EX noise");
        assert_eq!(matches, vec!["B-1234".to_string(), "N714EX".to_string()]);
    }

    #[test]
    fn rejects_noise() {
        assert_eq!(extract_registration(""), None);
        assert_eq!(extract_registration("%%%"), None);
    }

    #[test]
    fn missing_models_report_unavailable() {
        let config = RegistrationConfig {
            detector_path: PathBuf::from("/nope/detector.onnx"),
            recognizer_path: PathBuf::from("/nope/recognizer.onnx"),
            ..RegistrationConfig::default()
        };
        let err = RegistrationReader::new(config).map(|_| ()).unwrap_err();
        match err {
            OcrError::Unavailable(reason) => assert!(reason.contains("detector")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn unavailable_maps_to_adapter_unavailable() {
        let err = OcrError::Unavailable("detector model not found".to_string());
        match ReviewError::from(err) {
            ReviewError::AdapterUnavailable { name, .. } => assert_eq!(name, "registration"),
            other => panic!("expected AdapterUnavailable, got {other:?}"),
        }
    }
}

//! ONNX image classification for aircraft type and airline recognition.
//!
//! Both recognizers share the same classifier: a CNN exported to ONNX with a
//! single logits output, paired with a plain-text label file (one class per
//! line). The two tasks differ only in which model and label files they load.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aerovision_common::{ClassificationResult, Prediction, ReviewError};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};

/// ImageNet channel statistics used by the exported models.
const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The model or label assets are missing; the recognizer cannot start.
    #[error("classifier '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to read labels: {0}")]
    Labels(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected output shape {shape:?}, expected [batch, {num_classes}]")]
    InvalidOutputShape { shape: Vec<i64>, num_classes: usize },
}

impl From<ClassifierError> for ReviewError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Unavailable { name, reason } => {
                ReviewError::AdapterUnavailable { name, reason }
            }
            other => ReviewError::Inference {
                task: "classification".to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Configuration for a single classification task.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Short task name used in logs and error messages.
    pub name: String,
    /// Path to the ONNX model file.
    pub model_path: PathBuf,
    /// Path to the label file, one class name per line.
    pub labels_path: PathBuf,
    /// Square input resolution expected by the model.
    pub input_size: u32,
    /// How many predictions to keep per image.
    pub top_k: usize,
}

fn model_dir() -> PathBuf {
    std::env::var("AEROVISION_MODEL_DIR")
        .unwrap_or_else(|_| "models".to_string())
        .into()
}

impl ClassifierConfig {
    /// Aircraft type recognizer (manufacturer/model classes).
    pub fn aircraft() -> Self {
        let dir = model_dir();
        Self {
            name: "aircraft".to_string(),
            model_path: dir.join("aircraft_type.onnx"),
            labels_path: dir.join("aircraft_type_labels.txt"),
            input_size: 224,
            top_k: 5,
        }
    }

    /// Airline livery recognizer.
    pub fn airline() -> Self {
        let dir = model_dir();
        Self {
            name: "airline".to_string(),
            model_path: dir.join("airline.onnx"),
            labels_path: dir.join("airline_labels.txt"),
            input_size: 224,
            top_k: 3,
        }
    }
}

/// A loaded classification model with its label set.
///
/// The ONNX session requires `&mut` for `run()`, so it sits behind a mutex
/// and a single instance can be shared across worker tasks.
pub struct ImageClassifier {
    config: ClassifierConfig,
    labels: Vec<String>,
    session: Mutex<Session>,
}

impl ImageClassifier {
    /// Load the model and labels described by `config`.
    ///
    /// Missing asset files are reported as [`ClassifierError::Unavailable`]
    /// so callers can distinguish "never going to work" from a transient
    /// inference failure.
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifierError> {
        if !config.model_path.is_file() {
            return Err(ClassifierError::Unavailable {
                name: config.name.clone(),
                reason: format!("model file not found: {}", config.model_path.display()),
            });
        }
        if !config.labels_path.is_file() {
            return Err(ClassifierError::Unavailable {
                name: config.name.clone(),
                reason: format!("label file not found: {}", config.labels_path.display()),
            });
        }

        let labels = load_labels(&config.labels_path)?;

        info!(
            "Loading {} classifier from {:?} ({} classes)",
            config.name,
            config.model_path,
            labels.len()
        );

        let session = Session::builder()
            .map_err(|e| ClassifierError::ModelLoad(e.to_string()))?
            .commit_from_file(&config.model_path)
            .map_err(|e| ClassifierError::ModelLoad(e.to_string()))?;

        Ok(Self {
            config,
            labels,
            session: Mutex::new(session),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Classify a single image.
    pub fn classify(&self, image: &RgbImage) -> Result<ClassificationResult, ClassifierError> {
        let mut results = self.classify_batch(&[image])?;
        results.pop().ok_or_else(|| {
            ClassifierError::Inference("model returned no rows for single image".to_string())
        })
    }

    /// Classify a batch of images in one forward pass.
    ///
    /// The returned vector has one entry per input image, in order.
    pub fn classify_batch(
        &self,
        images: &[&RgbImage],
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Running {} classification on batch of {}",
            self.config.name,
            images.len()
        );

        let input = self.preprocess_batch(images);

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Inference("session lock poisoned".to_string()))?;

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {e}")))?;

        let dims = shape.as_ref();
        if dims.len() != 2
            || dims[0] as usize != images.len()
            || dims[1] as usize != self.labels.len()
        {
            return Err(ClassifierError::InvalidOutputShape {
                shape: dims.to_vec(),
                num_classes: self.labels.len(),
            });
        }

        let num_classes = self.labels.len();
        let mut results = Vec::with_capacity(images.len());
        for row in 0..images.len() {
            let logits = &data[row * num_classes..(row + 1) * num_classes];
            let probs = softmax(logits);
            let predictions = top_k_predictions(&probs, &self.labels, self.config.top_k);
            let result = ClassificationResult::from_sorted(predictions).ok_or_else(|| {
                ClassifierError::Inference("empty prediction list".to_string())
            })?;
            results.push(result);
        }

        Ok(results)
    }

    /// Resize, normalize, and stack images into an NCHW tensor.
    fn preprocess_batch(&self, images: &[&RgbImage]) -> Array4<f32> {
        let size = self.config.input_size as usize;
        let mut input = Array4::zeros((images.len(), 3, size, size));

        for (n, image) in images.iter().enumerate() {
            let resized = image::imageops::resize(
                *image,
                self.config.input_size,
                self.config.input_size,
                image::imageops::FilterType::Triangle,
            );
            for y in 0..size {
                for x in 0..size {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    for c in 0..3 {
                        let v = f32::from(pixel[c]) / 255.0;
                        input[[n, c, y, x]] = (v - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
                    }
                }
            }
        }

        input
    }
}

fn load_labels(path: &Path) -> Result<Vec<String>, ClassifierError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ClassifierError::Labels(e.to_string()))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        return Err(ClassifierError::Labels(format!(
            "label file is empty: {}",
            path.display()
        )));
    }
    Ok(labels)
}

/// Numerically stable softmax over raw logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&v| v / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

/// Pick the `k` highest-probability classes, sorted descending.
pub fn top_k_predictions(probs: &[f32], labels: &[String], k: usize) -> Vec<Prediction> {
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed
        .into_iter()
        .take(k)
        .filter_map(|(idx, confidence)| {
            labels.get(idx).map(|label| Prediction {
                label: label.clone(),
                confidence,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-5);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn top_k_orders_by_confidence() {
        let labels = labels(&["a320", "b737", "a380"]);
        let preds = top_k_predictions(&[0.1, 0.7, 0.2], &labels, 2);
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].label, "b737");
        assert_eq!(preds[1].label, "a380");
    }

    #[test]
    fn top_k_clamps_to_class_count() {
        let labels = labels(&["only"]);
        let preds = top_k_predictions(&[1.0], &labels, 5);
        assert_eq!(preds.len(), 1);
    }

    #[test]
    fn missing_model_is_unavailable() {
        let config = ClassifierConfig {
            name: "aircraft".to_string(),
            model_path: PathBuf::from("/definitely/not/here.onnx"),
            labels_path: PathBuf::from("/definitely/not/here.txt"),
            input_size: 224,
            top_k: 5,
        };
        let err = ImageClassifier::new(config).map(|_| ()).unwrap_err();
        match err {
            ClassifierError::Unavailable { name, .. } => assert_eq!(name, "aircraft"),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn unavailable_maps_to_adapter_unavailable() {
        let err = ClassifierError::Unavailable {
            name: "airline".to_string(),
            reason: "model file not found".to_string(),
        };
        match ReviewError::from(err) {
            ReviewError::AdapterUnavailable { name, .. } => assert_eq!(name, "airline"),
            other => panic!("expected AdapterUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn default_configs_use_model_dir() {
        let aircraft = ClassifierConfig::aircraft();
        assert!(aircraft.model_path.ends_with("aircraft_type.onnx"));
        let airline = ClassifierConfig::airline();
        assert_eq!(airline.name, "airline");
        assert_eq!(airline.top_k, 3);
    }
}

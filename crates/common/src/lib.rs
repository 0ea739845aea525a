/// Common types shared across the aerovision review crates
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Review errors
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Failed to load image: {0}")]
    ImageLoad(String),

    #[error("Adapter '{name}' unavailable: {reason}")]
    AdapterUnavailable { name: String, reason: String },

    #[error("Inference failed in '{task}': {message}")]
    Inference { task: String, message: String },

    #[error("Sub-task '{task}' timed out after {seconds}s")]
    Timeout { task: String, seconds: u64 },

    #[error("Batch too large: {size} images (max: {max})")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<image::ImageError> for ReviewError {
    fn from(err: image::ImageError) -> Self {
        ReviewError::ImageLoad(err.to_string())
    }
}

/// Result type for review operations
pub type Result<T> = std::result::Result<T, ReviewError>;

/// A single class prediction with its confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class label
    #[serde(rename = "class")]
    pub label: String,
    /// Confidence score (0.0-1.0)
    pub confidence: f32,
}

/// Top-k classification output shared by the aircraft and airline classifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Best prediction
    pub top1: Prediction,
    /// Number of predictions returned
    pub top_k: usize,
    /// Predictions sorted by descending confidence
    pub predictions: Vec<Prediction>,
}

impl ClassificationResult {
    /// Build a result from predictions already sorted by descending confidence.
    /// Returns `None` for an empty prediction list.
    #[must_use]
    pub fn from_sorted(predictions: Vec<Prediction>) -> Option<Self> {
        let top1 = predictions.first()?.clone();
        Some(Self {
            top1,
            top_k: predictions.len(),
            predictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_result_from_sorted() {
        let result = ClassificationResult::from_sorted(vec![
            Prediction {
                label: "A320".to_string(),
                confidence: 0.9,
            },
            Prediction {
                label: "B738".to_string(),
                confidence: 0.05,
            },
        ])
        .unwrap();

        assert_eq!(result.top1.label, "A320");
        assert_eq!(result.top_k, 2);
        assert!(ClassificationResult::from_sorted(vec![]).is_none());
    }

    #[test]
    fn test_prediction_serializes_class_field() {
        let prediction = Prediction {
            label: "CCA".to_string(),
            confidence: 0.75,
        };

        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json["class"], "CCA");

        let back: Prediction = serde_json::from_value(json).unwrap();
        assert_eq!(back, prediction);
    }

    #[test]
    fn test_error_display() {
        let err = ReviewError::Timeout {
            task: "quality".to_string(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "Sub-task 'quality' timed out after 30s");
    }
}

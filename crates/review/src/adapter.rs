//! The sub-task adapter contract and the four production adapters.
//!
//! Each inference capability (quality, aircraft type, airline, registration)
//! is wrapped behind [`InferenceAdapter`] so the pipeline never depends on
//! the concrete model crates. Adapters are synchronous; the bridge moves
//! them onto blocking worker threads.

use aerovision_classification::{ClassifierConfig, ImageClassifier};
use aerovision_common::{ClassificationResult, ReviewError};
use aerovision_quality::{QualityAssessor, QualityConfig, QualityReport};
use aerovision_registration::{RegistrationConfig, RegistrationReader, RegistrationReadout};
use image::RgbImage;
use tracing::warn;

/// A synchronous inference capability usable by the pipeline.
///
/// Implementations must tolerate concurrent calls; the image is shared
/// read-only across all sub-tasks of a request.
pub trait InferenceAdapter: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short sub-task name used in logs and error messages.
    fn name(&self) -> &str;

    /// Evaluate a single image.
    fn evaluate(&self, image: &RgbImage) -> Result<Self::Output, ReviewError>;

    /// Evaluate a batch of images.
    ///
    /// The default is one call per image, where a failing image degrades to
    /// `None` in its slot. Adapters with a native batch path override this
    /// with a single call; an `Err` from the whole call means the sub-task
    /// produced nothing for any image in the batch.
    fn evaluate_batch(
        &self,
        images: &[&RgbImage],
    ) -> Result<Vec<Option<Self::Output>>, ReviewError> {
        let mut results = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            match self.evaluate(image) {
                Ok(output) => results.push(Some(output)),
                Err(e) => {
                    warn!("{} failed for batch slot {}: {}", self.name(), i, e);
                    results.push(None);
                }
            }
        }
        Ok(results)
    }
}

/// Image quality scoring (classical metrics, no model files).
pub struct QualityAdapter {
    assessor: QualityAssessor,
}

impl QualityAdapter {
    pub fn new() -> Result<Self, ReviewError> {
        let assessor = QualityAssessor::new(QualityConfig::default())?;
        Ok(Self { assessor })
    }
}

impl InferenceAdapter for QualityAdapter {
    type Output = QualityReport;

    fn name(&self) -> &str {
        "quality"
    }

    fn evaluate(&self, image: &RgbImage) -> Result<QualityReport, ReviewError> {
        Ok(self.assessor.assess(image)?)
    }
}

/// Aircraft type classification.
pub struct AircraftAdapter {
    classifier: ImageClassifier,
}

impl AircraftAdapter {
    pub fn new() -> Result<Self, ReviewError> {
        let classifier = ImageClassifier::new(ClassifierConfig::aircraft())?;
        Ok(Self { classifier })
    }
}

impl InferenceAdapter for AircraftAdapter {
    type Output = ClassificationResult;

    fn name(&self) -> &str {
        "aircraft"
    }

    fn evaluate(&self, image: &RgbImage) -> Result<ClassificationResult, ReviewError> {
        self.classifier.classify(image).map_err(task_error("aircraft"))
    }

    // Native batch: one forward pass over all images. A whole-call failure
    // drops the sub-task for every index.
    fn evaluate_batch(
        &self,
        images: &[&RgbImage],
    ) -> Result<Vec<Option<ClassificationResult>>, ReviewError> {
        let results = self
            .classifier
            .classify_batch(images)
            .map_err(task_error("aircraft"))?;
        Ok(results.into_iter().map(Some).collect())
    }
}

/// Airline livery classification.
pub struct AirlineAdapter {
    classifier: ImageClassifier,
}

impl AirlineAdapter {
    pub fn new() -> Result<Self, ReviewError> {
        let classifier = ImageClassifier::new(ClassifierConfig::airline())?;
        Ok(Self { classifier })
    }
}

impl InferenceAdapter for AirlineAdapter {
    type Output = ClassificationResult;

    fn name(&self) -> &str {
        "airline"
    }

    fn evaluate(&self, image: &RgbImage) -> Result<ClassificationResult, ReviewError> {
        self.classifier.classify(image).map_err(task_error("airline"))
    }

    fn evaluate_batch(
        &self,
        images: &[&RgbImage],
    ) -> Result<Vec<Option<ClassificationResult>>, ReviewError> {
        let results = self
            .classifier
            .classify_batch(images)
            .map_err(task_error("airline"))?;
        Ok(results.into_iter().map(Some).collect())
    }
}

/// Registration (tail number) detection and OCR.
pub struct RegistrationAdapter {
    reader: RegistrationReader,
}

impl RegistrationAdapter {
    pub fn new() -> Result<Self, ReviewError> {
        let reader = RegistrationReader::new(RegistrationConfig::default())?;
        Ok(Self { reader })
    }
}

impl InferenceAdapter for RegistrationAdapter {
    type Output = RegistrationReadout;

    fn name(&self) -> &str {
        "registration"
    }

    fn evaluate(&self, image: &RgbImage) -> Result<RegistrationReadout, ReviewError> {
        Ok(self.reader.read(image)?)
    }

    fn evaluate_batch(
        &self,
        images: &[&RgbImage],
    ) -> Result<Vec<Option<RegistrationReadout>>, ReviewError> {
        let results = self.reader.read_batch(images)?;
        Ok(results.into_iter().map(Some).collect())
    }
}

/// Rewrite a classifier error into a task-specific inference error,
/// preserving the unavailable/call-failure distinction.
fn task_error(
    task: &'static str,
) -> impl Fn(aerovision_classification::ClassifierError) -> ReviewError {
    move |err| match err {
        aerovision_classification::ClassifierError::Unavailable { reason, .. } => {
            ReviewError::AdapterUnavailable {
                name: task.to_string(),
                reason,
            }
        }
        other => ReviewError::Inference {
            task: task.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyAdapter;

    impl InferenceAdapter for FlakyAdapter {
        type Output = u32;

        fn name(&self) -> &str {
            "flaky"
        }

        fn evaluate(&self, image: &RgbImage) -> Result<u32, ReviewError> {
            if image.width() % 2 == 0 {
                Ok(image.width())
            } else {
                Err(ReviewError::Inference {
                    task: "flaky".to_string(),
                    message: "odd width".to_string(),
                })
            }
        }
    }

    #[test]
    fn default_batch_degrades_per_slot() {
        let adapter = FlakyAdapter;
        let a = RgbImage::new(2, 2);
        let b = RgbImage::new(3, 3);
        let c = RgbImage::new(4, 4);

        let results = adapter.evaluate_batch(&[&a, &b, &c]).unwrap();
        assert_eq!(results, vec![Some(2), None, Some(4)]);
    }
}

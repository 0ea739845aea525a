//! Merged per-image review outcome and the merge default policy.

use aerovision_common::{ClassificationResult, Prediction};
use aerovision_quality::{QualityBreakdown, QualityReport};
use aerovision_registration::RegistrationReadout;
use serde::{Deserialize, Serialize};

/// Which sub-tasks to run for a request. All enabled by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFlags {
    pub quality: bool,
    pub aircraft: bool,
    pub airline: bool,
    pub registration: bool,
}

impl Default for ReviewFlags {
    fn default() -> Self {
        Self {
            quality: true,
            aircraft: true,
            airline: true,
            registration: true,
        }
    }
}

/// Aircraft type section of a review outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftSection {
    /// Recognized type, or `"UNKNOWN"` when recognition failed.
    #[serde(rename = "type")]
    pub aircraft_type: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_k: Vec<Prediction>,
}

impl AircraftSection {
    /// Mandatory-field fallback when the aircraft sub-task produced nothing.
    pub fn unknown() -> Self {
        Self {
            aircraft_type: "UNKNOWN".to_string(),
            confidence: 0.0,
            top_k: Vec::new(),
        }
    }
}

impl From<ClassificationResult> for AircraftSection {
    fn from(result: ClassificationResult) -> Self {
        Self {
            aircraft_type: result.top1.label.clone(),
            confidence: result.top1.confidence,
            top_k: result.predictions,
        }
    }
}

/// Airline section; only present when recognition succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirlineSection {
    pub airline: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_k: Vec<Prediction>,
}

impl From<ClassificationResult> for AirlineSection {
    fn from(result: ClassificationResult) -> Self {
        Self {
            airline: result.top1.label.clone(),
            confidence: result.top1.confidence,
            top_k: result.predictions,
        }
    }
}

/// Mandatory-field fallback when the quality sub-task produced nothing.
pub fn failed_quality() -> QualityReport {
    QualityReport {
        score: 0.0,
        pass: false,
        details: QualityBreakdown {
            sharpness: 0.0,
            exposure: 0.0,
            composition: 0.0,
            noise: 0.0,
            color: 0.0,
        },
    }
}

/// Merged review decision for one image.
///
/// Quality and aircraft are always present; a failed or disabled sub-task
/// falls back to its documented default. Airline and registration are
/// omitted when not produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub quality: QualityReport,
    pub aircraft: AircraftSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airline: Option<AirlineSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegistrationReadout>,
}

impl ReviewOutcome {
    /// Assemble an outcome from whatever the sub-tasks produced, applying
    /// the mandatory-default / optional-omit policy.
    pub fn merge(
        quality: Option<QualityReport>,
        aircraft: Option<ClassificationResult>,
        airline: Option<ClassificationResult>,
        registration: Option<RegistrationReadout>,
    ) -> Self {
        Self {
            quality: quality.unwrap_or_else(failed_quality),
            aircraft: aircraft.map_or_else(AircraftSection::unknown, AircraftSection::from),
            airline: airline.map(AirlineSection::from),
            registration,
        }
    }
}

/// One slot of a batch review response. `index` always equals the input
/// position of the item it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReviewItem {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ReviewOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchReviewItem {
    pub fn ok(index: usize, outcome: ReviewOutcome) -> Self {
        Self {
            index,
            success: true,
            data: Some(outcome),
            error: None,
        }
    }

    pub fn failed(index: usize, error: String) -> Self {
        Self {
            index,
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_defaults_mandatory_fields() {
        let outcome = ReviewOutcome::merge(None, None, None, None);
        assert_eq!(outcome.quality.score, 0.0);
        assert!(!outcome.quality.pass);
        assert_eq!(outcome.aircraft.aircraft_type, "UNKNOWN");
        assert_eq!(outcome.aircraft.confidence, 0.0);
        assert!(outcome.airline.is_none());
        assert!(outcome.registration.is_none());
    }

    #[test]
    fn merge_keeps_produced_sections() {
        let classification = ClassificationResult::from_sorted(vec![Prediction {
            label: "A359".to_string(),
            confidence: 0.93,
        }])
        .unwrap();

        let outcome = ReviewOutcome::merge(None, Some(classification.clone()), Some(classification), None);
        assert_eq!(outcome.aircraft.aircraft_type, "A359");
        let airline = outcome.airline.unwrap();
        assert_eq!(airline.airline, "A359");
        assert!((airline.confidence - 0.93).abs() < 1e-6);
    }

    #[test]
    fn absent_optional_sections_are_not_serialized() {
        let outcome = ReviewOutcome::merge(None, None, None, None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("airline").is_none());
        assert!(json.get("registration").is_none());
        assert_eq!(json["quality"]["pass"], false);
        assert_eq!(json["aircraft"]["type"], "UNKNOWN");
    }

    #[test]
    fn aircraft_section_renames_type_field() {
        let section = AircraftSection::unknown();
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["type"], "UNKNOWN");
        assert!(json.get("aircraft_type").is_none());
    }
}

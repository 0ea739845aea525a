//! Image quality assessment for spotting photos
//!
//! Scores an image on five dimensions (sharpness, exposure, composition,
//! noise, color), combines them into a weighted overall score in `0.0..=1.0`
//! and compares it against a pass threshold. The dimension weights and the
//! threshold are configurable and default to the production tuning.
//!
//! The metrics are classical image statistics, so the assessor is
//! deterministic and needs no model files.
//!
//! # Example
//! ```
//! use aerovision_quality::{QualityAssessor, QualityConfig};
//! use image::RgbImage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let assessor = QualityAssessor::new(QualityConfig::default())?;
//! let img = RgbImage::new(64, 64);
//! let report = assessor.assess(&img)?;
//! println!("score {:.2}, pass: {}", report.score, report.pass);
//! # Ok(())
//! # }
//! ```

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use aerovision_common::ReviewError;

/// Configuration for quality assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub sharpness_weight: f32,
    pub exposure_weight: f32,
    pub composition_weight: f32,
    pub noise_weight: f32,
    pub color_weight: f32,
    /// Overall score at or above which an image passes
    pub pass_threshold: f32,
}

fn env_f32(key: &str, fallback: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sharpness_weight: env_f32("AEROVISION_SHARPNESS_WEIGHT", 0.3),
            exposure_weight: env_f32("AEROVISION_EXPOSURE_WEIGHT", 0.2),
            composition_weight: env_f32("AEROVISION_COMPOSITION_WEIGHT", 0.15),
            noise_weight: env_f32("AEROVISION_NOISE_WEIGHT", 0.2),
            color_weight: env_f32("AEROVISION_COLOR_WEIGHT", 0.15),
            pass_threshold: env_f32("AEROVISION_QUALITY_PASS_THRESHOLD", 0.6),
        }
    }
}

impl QualityConfig {
    fn weight_sum(&self) -> f32 {
        self.sharpness_weight
            + self.exposure_weight
            + self.composition_weight
            + self.noise_weight
            + self.color_weight
    }
}

/// Per-dimension quality scores, each in `0.0..=1.0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub sharpness: f32,
    pub exposure: f32,
    pub composition: f32,
    pub noise: f32,
    pub color: f32,
}

/// Quality assessment result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Weighted overall score (0.0-1.0)
    pub score: f32,
    /// Whether the image meets the pass threshold
    pub pass: bool,
    /// Per-dimension scores
    pub details: QualityBreakdown,
}

/// Errors that can occur during quality assessment
#[derive(Debug, Error)]
pub enum QualityError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image dimensions must be non-zero (got {width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

impl From<QualityError> for ReviewError {
    fn from(err: QualityError) -> Self {
        ReviewError::Inference {
            task: "quality".to_string(),
            message: err.to_string(),
        }
    }
}

/// Classical five-dimension quality assessor
pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    /// Create a new quality assessor
    ///
    /// # Errors
    /// Returns an error if the dimension weights sum to zero
    pub fn new(config: QualityConfig) -> Result<Self, QualityError> {
        if config.weight_sum() <= f32::EPSILON {
            return Err(QualityError::InvalidConfig(
                "quality dimension weights must sum to a positive value".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Assess the quality of an image
    ///
    /// # Errors
    /// Returns an error for zero-sized images
    pub fn assess(&self, image: &RgbImage) -> Result<QualityReport, QualityError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(QualityError::EmptyImage { width, height });
        }

        let gray = image::imageops::grayscale(image);

        let details = QualityBreakdown {
            sharpness: sharpness_score(&gray),
            exposure: exposure_score(&gray),
            composition: composition_score(&gray),
            noise: noise_score(&gray),
            color: color_score(image),
        };

        let score = (details.sharpness * self.config.sharpness_weight
            + details.exposure * self.config.exposure_weight
            + details.composition * self.config.composition_weight
            + details.noise * self.config.noise_weight
            + details.color * self.config.color_weight)
            / self.config.weight_sum();

        debug!(
            "Quality assessment: score={:.3} (sharpness={:.3}, exposure={:.3}, composition={:.3}, noise={:.3}, color={:.3})",
            score,
            details.sharpness,
            details.exposure,
            details.composition,
            details.noise,
            details.color
        );

        Ok(QualityReport {
            score,
            pass: score >= self.config.pass_threshold,
            details,
        })
    }
}

/// Sharpness from Laplacian response variance, squashed to 0.0-1.0
fn sharpness_score(gray: &GrayImage) -> f32 {
    let laplacian = imageproc::filter::laplacian_filter(gray);
    let n = laplacian.len() as f64;
    if n == 0.0 {
        return 0.0;
    }

    let mean: f64 = laplacian.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let variance: f64 = laplacian
        .iter()
        .map(|&v| {
            let d = f64::from(v) - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    // Laplacian variance grows unbounded with detail; 1000 is the half-score point
    (variance / (variance + 1000.0)) as f32
}

/// Exposure from mean luma distance to mid-gray, penalized by clipped pixels
fn exposure_score(gray: &GrayImage) -> f32 {
    let n = gray.len() as f32;
    if n == 0.0 {
        return 0.0;
    }

    let mean: f32 = gray.iter().map(|&v| f32::from(v)).sum::<f32>() / n;
    let centered = 1.0 - (mean - 128.0).abs() / 128.0;

    let clipped = gray.iter().filter(|&&v| v <= 5 || v >= 250).count() as f32 / n;

    (centered * (1.0 - clipped)).clamp(0.0, 1.0)
}

/// Composition proxy: fraction of gradient mass inside the central region
fn composition_score(gray: &GrayImage) -> f32 {
    let (width, height) = gray.dimensions();
    if width < 4 || height < 4 {
        return 0.0;
    }

    let gradients = imageproc::gradients::sobel_gradients(gray);

    let mut total: f64 = 0.0;
    let mut central: f64 = 0.0;
    let (x_lo, x_hi) = (width / 4, width * 3 / 4);
    let (y_lo, y_hi) = (height / 4, height * 3 / 4);

    for (x, y, pixel) in gradients.enumerate_pixels() {
        let magnitude = f64::from(pixel[0]);
        total += magnitude;
        if x >= x_lo && x < x_hi && y >= y_lo && y < y_hi {
            central += magnitude;
        }
    }

    if total == 0.0 {
        0.0
    } else {
        (central / total) as f32
    }
}

/// Noise from the residual against a 3x3 median filter (higher residual, lower score)
fn noise_score(gray: &GrayImage) -> f32 {
    let n = gray.len() as f32;
    if n == 0.0 {
        return 0.0;
    }

    let smoothed = imageproc::filter::median_filter(gray, 1, 1);
    let residual: f32 = gray
        .iter()
        .zip(smoothed.iter())
        .map(|(&a, &b)| (f32::from(a) - f32::from(b)).abs())
        .sum::<f32>()
        / n;

    // ~25 levels of mean residual is treated as fully noisy
    (1.0 - residual / 25.0).clamp(0.0, 1.0)
}

/// Color from mean HSV-style saturation
fn color_score(image: &RgbImage) -> f32 {
    let n = image.pixels().len() as f32;
    if n == 0.0 {
        return 0.0;
    }

    let mean_saturation: f32 = image
        .pixels()
        .map(|p| {
            let max = p.0.iter().copied().max().unwrap_or(0) as f32;
            let min = p.0.iter().copied().min().unwrap_or(0) as f32;
            if max == 0.0 {
                0.0
            } else {
                (max - min) / max
            }
        })
        .sum::<f32>()
        / n;

    (mean_saturation * 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn flat_gray(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
    }

    fn checkerboard(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            };
        }
        img
    }

    #[test]
    fn test_config_default_weights() {
        let config = QualityConfig::default();
        assert!((config.weight_sum() - 1.0).abs() < 1e-5);
        assert_eq!(config.pass_threshold, 0.6);
    }

    #[test]
    fn test_zero_weights_rejected() {
        let config = QualityConfig {
            sharpness_weight: 0.0,
            exposure_weight: 0.0,
            composition_weight: 0.0,
            noise_weight: 0.0,
            color_weight: 0.0,
            pass_threshold: 0.6,
        };
        assert!(matches!(
            QualityAssessor::new(config),
            Err(QualityError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_image_rejected() {
        let assessor = QualityAssessor::new(QualityConfig::default()).unwrap();
        let result = assessor.assess(&RgbImage::new(0, 0));
        assert!(matches!(result, Err(QualityError::EmptyImage { .. })));
    }

    #[test]
    fn test_sharpness_prefers_detail() {
        let sharp = sharpness_score(&image::imageops::grayscale(&checkerboard(32, 32)));
        let flat = sharpness_score(&image::imageops::grayscale(&flat_gray(32, 32)));
        assert!(sharp > flat);
        assert!(flat < 0.01);
    }

    #[test]
    fn test_exposure_prefers_mid_gray() {
        let mid = exposure_score(&image::imageops::grayscale(&flat_gray(16, 16)));
        let dark = exposure_score(&image::imageops::grayscale(&RgbImage::from_pixel(
            16,
            16,
            Rgb([0, 0, 0]),
        )));
        assert!(mid > 0.9);
        assert!(dark < 0.1);
    }

    #[test]
    fn test_color_prefers_saturation() {
        let saturated = color_score(&RgbImage::from_pixel(16, 16, Rgb([255, 0, 0])));
        let gray = color_score(&flat_gray(16, 16));
        assert!(saturated > gray);
        assert_eq!(gray, 0.0);
    }

    #[test]
    fn test_assess_in_range_and_pass_consistent() {
        let assessor = QualityAssessor::new(QualityConfig::default()).unwrap();
        let report = assessor.assess(&checkerboard(64, 64)).unwrap();

        assert!((0.0..=1.0).contains(&report.score));
        assert_eq!(report.pass, report.score >= 0.6);
    }

    #[test]
    fn test_report_serializes_pass_field() {
        let assessor = QualityAssessor::new(QualityConfig::default()).unwrap();
        let report = assessor.assess(&flat_gray(16, 16)).unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["pass"].is_boolean());
        assert!(json["details"]["sharpness"].is_number());
    }
}

//! Image acquisition for review requests
//!
//! Review requests reference images either by HTTP(S) URL or as an embedded
//! base64 payload (with or without a `data:image/...` prefix). All three
//! forms are normalized to a decoded [`image::RgbImage`] before any adapter
//! sees them, so downstream code never cares where the bytes came from.
//!
//! # Example
//! ```no_run
//! use aerovision_image_loader::{ImageLoader, LoaderConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = ImageLoader::new(LoaderConfig::default())?;
//! let img = loader.load("https://example.com/spotting/B-1234.jpg").await?;
//! println!("Loaded {}x{} image", img.width(), img.height());
//! # Ok(())
//! # }
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbImage;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use aerovision_common::ReviewError;

/// Errors that can occur while acquiring an image
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot load image from input: {0}")]
    InvalidInput(String),

    #[error("Failed to fetch image from URL: {0}")]
    Http(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Image too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

impl From<LoadError> for ReviewError {
    fn from(err: LoadError) -> Self {
        ReviewError::ImageLoad(err.to_string())
    }
}

/// Configuration for image acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Maximum accepted encoded payload size in megabytes
    pub max_image_size_mb: usize,
    /// Timeout for remote fetches in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_image_size_mb: std::env::var("AEROVISION_MAX_IMAGE_SIZE_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            fetch_timeout_secs: std::env::var("AEROVISION_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

/// Loader that normalizes URL and embedded-payload inputs to decoded images
#[derive(Clone)]
pub struct ImageLoader {
    config: LoaderConfig,
    client: HttpClient,
}

impl ImageLoader {
    /// Create a new loader with the given configuration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(config: LoaderConfig) -> Result<Self, LoadError> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| LoadError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Load an image from a URL or a base64 payload
    ///
    /// # Errors
    /// Returns [`LoadError`] if the input cannot be fetched or decoded.
    /// This is the hard-failure path for the owning request item.
    pub async fn load(&self, input: &str) -> Result<RgbImage, LoadError> {
        if input.starts_with("http://") || input.starts_with("https://") {
            return self.load_from_url(input).await;
        }

        if input.starts_with("data:image/") {
            return self.load_from_base64(input);
        }

        // Raw base64 without a data URL prefix. An undecodable payload is an
        // invalid input; size and image-format errors keep their own kind.
        self.load_from_base64(input).map_err(|e| match e {
            LoadError::Decode(_) => {
                let preview: String = input.chars().take(50).collect();
                LoadError::InvalidInput(format!("{preview}..."))
            }
            other => other,
        })
    }

    async fn load_from_url(&self, url: &str) -> Result<RgbImage, LoadError> {
        info!("Fetching image from URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LoadError::Http(format!(
                "HTTP request failed with status: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoadError::Http(format!("Failed to read response body: {e}")))?;

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        self.decode_bytes(&bytes)
    }

    fn load_from_base64(&self, data: &str) -> Result<RgbImage, LoadError> {
        // Strip the data URL prefix if present
        let payload = match data.split_once(',') {
            Some((_, rest)) => rest,
            None => data,
        };

        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| LoadError::Decode(format!("Invalid base64 payload: {e}")))?;

        self.decode_bytes(&bytes)
    }

    fn decode_bytes(&self, bytes: &[u8]) -> Result<RgbImage, LoadError> {
        let max = self.config.max_image_size_mb * 1024 * 1024;
        if bytes.len() > max {
            return Err(LoadError::TooLarge {
                size: bytes.len(),
                max,
            });
        }

        let img = image::load_from_memory(bytes)
            .map_err(|e| LoadError::Decode(e.to_string()))?
            .to_rgb8();

        debug!("Decoded {}x{} image", img.width(), img.height());
        Ok(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn test_loader() -> ImageLoader {
        ImageLoader::new(LoaderConfig {
            max_image_size_mb: 20,
            fetch_timeout_secs: 5,
        })
        .unwrap()
    }

    fn png_base64(width: u32, height: u32) -> String {
        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([120, 130, 140]);
        }
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        BASE64.encode(buf.get_ref())
    }

    #[tokio::test]
    async fn test_load_raw_base64() {
        let loader = test_loader();
        let img = loader.load(&png_base64(8, 6)).await.unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
    }

    #[tokio::test]
    async fn test_load_data_url() {
        let loader = test_loader();
        let input = format!("data:image/png;base64,{}", png_base64(4, 4));
        let img = loader.load(&input).await.unwrap();
        assert_eq!((img.width(), img.height()), (4, 4));
    }

    #[tokio::test]
    async fn test_load_invalid_input() {
        let loader = test_loader();
        let result = loader.load("definitely not an image ///").await;
        assert!(matches!(result, Err(LoadError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_oversized_payload() {
        let loader = ImageLoader::new(LoaderConfig {
            max_image_size_mb: 0,
            fetch_timeout_secs: 5,
        })
        .unwrap();

        let result = loader.load(&png_base64(8, 8)).await;
        assert!(matches!(result, Err(LoadError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_load_bad_url_is_http_error() {
        let loader = test_loader();
        let result = loader.load("http://127.0.0.1:1/missing.jpg").await;
        assert!(matches!(result, Err(LoadError::Http(_))));
    }
}

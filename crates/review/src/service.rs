//! The caller-facing review service.
//!
//! Owns the loader, worker pool, adapter factory, and counter store; the
//! HTTP layer (out of scope here) calls [`ReviewService::review`] and
//! [`ReviewService::review_batch`] and serializes what comes back.

use std::time::Duration;

use aerovision_common::ReviewError;
use aerovision_image_loader::{ImageLoader, LoaderConfig};
use tracing::{info, warn};

use crate::adapter::{AircraftAdapter, AirlineAdapter, QualityAdapter, RegistrationAdapter};
use crate::batch::review_batch;
use crate::bridge::WorkerPool;
use crate::factory::InferenceFactory;
use crate::pipeline::{review_image, AdapterSet};
use crate::result::{BatchReviewItem, ReviewFlags, ReviewOutcome};
use crate::settings::Settings;
use crate::stats::{StatsSnapshot, StatsStore};

/// Review orchestration service.
pub struct ReviewService {
    factory: InferenceFactory,
    pool: WorkerPool,
    loader: ImageLoader,
    stats: StatsStore,
    settings: Settings,
}

impl ReviewService {
    pub fn new(settings: Settings) -> Result<Self, ReviewError> {
        let loader = ImageLoader::new(LoaderConfig::default())
            .map_err(|e| ReviewError::InvalidConfig(e.to_string()))?;
        let pool = WorkerPool::new(
            settings.max_concurrent_inferences,
            Duration::from_secs(settings.call_timeout_secs),
        );
        let stats = StatsStore::new(settings.redis_url.clone());

        Ok(Self {
            factory: InferenceFactory::new(),
            pool,
            loader,
            stats,
            settings,
        })
    }

    pub fn from_env() -> Result<Self, ReviewError> {
        Self::new(Settings::default())
    }

    /// Warm all adapters up front instead of on the first request.
    pub fn preload(&self) {
        let ready = self.factory.preload();
        info!("{}/4 adapters ready", ready);
    }

    /// Review one image input.
    pub async fn review(
        &self,
        input: &str,
        flags: &ReviewFlags,
    ) -> Result<(ReviewOutcome, Duration), ReviewError> {
        let adapters = self.adapters(flags);
        let result = review_image(&adapters, &self.pool, &self.loader, input, flags).await;
        self.stats.record_request(result.is_ok()).await;
        result
    }

    /// Review a batch of image inputs.
    pub async fn review_batch(
        &self,
        inputs: &[String],
        flags: &ReviewFlags,
    ) -> Result<Vec<BatchReviewItem>, ReviewError> {
        let adapters = self.adapters(flags);
        let result = review_batch(
            &adapters,
            &self.pool,
            &self.loader,
            inputs,
            flags,
            self.settings.max_batch_size,
        )
        .await;
        self.stats.record_request(result.is_ok()).await;
        result
    }

    /// Read the shared request counters.
    pub async fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot().await
    }

    /// Clear the shared request counters.
    pub async fn reset_stats(&self) -> Result<(), ReviewError> {
        self.stats
            .reset()
            .await
            .map_err(|e| ReviewError::Other(format!("counter store reset failed: {e}")))
    }

    /// Resolve the adapters needed by `flags`, degrading unavailable ones.
    fn adapters(
        &self,
        flags: &ReviewFlags,
    ) -> AdapterSet<QualityAdapter, AircraftAdapter, AirlineAdapter, RegistrationAdapter> {
        AdapterSet {
            quality: flags
                .quality
                .then(|| self.factory.quality())
                .and_then(|r| log_unavailable("quality", r)),
            aircraft: flags
                .aircraft
                .then(|| self.factory.aircraft())
                .and_then(|r| log_unavailable("aircraft", r)),
            airline: flags
                .airline
                .then(|| self.factory.airline())
                .and_then(|r| log_unavailable("airline", r)),
            registration: flags
                .registration
                .then(|| self.factory.registration())
                .and_then(|r| log_unavailable("registration", r)),
        }
    }
}

fn log_unavailable<T>(name: &str, result: Result<T, ReviewError>) -> Option<T> {
    match result {
        Ok(adapter) => Some(adapter),
        Err(e) => {
            warn!("Adapter '{}' unavailable, sub-task degrades: {}", name, e);
            None
        }
    }
}

//! Lazy, thread-safe construction of the production adapters.
//!
//! Model loading is expensive and can fail (missing model files), so each
//! adapter is built at most once on first use and shared afterwards. A
//! construction failure is reported as `AdapterUnavailable` and retried on
//! the next request rather than poisoning the factory.

use std::sync::Arc;

use aerovision_common::ReviewError;
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::adapter::{AircraftAdapter, AirlineAdapter, QualityAdapter, RegistrationAdapter};

/// One-shot-per-adapter factory for the four inference sub-tasks.
#[derive(Default)]
pub struct InferenceFactory {
    quality: OnceCell<Arc<QualityAdapter>>,
    aircraft: OnceCell<Arc<AircraftAdapter>>,
    airline: OnceCell<Arc<AirlineAdapter>>,
    registration: OnceCell<Arc<RegistrationAdapter>>,
}

impl InferenceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quality(&self) -> Result<Arc<QualityAdapter>, ReviewError> {
        self.quality
            .get_or_try_init(|| QualityAdapter::new().map(Arc::new))
            .cloned()
    }

    pub fn aircraft(&self) -> Result<Arc<AircraftAdapter>, ReviewError> {
        self.aircraft
            .get_or_try_init(|| AircraftAdapter::new().map(Arc::new))
            .cloned()
    }

    pub fn airline(&self) -> Result<Arc<AirlineAdapter>, ReviewError> {
        self.airline
            .get_or_try_init(|| AirlineAdapter::new().map(Arc::new))
            .cloned()
    }

    pub fn registration(&self) -> Result<Arc<RegistrationAdapter>, ReviewError> {
        self.registration
            .get_or_try_init(|| RegistrationAdapter::new().map(Arc::new))
            .cloned()
    }

    /// Warm every adapter, logging the ones that cannot start.
    ///
    /// Returns the number of adapters that are ready.
    pub fn preload(&self) -> usize {
        let mut ready = 0;
        for (name, result) in [
            ("quality", self.quality().map(|_| ())),
            ("aircraft", self.aircraft().map(|_| ())),
            ("airline", self.airline().map(|_| ())),
            ("registration", self.registration().map(|_| ())),
        ] {
            match result {
                Ok(()) => {
                    info!("Adapter '{}' ready", name);
                    ready += 1;
                }
                Err(e) => warn!("Adapter '{}' unavailable: {}", name, e),
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_adapter_is_shared_across_calls() {
        // Quality needs no model files, so it always constructs.
        let factory = InferenceFactory::new();
        let first = factory.quality().unwrap();
        let second = factory.quality().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_models_surface_as_unavailable() {
        // The classifier checks its asset paths before touching the runtime,
        // so with no model directory the aircraft adapter reports unavailable.
        std::env::set_var("AEROVISION_MODEL_DIR", "/nonexistent/models");
        let factory = InferenceFactory::new();
        match factory.aircraft() {
            Err(ReviewError::AdapterUnavailable { .. }) => {}
            other => panic!("expected AdapterUnavailable, got {:?}", other.map(|_| ())),
        }
    }
}

//! Review orchestration over the aerovision inference sub-tasks.
//!
//! This crate aggregates four heterogeneous inference capabilities
//! (image quality, aircraft type, airline, registration OCR) into one
//! per-image review decision. See [`service::ReviewService`] for the
//! entry point.

pub mod adapter;
pub mod batch;
pub mod bridge;
pub mod factory;
pub mod pipeline;
pub mod result;
pub mod service;
pub mod settings;
pub mod stats;

pub use adapter::{
    AircraftAdapter, AirlineAdapter, InferenceAdapter, QualityAdapter, RegistrationAdapter,
};
pub use batch::review_batch;
pub use bridge::WorkerPool;
pub use factory::InferenceFactory;
pub use pipeline::{review_image, AdapterSet};
pub use result::{
    AircraftSection, AirlineSection, BatchReviewItem, ReviewFlags, ReviewOutcome,
};
pub use service::ReviewService;
pub use settings::Settings;
pub use stats::{StatsSnapshot, StatsStore};

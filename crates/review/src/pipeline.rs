//! Single-image review pipeline: load once, fan out, merge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aerovision_common::{ClassificationResult, ReviewError};
use aerovision_image_loader::ImageLoader;
use aerovision_quality::QualityReport;
use aerovision_registration::RegistrationReadout;
use image::RgbImage;
use tracing::{debug, warn};

use crate::adapter::InferenceAdapter;
use crate::bridge::WorkerPool;
use crate::result::{ReviewFlags, ReviewOutcome};

/// The adapters available to a pipeline run.
///
/// A `None` slot means the sub-task could not be constructed; it then
/// behaves like a disabled flag (mandatory fields take their defaults,
/// optional fields are omitted).
pub struct AdapterSet<Q, A, L, R> {
    pub quality: Option<Arc<Q>>,
    pub aircraft: Option<Arc<A>>,
    pub airline: Option<Arc<L>>,
    pub registration: Option<Arc<R>>,
}

/// Review a single image input.
///
/// The image loads exactly once; a load failure is the only hard failure
/// and aborts the request. All enabled sub-tasks then run concurrently
/// against the shared image, each isolated: a failing or timed-out
/// sub-task degrades its own section and never affects the others.
///
/// Returns the merged outcome and the wall-clock time spent.
pub async fn review_image<Q, A, L, R>(
    adapters: &AdapterSet<Q, A, L, R>,
    pool: &WorkerPool,
    loader: &ImageLoader,
    input: &str,
    flags: &ReviewFlags,
) -> Result<(ReviewOutcome, Duration), ReviewError>
where
    Q: InferenceAdapter<Output = QualityReport>,
    A: InferenceAdapter<Output = ClassificationResult>,
    L: InferenceAdapter<Output = ClassificationResult>,
    R: InferenceAdapter<Output = RegistrationReadout>,
{
    let started = Instant::now();

    let image = Arc::new(loader.load(input).await?);
    debug!("Image loaded: {}x{}", image.width(), image.height());

    let (quality, aircraft, airline, registration) = tokio::join!(
        run_sub_task(pool, flags.quality, adapters.quality.as_ref(), &image),
        run_sub_task(pool, flags.aircraft, adapters.aircraft.as_ref(), &image),
        run_sub_task(pool, flags.airline, adapters.airline.as_ref(), &image),
        run_sub_task(pool, flags.registration, adapters.registration.as_ref(), &image),
    );

    let outcome = ReviewOutcome::merge(quality, aircraft, airline, registration);
    Ok((outcome, started.elapsed()))
}

/// Run one sub-task if enabled and available; any failure degrades to `None`.
async fn run_sub_task<A>(
    pool: &WorkerPool,
    enabled: bool,
    adapter: Option<&Arc<A>>,
    image: &Arc<RgbImage>,
) -> Option<A::Output>
where
    A: InferenceAdapter,
{
    let adapter = match (enabled, adapter) {
        (true, Some(adapter)) => Arc::clone(adapter),
        _ => return None,
    };

    let task = adapter.name().to_string();
    match pool.run(adapter, Arc::clone(image)).await {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("Sub-task '{}' degraded: {}", task, e);
            None
        }
    }
}

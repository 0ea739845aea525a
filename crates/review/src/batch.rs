//! Batch review pipeline with sparse index preservation.
//!
//! A batch runs in four steps: concurrent loads, compaction of the images
//! that loaded, one batch call per enabled sub-task over the compacted
//! images (the sub-tasks themselves run concurrently), and reassembly that
//! scatters results back to original positions. Output slot `i` always
//! describes input `i`, whatever failed in between.

use std::sync::Arc;

use aerovision_common::{ClassificationResult, ReviewError};
use aerovision_image_loader::ImageLoader;
use aerovision_quality::QualityReport;
use aerovision_registration::RegistrationReadout;
use image::RgbImage;
use tracing::{debug, warn};

use crate::adapter::InferenceAdapter;
use crate::bridge::WorkerPool;
use crate::pipeline::AdapterSet;
use crate::result::{BatchReviewItem, ReviewFlags, ReviewOutcome};

/// Review a batch of image inputs.
///
/// Exceeding the batch cap is the only request-level error; every other
/// failure is recorded in the slot of the item it belongs to.
pub async fn review_batch<Q, A, L, R>(
    adapters: &AdapterSet<Q, A, L, R>,
    pool: &WorkerPool,
    loader: &ImageLoader,
    inputs: &[String],
    flags: &ReviewFlags,
    max_batch_size: usize,
) -> Result<Vec<BatchReviewItem>, ReviewError>
where
    Q: InferenceAdapter<Output = QualityReport>,
    A: InferenceAdapter<Output = ClassificationResult>,
    L: InferenceAdapter<Output = ClassificationResult>,
    R: InferenceAdapter<Output = RegistrationReadout>,
{
    if inputs.len() > max_batch_size {
        return Err(ReviewError::BatchTooLarge {
            size: inputs.len(),
            max: max_batch_size,
        });
    }

    let loads = load_all(loader, inputs).await;

    let mut valid_indices = Vec::new();
    let mut valid_images = Vec::new();
    for (i, load) in loads.iter().enumerate() {
        if let Ok(image) = load {
            valid_indices.push(i);
            valid_images.push(Arc::clone(image));
        }
    }
    debug!(
        "Batch of {}: {} images loaded, {} failed",
        inputs.len(),
        valid_images.len(),
        inputs.len() - valid_images.len()
    );

    let (quality, aircraft, airline, registration) = tokio::join!(
        run_batch_sub_task(pool, flags.quality, adapters.quality.as_ref(), &valid_images),
        run_batch_sub_task(pool, flags.aircraft, adapters.aircraft.as_ref(), &valid_images),
        run_batch_sub_task(pool, flags.airline, adapters.airline.as_ref(), &valid_images),
        run_batch_sub_task(pool, flags.registration, adapters.registration.as_ref(), &valid_images),
    );

    let mut quality = scatter(quality, &valid_indices, inputs.len());
    let mut aircraft = scatter(aircraft, &valid_indices, inputs.len());
    let mut airline = scatter(airline, &valid_indices, inputs.len());
    let mut registration = scatter(registration, &valid_indices, inputs.len());

    let mut items = Vec::with_capacity(inputs.len());
    for (i, load) in loads.into_iter().enumerate() {
        match load {
            Err(error) => items.push(BatchReviewItem::failed(i, error)),
            Ok(_) => {
                let outcome = ReviewOutcome::merge(
                    quality[i].take(),
                    aircraft[i].take(),
                    airline[i].take(),
                    registration[i].take(),
                );
                items.push(BatchReviewItem::ok(i, outcome));
            }
        }
    }
    Ok(items)
}

/// Load every input concurrently, collecting results in input order.
async fn load_all(loader: &ImageLoader, inputs: &[String]) -> Vec<Result<Arc<RgbImage>, String>> {
    let handles: Vec<_> = inputs
        .iter()
        .map(|input| {
            let loader = loader.clone();
            let input = input.clone();
            tokio::spawn(async move { loader.load(&input).await })
        })
        .collect();

    let mut loads = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(image)) => loads.push(Ok(Arc::new(image))),
            Ok(Err(e)) => loads.push(Err(e.to_string())),
            Err(join_err) => loads.push(Err(format!("image load task failed: {join_err}"))),
        }
    }
    loads
}

/// Run one sub-task's batch call over the compacted images.
///
/// `None` means the sub-task contributed nothing for any image: disabled,
/// unavailable, or the whole batch call failed.
async fn run_batch_sub_task<A>(
    pool: &WorkerPool,
    enabled: bool,
    adapter: Option<&Arc<A>>,
    images: &[Arc<RgbImage>],
) -> Option<Vec<Option<A::Output>>>
where
    A: InferenceAdapter,
{
    let adapter = match (enabled, adapter) {
        (true, Some(adapter)) => Arc::clone(adapter),
        _ => return None,
    };
    if images.is_empty() {
        return Some(Vec::new());
    }

    let task = adapter.name().to_string();
    match pool.run_batch(adapter, images.to_vec()).await {
        Ok(results) => Some(results),
        Err(e) => {
            warn!("Batch sub-task '{}' degraded for all indices: {}", task, e);
            None
        }
    }
}

/// Scatter compacted sub-task results back to original batch positions.
fn scatter<T>(
    results: Option<Vec<Option<T>>>,
    valid_indices: &[usize],
    len: usize,
) -> Vec<Option<T>> {
    let mut out: Vec<Option<T>> = std::iter::repeat_with(|| None).take(len).collect();
    if let Some(values) = results {
        if values.len() != valid_indices.len() {
            warn!(
                "Sub-task returned {} results for {} images; truncating",
                values.len(),
                valid_indices.len()
            );
        }
        for (&slot, value) in valid_indices.iter().zip(values) {
            out[slot] = value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_maps_compact_results_to_original_slots() {
        let results = Some(vec![Some(10), None, Some(30)]);
        let out = scatter(results, &[0, 2, 4], 5);
        assert_eq!(out, vec![Some(10), None, None, None, Some(30)]);
    }

    #[test]
    fn scatter_of_absent_sub_task_is_all_none() {
        let out: Vec<Option<u32>> = scatter(None, &[0, 1], 3);
        assert_eq!(out, vec![None, None, None]);
    }
}

//! Bridge between the async pipeline and the synchronous inference adapters.
//!
//! Inference runs on the blocking thread pool behind a semaphore, so the
//! number of models executing at once is bounded independently of how many
//! requests are in flight. Every call carries a timeout; a timed-out or
//! panicked worker degrades to a sub-task error, never a crash.

use std::sync::Arc;
use std::time::Duration;

use aerovision_common::ReviewError;
use image::RgbImage;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::adapter::InferenceAdapter;

/// Bounded pool for synchronous inference work.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    call_timeout: Duration,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize, call_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            call_timeout,
        }
    }

    /// Run one adapter against one image.
    pub async fn run<A>(&self, adapter: Arc<A>, image: Arc<RgbImage>) -> Result<A::Output, ReviewError>
    where
        A: InferenceAdapter,
    {
        let task = adapter.name().to_string();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReviewError::Other("worker pool is closed".to_string()))?;

        debug!("Dispatching '{}' to worker pool", task);

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            adapter.evaluate(&image)
        });

        self.await_worker(handle, task, self.call_timeout).await
    }

    /// Run one adapter's batch path over the given images.
    ///
    /// The timeout scales with the batch size so a full batch gets the same
    /// per-image allowance as a single call.
    pub async fn run_batch<A>(
        &self,
        adapter: Arc<A>,
        images: Vec<Arc<RgbImage>>,
    ) -> Result<Vec<Option<A::Output>>, ReviewError>
    where
        A: InferenceAdapter,
    {
        let task = adapter.name().to_string();
        let timeout = self.call_timeout * images.len().max(1) as u32;
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReviewError::Other("worker pool is closed".to_string()))?;

        debug!("Dispatching '{}' batch of {} to worker pool", task, images.len());

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let refs: Vec<&RgbImage> = images.iter().map(Arc::as_ref).collect();
            adapter.evaluate_batch(&refs)
        });

        self.await_worker(handle, task, timeout).await
    }

    async fn await_worker<T>(
        &self,
        handle: tokio::task::JoinHandle<Result<T, ReviewError>>,
        task: String,
        timeout: Duration,
    ) -> Result<T, ReviewError> {
        match tokio::time::timeout(timeout, handle).await {
            Err(_) => {
                warn!("'{}' timed out after {:?}", task, timeout);
                Err(ReviewError::Timeout {
                    task,
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(join_err)) => {
                warn!("'{}' worker panicked: {}", task, join_err);
                Err(ReviewError::Inference {
                    task,
                    message: format!("worker panicked: {join_err}"),
                })
            }
            Ok(Ok(result)) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowAdapter {
        delay: Duration,
    }

    impl InferenceAdapter for SlowAdapter {
        type Output = u32;

        fn name(&self) -> &str {
            "slow"
        }

        fn evaluate(&self, image: &RgbImage) -> Result<u32, ReviewError> {
            std::thread::sleep(self.delay);
            Ok(image.width())
        }
    }

    struct PanickingAdapter;

    impl InferenceAdapter for PanickingAdapter {
        type Output = u32;

        fn name(&self) -> &str {
            "panicking"
        }

        fn evaluate(&self, _image: &RgbImage) -> Result<u32, ReviewError> {
            panic!("adapter blew up");
        }
    }

    #[tokio::test]
    async fn run_returns_adapter_output() {
        let pool = WorkerPool::new(2, Duration::from_secs(5));
        let adapter = Arc::new(SlowAdapter {
            delay: Duration::from_millis(1),
        });
        let image = Arc::new(RgbImage::new(8, 8));

        let result = pool.run(adapter, image).await.unwrap();
        assert_eq!(result, 8);
    }

    #[tokio::test]
    async fn slow_adapter_times_out() {
        let pool = WorkerPool::new(2, Duration::from_millis(20));
        let adapter = Arc::new(SlowAdapter {
            delay: Duration::from_secs(5),
        });
        let image = Arc::new(RgbImage::new(8, 8));

        match pool.run(adapter, image).await {
            Err(ReviewError::Timeout { task, .. }) => assert_eq!(task, "slow"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_adapter_degrades_to_inference_error() {
        let pool = WorkerPool::new(2, Duration::from_secs(5));
        let image = Arc::new(RgbImage::new(8, 8));

        match pool.run(Arc::new(PanickingAdapter), image).await {
            Err(ReviewError::Inference { task, .. }) => assert_eq!(task, "panicking"),
            other => panic!("expected inference error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_timeout_scales_with_size() {
        // Each image sleeps 5ms and the per-call budget is 20ms; a batch of
        // 10 through the default per-image loop needs ~50ms and must still
        // fit the scaled window.
        let pool = WorkerPool::new(1, Duration::from_millis(20));
        let adapter = Arc::new(SlowAdapter {
            delay: Duration::from_millis(5),
        });
        let images: Vec<Arc<RgbImage>> = (0..10).map(|_| Arc::new(RgbImage::new(4, 4))).collect();

        let results = pool.run_batch(adapter, images).await.unwrap();
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r == &Some(4)));
    }
}

//! Redis-backed request counters.
//!
//! The store is best-effort: counting never blocks or fails a review. When
//! Redis is unreachable the increment is dropped with a warning and reads
//! return a zero-valued snapshot flagged `available: false`.

use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const REQUEST_COUNT: &str = "stats:request_count";
const SUCCESS_COUNT: &str = "stats:success_count";
const ERROR_COUNT: &str = "stats:error_count";
const START_TIME: &str = "stats:start_time";

/// Point-in-time view of the shared counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Whether the counter store was reachable for this read.
    pub available: bool,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Unix timestamp of the first observed request, if any.
    pub start_time: Option<u64>,
    pub uptime_seconds: u64,
    pub requests_per_second: f64,
}

impl StatsSnapshot {
    fn unavailable() -> Self {
        Self {
            available: false,
            request_count: 0,
            success_count: 0,
            error_count: 0,
            start_time: None,
            uptime_seconds: 0,
            requests_per_second: 0.0,
        }
    }
}

/// Shared request counters over Redis.
///
/// The connection is established lazily on first use so the service starts
/// even when the store is down.
pub struct StatsStore {
    redis_url: String,
    connection: OnceCell<ConnectionManager>,
}

impl StatsStore {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            connection: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, redis::RedisError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!("Connecting to counter store at {}", self.redis_url);
                let client = redis::Client::open(self.redis_url.as_str())?;
                ConnectionManager::new(client).await
            })
            .await?;
        Ok(manager.clone())
    }

    /// Count one request. Dropped with a warning when the store is down.
    pub async fn record_request(&self, success: bool) {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Counter store unreachable, dropping increment: {}", e);
                return;
            }
        };

        let mut pipe = redis::pipe();
        pipe.incr(REQUEST_COUNT, 1);
        if success {
            pipe.incr(SUCCESS_COUNT, 1);
        } else {
            pipe.incr(ERROR_COUNT, 1);
        }

        if let Err(e) = pipe.query_async::<()>(&mut conn).await {
            warn!("Counter store increment failed: {}", e);
        }
    }

    /// Read the counters and derive uptime and request rate.
    ///
    /// The start time is set on first read if missing. Never errors; an
    /// unreachable store yields a zero snapshot with `available: false`.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Counter store unreachable for snapshot: {}", e);
                return StatsSnapshot::unavailable();
            }
        };

        let now = unix_now();

        // Stamp the start time on first contact, keeping an existing value.
        let set_start: Result<(), _> = redis::cmd("SET")
            .arg(START_TIME)
            .arg(now)
            .arg("NX")
            .query_async(&mut conn)
            .await;
        if let Err(e) = set_start {
            warn!("Counter store start-time stamp failed: {}", e);
            return StatsSnapshot::unavailable();
        }

        let values: Result<(Option<u64>, Option<u64>, Option<u64>, Option<u64>), _> = conn
            .mget(&[REQUEST_COUNT, SUCCESS_COUNT, ERROR_COUNT, START_TIME])
            .await;

        match values {
            Ok((requests, successes, errors, start_time)) => {
                let request_count = requests.unwrap_or(0);
                let uptime_seconds = start_time.map_or(0, |t| now.saturating_sub(t));
                let requests_per_second = if uptime_seconds > 0 {
                    request_count as f64 / uptime_seconds as f64
                } else {
                    0.0
                };
                StatsSnapshot {
                    available: true,
                    request_count,
                    success_count: successes.unwrap_or(0),
                    error_count: errors.unwrap_or(0),
                    start_time,
                    uptime_seconds,
                    requests_per_second,
                }
            }
            Err(e) => {
                warn!("Counter store read failed: {}", e);
                StatsSnapshot::unavailable()
            }
        }
    }

    /// Delete all counters. Administrative use only.
    pub async fn reset(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .del(REQUEST_COUNT)
            .del(SUCCESS_COUNT)
            .del(ERROR_COUNT)
            .del(START_TIME)
            .query_async::<()>(&mut conn)
            .await
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Port 1 is never a Redis server; connections fail fast.
    const DEAD_URL: &str = "redis://127.0.0.1:1";

    #[tokio::test]
    async fn increments_against_dead_store_are_dropped() {
        let store = StatsStore::new(DEAD_URL);
        for i in 0..10 {
            store.record_request(i % 2 == 0).await;
        }
        // Nothing to assert beyond not panicking and not erroring.
    }

    #[tokio::test]
    async fn snapshot_against_dead_store_is_unavailable() {
        let store = StatsStore::new(DEAD_URL);
        let snapshot = store.snapshot().await;
        assert!(!snapshot.available);
        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.uptime_seconds, 0);
        assert_eq!(snapshot.requests_per_second, 0.0);
    }

    #[tokio::test]
    async fn reset_against_dead_store_errors() {
        let store = StatsStore::new(DEAD_URL);
        assert!(store.reset().await.is_err());
    }
}

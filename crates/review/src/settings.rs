//! Environment-driven service configuration.

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

/// Runtime settings for the review service
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum number of images accepted in one batch request
    pub max_batch_size: usize,
    /// Worker pool size shared by all inference sub-tasks
    pub max_concurrent_inferences: usize,
    /// Per-call inference timeout in seconds
    pub call_timeout_secs: u64,
    /// Redis connection URL for the counter store
    pub redis_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_batch_size: env_parse("AEROVISION_MAX_BATCH_SIZE", 50),
            max_concurrent_inferences: env_parse("AEROVISION_MAX_CONCURRENT_INFERENCES", 4),
            call_timeout_secs: env_parse("AEROVISION_CALL_TIMEOUT_SECS", 30),
            redis_url: std::env::var("AEROVISION_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let settings = Settings::default();
        assert_eq!(settings.max_batch_size, 50);
        assert_eq!(settings.max_concurrent_inferences, 4);
        assert_eq!(settings.call_timeout_secs, 30);
        assert!(settings.redis_url.starts_with("redis://"));
    }
}

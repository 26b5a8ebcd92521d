//! Runtime settings loaded from environment variables.
//!
//! The binary calls `dotenv()` before `Settings::from_env()`, so a local
//! `.env` file works the same as real environment variables.

use std::time::Duration;

/// Pipeline-wide tunables. Every field has a default so the pipeline
/// runs without any configuration at all.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Capacity of the in-process cache tier (entries).
    pub cache_capacity: usize,
    /// TTL for cached analysis results.
    pub cache_ttl: Duration,
    /// Row count at which the analyzer switches to chunked processing.
    pub chunk_threshold: usize,
    /// Rows per chunk in chunked analysis.
    pub chunk_size: usize,
    /// Maximum rows returned by the relational executor before truncation.
    pub max_result_rows: usize,
    /// Maximum accepted upload size in bytes.
    pub max_file_bytes: u64,
    /// Maximum connections in the relational pool.
    pub pool_size: u32,
    /// How long connection acquisition may block before PoolExhausted.
    pub acquire_timeout: Duration,
    /// Hard deadline for a single language-inference call.
    pub inference_timeout: Duration,
    /// OpenAI-compatible endpoint configuration.
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_capacity: 100,
            cache_ttl: Duration::from_secs(3600),
            chunk_threshold: 10_000,
            chunk_size: 10_000,
            max_result_rows: 10_000,
            max_file_bytes: 100 * 1024 * 1024,
            pool_size: 10,
            acquire_timeout: Duration::from_secs(30),
            inference_timeout: Duration::from_secs(60),
            openai_api_key: "dummy-api-key".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_capacity: env_parse("DATASIGHT_CACHE_CAPACITY", defaults.cache_capacity),
            cache_ttl: Duration::from_secs(env_parse(
                "DATASIGHT_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )),
            chunk_threshold: env_parse("DATASIGHT_CHUNK_THRESHOLD", defaults.chunk_threshold),
            chunk_size: env_parse("DATASIGHT_CHUNK_SIZE", defaults.chunk_size),
            max_result_rows: env_parse("DATASIGHT_MAX_RESULT_ROWS", defaults.max_result_rows),
            max_file_bytes: env_parse("DATASIGHT_MAX_FILE_BYTES", defaults.max_file_bytes),
            pool_size: env_parse("DATASIGHT_POOL_SIZE", defaults.pool_size),
            acquire_timeout: Duration::from_secs(env_parse(
                "DATASIGHT_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )),
            inference_timeout: Duration::from_secs(env_parse(
                "DATASIGHT_INFERENCE_TIMEOUT_SECS",
                defaults.inference_timeout.as_secs(),
            )),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .unwrap_or(defaults.openai_api_key),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or(defaults.openai_base_url),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or(defaults.openai_model),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.cache_capacity, 100);
        assert_eq!(s.chunk_threshold, 10_000);
        assert!(s.max_file_bytes > 0);
    }
}

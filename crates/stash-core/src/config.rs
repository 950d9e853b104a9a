//! Config - 実行時設定
//!
//! 設定ファイルは持たない。CLI の引数 / 環境変数から組み立てる。

use std::time::Duration;

use axum::http::HeaderValue;

use crate::app::retry::RetryPolicy;
use crate::domain::ConfigError;

/// Settings for every `CollectionClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-call timeout; expiry is treated as `StoreError::Unavailable`.
    pub call_timeout: Duration,
    /// Requested page size when listing.
    pub page_size: usize,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            page_size: 1_000,
            retry: RetryPolicy::default_reads(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Deletes in flight per collection.
    pub delete_concurrency: usize,
    /// Wall-clock budget for one sweep. `None` = unbounded.
    pub deadline: Option<Duration>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            delete_concurrency: 8,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub cache_control: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            cache_control: "public, max-age=31536000, immutable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StashConfig {
    pub client: ClientConfig,
    pub sweep: SweepConfig,
    pub retrieval: RetrievalConfig,
}

impl StashConfig {
    /// Fail-fast check at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.call_timeout.is_zero() {
            return Err(ConfigError::MustBePositive { field: "call_timeout" });
        }
        if self.client.page_size == 0 {
            return Err(ConfigError::MustBePositive { field: "page_size" });
        }
        if self.client.retry.max_attempts == 0 {
            return Err(ConfigError::MustBePositive { field: "retry.max_attempts" });
        }
        if self.sweep.delete_concurrency == 0 {
            return Err(ConfigError::MustBePositive { field: "delete_concurrency" });
        }
        if self.sweep.deadline.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::MustBePositive { field: "deadline" });
        }
        if HeaderValue::from_str(&self.retrieval.cache_control).is_err()
            || self.retrieval.cache_control.trim().is_empty()
        {
            return Err(ConfigError::InvalidCacheControl(
                self.retrieval.cache_control.clone(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StashConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sweep.delete_concurrency, 8);
        assert_eq!(config.client.retry.max_attempts, 2);
    }

    #[test]
    fn rejects_zero_values() {
        let mut config = StashConfig::default();
        config.sweep.delete_concurrency = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MustBePositive { field: "delete_concurrency" })
        );

        let mut config = StashConfig::default();
        config.sweep.deadline = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unusable_cache_control() {
        let mut config = StashConfig::default();
        config.retrieval.cache_control = "no\nnewlines".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCacheControl(_))
        ));
    }
}

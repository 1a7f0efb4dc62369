//! Pipeline tuning options.
//!
//! Loaded by the binary from (in priority order):
//! 1. Environment variables (RISKGRAPH__PIPELINE__ prefix)
//! 2. Config file (riskgraph.toml, `[pipeline]` section)
//! 3. Defaults

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Descriptors per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries for a batch that failed with a transient transaction error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry; doubles on each further attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Sessions that may be checked out of the connection manager at once.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Create per-label uniqueness constraints before loading.
    #[serde(default = "default_true")]
    pub ensure_constraints: bool,

    /// Log progress every N records per stage (0 disables).
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl PipelineConfig {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        self.retry_backoff_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
    }
}

fn default_batch_size() -> usize {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_sessions() -> usize {
    4
}

fn default_progress_interval() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_sessions: default_max_sessions(),
            ensure_constraints: true,
            progress_interval: default_progress_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 300);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff_ms, 500);
        assert!(config.ensure_constraints);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = PipelineConfig::default();
        assert_eq!(config.backoff_ms(0), 500);
        assert_eq!(config.backoff_ms(1), 1000);
        assert_eq!(config.backoff_ms(2), 2000);
        assert_eq!(config.backoff_ms(80), u64::MAX);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"batch_size": 50}"#).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 3);
    }
}

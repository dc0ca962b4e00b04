use std::time::Duration;

use serde::Deserialize;

use super::PoolError;

/// Default cap on concurrently running workers.
pub const DEFAULT_MAX_BLOCKING_THREADS: usize = 16;

/// Default idle time before a blocking thread exits.
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 10_000;

/// Settings for an owned [`WorkerPool`](super::WorkerPool) runtime.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```rust
/// use relay::pool::PoolConfig;
///
/// let config = PoolConfig::from_json(r#"{ "max_blocking_threads": 4 }"#).unwrap();
/// assert_eq!(config.max_blocking_threads, 4);
/// assert_eq!(config.thread_name, "relay-worker");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum number of workers running at once. Further submissions wait.
    pub max_blocking_threads: usize,
    /// Async scheduler threads. Workers never run on these.
    pub worker_threads: usize,
    /// Name given to every pool thread.
    pub thread_name: String,
    /// How long an idle blocking thread is kept before it exits.
    pub keep_alive_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
            worker_threads: 1,
            thread_name: "relay-worker".to_owned(),
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
        }
    }
}

impl PoolConfig {
    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] on malformed JSON, unknown fields, or a
    /// zero thread count.
    pub fn from_json(json: &str) -> Result<Self, PoolError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn max_blocking_threads(mut self, n: usize) -> Self {
        self.max_blocking_threads = n;
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), PoolError> {
        if self.max_blocking_threads == 0 {
            return Err(PoolError::Invalid("max_blocking_threads must be at least 1"));
        }
        if self.worker_threads == 0 {
            return Err(PoolError::Invalid("worker_threads must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(PoolConfig::from_json("{}").unwrap(), PoolConfig::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = PoolConfig::from_json(r#"{ "threads": 2 }"#).unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn zero_threads_are_rejected() {
        let err = PoolConfig::from_json(r#"{ "max_blocking_threads": 0 }"#).unwrap_err();
        assert!(matches!(err, PoolError::Invalid(_)));
    }

    #[test]
    fn builder_setters() {
        let config = PoolConfig::default()
            .max_blocking_threads(2)
            .thread_name("jobs")
            .keep_alive(Duration::from_secs(3));

        assert_eq!(config.max_blocking_threads, 2);
        assert_eq!(config.thread_name, "jobs");
        assert_eq!(config.keep_alive_duration(), Duration::from_secs(3));
    }
}

//! Loggers that receive a worker's diagnostic trace when its function fails.
//!
//! A worker without a logger writes the trace to standard output instead.

use std::fmt;
use std::sync::Arc;

/// Receives critical-severity diagnostics.
pub trait Logger: Send + Sync {
    /// Records `message` at critical severity.
    fn critical(&self, message: &str);
}

impl<L> Logger for Arc<L>
where
    L: Logger + ?Sized,
{
    fn critical(&self, message: &str) {
        (**self).critical(message);
    }
}

/// Forwards critical messages to `tracing` at `ERROR`, the highest level it has.
///
/// # Examples
///
/// ```rust
/// use relay::logger::{Logger, TracingLogger};
///
/// let logger = TracingLogger::new("my_app::jobs");
/// logger.critical("backup failed");
/// ```
#[derive(Clone)]
pub struct TracingLogger {
    target: &'static str,
}

impl TracingLogger {
    /// `target` becomes the `target` field of each record; pick one your
    /// subscriber's filter recognizes.
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("relay")
    }
}

impl fmt::Debug for TracingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingLogger")
            .field("target", &self.target)
            .finish()
    }
}

impl Logger for TracingLogger {
    fn critical(&self, message: &str) {
        // `target:` must be a constant in tracing macros, so the configured
        // target travels as a field instead.
        tracing::error!(target: "relay::critical", logger = self.target, "{message}");
    }
}

// Process-wide context created once at startup

use crate::logger::{Logger, TracingLogger};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;

/// Start time and logger shared by the lifecycle components
#[derive(Clone)]
pub struct ProcessContext {
    started_at: DateTime<Local>,
    logger: Arc<dyn Logger>,
}

impl ProcessContext {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            started_at: Local::now(),
            logger,
        }
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Time elapsed since the context was created
    pub fn uptime(&self) -> Duration {
        (Local::now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger))
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogLevel, MemoryLogger};

    #[test]
    fn test_uptime_is_monotonic() {
        let ctx = ProcessContext::default();
        let first = ctx.uptime();
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.uptime() >= first);
        assert!(ctx.started_at() <= Local::now());
    }

    #[test]
    fn test_logger_is_shared() {
        let logger = Arc::new(MemoryLogger::new());
        let ctx = ProcessContext::new(logger.clone());
        let cloned = ctx.clone();

        ctx.logger().info("from original");
        cloned.logger().warn("from clone");

        assert_eq!(logger.messages(LogLevel::Info), vec!["from original"]);
        assert_eq!(logger.messages(LogLevel::Warn), vec!["from clone"]);
    }
}

//! Structured logging with tracing.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct ServiceLogger;

impl ServiceLogger {
    /// Install the fmt subscriber, honoring `RUST_LOG` and defaulting to
    /// `info`. Panics if a global subscriber is already set.
    pub fn init() {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_thread_names(true)
            .init()
    }

    /// Like `init`, but quietly yields if a subscriber exists. Used by
    /// tests that may race on installation.
    pub fn init_for_tests() {
        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_thread_names(true)
            .with_test_writer()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_is_reentrant() {
        ServiceLogger::init_for_tests();
        ServiceLogger::init_for_tests();
        tracing::info!("logger ready");
    }
}

//! Non-blocking admission control

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult, GaugeError};

/// Admits at most `limit` concurrent operations and rejects the rest
/// immediately instead of queueing them.
#[derive(Debug, Clone)]
pub struct PressureGauge {
    tokens: Arc<Semaphore>,
    limit: usize,
}

impl PressureGauge {
    pub fn new(limit: usize) -> ConfigResult<Self> {
        if limit == 0 {
            return Err(ConfigError::invalid_limit(limit));
        }
        Ok(Self {
            tokens: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tokens currently free
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Run `f` if a token is free, otherwise fail with [`GaugeError::NoCapacity`].
    pub fn process<R>(&self, f: impl FnOnce() -> R) -> Result<R, GaugeError> {
        let _token = self.try_take()?;
        Ok(f())
    }

    /// Async variant of [`PressureGauge::process`]; the token is held until
    /// `fut` completes.
    pub async fn process_async<F: Future>(&self, fut: F) -> Result<F::Output, GaugeError> {
        let _token = self.try_take()?;
        Ok(fut.await)
    }

    fn try_take(&self) -> Result<tokio::sync::SemaphorePermit<'_>, GaugeError> {
        self.tokens.try_acquire().map_err(|_| {
            debug!(limit = self.limit, "Pressure gauge rejected work");
            GaugeError::NoCapacity
        })
    }
}

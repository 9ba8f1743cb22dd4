use std::num::NonZero;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Defines how many tasks of a batch may execute at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyLimit {
    /// There is an explicit upper limit.
    Max(NonZero<usize>),

    /// Use the available parallelism of the host.
    #[default]
    Default,
}

impl ConcurrencyLimit {
    /// Construct an explicit limit, rejecting zero.
    pub fn max(value: usize) -> ConfigResult<Self> {
        NonZero::new(value)
            .map(ConcurrencyLimit::Max)
            .ok_or_else(|| ConfigError::invalid_limit(value))
    }

    /// The number of workers this limit allows.
    pub fn resolve(self) -> usize {
        match self {
            ConcurrencyLimit::Max(max) => max.get(),
            ConcurrencyLimit::Default => std::thread::available_parallelism()
                .map(NonZero::get)
                .unwrap_or_else(|_| num_cpus::get().max(1)),
        }
    }
}

impl TryFrom<usize> for ConcurrencyLimit {
    type Error = ConfigError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        ConcurrencyLimit::max(value)
    }
}

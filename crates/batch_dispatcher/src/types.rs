//! Common types and configuration for the dispatcher

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::limits::ConcurrencyLimit;

/// Configuration for a [`crate::Dispatcher`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of tasks that can execute concurrently
    pub limit: ConcurrencyLimit,

    /// Time budget for the whole batch (None for no deadline)
    pub deadline: Option<Duration>,

    /// Whether the first task failure stops new tasks from starting
    pub fail_fast: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            limit: ConcurrencyLimit::Default,
            deadline: None,
            fail_fast: true,
        }
    }
}

impl DispatcherConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrent tasks
    pub fn with_limit(mut self, limit: usize) -> ConfigResult<Self> {
        self.limit = ConcurrencyLimit::max(limit)?;
        Ok(self)
    }

    /// Set the batch deadline
    pub fn with_deadline(mut self, deadline: Duration) -> ConfigResult<Self> {
        if deadline.is_zero() {
            return Err(ConfigError::invalid_deadline(deadline));
        }
        self.deadline = Some(deadline);
        Ok(self)
    }

    /// Enable or disable fail-fast behavior
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(deadline) = self.deadline {
            if deadline.is_zero() {
                return Err(ConfigError::invalid_deadline(deadline));
            }
        }
        Ok(())
    }

    /// Create a configuration suited to tests: one worker, short deadline
    pub fn for_testing() -> Self {
        Self {
            limit: ConcurrencyLimit::Max(std::num::NonZero::<usize>::MIN),
            deadline: Some(Duration::from_secs(10)),
            fail_fast: true,
        }
    }

    /// Create a configuration for I/O bound batches that mostly wait
    pub fn for_high_throughput() -> Self {
        let limit = std::num::NonZero::new(num_cpus::get() * 4)
            .map(ConcurrencyLimit::Max)
            .unwrap_or_default();
        Self {
            limit,
            deadline: None,
            fail_fast: false,
        }
    }
}

/// Statistics gathered while running one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Number of tasks submitted
    pub total_tasks: usize,

    /// Number of tasks that returned a value
    pub completed_tasks: usize,

    /// Number of tasks that returned an error or panicked
    pub failed_tasks: usize,

    /// Number of tasks never started because cancellation was observed first
    pub skipped_tasks: usize,

    /// Highest number of tasks observed running at once
    pub peak_concurrency: usize,

    /// Wall time from submission until every worker exited
    pub total_duration: Duration,
}

impl BatchStats {
    pub(crate) fn new(total_tasks: usize) -> Self {
        Self {
            total_tasks,
            ..Self::default()
        }
    }

    /// Check if every submitted task reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.completed_tasks + self.failed_tasks + self.skipped_tasks == self.total_tasks
    }

    /// Check if all tasks completed successfully
    pub fn is_successful(&self) -> bool {
        self.completed_tasks == self.total_tasks
    }
}

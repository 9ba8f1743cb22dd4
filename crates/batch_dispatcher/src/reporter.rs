//! Progress reporting for dispatched batches
//!
//! Reporters are driven only by the dispatcher's collection loop, never by
//! workers, so implementations need no internal synchronization.

use std::time::Duration;

use crate::types::BatchStats;

/// Event types that can be reported while a batch runs
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Batch submitted to the workers
    BatchStarted { total_tasks: usize, limit: usize },
    /// A worker started executing a task
    TaskStarted { index: usize, task_name: String },
    /// Task returned a value
    TaskCompleted {
        index: usize,
        task_name: String,
        duration: Duration,
    },
    /// Task returned an error or panicked
    TaskFailed {
        index: usize,
        task_name: String,
        error: String,
        duration: Duration,
    },
    /// Task was dropped unstarted because cancellation had been raised
    TaskSkipped { index: usize, task_name: String },
    /// Every worker has exited
    BatchFinished { stats: BatchStats },
}

/// Trait for receiving dispatch progress
pub trait Reporter: Send {
    /// Report a dispatch event
    fn report_event(&mut self, event: DispatchEvent);

    /// Called once after the final event of the batch
    fn finish(&mut self) {}
}

/// A no-op reporter that discards all events
#[derive(Debug, Default)]
pub struct NoOpReporter;

impl Reporter for NoOpReporter {
    fn report_event(&mut self, _event: DispatchEvent) {}
}

/// A simple console reporter for demos and debugging
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    context: Option<String>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every line with `[context]`
    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
        }
    }

    fn format_duration(duration: Duration) -> String {
        if duration.as_secs() > 0 {
            format!("{:.1}s", duration.as_secs_f32())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    fn format_event(&self, event: &DispatchEvent) -> String {
        let prefix = self
            .context
            .as_ref()
            .map(|c| format!("[{}] ", c))
            .unwrap_or_default();

        match event {
            DispatchEvent::BatchStarted { total_tasks, limit } => {
                format!("{}Starting {} tasks on {} workers", prefix, total_tasks, limit)
            }
            DispatchEvent::TaskStarted { index, task_name } => {
                format!("{}Started #{} {}", prefix, index, task_name)
            }
            DispatchEvent::TaskCompleted {
                index,
                task_name,
                duration,
            } => format!(
                "{}Completed #{} {} in {}",
                prefix,
                index,
                task_name,
                Self::format_duration(*duration)
            ),
            DispatchEvent::TaskFailed {
                index,
                task_name,
                error,
                duration,
            } => format!(
                "{}Failed #{} {} after {} - {}",
                prefix,
                index,
                task_name,
                Self::format_duration(*duration),
                error
            ),
            DispatchEvent::TaskSkipped { index, task_name } => {
                format!("{}Skipped #{} {}", prefix, index, task_name)
            }
            DispatchEvent::BatchFinished { stats } => format!(
                "{}Batch finished: {}/{} completed, {} failed, {} skipped in {}",
                prefix,
                stats.completed_tasks,
                stats.total_tasks,
                stats.failed_tasks,
                stats.skipped_tasks,
                Self::format_duration(stats.total_duration)
            ),
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report_event(&mut self, event: DispatchEvent) {
        println!("{}", self.format_event(&event));
    }
}

/// A reporter that broadcasts events to several reporters
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Reporter for MultiReporter {
    fn report_event(&mut self, event: DispatchEvent) {
        for reporter in &mut self.reporters {
            reporter.report_event(event.clone());
        }
    }

    fn finish(&mut self) {
        for reporter in &mut self.reporters {
            reporter.finish();
        }
    }
}

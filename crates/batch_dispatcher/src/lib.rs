//! Bounded concurrent task dispatcher with cooperative cancellation
//!
//! A [`Dispatcher`] runs a batch of independent tasks on at most `limit`
//! workers. Workers pull tasks from a shared queue and send outcomes back to
//! a single collection loop, so the only state shared between them is the
//! batch's [`CancelSignal`].
//!
//! - The first task failure raises the signal; tasks that have not started
//!   are skipped, and the failure with the lowest submission index is
//!   reported.
//! - An optional deadline raises the same signal. Running tasks are never
//!   aborted; they finish (or poll the signal and exit early) before
//!   [`Dispatcher::run`] returns.
//! - Panics inside a task are caught at the worker boundary and reported as
//!   [`TaskError::Panicked`].
//!
//! # Example
//!
//! ```rust
//! use batch_dispatcher::{task_fn, Dispatcher};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tasks = (0..5u64).map(|i| {
//!         task_fn(move |_signal| async move {
//!             tokio::time::sleep(Duration::from_millis(10)).await;
//!             Ok::<_, String>(i * 10)
//!         })
//!     });
//!
//!     let dispatcher = Dispatcher::new(2)?.with_deadline(Duration::from_secs(1))?;
//!     let report = dispatcher.run(tasks.collect::<Vec<_>>()).await;
//!
//!     assert_eq!(report.into_result()?, vec![0, 10, 20, 30, 40]);
//!     Ok(())
//! }
//! ```

pub mod dispatcher;
pub mod error;
pub mod gauge;
pub mod limits;
pub mod reporter;
pub mod signal;
pub mod task;
pub mod types;

pub use dispatcher::{BatchReport, Dispatcher};
pub use error::{ConfigError, DispatchError, GaugeError, TaskError};
pub use gauge::PressureGauge;
pub use limits::ConcurrencyLimit;
pub use reporter::{ConsoleReporter, DispatchEvent, MultiReporter, NoOpReporter, Reporter};
pub use signal::{CancelHandle, CancelSignal};
pub use task::{task_fn, BoxedTask, Completed, FnTask, Task, TaskState};
pub use types::{BatchStats, DispatcherConfig};

use std::future::Future;
use std::pin::Pin;

/// A boxed future that is Send and can be used across thread boundaries
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

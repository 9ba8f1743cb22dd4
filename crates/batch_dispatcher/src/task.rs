//! Core task abstractions and traits

use std::fmt::{self, Debug};
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::signal::CancelSignal;
use crate::BoxFuture;

/// Core trait that all dispatched tasks implement
///
/// A task is consumed when it runs, so anything it needs must be moved into
/// it up front rather than borrowed from the submitting scope.
#[async_trait::async_trait]
pub trait Task: Send + 'static {
    /// The type of output produced by this task
    type Output: Send + 'static;

    /// The type of error this task can produce
    type Error: Debug + Send + 'static;

    /// Execute the task. `signal` is raised when the batch is cancelled.
    async fn run(self, signal: CancelSignal) -> Result<Self::Output, Self::Error>;

    /// Get a human-readable name for this task (used for logging and reporting)
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Lifecycle of one submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Queued, not yet picked up by a worker
    Pending,
    /// A worker is executing the task
    Running,
    /// The task returned a value
    Completed,
    /// The task returned an error or panicked
    Failed,
    /// Cancellation was observed before the task started
    Skipped,
}

impl TaskState {
    /// Check if the task is in a final state
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Skipped
        )
    }

    /// Move to `next` if the transition is allowed, returning whether it was.
    pub(crate) fn advance(&mut self, next: TaskState) -> bool {
        let allowed = matches!(
            (*self, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Skipped)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        );
        if allowed {
            *self = next;
        }
        allowed
    }
}

/// Output of a task that completed, tagged with its submission index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed<T> {
    pub index: usize,
    pub value: T,
}

/// A task built from a closure, see [`task_fn`]
pub struct FnTask<F> {
    name: Option<String>,
    f: F,
}

/// Wrap a closure taking the batch's [`CancelSignal`] into a [`Task`]
pub fn task_fn<F, Fut, T, E>(f: F) -> FnTask<F>
where
    F: FnOnce(CancelSignal) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    FnTask { name: None, f }
}

impl<F> FnTask<F> {
    /// Attach a name used in logs and reporter events
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl<F> Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

#[async_trait::async_trait]
impl<F, Fut, T, E> Task for FnTask<F>
where
    F: FnOnce(CancelSignal) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Debug + Send + 'static,
{
    type Output = T;
    type Error = E;

    async fn run(self, signal: CancelSignal) -> Result<T, E> {
        (self.f)(signal).await
    }

    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "fn_task".to_string())
    }
}

type BoxedFn<T, E> = Box<dyn FnOnce(CancelSignal) -> BoxFuture<Result<T, E>> + Send>;

/// A type-erased task, for batches mixing different closures
pub struct BoxedTask<T, E> {
    name: String,
    f: BoxedFn<T, E>,
}

impl<T, E> BoxedTask<T, E>
where
    T: Send + 'static,
    E: Debug + Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |signal| Box::pin(f(signal))),
        }
    }
}

impl<T, E> Debug for BoxedTask<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedTask").field("name", &self.name).finish()
    }
}

#[async_trait::async_trait]
impl<T, E> Task for BoxedTask<T, E>
where
    T: Send + 'static,
    E: Debug + Send + 'static,
{
    type Output = T;
    type Error = E;

    async fn run(self, signal: CancelSignal) -> Result<T, E> {
        (self.f)(signal).await
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

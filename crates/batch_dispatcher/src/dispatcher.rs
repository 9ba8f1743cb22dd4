//! Bounded-concurrency batch dispatcher

use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigResult, DispatchError, TaskError};
use crate::reporter::{DispatchEvent, NoOpReporter, Reporter};
use crate::signal::{CancelHandle, CancelSignal};
use crate::task::{task_fn, Completed, Task, TaskState};
use crate::types::{BatchStats, DispatcherConfig};

/// Everything a batch produced, successful or not
#[derive(Debug)]
pub struct BatchReport<T, E> {
    /// Outputs of completed tasks, ordered by submission index
    pub results: Vec<Completed<T>>,

    /// Final state of every submitted task, indexed by submission order
    pub states: Vec<TaskState>,

    /// Why the batch did not complete cleanly, if it didn't
    pub error: Option<DispatchError<E>>,

    pub stats: BatchStats,

    /// Indices of completed tasks in the order they finished
    finish_order: Vec<usize>,
}

impl<T, E> BatchReport<T, E> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            states: Vec::new(),
            error: None,
            stats: BatchStats::default(),
            finish_order: Vec::new(),
        }
    }

    /// Check if every task completed and nothing cut the batch short
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.results.len() == self.states.len()
    }

    /// Output of the task submitted at `index`, if it completed
    pub fn get(&self, index: usize) -> Option<&T> {
        self.results
            .binary_search_by_key(&index, |completed| completed.index)
            .ok()
            .map(|position| &self.results[position].value)
    }

    /// Submission indices of tasks that never started
    pub fn skipped(&self) -> Vec<usize> {
        self.indices_in(TaskState::Skipped)
    }

    /// Submission indices of tasks that failed
    pub fn failed(&self) -> Vec<usize> {
        self.indices_in(TaskState::Failed)
    }

    fn indices_in(&self, wanted: TaskState) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == wanted)
            .map(|(index, _)| index)
            .collect()
    }

    /// Convert into the outputs in submission order, or the batch error.
    pub fn into_result(self) -> Result<Vec<T>, DispatchError<E>> {
        match self.error {
            Some(err) => Err(err),
            None if self.results.len() == self.states.len() => {
                Ok(self.results.into_iter().map(|c| c.value).collect())
            }
            // Incomplete batches always carry an error
            None => Err(DispatchError::Cancelled),
        }
    }
}

/// Message sent from a worker back to the collection loop
enum WorkerMessage<T, E> {
    Started {
        index: usize,
        name: String,
    },
    Finished {
        index: usize,
        name: String,
        outcome: Result<T, TaskError<E>>,
        duration: Duration,
    },
    Skipped {
        index: usize,
        name: String,
    },
}

/// What makes a worker raise the signal on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopOn {
    /// The first failure, when fail-fast is enabled
    Failure,
    /// The first success
    Success,
}

type WorkQueue<T> = Arc<Mutex<mpsc::UnboundedReceiver<(usize, T)>>>;

/// Name reported for a task whose `name()` panicked
const UNNAMED_TASK: &str = "<unnamed>";

/// Runs one batch of independent tasks with at most `limit` in flight
///
/// A dispatcher owns the cancellation signal for exactly one batch; the
/// batch-running methods consume it.
pub struct Dispatcher {
    config: DispatcherConfig,
    limit: usize,
    signal: CancelSignal,
    reporter: Box<dyn Reporter>,
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("limit", &self.limit)
            .field("cancelled", &self.signal.is_cancelled())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher running at most `limit` tasks at once
    pub fn new(limit: usize) -> ConfigResult<Self> {
        Self::with_config(DispatcherConfig::new().with_limit(limit)?)
    }

    /// Create a dispatcher with custom configuration
    pub fn with_config(config: DispatcherConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            limit: config.limit.resolve(),
            config,
            signal: CancelSignal::new(),
            reporter: Box::new(NoOpReporter),
        })
    }

    /// Set the batch deadline
    pub fn with_deadline(mut self, deadline: Duration) -> ConfigResult<Self> {
        self.config = self.config.with_deadline(deadline)?;
        Ok(self)
    }

    /// Route progress events to `reporter`
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Get the current configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// The resolved worker count
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Raise the cancellation signal. Idempotent.
    pub fn cancel(&self) {
        self.signal.handle().cancel();
    }

    /// A handle that can cancel the batch from elsewhere while it runs
    pub fn cancel_handle(&self) -> CancelHandle {
        self.signal.handle()
    }

    /// The signal every task of this batch receives
    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    /// Run every task, returning all results and the first error, if any.
    ///
    /// Returns only after every started task has finished, even when the
    /// deadline elapses or the batch is cancelled.
    pub async fn run<T, I>(self, tasks: I) -> BatchReport<T::Output, T::Error>
    where
        T: Task,
        I: IntoIterator<Item = T>,
    {
        self.dispatch(tasks, StopOn::Failure).await
    }

    /// Apply `f` to every input concurrently, fanning the outputs back in.
    pub async fn map<In, F, Fut, O, E>(self, inputs: In, f: F) -> BatchReport<O, E>
    where
        In: IntoIterator,
        In::Item: Send + 'static,
        F: Fn(In::Item, CancelSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        O: Send + 'static,
        E: Debug + Send + 'static,
    {
        let f = Arc::new(f);
        let tasks = inputs.into_iter().map(|input| {
            let f = Arc::clone(&f);
            task_fn(move |signal| (*f)(input, signal))
        });
        self.run(tasks.collect::<Vec<_>>()).await
    }

    /// Run tasks until the first one succeeds, then cancel the rest.
    ///
    /// If every task fails, the lowest-indexed failure is returned.
    pub async fn race<T, I>(self, tasks: I) -> Result<Completed<T::Output>, DispatchError<T::Error>>
    where
        T: Task,
        I: IntoIterator<Item = T>,
    {
        let tasks: Vec<T> = tasks.into_iter().collect();
        if tasks.is_empty() {
            return Err(DispatchError::Empty);
        }

        let mut report = self.dispatch(tasks, StopOn::Success).await;
        let winner = report.finish_order.first().copied().and_then(|index| {
            report
                .results
                .iter()
                .position(|completed| completed.index == index)
        });

        match winner {
            Some(position) => Ok(report.results.swap_remove(position)),
            None => Err(report.error.unwrap_or(DispatchError::Cancelled)),
        }
    }

    async fn dispatch<T, I>(mut self, tasks: I, stop_on: StopOn) -> BatchReport<T::Output, T::Error>
    where
        T: Task,
        I: IntoIterator<Item = T>,
    {
        let start = Instant::now();

        let (work_sender, work_receiver) = mpsc::unbounded_channel();
        let mut total_tasks = 0;
        for (index, task) in tasks.into_iter().enumerate() {
            // The receiver is alive until the workers below drop it.
            let _ = work_sender.send((index, task));
            total_tasks += 1;
        }
        drop(work_sender);

        if total_tasks == 0 {
            debug!("Empty batch, nothing to dispatch");
            return BatchReport::empty();
        }

        let workers = self.limit.min(total_tasks);
        info!(total_tasks, limit = self.limit, workers, "Dispatching batch");
        self.reporter.report_event(DispatchEvent::BatchStarted {
            total_tasks,
            limit: self.limit,
        });

        let queue: WorkQueue<T> = Arc::new(Mutex::new(work_receiver));
        let (result_sender, mut result_receiver) = mpsc::unbounded_channel();
        let stop_on = match (stop_on, self.config.fail_fast) {
            (StopOn::Failure, false) => None,
            (stop_on, _) => Some(stop_on),
        };

        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            join_set.spawn(worker(
                Arc::clone(&queue),
                result_sender.clone(),
                self.signal.clone(),
                stop_on,
            ));
        }
        drop(result_sender);

        let mut states = vec![TaskState::Pending; total_tasks];
        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        let mut finish_order = Vec::new();
        let mut stats = BatchStats::new(total_tasks);
        let mut running = 0usize;
        let mut settled = 0usize;

        let deadline_at = self.config.deadline.map(|deadline| start + deadline);
        let mut deadline_fired = false;

        // The channel also closes early if a worker dies.
        while settled < total_tasks {
            tokio::select! {
                biased;
                message = result_receiver.recv() => {
                    let Some(message) = message else { break };
                    match message {
                        WorkerMessage::Started { index, name } => {
                            states[index].advance(TaskState::Running);
                            running += 1;
                            stats.peak_concurrency = stats.peak_concurrency.max(running);
                            debug!(index, task = %name, "Task started");
                            self.reporter.report_event(DispatchEvent::TaskStarted {
                                index,
                                task_name: name,
                            });
                        }
                        WorkerMessage::Finished { index, name, outcome, duration } => {
                            running = running.saturating_sub(1);
                            settled += 1;
                            match outcome {
                                Ok(value) => {
                                    states[index].advance(TaskState::Completed);
                                    stats.completed_tasks += 1;
                                    finish_order.push(index);
                                    outputs.push(Completed { index, value });
                                    debug!(index, task = %name, ?duration, "Task completed");
                                    self.reporter.report_event(DispatchEvent::TaskCompleted {
                                        index,
                                        task_name: name,
                                        duration,
                                    });
                                }
                                Err(err) => {
                                    states[index].advance(TaskState::Failed);
                                    stats.failed_tasks += 1;
                                    warn!(index, task = %name, error = ?err, "Task failed");
                                    self.reporter.report_event(DispatchEvent::TaskFailed {
                                        index,
                                        task_name: name,
                                        error: format!("{:?}", err),
                                        duration,
                                    });
                                    failures.push((index, err));
                                }
                            }
                        }
                        WorkerMessage::Skipped { index, name } => {
                            states[index].advance(TaskState::Skipped);
                            stats.skipped_tasks += 1;
                            settled += 1;
                            debug!(index, task = %name, "Task skipped");
                            self.reporter.report_event(DispatchEvent::TaskSkipped {
                                index,
                                task_name: name,
                            });
                        }
                    }
                }
                _ = wait_until(deadline_at), if !deadline_fired && settled < total_tasks => {
                    deadline_fired = true;
                    warn!(deadline = ?self.config.deadline, running, "Batch deadline exceeded, cancelling");
                    self.signal.handle().cancel();
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Worker exited abnormally");
            }
        }

        let abandoned = fail_unfinished(&mut states, &mut failures);
        if abandoned > 0 {
            error!(abandoned, "Tasks lost with their worker, marking them failed");
            stats.failed_tasks += abandoned;
        }

        outputs.sort_by_key(|completed| completed.index);
        stats.total_duration = start.elapsed();

        let error = failures
            .into_iter()
            .min_by_key(|(index, _)| *index)
            .map(|(index, error)| DispatchError::Task { index, error })
            .or_else(|| {
                deadline_fired.then(|| DispatchError::DeadlineExceeded {
                    // Only set when a deadline was configured
                    deadline: self.config.deadline.unwrap_or_default(),
                })
            })
            // A cancel that arrives after every task has started cuts nothing short.
            .or_else(|| (stats.skipped_tasks > 0).then_some(DispatchError::Cancelled));

        match &error {
            None => info!(
                completed = stats.completed_tasks,
                duration = ?stats.total_duration,
                "Batch completed"
            ),
            Some(err) => error!(
                completed = stats.completed_tasks,
                failed = stats.failed_tasks,
                skipped = stats.skipped_tasks,
                error = %err_kind(err),
                "Batch did not complete"
            ),
        }

        self.reporter.report_event(DispatchEvent::BatchFinished {
            stats: stats.clone(),
        });
        self.reporter.finish();

        BatchReport {
            results: outputs,
            states,
            error,
            stats,
            finish_order,
        }
    }
}

/// Pull tasks off the shared queue until it is empty.
async fn worker<T: Task>(
    queue: WorkQueue<T>,
    results: mpsc::UnboundedSender<WorkerMessage<T::Output, T::Error>>,
    signal: CancelSignal,
    stop_on: Option<StopOn>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some((index, task)) = next else { break };
        let named = std::panic::catch_unwind(AssertUnwindSafe(|| task.name()));
        let name = match &named {
            Ok(name) => name.clone(),
            Err(_) => UNNAMED_TASK.to_string(),
        };

        // Drain the rest of the queue as skipped once cancelled.
        if signal.is_cancelled() {
            let _ = results.send(WorkerMessage::Skipped { index, name });
            continue;
        }

        let _ = results.send(WorkerMessage::Started {
            index,
            name: name.clone(),
        });

        let started = Instant::now();
        let outcome = match named {
            // A task that cannot even name itself is never run.
            Err(payload) => Err(TaskError::from_panic(payload)),
            Ok(_) => match AssertUnwindSafe(task.run(signal.clone())).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(TaskError::Failed(err)),
                Err(payload) => Err(TaskError::from_panic(payload)),
            },
        };
        let duration = started.elapsed();

        // Raise before pulling the next task so no new work starts behind us.
        let raise = match (stop_on, &outcome) {
            (Some(StopOn::Failure), Err(_)) => true,
            (Some(StopOn::Success), Ok(_)) => true,
            _ => false,
        };
        if raise {
            signal.handle().cancel();
        }

        let _ = results.send(WorkerMessage::Finished {
            index,
            name,
            outcome,
            duration,
        });
    }
}

/// Fail every task that never reached a terminal state, returning how many.
///
/// Only happens when a worker dies outside the task's own unwind guard.
fn fail_unfinished<E>(
    states: &mut [TaskState],
    failures: &mut Vec<(usize, TaskError<E>)>,
) -> usize {
    let mut abandoned = 0;
    for (index, state) in states.iter_mut().enumerate() {
        if !state.is_finished() {
            *state = TaskState::Failed;
            failures.push((
                index,
                TaskError::Panicked {
                    message: "worker exited before the task finished".to_string(),
                },
            ));
            abandoned += 1;
        }
    }
    abandoned
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn err_kind<E>(err: &DispatchError<E>) -> &'static str {
    match err {
        DispatchError::Task { .. } => "task failed",
        DispatchError::DeadlineExceeded { .. } => "deadline exceeded",
        DispatchError::Cancelled => "cancelled",
        DispatchError::Empty => "empty",
        DispatchError::Config(_) => "config",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CancelSignal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct SleepTask {
        id: usize,
        duration_ms: u64,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl Task for SleepTask {
        type Output = usize;
        type Error = String;

        async fn run(self, _signal: CancelSignal) -> Result<usize, String> {
            tokio::time::sleep(Duration::from_millis(self.duration_ms)).await;
            if self.should_fail {
                Err(format!("Task {} failed", self.id))
            } else {
                Ok(self.id)
            }
        }

        fn name(&self) -> String {
            format!("SleepTask({})", self.id)
        }
    }

    fn sleepers(count: usize, duration_ms: u64) -> Vec<SleepTask> {
        (0..count)
            .map(|id| SleepTask {
                id,
                duration_ms,
                should_fail: false,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_waves_of_limited_workers() {
        let dispatcher = Dispatcher::new(2).unwrap();

        let start = Instant::now();
        let report = dispatcher.run(sleepers(5, 10)).await;
        let elapsed = start.elapsed();

        assert!(report.is_success());
        assert_eq!(report.stats.peak_concurrency, 2);
        // Three waves of at most two tasks
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(40));
        for index in 0..5 {
            assert_eq!(report.get(index), Some(&index));
        }
        assert_eq!(report.into_result().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = Dispatcher::new(3).unwrap().run(Vec::<SleepTask>::new()).await;
        assert!(report.is_success());
        assert!(report.results.is_empty());
        assert!(report.states.is_empty());
        assert_eq!(report.into_result().unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(Dispatcher::new(0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_skips_unstarted() {
        let mut tasks = sleepers(5, 10);
        tasks[2].duration_ms = 0;
        tasks[2].should_fail = true;

        let report = Dispatcher::new(3).unwrap().run(tasks).await;

        let err = report.error.as_ref().unwrap();
        assert_eq!(err.task_index(), Some(2));
        assert_eq!(err.task_error().map(String::as_str), Some("Task 2 failed"));
        assert_eq!(report.get(0), Some(&0));
        assert_eq!(report.get(1), Some(&1));
        assert_eq!(report.skipped(), vec![3, 4]);
        assert_eq!(report.failed(), vec![2]);
        assert_eq!(
            report.states,
            vec![
                TaskState::Completed,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Skipped,
                TaskState::Skipped,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowest_index_error_wins() {
        let mut tasks = sleepers(3, 0);
        // Index 1 fails late, index 2 fails first
        tasks[1].duration_ms = 20;
        tasks[1].should_fail = true;
        tasks[2].should_fail = true;

        let report = Dispatcher::new(3).unwrap().run(tasks).await;
        assert_eq!(report.error.unwrap().task_index(), Some(1));
        assert_eq!(report.stats.failed_tasks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_fail_fast_everything_runs() {
        let mut tasks = sleepers(4, 5);
        tasks[0].should_fail = true;

        let config = DispatcherConfig::new()
            .with_limit(1)
            .unwrap()
            .with_fail_fast(false);
        let report = Dispatcher::with_config(config).unwrap().run(tasks).await;

        assert_eq!(report.error.as_ref().and_then(|e| e.task_index()), Some(0));
        assert_eq!(report.results.len(), 3);
        assert!(report.skipped().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_results() {
        let tasks = vec![
            SleepTask { id: 0, duration_ms: 10, should_fail: false },
            SleepTask { id: 1, duration_ms: 100, should_fail: false },
            SleepTask { id: 2, duration_ms: 10, should_fail: false },
        ];

        let dispatcher = Dispatcher::new(2)
            .unwrap()
            .with_deadline(Duration::from_millis(50))
            .unwrap();

        let start = Instant::now();
        let report = dispatcher.run(tasks).await;
        let elapsed = start.elapsed();

        assert!(report.error.as_ref().unwrap().is_timeout());
        // Task 1 was in flight at the deadline and ran to completion
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(110));
        assert_eq!(report.get(0), Some(&0));
        assert_eq!(report.get(1), Some(&1));
        assert_eq!(report.get(2), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_skips_queued_tasks() {
        let dispatcher = Dispatcher::new(1)
            .unwrap()
            .with_deadline(Duration::from_millis(15))
            .unwrap();

        let report = dispatcher.run(sleepers(4, 10)).await;

        assert!(report.error.as_ref().unwrap().is_timeout());
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped(), vec![2, 3]);
        assert!(report.stats.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let handle = dispatcher.cancel_handle();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            handle.cancel();
            handle.cancel();
        });

        let report = dispatcher.run(sleepers(4, 10)).await;
        canceller.await.unwrap();

        assert!(report.error.as_ref().unwrap().is_cancelled());
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_cancel_before_run_skips_everything() {
        let dispatcher = Dispatcher::new(2).unwrap();
        dispatcher.cancel();
        dispatcher.cancel();

        let report = dispatcher.run(sleepers(3, 1)).await;
        assert!(report.results.is_empty());
        assert_eq!(report.skipped(), vec![0, 1, 2]);
        assert!(matches!(report.error, Some(DispatchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_panic_becomes_task_error() {
        let tasks = vec![
            BoxedTaskFixture::ok(0),
            BoxedTaskFixture::panicking(),
            BoxedTaskFixture::ok(2),
        ];

        let config = DispatcherConfig::new()
            .with_limit(1)
            .unwrap()
            .with_fail_fast(false);
        let report = Dispatcher::with_config(config).unwrap().run(tasks).await;

        match report.error {
            Some(DispatchError::Task { index: 1, error }) => {
                assert!(error.is_panic());
                assert!(error.to_string().contains("kaboom"));
            }
            other => panic!("Expected panic error, got {:?}", other),
        }
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn test_panic_under_fail_fast_skips_queued() {
        let tasks = vec![
            BoxedTaskFixture::ok(0),
            BoxedTaskFixture::panicking(),
            BoxedTaskFixture::ok(2),
            BoxedTaskFixture::ok(3),
        ];

        let report = Dispatcher::new(1).unwrap().run(tasks).await;

        let err = report.error.as_ref().unwrap();
        assert_eq!(err.task_index(), Some(1));
        assert!(matches!(err, DispatchError::Task { error, .. } if error.is_panic()));
        assert_eq!(report.get(0), Some(&0));
        assert_eq!(report.skipped(), vec![2, 3]);
        assert_eq!(report.failed(), vec![1]);
    }

    /// Panics while naming itself when `bad_name` is set
    #[derive(Debug)]
    struct Nameless {
        id: usize,
        bad_name: bool,
    }

    #[async_trait::async_trait]
    impl Task for Nameless {
        type Output = usize;
        type Error = String;

        async fn run(self, _signal: CancelSignal) -> Result<usize, String> {
            Ok(self.id)
        }

        fn name(&self) -> String {
            if self.bad_name {
                panic!("no name for {}", self.id);
            }
            format!("Nameless({})", self.id)
        }
    }

    fn nameless_batch() -> Vec<Nameless> {
        vec![
            Nameless { id: 0, bad_name: true },
            Nameless { id: 1, bad_name: false },
            Nameless { id: 2, bad_name: false },
        ]
    }

    #[tokio::test]
    async fn test_panicking_name_is_a_task_error() {
        let report = Dispatcher::new(1).unwrap().run(nameless_batch()).await;

        match &report.error {
            Some(DispatchError::Task { index: 0, error }) => {
                assert!(error.is_panic());
                assert!(error.to_string().contains("no name for 0"));
            }
            other => panic!("Expected panic error, got {:?}", other),
        }
        assert_eq!(
            report.states,
            vec![TaskState::Failed, TaskState::Skipped, TaskState::Skipped]
        );
        assert!(report.states.iter().all(TaskState::is_finished));
        assert_eq!(report.into_result().unwrap_err().task_index(), Some(0));
    }

    #[tokio::test]
    async fn test_panicking_name_keeps_the_worker_alive() {
        let config = DispatcherConfig::new()
            .with_limit(1)
            .unwrap()
            .with_fail_fast(false);
        let report = Dispatcher::with_config(config)
            .unwrap()
            .run(nameless_batch())
            .await;

        assert_eq!(report.error.as_ref().and_then(|e| e.task_index()), Some(0));
        assert_eq!(report.get(1), Some(&1));
        assert_eq!(report.get(2), Some(&2));
        assert_eq!(report.stats.failed_tasks, 1);
        assert_eq!(report.stats.completed_tasks, 2);
    }

    #[test]
    fn test_unfinished_tasks_are_failed() {
        let mut states = vec![
            TaskState::Completed,
            TaskState::Running,
            TaskState::Skipped,
            TaskState::Pending,
        ];
        let mut failures: Vec<(usize, TaskError<String>)> = Vec::new();

        assert_eq!(fail_unfinished(&mut states, &mut failures), 2);
        assert!(states.iter().all(TaskState::is_finished));
        assert_eq!(states[1], TaskState::Failed);
        assert_eq!(states[3], TaskState::Failed);
        let indices: Vec<usize> = failures.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(failures.iter().all(|(_, err)| err.is_panic()));

        // Nothing left to fail on a second pass
        assert_eq!(fail_unfinished(&mut states, &mut failures), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_last_task_is_not_reported() {
        // Two waves end at 20ms, well inside the deadline
        let dispatcher = Dispatcher::new(2)
            .unwrap()
            .with_deadline(Duration::from_millis(21))
            .unwrap();

        let start = Instant::now();
        let report = dispatcher.run(sleepers(4, 10)).await;

        assert!(report.is_success(), "unexpected error: {:?}", report.error);
        assert!(start.elapsed() < Duration::from_millis(21));
    }

    struct BoxedTaskFixture;

    impl BoxedTaskFixture {
        fn ok(value: usize) -> crate::task::BoxedTask<usize, String> {
            crate::task::BoxedTask::new("ok", move |_| async move { Ok(value) })
        }

        fn panicking() -> crate::task::BoxedTask<usize, String> {
            crate::task::BoxedTask::new("panics", |_| async { Ok(explode()) })
        }
    }

    fn explode() -> usize {
        panic!("kaboom")
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_limit() {
        for limit in 1..=4 {
            let running = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let tasks: Vec<_> = (0..9)
                .map(|i| {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    task_fn(move |_signal| async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(3 + (i % 3) as u64)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(i)
                    })
                })
                .collect();

            let report = Dispatcher::new(limit).unwrap().run(tasks).await;
            assert!(report.is_success());
            assert_eq!(report.results.len(), 9);
            assert!(peak.load(Ordering::SeqCst) <= limit);
            assert!(report.stats.peak_concurrency <= limit);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_fans_in() {
        let report = Dispatcher::new(3)
            .unwrap()
            .map(vec![3u64, 1, 2], |n, _signal| async move {
                tokio::time::sleep(Duration::from_millis(n)).await;
                Ok::<_, String>(n * n)
            })
            .await;

        assert_eq!(report.into_result().unwrap(), vec![9, 1, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_first_success_cancels_rest() {
        let tasks = vec![
            SleepTask { id: 0, duration_ms: 50, should_fail: false },
            SleepTask { id: 1, duration_ms: 5, should_fail: true },
            SleepTask { id: 2, duration_ms: 10, should_fail: false },
            SleepTask { id: 3, duration_ms: 1, should_fail: false },
        ];

        // Task 3 is picked up when task 1 fails at 5ms and finishes at 6ms,
        // ahead of task 2.
        let winner = Dispatcher::new(3).unwrap().race(tasks).await.unwrap();
        assert_eq!(winner, Completed { index: 3, value: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_all_fail() {
        let tasks = vec![
            SleepTask { id: 0, duration_ms: 20, should_fail: true },
            SleepTask { id: 1, duration_ms: 5, should_fail: true },
        ];

        let err = Dispatcher::new(2).unwrap().race(tasks).await.unwrap_err();
        assert_eq!(err.task_index(), Some(0));
    }

    #[tokio::test]
    async fn test_race_empty() {
        let err = Dispatcher::new(1)
            .unwrap()
            .race(Vec::<SleepTask>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Empty));
    }
}

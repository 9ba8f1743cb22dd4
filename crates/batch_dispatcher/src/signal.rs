//! Cancellation signal shared between a dispatcher and the tasks it runs

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Read side of a batch's cancellation flag, handed to every task.
///
/// The flag is monotonic: once raised it stays raised. Long-running tasks
/// should poll [`CancelSignal::is_cancelled`] or await
/// [`CancelSignal::cancelled`] if they want to exit early; nothing preempts
/// them.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    /// Create a fresh, unraised signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until cancellation is requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drive `fut` to completion unless the signal is raised first.
    ///
    /// Returns `None` when cancellation won. A signal that is already raised
    /// never polls `fut`.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// Create the write side for this signal
    pub(crate) fn handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }
}

/// Write side of a batch's cancellation flag.
///
/// Raising is idempotent and safe after the batch has finished.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Raise the signal
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A read-only view of the same flag
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            token: self.token.clone(),
        }
    }
}

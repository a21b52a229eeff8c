use std::future::Future;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::scheduler::WorkQueue;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}

/// Ties every long-running task to one cancellation signal and one
/// termination barrier.
///
/// Tasks started through [`spawn`](Self::spawn) are tracked until they exit.
/// [`shutdown`](Self::shutdown) fires the signal, waits for every tracked task
/// and only then closes the work queue, so nothing can touch the queue after
/// it is closed.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The signal every tracked task must watch.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Number of tracked tasks that have not exited yet.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, wait for every tracked task, then close `queue`.
    ///
    /// Returns the number of sites still queued and therefore abandoned.
    /// Calling it again is harmless; the signal only fires once.
    pub async fn shutdown(&self, queue: &WorkQueue) -> usize {
        tracing::info!(
            active_tasks = self.active_tasks(),
            "Gracefully shutting down"
        );
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Scheduler and all workers terminated");

        let abandoned = queue.close().await;
        tracing::info!(abandoned, "Work queue closed");
        abandoned
    }
}

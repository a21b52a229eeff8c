use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::error::ConfigError;
use crate::scheduler::{Scheduler, SchedulerPhase, WorkQueue};
use crate::shutdown::ShutdownCoordinator;
use crate::sites::{SiteDirectory, TaskInvoker};
use crate::worker::{WorkerId, WorkerPool};

/// Wires the scheduler, the worker pool and the shutdown coordinator
/// around one work queue.
pub struct Runner {
    config: RunnerConfig,
    directory: Arc<dyn SiteDirectory>,
    invoker: Arc<dyn TaskInvoker>,
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sites still queued when the queue was closed. They were never dispatched.
    pub abandoned: usize,
}

impl Runner {
    /// Validates `config`; nothing is started yet.
    pub fn new(
        config: RunnerConfig,
        directory: Arc<dyn SiteDirectory>,
        invoker: Arc<dyn TaskInvoker>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            directory,
            invoker,
        })
    }

    /// Spawn the scheduler and every worker, then return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> RunnerHandle {
        let queue = WorkQueue::new(self.config.queue_capacity);
        let coordinator = ShutdownCoordinator::new();

        let scheduler = Scheduler::new(self.directory, queue.clone(), &self.config);
        let phase = scheduler.subscribe_phase();
        coordinator.spawn(scheduler.run(coordinator.token().clone()));

        let pool = WorkerPool::spawn(
            self.config.workers,
            &queue,
            self.invoker,
            self.config.dispatch_timeout,
            coordinator.tracker(),
            coordinator.token(),
        );

        tracing::info!(
            workers = pool.len(),
            queue_capacity = queue.capacity(),
            refresh_interval = ?self.config.refresh_interval,
            requeue_interval = ?self.config.requeue_interval,
            "Cron runner started"
        );

        RunnerHandle {
            queue,
            coordinator,
            pool,
            phase,
        }
    }

    /// Start, wait for `stop`, then shut down in order.
    pub async fn run(self, stop: CancellationToken) -> ShutdownReport {
        let handle = self.start();
        stop.cancelled().await;
        handle.shutdown().await
    }
}

/// A running engine.
///
/// Dropping the handle does not stop anything; call
/// [`shutdown`](Self::shutdown).
pub struct RunnerHandle {
    queue: WorkQueue,
    coordinator: ShutdownCoordinator,
    pool: WorkerPool,
    phase: watch::Receiver<SchedulerPhase>,
}

impl RunnerHandle {
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn workers(&self) -> &[WorkerId] {
        self.pool.ids()
    }

    pub fn scheduler_phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// Wait until the scheduler reaches `phase` or a later one.
    ///
    /// Returns `false` if the scheduler task ended without ever reaching it.
    pub async fn wait_for_phase(&mut self, phase: SchedulerPhase) -> bool {
        let reached = self.phase.wait_for(|current| *current >= phase).await.is_ok();
        if reached {
            true
        } else {
            *self.phase.borrow() >= phase
        }
    }

    /// Scheduler plus workers that have not exited yet.
    pub fn active_tasks(&self) -> usize {
        self.coordinator.active_tasks()
    }

    /// Cancel, wait for the scheduler and every worker, then close the queue.
    pub async fn shutdown(self) -> ShutdownReport {
        let abandoned = self.coordinator.shutdown(&self.queue).await;
        tracing::info!(abandoned, "Cron runner stopped");
        ShutdownReport { abandoned }
    }
}

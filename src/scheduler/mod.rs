//! Keeps the work queue topped up with shuffled passes over every known site.
//!
//! The scheduler owns the canonical site list. Two timers drive it:
//!
//! - **refresh** (slow): re-fetch the list from the [`SiteDirectory`], shuffle
//!   it and replace the previous list. A failed fetch keeps the old list.
//! - **requeue** (fast): if the queue is empty, push the whole list onto it.
//!   A non-empty queue means the previous pass is still being worked on and
//!   the tick does nothing.
//!
//! On start it refreshes once and, if that worked, requeues once, so workers
//! get their first batch without waiting for a tick.

pub mod queue;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{DirectoryError, QueueError};
use crate::sites::{SiteDirectory, SiteId};

pub use queue::WorkQueue;

/// Scheduler lifecycle. Phases only move forward, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulerPhase {
    /// Startup refresh and requeue
    Initializing,
    /// Servicing refresh and requeue ticks
    Running,
    /// Cancellation observed, no new ticks are serviced
    Draining,
    /// Timers stopped, task exited
    Terminated,
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerPhase::Initializing => write!(f, "initializing"),
            SchedulerPhase::Running => write!(f, "running"),
            SchedulerPhase::Draining => write!(f, "draining"),
            SchedulerPhase::Terminated => write!(f, "terminated"),
        }
    }
}

/// What a single requeue tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// The whole site list was pushed.
    Queued { count: usize },
    /// The queue filled up; the tail of the list was dropped for this cycle.
    Truncated { queued: usize, dropped: usize },
    /// The previous batch is still pending; nothing was pushed.
    Skipped { pending: usize },
    /// The queue was closed underneath the scheduler.
    Closed { queued: usize },
}

pub struct Scheduler {
    directory: Arc<dyn SiteDirectory>,
    queue: WorkQueue,
    sites: Vec<SiteId>,
    rng: StdRng,
    refresh_interval: Duration,
    requeue_interval: Duration,
    phase: watch::Sender<SchedulerPhase>,
}

impl Scheduler {
    pub fn new(directory: Arc<dyn SiteDirectory>, queue: WorkQueue, config: &RunnerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (phase, _) = watch::channel(SchedulerPhase::Initializing);

        Self {
            directory,
            queue,
            sites: Vec::new(),
            rng,
            refresh_interval: config.refresh_interval,
            requeue_interval: config.requeue_interval,
            phase,
        }
    }

    /// Follow phase changes from outside the scheduler task.
    pub fn subscribe_phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.subscribe()
    }

    /// The site list the next requeue will push.
    pub fn sites(&self) -> &[SiteId] {
        &self.sites
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// A refresh or requeue already in progress when cancellation fires is
    /// finished first; no tick is serviced after that.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Started scheduler");

        if self.refresh().await.is_ok() {
            self.requeue();
        }

        let now = Instant::now();
        let mut requeue_timer = interval_at(now + self.requeue_interval, self.requeue_interval);
        requeue_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh_timer = interval_at(now + self.refresh_interval, self.refresh_interval);
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.set_phase(SchedulerPhase::Running);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.set_phase(SchedulerPhase::Draining);
                    break;
                }

                _ = requeue_timer.tick() => {
                    self.requeue();
                }

                _ = refresh_timer.tick() => {
                    // Failures are logged inside; the stale list stays in use.
                    let _ = self.refresh().await;
                }
            }
        }

        drop(requeue_timer);
        drop(refresh_timer);
        self.set_phase(SchedulerPhase::Terminated);
        info!("Terminated scheduler");
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        debug!(%phase, "Scheduler phase changed");
        self.phase.send_replace(phase);
    }

    /// Fetch, shuffle and swap in a new site list.
    async fn refresh(&mut self) -> Result<usize, DirectoryError> {
        match self.directory.list_sites().await {
            Ok(mut sites) => {
                sites.shuffle(&mut self.rng);
                let count = sites.len();
                self.sites = sites;
                info!(count, "[  OK  ] Refreshing sites list");
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "[FAILED] Refreshing sites list");
                Err(e)
            }
        }
    }

    /// Push the current site list if, and only if, the queue is empty.
    fn requeue(&mut self) -> RequeueOutcome {
        let pending = self.queue.len();
        if pending > 0 {
            debug!(pending, "Previous batch still queued, skipping requeue");
            return RequeueOutcome::Skipped { pending };
        }

        let total = self.sites.len();
        for (queued, site) in self.sites.iter().enumerate() {
            match self.queue.try_push(site.clone()) {
                Ok(()) => {}
                Err(QueueError::Full) => {
                    let dropped = total - queued;
                    warn!(
                        queued,
                        dropped,
                        capacity = self.queue.capacity(),
                        "Work queue full, dropping the rest of this batch; raise the queue size"
                    );
                    return RequeueOutcome::Truncated { queued, dropped };
                }
                Err(QueueError::Closed) => {
                    warn!(queued, "Work queue closed while requeueing");
                    return RequeueOutcome::Closed { queued };
                }
            }
        }

        info!(count = total, "[  OK  ] Adding new jobs to the site queue");
        RequeueOutcome::Queued { count: total }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::scheduler::WorkQueue;
use crate::sites::TaskInvoker;
use crate::worker::dispatch::{Worker, WorkerId};

/// A fixed set of workers sharing one work queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    ids: Vec<WorkerId>,
}

impl WorkerPool {
    /// Spawn `size` workers on `tracker`, numbered from 1.
    ///
    /// Each worker is registered with the tracker before it starts, so
    /// waiting on the tracker waits for every worker to exit.
    pub fn spawn(
        size: usize,
        queue: &WorkQueue,
        invoker: Arc<dyn TaskInvoker>,
        dispatch_timeout: Option<Duration>,
        tracker: &TaskTracker,
        shutdown: &CancellationToken,
    ) -> Self {
        let ids: Vec<WorkerId> = (1..=size).map(WorkerId).collect();

        for &id in &ids {
            let worker = Worker::new(id, queue.clone(), invoker.clone())
                .with_dispatch_timeout(dispatch_timeout);
            tracker.spawn(worker.run(shutdown.clone()));
        }

        tracing::debug!(workers = size, "Worker pool spawned");
        Self { ids }
    }

    pub fn ids(&self) -> &[WorkerId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::scheduler::WorkQueue;
use crate::sites::{SiteId, TaskInvoker};

pub(crate) const ENQUEUE_TASK: &str = "enqueue task";
pub(crate) const RUN_DUE_TASKS: &str = "run due tasks";

/// Position of a worker in the pool, starting at 1. Only used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of both dispatch actions for one site.
#[derive(Debug)]
pub struct DispatchReport {
    pub site: SiteId,
    pub enqueue: Result<(), DispatchError>,
    pub run_due: Result<(), DispatchError>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.enqueue.is_ok() && self.run_due.is_ok()
    }
}

/// Pulls sites off the work queue one at a time and dispatches them.
pub struct Worker {
    id: WorkerId,
    queue: WorkQueue,
    invoker: Arc<dyn TaskInvoker>,
    dispatch_timeout: Option<Duration>,
}

impl Worker {
    pub fn new(id: WorkerId, queue: WorkQueue, invoker: Arc<dyn TaskInvoker>) -> Self {
        Self {
            id,
            queue,
            invoker,
            dispatch_timeout: None,
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Drain the queue until `shutdown` is cancelled.
    ///
    /// Cancellation wins over a site that is ready at the same moment. A site
    /// already taken off the queue is always dispatched to completion.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "Started worker");

        loop {
            let site = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                site = self.queue.pop() => match site {
                    Some(site) => site,
                    None => {
                        warn!(worker_id = %self.id, "Work queue closed before shutdown");
                        break;
                    }
                },
            };

            self.dispatch(&site).await;
        }

        info!(worker_id = %self.id, "Terminated worker");
    }

    /// Run both dispatch actions against `site`.
    ///
    /// The second action is attempted whatever the first one returned.
    /// Nothing is retried.
    pub async fn dispatch(&self, site: &SiteId) -> DispatchReport {
        let enqueue = self
            .call(ENQUEUE_TASK, self.invoker.enqueue_task(site))
            .await;
        self.log_outcome(ENQUEUE_TASK, site, &enqueue);

        let run_due = self
            .call(RUN_DUE_TASKS, self.invoker.run_due_tasks(site))
            .await;
        self.log_outcome(RUN_DUE_TASKS, site, &run_due);

        DispatchReport {
            site: site.clone(),
            enqueue,
            run_due,
        }
    }

    async fn call<F>(&self, action: &'static str, call: F) -> Result<(), DispatchError>
    where
        F: Future<Output = Result<(), DispatchError>>,
    {
        match self.dispatch_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(DispatchError::TimedOut {
                    action,
                    after: limit,
                })),
            None => call.await,
        }
    }

    fn log_outcome(&self, action: &str, site: &SiteId, outcome: &Result<(), DispatchError>) {
        match outcome {
            Ok(()) => info!(worker_id = %self.id, %site, action, "[  OK  ] Dispatch"),
            Err(e) => warn!(worker_id = %self.id, %site, action, error = %e, "[FAILED] Dispatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeInvoker {
        fail_enqueue: bool,
        fail_run_due: bool,
        hang_enqueue: bool,
        calls: Mutex<Vec<(&'static str, SiteId)>>,
    }

    impl FakeInvoker {
        fn calls(&self) -> Vec<(&'static str, SiteId)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskInvoker for FakeInvoker {
        async fn enqueue_task(&self, site: &SiteId) -> Result<(), DispatchError> {
            self.calls.lock().unwrap().push((ENQUEUE_TASK, site.clone()));
            if self.hang_enqueue {
                std::future::pending::<()>().await;
            }
            if self.fail_enqueue {
                return Err(DispatchError::Command {
                    action: ENQUEUE_TASK,
                    details: "no such event".to_string(),
                });
            }
            Ok(())
        }

        async fn run_due_tasks(&self, site: &SiteId) -> Result<(), DispatchError> {
            self.calls.lock().unwrap().push((RUN_DUE_TASKS, site.clone()));
            if self.fail_run_due {
                return Err(DispatchError::Command {
                    action: RUN_DUE_TASKS,
                    details: "fatal error".to_string(),
                });
            }
            Ok(())
        }
    }

    fn worker(invoker: Arc<FakeInvoker>) -> (Worker, WorkQueue) {
        let queue = WorkQueue::new(10);
        (Worker::new(WorkerId(1), queue.clone(), invoker), queue)
    }

    #[tokio::test]
    async fn dispatch_runs_both_actions_in_order() {
        let invoker = Arc::new(FakeInvoker::default());
        let (w, _queue) = worker(invoker.clone());
        let site = SiteId::from("https://a.example/");

        let report = w.dispatch(&site).await;

        assert!(report.is_success());
        assert_eq!(report.site, site);
        assert_eq!(
            invoker.calls(),
            vec![(ENQUEUE_TASK, site.clone()), (RUN_DUE_TASKS, site)]
        );
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_skip_run_due() {
        let invoker = Arc::new(FakeInvoker {
            fail_enqueue: true,
            ..Default::default()
        });
        let (w, _queue) = worker(invoker.clone());

        let report = w.dispatch(&SiteId::from("a")).await;

        assert!(report.enqueue.is_err());
        assert!(report.run_due.is_ok());
        assert!(!report.is_success());
        assert_eq!(invoker.calls().len(), 2);
    }

    #[tokio::test]
    async fn run_due_failure_is_reported_separately() {
        let invoker = Arc::new(FakeInvoker {
            fail_run_due: true,
            ..Default::default()
        });
        let (w, _queue) = worker(invoker);

        let report = w.dispatch(&SiteId::from("a")).await;

        assert!(report.enqueue.is_ok());
        assert!(matches!(
            report.run_due,
            Err(DispatchError::Command {
                action: RUN_DUE_TASKS,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn hung_call_times_out_when_limit_is_set() {
        let invoker = Arc::new(FakeInvoker {
            hang_enqueue: true,
            ..Default::default()
        });
        let (w, _queue) = worker(invoker.clone());
        let w = w.with_dispatch_timeout(Some(Duration::from_millis(20)));

        let report = w.dispatch(&SiteId::from("a")).await;

        assert!(matches!(
            report.enqueue,
            Err(DispatchError::TimedOut {
                action: ENQUEUE_TASK,
                ..
            })
        ));
        assert!(report.run_due.is_ok());
        assert_eq!(invoker.calls().len(), 2);
    }

    #[tokio::test]
    async fn idle_worker_exits_on_cancel() {
        let (w, _queue) = worker(Arc::new(FakeInvoker::default()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(w.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("idle worker should stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_worker_leaves_ready_site_alone() {
        let invoker = Arc::new(FakeInvoker::default());
        let (w, queue) = worker(invoker.clone());
        queue.try_push(SiteId::from("a")).unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        w.run(shutdown).await;

        assert!(invoker.calls().is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn worker_drains_queue_until_cancelled() {
        let invoker = Arc::new(FakeInvoker::default());
        let (w, queue) = worker(invoker.clone());
        for id in ["a", "b", "c"] {
            queue.try_push(SiteId::from(id)).unwrap();
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(w.run(shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(1), async {
            while invoker.calls().len() < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all three sites should be dispatched");

        shutdown.cancel();
        handle.await.unwrap();
        assert!(queue.is_empty());
    }
}

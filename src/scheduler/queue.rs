use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::QueueError;
use crate::sites::SiteId;

/// Bounded FIFO of sites waiting for a worker.
///
/// The scheduler is the only producer; every worker pulls from the same
/// receiver, so each queued site is handed to exactly one worker. Cloning
/// yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<SiteId>,
    receiver: Arc<Mutex<mpsc::Receiver<SiteId>>>,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` sites.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`RunnerConfig::validate`](crate::config::RunnerConfig::validate)
    /// rejects that before a queue is ever built.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of sites queued and not yet taken by a worker.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Push a site, waiting for room if the queue is full.
    pub async fn push(&self, site: SiteId) -> Result<(), QueueError> {
        self.sender.send(site).await.map_err(|_| QueueError::Closed)
    }

    /// Push a site without waiting.
    pub fn try_push(&self, site: SiteId) -> Result<(), QueueError> {
        self.sender.try_send(site).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Wait for the next site. Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<SiteId> {
        let mut receiver = self.receiver.lock().await;
        let site = receiver.recv().await;
        tracing::trace!(has_item = site.is_some(), "Pulled site from work queue");
        site
    }

    /// Close the queue and discard whatever is still buffered.
    ///
    /// Returns the number of abandoned sites. Only call this once no producer
    /// or consumer is running any more.
    pub async fn close(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        receiver.close();

        let mut abandoned = 0;
        while receiver.try_recv().is_ok() {
            abandoned += 1;
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn site(id: &str) -> SiteId {
        SiteId::from(id)
    }

    #[tokio::test]
    async fn push_pop_is_fifo() {
        let queue = WorkQueue::new(10);
        queue.push(site("a")).await.unwrap();
        queue.push(site("b")).await.unwrap();
        queue.push(site("c")).await.unwrap();

        assert_eq!(queue.pop().await, Some(site("a")));
        assert_eq!(queue.pop().await, Some(site("b")));
        assert_eq!(queue.pop().await, Some(site("c")));
    }

    #[tokio::test]
    async fn len_tracks_pending_sites() {
        let queue = WorkQueue::new(4);
        assert_eq!(queue.capacity(), 4);
        assert!(queue.is_empty());

        queue.try_push(site("a")).unwrap();
        queue.try_push(site("b")).unwrap();
        assert_eq!(queue.len(), 2);

        queue.pop().await;
        assert_eq!(queue.len(), 1);

        queue.pop().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn try_push_reports_full() {
        let queue = WorkQueue::new(1);
        queue.try_push(site("a")).unwrap();

        assert_eq!(queue.try_push(site("b")), Err(QueueError::Full));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn push_waits_for_room() {
        let queue = WorkQueue::new(1);
        queue.push(site("a")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), queue.push(site("b"))).await;
        assert!(blocked.is_err(), "push into a full queue should wait");

        let producer = queue.clone();
        let handle = tokio::spawn(async move { producer.push(site("b")).await });
        assert_eq!(queue.pop().await, Some(site("a")));

        handle.await.unwrap().unwrap();
        assert_eq!(queue.pop().await, Some(site("b")));
    }

    #[tokio::test]
    async fn close_discards_pending_and_rejects_pushes() {
        let queue = WorkQueue::new(10);
        queue.try_push(site("a")).unwrap();
        queue.try_push(site("b")).unwrap();

        assert_eq!(queue.close().await, 2);
        assert!(queue.is_closed());
        assert_eq!(queue.try_push(site("c")), Err(QueueError::Closed));
        assert_eq!(queue.push(site("c")).await, Err(QueueError::Closed));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn each_site_reaches_exactly_one_consumer() {
        let queue = WorkQueue::new(100);
        for i in 0..100 {
            queue.try_push(site(&format!("site-{i}"))).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let consumer = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Ok(Some(s)) =
                    tokio::time::timeout(Duration::from_millis(50), consumer.pop()).await
                {
                    taken.push(s);
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        assert_eq!(all.len(), 100);
        let unique: HashSet<_> = all.into_iter().collect();
        assert_eq!(unique.len(), 100);
    }
}

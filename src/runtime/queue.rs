//! # Work Queue
//!
//! Unbounded queue of reconcile requests. A request already waiting in the
//! queue is not enqueued twice; once a worker picks it up it may be enqueued
//! again, so a change arriving mid-reconcile is never lost.

use crate::controller::connsecret::ReconcileRequest;
use crate::observability::metrics;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// What caused a request to be enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Project,
    Deployment,
    User,
    Secret,
    NotReady,
    ErrorBackoff,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Deployment => "deployment",
            Self::User => "user",
            Self::Secret => "secret",
            Self::NotReady => "not-ready",
            Self::ErrorBackoff => "error-backoff",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<ReconcileRequest>,
    pending: Arc<Mutex<BTreeSet<ReconcileRequest>>>,
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReconcileRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                pending: Arc::new(Mutex::new(BTreeSet::new())),
            },
            receiver,
        )
    }

    /// Returns `false` when the request was already pending or the queue is
    /// closed.
    pub fn enqueue(&self, request: ReconcileRequest, source: TriggerSource) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(request.clone()) {
            return false;
        }
        if self.sender.send(request.clone()).is_err() {
            pending.remove(&request);
            return false;
        }
        debug!(source = source.as_str(), "Enqueued {}", request);
        metrics::increment_requests_enqueued(source.as_str());
        true
    }

    pub fn enqueue_all(
        &self,
        requests: impl IntoIterator<Item = ReconcileRequest>,
        source: TriggerSource,
    ) -> usize {
        requests
            .into_iter()
            .filter(|r| self.enqueue(r.clone(), source))
            .count()
    }

    /// Enqueue `request` after `delay` without blocking the caller
    pub fn enqueue_after(&self, request: ReconcileRequest, delay: Duration, source: TriggerSource) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(request, source);
        });
    }

    /// A worker took `request` off the queue
    pub fn started(&self, request: &ReconcileRequest) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_requests_are_deduplicated() {
        let (queue, mut receiver) = WorkQueue::new();
        let request = ReconcileRequest::new("team-a", "pid1$cluster1$admin");

        assert!(queue.enqueue(request.clone(), TriggerSource::Deployment));
        assert!(!queue.enqueue(request.clone(), TriggerSource::User));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, request);
        queue.started(&received);

        assert!(queue.enqueue(request.clone(), TriggerSource::User));
        assert_eq!(receiver.recv().await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_enqueue_all_counts_new_requests() {
        let (queue, _receiver) = WorkQueue::new();
        let requests = vec![
            ReconcileRequest::new("team-a", "pid1$cluster1$admin"),
            ReconcileRequest::new("team-a", "pid1$cluster2$admin"),
            ReconcileRequest::new("team-a", "pid1$cluster1$admin"),
        ];
        assert_eq!(queue.enqueue_all(requests, TriggerSource::Project), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_requests() {
        let (queue, receiver) = WorkQueue::new();
        drop(receiver);
        let request = ReconcileRequest::new("team-a", "p-cluster1-admin");
        assert!(!queue.enqueue(request.clone(), TriggerSource::Secret));
        // Not left pending after a failed send
        assert!(!queue.pending.lock().unwrap().contains(&request));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_delay() {
        let (queue, mut receiver) = WorkQueue::new();
        let request = ReconcileRequest::new("team-a", "pid1$cluster1$admin");
        queue.enqueue_after(request.clone(), Duration::from_secs(10), TriggerSource::NotReady);

        assert!(receiver.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(receiver.recv().await.unwrap(), request);
    }
}

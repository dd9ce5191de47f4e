//! Plan dispatch queue
//!
//! Enqueued plans are copied, stamped with a fresh time-ordered id and
//! appended to a pending list. A single dispatch loop drains the list,
//! newest item first, sending one plan at a time. The first failure marks
//! that item as errored and ends the loop; whatever is still pending waits
//! for the next loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use neoscaffold_core::{ExecutionPlan, IdGenerator};

use crate::error::Result;
use crate::http::ApiClient;

/// Sends one serialized plan to the backend.
#[async_trait]
pub trait PlanDispatcher: Send + Sync {
    async fn dispatch(&self, body: &str) -> Result<Value>;
}

#[async_trait]
impl PlanDispatcher for ApiClient {
    async fn dispatch(&self, body: &str) -> Result<Value> {
        self.queue_prompt(body).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Error,
    Done,
}

/// A plan waiting for, or finished with, dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub status: QueueStatus,
    #[serde(rename = "queuedPrompt")]
    pub plan: ExecutionPlan,
}

/// Result of one dispatch loop.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Backend responses by item id.
    pub responses: BTreeMap<String, Value>,
    /// The item whose dispatch failed, if the loop was aborted.
    pub failed: Option<QueueItem>,
    /// Items left pending when the loop ended.
    pub remaining: usize,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

/// What an `enqueue` call did.
#[derive(Debug, Clone)]
pub enum QueueOutcome {
    /// A loop was already running and will pick up the new items.
    Deferred { queued: Vec<String> },
    /// This call ran the dispatch loop.
    Dispatched(DispatchReport),
}

/// Clears the processing flag on every exit path.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Single-loop LIFO dispatch queue.
#[derive(Default)]
pub struct QueueManager {
    pending: Mutex<Vec<QueueItem>>,
    processing: AtomicBool,
    ids: IdGenerator,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Snapshot of the pending items, oldest first.
    pub fn pending(&self) -> Vec<QueueItem> {
        self.pending.lock().clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Add `batch_size` copies of `plan` and, unless a loop is already
    /// running, dispatch until the list drains or a dispatch fails.
    ///
    /// A batch size of zero queues one copy.
    pub async fn enqueue(
        &self,
        plan: &ExecutionPlan,
        batch_size: usize,
        dispatcher: &dyn PlanDispatcher,
    ) -> Result<QueueOutcome> {
        let mut queued = Vec::new();
        for _ in 0..batch_size.max(1) {
            let id = self.ids.generate()?;
            let mut copy = plan.clone();
            copy.prompt_id = Some(id.clone());
            self.pending.lock().push(QueueItem {
                id: id.clone(),
                status: QueueStatus::Queued,
                plan: copy,
            });
            queued.push(id);
        }
        debug!(count = queued.len(), checksum = %plan.checksum, "queued plans");

        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("dispatch loop already running");
            return Ok(QueueOutcome::Deferred { queued });
        }
        let _guard = ProcessingGuard(&self.processing);

        Ok(QueueOutcome::Dispatched(self.drain(dispatcher).await))
    }

    async fn drain(&self, dispatcher: &dyn PlanDispatcher) -> DispatchReport {
        let mut report = DispatchReport::default();

        loop {
            let Some(mut item) = self.pending.lock().pop() else {
                break;
            };

            let body = match serde_json::to_string(&item.plan) {
                Ok(body) => body,
                Err(e) => {
                    error!(item = %item.id, "Failed to serialize plan: {}", e);
                    item.status = QueueStatus::Error;
                    report.failed = Some(item);
                    break;
                }
            };

            match dispatcher.dispatch(&body).await {
                Ok(response) => {
                    item.status = QueueStatus::Done;
                    debug!(item = %item.id, "plan dispatched");
                    report.responses.insert(item.id, response);
                }
                Err(e) => {
                    error!(item = %item.id, "Error queueing prompt: {}", e);
                    item.status = QueueStatus::Error;
                    report.failed = Some(item);
                    break;
                }
            }
        }

        report.remaining = self.pending.lock().len();
        info!(
            sent = report.responses.len(),
            failed = report.failed.is_some(),
            remaining = report.remaining,
            "dispatch loop finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use neoscaffold_core::compile;
    use neoscaffold_core::graph::{Graph, Node, Widget};
    use serde_json::json;

    /// Records dispatched plan ids and fails on the given call.
    struct Recorder {
        sent: Mutex<Vec<String>>,
        fail_on: Option<usize>,
    }

    impl Recorder {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl PlanDispatcher for Recorder {
        async fn dispatch(&self, body: &str) -> Result<Value> {
            let plan: ExecutionPlan = serde_json::from_str(body)?;
            let id = plan.prompt_id.unwrap_or_default();
            let mut sent = self.sent.lock();
            sent.push(id.clone());
            if Some(sent.len()) == self.fail_on {
                return Err(ClientError::WebSocket("backend unavailable".into()));
            }
            Ok(json!({ "prompt_id": id }))
        }
    }

    fn plan() -> ExecutionPlan {
        let mut graph = Graph::new();
        graph.add_node(Node::new("Constant").with_widget(Widget::new("value", "number", json!(1))));
        compile(&graph).unwrap()
    }

    #[tokio::test]
    async fn test_batch_dispatches_newest_first() {
        let queue = QueueManager::new();
        let recorder = Recorder::new(None);

        let outcome = queue.enqueue(&plan(), 3, &recorder).await.unwrap();
        let QueueOutcome::Dispatched(report) = outcome else {
            panic!("expected dispatch");
        };

        let sent = recorder.sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|id| id.len() == 20));
        assert!(sent[0] > sent[1] && sent[1] > sent[2]);
        assert_eq!(report.responses.len(), 3);
        assert!(report.is_complete());
        assert!(!queue.is_processing());
    }

    #[tokio::test]
    async fn test_failure_stops_loop_and_releases_flag() {
        let queue = QueueManager::new();
        let failing = Recorder::new(Some(2));

        let QueueOutcome::Dispatched(report) = queue.enqueue(&plan(), 3, &failing).await.unwrap()
        else {
            panic!("expected dispatch");
        };

        assert_eq!(failing.sent.lock().len(), 2);
        assert_eq!(report.responses.len(), 1);
        let failed = report.failed.unwrap();
        assert_eq!(failed.status, QueueStatus::Error);
        assert_eq!(report.remaining, 1);
        assert!(!queue.is_processing());

        let healthy = Recorder::new(None);
        let QueueOutcome::Dispatched(next) = queue.enqueue(&plan(), 1, &healthy).await.unwrap()
        else {
            panic!("expected dispatch");
        };
        assert_eq!(next.responses.len(), 2);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_zero_batch_queues_one() {
        let queue = QueueManager::new();
        let recorder = Recorder::new(None);

        queue.enqueue(&plan(), 0, &recorder).await.unwrap();
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_while_processing() {
        let queue = QueueManager::new();
        queue.processing.store(true, Ordering::SeqCst);

        let outcome = queue.enqueue(&plan(), 2, &Recorder::new(None)).await.unwrap();
        match outcome {
            QueueOutcome::Deferred { queued } => assert_eq!(queued.len(), 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(queue.pending_len(), 2);
        assert!(queue.pending().iter().all(|item| item.status == QueueStatus::Queued));
    }
}

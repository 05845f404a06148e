//! Detached search reindexing.
//!
//! Writes hand their committed post to a bounded queue drained by a fixed set
//! of workers. Each upsert runs under its own deadline, independent of the
//! request that produced it; outcomes surface only through logs and metrics.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::repos::{SearchIndex, UpsertOutcome};
use crate::domain::entities::SearchDocument;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "application::reindex";

#[derive(Debug, Clone)]
pub struct ReindexSettings {
    /// Deadline for a single upsert.
    pub timeout: Duration,
    pub workers: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
}

impl Default for ReindexSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            workers: NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN),
            queue_capacity: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    /// The queue was full; the document was discarded.
    Dropped,
    /// The dispatcher is shutting down.
    Closed,
}

#[derive(Debug)]
struct ReindexJob {
    doc: SearchDocument,
    enqueued_at: Instant,
}

/// Bounded worker pool that pushes documents into the search index.
///
/// Must be created inside a Tokio runtime.
pub struct ReindexDispatcher {
    sender: Mutex<Option<mpsc::Sender<ReindexJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queued: Arc<QueueDepth>,
}

/// Jobs sitting in the queue, mirrored into `postsync_reindex_queue_len`.
#[derive(Debug, Default)]
struct QueueDepth(AtomicUsize);

impl QueueDepth {
    fn push(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
        gauge!("postsync_reindex_queue_len").increment(1.0);
    }

    fn pop(&self) {
        let popped = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| depth.checked_sub(1))
            .is_ok();
        if popped {
            gauge!("postsync_reindex_queue_len").decrement(1.0);
        }
    }

    /// Forget every job still queued; they die with the receiver.
    fn discard(&self) -> usize {
        let left = self.0.swap(0, Ordering::AcqRel);
        if left > 0 {
            gauge!("postsync_reindex_queue_len").decrement(left as f64);
        }
        left
    }
}

impl ReindexDispatcher {
    pub fn spawn(index: Arc<dyn SearchIndex>, settings: ReindexSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.get());
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let queued = Arc::new(QueueDepth::default());

        let workers = (0..settings.workers.get())
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&queued),
                    Arc::clone(&index),
                    settings.timeout,
                ))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            queued,
        }
    }

    /// Jobs accepted but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.queued.0.load(Ordering::Acquire)
    }

    /// Queue `doc` without waiting; never blocks the caller.
    pub fn dispatch(&self, doc: SearchDocument) -> DispatchOutcome {
        let guard = mutex_lock(&self.sender, SOURCE, "dispatch");
        let Some(sender) = guard.as_ref() else {
            warn!(post_id = doc.id, "reindex skipped: dispatcher closed");
            return DispatchOutcome::Closed;
        };

        let post_id = doc.id;
        let revision = doc.revision;
        let job = ReindexJob {
            doc,
            enqueued_at: Instant::now(),
        };
        // Counted before sending so a worker never pops a job that is not yet counted.
        self.queued.push();
        match sender.try_send(job) {
            Ok(()) => {
                debug!(post_id, revision, "reindex queued");
                DispatchOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.queued.pop();
                counter!("postsync_reindex_dropped_total").increment(1);
                warn!(post_id, revision, "reindex dropped: queue full");
                DispatchOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.queued.pop();
                warn!(post_id, revision, "reindex skipped: workers stopped");
                DispatchOutcome::Closed
            }
        }
    }

    /// Stop accepting jobs, let queued ones finish, and wait up to `grace`.
    ///
    /// Returns `true` when every worker finished in time; stragglers are aborted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        drop(mutex_lock(&self.sender, SOURCE, "shutdown.sender").take());
        let mut handles =
            std::mem::take(&mut *mutex_lock(&self.workers, SOURCE, "shutdown.workers"));

        let drained = tokio::time::timeout(grace, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("reindex workers drained");
        } else {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "reindex workers still busy after grace period; aborting"
            );
            for handle in &handles {
                handle.abort();
            }
            let discarded = self.queued.discard();
            if discarded > 0 {
                warn!(discarded, "queued reindex jobs discarded at shutdown");
            }
        }
        drained
    }
}

/// Register descriptions for the metrics emitted by the reindex pool.
pub fn describe_metrics() {
    describe_counter!(
        "postsync_reindex_total",
        Unit::Count,
        "Finished reindex jobs, by outcome."
    );
    describe_counter!(
        "postsync_reindex_dropped_total",
        Unit::Count,
        "Reindex jobs dropped because the queue was full."
    );
    describe_gauge!(
        "postsync_reindex_queue_len",
        Unit::Count,
        "Reindex jobs waiting for a worker."
    );
    describe_histogram!(
        "postsync_reindex_ms",
        Unit::Milliseconds,
        "Search index upsert latency."
    );
}

async fn run_worker(
    worker: usize,
    receiver: Arc<AsyncMutex<mpsc::Receiver<ReindexJob>>>,
    queued: Arc<QueueDepth>,
    index: Arc<dyn SearchIndex>,
    timeout: Duration,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };
        queued.pop();
        reindex_one(index.as_ref(), job, timeout).await;
    }
    debug!(worker, "reindex worker stopped");
}

async fn reindex_one(index: &dyn SearchIndex, job: ReindexJob, timeout: Duration) {
    let post_id = job.doc.id;
    let revision = job.doc.revision;
    let queued_ms = job.enqueued_at.elapsed().as_millis() as u64;

    if !index.is_available() {
        counter!("postsync_reindex_total", "outcome" => "skipped").increment(1);
        debug!(post_id, revision, "reindex skipped: search index unavailable");
        return;
    }

    let started = Instant::now();
    let result = tokio::time::timeout(timeout, index.upsert(&job.doc)).await;
    histogram!("postsync_reindex_ms").record(started.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(Ok(UpsertOutcome::Applied)) => {
            counter!("postsync_reindex_total", "outcome" => "applied").increment(1);
            debug!(post_id, revision, queued_ms, "post reindexed");
        }
        Ok(Ok(UpsertOutcome::Superseded)) => {
            counter!("postsync_reindex_total", "outcome" => "superseded").increment(1);
            debug!(post_id, revision, "reindex superseded by a newer revision");
        }
        Ok(Err(err)) => {
            counter!("postsync_reindex_total", "outcome" => "failed").increment(1);
            warn!(post_id, revision, error = %err, "reindex failed; document left stale");
        }
        Err(_) => {
            counter!("postsync_reindex_total", "outcome" => "timeout").increment(1);
            warn!(
                post_id,
                revision,
                timeout_ms = timeout.as_millis() as u64,
                "reindex timed out; document left stale"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::application::repos::{SearchError, SearchPage};

    #[derive(Default)]
    struct RecordingIndex {
        docs: AsyncMutex<HashMap<i64, SearchDocument>>,
        gate: Option<Arc<Semaphore>>,
        started: Notify,
        unavailable: bool,
    }

    impl RecordingIndex {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SearchIndex for RecordingIndex {
        async fn ensure_schema(&self) -> Result<(), SearchError> {
            Ok(())
        }

        async fn upsert(&self, doc: &SearchDocument) -> Result<UpsertOutcome, SearchError> {
            self.started.notify_one();
            if let Some(gate) = &self.gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|err| SearchError::Unavailable(err.to_string()))?;
            }
            self.docs.lock().await.insert(doc.id, doc.clone());
            Ok(UpsertOutcome::Applied)
        }

        async fn query(&self, _text: &str) -> Result<SearchPage, SearchError> {
            Ok(SearchPage::default())
        }

        fn is_available(&self) -> bool {
            !self.unavailable
        }
    }

    fn doc(id: i64, revision: i64) -> SearchDocument {
        SearchDocument {
            id,
            title: format!("post {id}"),
            content: "body".to_string(),
            tags: Vec::new(),
            revision,
        }
    }

    fn settings(workers: usize, capacity: usize, timeout: Duration) -> ReindexSettings {
        ReindexSettings {
            timeout,
            workers: NonZeroUsize::new(workers).expect("non-zero workers"),
            queue_capacity: NonZeroUsize::new(capacity).expect("non-zero capacity"),
        }
    }

    #[tokio::test]
    async fn queued_documents_are_indexed_before_shutdown_returns() {
        let index = Arc::new(RecordingIndex::default());
        let dispatcher =
            ReindexDispatcher::spawn(index.clone(), settings(2, 16, Duration::from_secs(1)));

        assert_eq!(dispatcher.dispatch(doc(1, 1)), DispatchOutcome::Queued);
        assert_eq!(dispatcher.dispatch(doc(2, 1)), DispatchOutcome::Queued);

        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
        let docs = index.docs.lock().await;
        assert_eq!(docs.len(), 2);
        assert!(docs.contains_key(&1));
        assert!(docs.contains_key(&2));
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_rejected() {
        let index = Arc::new(RecordingIndex::default());
        let dispatcher = ReindexDispatcher::spawn(index, settings(1, 4, Duration::from_secs(1)));
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await);

        assert_eq!(dispatcher.dispatch(doc(1, 1)), DispatchOutcome::Closed);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let gate = Arc::new(Semaphore::new(0));
        let index = Arc::new(RecordingIndex::gated(gate.clone()));
        let dispatcher =
            ReindexDispatcher::spawn(index.clone(), settings(1, 1, Duration::from_secs(30)));

        assert_eq!(dispatcher.dispatch(doc(1, 1)), DispatchOutcome::Queued);
        index.started.notified().await;

        assert_eq!(dispatcher.dispatch(doc(2, 1)), DispatchOutcome::Queued);
        assert_eq!(dispatcher.dispatch(doc(3, 1)), DispatchOutcome::Dropped);

        gate.add_permits(8);
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
        let docs = index.docs.lock().await;
        assert!(docs.contains_key(&1));
        assert!(docs.contains_key(&2));
        assert!(!docs.contains_key(&3));
    }

    #[tokio::test]
    async fn hanging_upsert_is_abandoned_at_the_deadline() {
        let gate = Arc::new(Semaphore::new(0));
        let index = Arc::new(RecordingIndex::gated(gate));
        let dispatcher =
            ReindexDispatcher::spawn(index.clone(), settings(1, 4, Duration::from_millis(50)));

        dispatcher.dispatch(doc(1, 1));
        dispatcher.dispatch(doc(2, 1));

        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
        assert!(index.docs.lock().await.is_empty());
    }

    #[test]
    fn queue_gauge_is_described() {
        let recorder = metrics_util::debugging::DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            gauge!("postsync_reindex_queue_len").set(0.0);
        });

        let described = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .any(|(key, unit, description, _)| {
                key.key().name() == "postsync_reindex_queue_len"
                    && unit == Some(Unit::Count)
                    && description.is_some()
            });
        assert!(described);
    }

    #[tokio::test]
    async fn aborted_shutdown_releases_queued_jobs() {
        let gate = Arc::new(Semaphore::new(0));
        let index = Arc::new(RecordingIndex::gated(gate));
        let dispatcher =
            ReindexDispatcher::spawn(index.clone(), settings(1, 4, Duration::from_secs(30)));

        assert_eq!(dispatcher.dispatch(doc(1, 1)), DispatchOutcome::Queued);
        index.started.notified().await;
        assert_eq!(dispatcher.dispatch(doc(2, 1)), DispatchOutcome::Queued);
        assert_eq!(dispatcher.dispatch(doc(3, 1)), DispatchOutcome::Queued);
        assert_eq!(dispatcher.pending(), 2);

        assert!(!dispatcher.shutdown(Duration::from_millis(50)).await);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn unavailable_index_is_skipped() {
        let index = Arc::new(RecordingIndex {
            unavailable: true,
            ..Default::default()
        });
        let dispatcher =
            ReindexDispatcher::spawn(index.clone(), settings(1, 4, Duration::from_secs(1)));

        assert_eq!(dispatcher.dispatch(doc(1, 1)), DispatchOutcome::Queued);
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await);
        assert!(index.docs.lock().await.is_empty());
    }
}

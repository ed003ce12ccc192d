//! Flushing queued records to the remote API.
//!
//! `flush` is a pure function of the current queue state: it can be invoked
//! at any time, repeatedly, by whatever the host uses to signal a sync
//! opportunity. Nothing here polls or keeps timers; the process may be
//! suspended between triggers.
//!
//! Within one flush records are delivered one at a time in insertion order.
//! A failed delivery leaves the record queued (with its attempt count bumped)
//! and the loop moves on to the next record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::delivery::Deliverer;
use crate::errors::DeliveryError;
use crate::queue::{QueueName, QueuedRecord, RecordState, StoreHandle};

/// A record that stayed queued after a delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of one flush of one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushReport {
    pub queue: QueueName,
    /// Records delivered and removed during this flush.
    pub flushed: usize,
    /// Records still queued once the flush finished; `None` when the final
    /// count could not be read.
    pub pending: Option<u64>,
    pub failures: Vec<RecordFailure>,
}

impl FlushReport {
    fn new(queue: QueueName) -> Self {
        Self {
            queue,
            flushed: 0,
            pending: None,
            failures: Vec::new(),
        }
    }
}

/// Attempt delivery of every record currently queued in `queue`.
///
/// Never fails: per-record delivery errors are logged and collected into the
/// report, and a store error ends the pass early with whatever was achieved.
pub async fn flush(
    store: &StoreHandle,
    deliverer: Arc<dyn Deliverer>,
    queue: QueueName,
) -> FlushReport {
    let mut report = FlushReport::new(queue);

    match store.drain_queue(queue).await {
        Ok(mut drain) => loop {
            let record = match drain.next().await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Failed to read queued records; ending flush early");
                    break;
                }
            };
            deliver_one(store, deliverer.clone(), queue, record, &mut report).await;
        },
        Err(e) => warn!(queue = %queue, error = %e, "Failed to open queue snapshot"),
    }

    report.pending = match store.count(queue).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(queue = %queue, error = %e, "Failed to count pending records");
            None
        }
    };

    info!(
        queue = %queue,
        flushed = report.flushed,
        pending = ?report.pending,
        failed = report.failures.len(),
        "Flush finished"
    );
    report
}

async fn deliver_one(
    store: &StoreHandle,
    deliverer: Arc<dyn Deliverer>,
    queue: QueueName,
    record: QueuedRecord,
    report: &mut FlushReport,
) {
    let id = record.id.clone();
    debug!(queue = %queue, id = %id, state = RecordState::InFlight.as_str(), "Delivering record");

    match attempt(deliverer, queue, record).await {
        Ok(()) => {
            // A concurrent flush may already have removed it; that's fine.
            if let Err(e) = store.remove(queue, &id).await {
                warn!(queue = %queue, id = %id, error = %e, "Delivered record could not be removed");
            }
            debug!(queue = %queue, id = %id, state = RecordState::Delivered.as_str(), "Record delivered");
            report.flushed += 1;
        }
        Err(e) => {
            let error = e.to_string();
            warn!(queue = %queue, id = %id, error = %error, state = RecordState::Pending.as_str(), "Delivery failed; record stays queued");
            if let Err(store_err) = store.mark_failed(queue, &id, &error).await {
                warn!(queue = %queue, id = %id, error = %store_err, "Failed to record delivery failure");
            }
            report.failures.push(RecordFailure { id, error });
        }
    }
}

/// One delivery attempt in its own task, so a panicking deliverer is
/// contained to the record it was handling.
async fn attempt(
    deliverer: Arc<dyn Deliverer>,
    queue: QueueName,
    record: QueuedRecord,
) -> Result<(), DeliveryError> {
    let handle = tokio::spawn(async move { deliverer.deliver(queue, &record).await });
    match handle.await {
        Ok(result) => result,
        Err(join_err) => Err(DeliveryError::Panicked(join_err.to_string())),
    }
}

/// Entry point for host sync triggers.
///
/// Holds one lock per queue so overlapping triggers for the same queue run
/// one after another instead of double-submitting records. Flushes of
/// different queues still interleave at each delivery await.
#[derive(Clone)]
pub struct SyncService {
    store: StoreHandle,
    deliverer: Arc<dyn Deliverer>,
    locks: Arc<[Mutex<()>; 3]>,
}

impl SyncService {
    pub fn new(store: StoreHandle, deliverer: Arc<dyn Deliverer>) -> Self {
        Self {
            store,
            deliverer,
            locks: Arc::new([Mutex::new(()), Mutex::new(()), Mutex::new(())]),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Trigger tags the host must register, one per queue.
    pub fn registered_tags(&self) -> Vec<String> {
        QueueName::ALL.iter().map(QueueName::sync_tag).collect()
    }

    /// Handle a host trigger. Returns `None` for tags no queue listens on.
    pub async fn trigger(&self, tag: &str) -> Option<FlushReport> {
        match QueueName::from_sync_tag(tag) {
            Some(queue) => Some(self.flush(queue).await),
            None => {
                warn!(tag = %tag, "Ignoring unknown sync tag");
                None
            }
        }
    }

    pub async fn flush(&self, queue: QueueName) -> FlushReport {
        let _guard = self.locks[queue.index()].lock().await;
        flush(&self.store, self.deliverer.clone(), queue).await
    }

    pub async fn flush_all(&self) -> Vec<FlushReport> {
        let mut reports = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            reports.push(self.flush(queue).await);
        }
        reports
    }
}

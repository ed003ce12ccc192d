//! Lazy snapshot cursor over one queue.

use std::collections::VecDeque;

use super::models::{QueueName, QueuedRecord};
use super::store::StoreHandle;
use crate::errors::QueueError;

const PAGE_SIZE: usize = 64;

/// A finite, restartable snapshot of the records queued in one queue.
///
/// The snapshot is bounded by the highest insertion sequence present when it
/// was taken: records enqueued afterwards are never yielded, so a drain always
/// terminates even while new work keeps arriving. Records are fetched lazily
/// in pages; a record removed before the cursor reaches it is skipped.
pub struct Drain {
    store: StoreHandle,
    queue: QueueName,
    /// Highest `seq` included in the snapshot; `None` for an empty queue.
    upper: Option<i64>,
    /// Highest `seq` fetched so far, readable or not.
    fetched: i64,
    buffer: VecDeque<(i64, QueuedRecord)>,
    exhausted: bool,
}

impl Drain {
    pub(crate) fn new(store: StoreHandle, queue: QueueName, upper: Option<i64>) -> Self {
        Self {
            store,
            queue,
            upper,
            fetched: 0,
            buffer: VecDeque::new(),
            exhausted: upper.is_none(),
        }
    }

    /// Next record in insertion order, or `None` once the snapshot is exhausted.
    pub async fn next(&mut self) -> Result<Option<QueuedRecord>, QueueError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front().map(|(_, record)| record))
    }

    /// Rewind to the start of the same snapshot.
    pub fn restart(&mut self) {
        self.fetched = 0;
        self.buffer.clear();
        self.exhausted = self.upper.is_none();
    }

    /// Collect every remaining record of the snapshot.
    pub async fn collect_all(&mut self) -> Result<Vec<QueuedRecord>, QueueError> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Fetch pages until one yields a readable record or the snapshot ends.
    async fn fill(&mut self) -> Result<(), QueueError> {
        let Some(upper) = self.upper else {
            self.exhausted = true;
            return Ok(());
        };
        while self.buffer.is_empty() && !self.exhausted {
            let queue = self.queue;
            let after = self.fetched;
            let page = self
                .store
                .call(move |store| store.page(queue, after, upper, PAGE_SIZE))
                .await?;
            if page.scanned < PAGE_SIZE {
                self.exhausted = true;
            }
            if let Some(last) = page.last_seq {
                self.fetched = last;
            }
            self.buffer.extend(page.records);
        }
        Ok(())
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::warn;

use super::drain::Drain;
use super::models::{QueueName, QueueStats, QueuedRecord};
use crate::errors::QueueError;

/// Async-safe handle to the queue store.
///
/// Wraps `QueueStore` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. Every store operation holds the
/// lock for its whole duration, so operations are atomic with respect to each
/// other even when flushes of different queues interleave.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<QueueStore>>,
}

impl StoreHandle {
    pub fn new(store: QueueStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Open (or create) the store at `path`, creating the parent directory
    /// and the three named queues if they are absent.
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        Ok(Self::new(QueueStore::open(path)?))
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, QueueError> {
        Ok(Self::new(QueueStore::open_in_memory()?))
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, QueueError>
    where
        F: FnOnce(&QueueStore) -> Result<R, QueueError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| QueueError::Storage(anyhow!("Store lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| QueueError::Storage(anyhow!("Store task panicked: {}", e)))?
    }

    pub async fn enqueue(&self, queue: QueueName, record: QueuedRecord) -> Result<(), QueueError> {
        self.call(move |store| store.enqueue(queue, &record)).await
    }

    /// Lazy snapshot of everything currently queued in `queue`, in insertion order.
    pub async fn drain_queue(&self, queue: QueueName) -> Result<Drain, QueueError> {
        let upper = self.call(move |store| store.max_seq(queue)).await?;
        Ok(Drain::new(self.clone(), queue, upper))
    }

    /// Delete one record. Returns `false` (not an error) when `id` is absent.
    pub async fn remove(&self, queue: QueueName, id: &str) -> Result<bool, QueueError> {
        let id = id.to_string();
        self.call(move |store| store.remove(queue, &id)).await
    }

    pub async fn mark_failed(
        &self,
        queue: QueueName,
        id: &str,
        error: &str,
    ) -> Result<(), QueueError> {
        let id = id.to_string();
        let error = error.to_string();
        self.call(move |store| store.mark_failed(queue, &id, &error))
            .await
    }

    pub async fn count(&self, queue: QueueName) -> Result<u64, QueueError> {
        self.call(move |store| store.count(queue)).await
    }

    pub async fn stats(&self) -> Result<Vec<QueueStats>, QueueError> {
        self.call(|store| store.stats()).await
    }

    pub async fn purge(&self, queue: QueueName) -> Result<usize, QueueError> {
        self.call(move |store| store.purge(queue)).await
    }
}

pub struct QueueStore {
    conn: Connection,
}

impl QueueStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    ///
    /// Any failure here means the host denied persistent storage, so it is
    /// reported as `StorageUnavailable`.
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        let unavailable = |source: anyhow::Error| QueueError::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .context("Failed to create store directory")
                .map_err(unavailable)?;
        }
        let conn = Connection::open(path)
            .context("Failed to open SQLite database")
            .map_err(unavailable)?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")
            .map_err(unavailable)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .context("Failed to enable WAL journal")
            .map_err(unavailable)?;

        let store = Self { conn };
        store.init().map_err(unavailable)?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")
            .map_err(QueueError::Storage)?;
        let store = Self { conn };
        store.init().map_err(QueueError::Storage)?;
        Ok(store)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        // AUTOINCREMENT keeps `seq` monotonic even after the newest row is
        // deleted, so insertion order survives removals.
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS queues (
                    name TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS queued_records (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    queue TEXT NOT NULL REFERENCES queues(name),
                    record_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    enqueued_at TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    UNIQUE(queue, record_id)
                );

                CREATE INDEX IF NOT EXISTS idx_queued_records_queue ON queued_records(queue, seq);
                ",
            )
            .context("Failed to create tables")?;

        for queue in QueueName::ALL {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO queues (name) VALUES (?1)",
                    params![queue.as_str()],
                )
                .with_context(|| format!("Failed to create queue {}", queue))?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM queues ORDER BY name")
            .context("Failed to prepare queue_names")
            .map_err(QueueError::Storage)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query queues")
            .map_err(QueueError::Storage)?;
        let mut names = Vec::new();
        for row in rows {
            names.push(
                row.context("Failed to read queue row")
                    .map_err(QueueError::Storage)?,
            );
        }
        Ok(names)
    }

    // ── Records ───────────────────────────────────────────────────────

    pub fn enqueue(&self, queue: QueueName, record: &QueuedRecord) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&record.payload)
            .context("Failed to serialize record payload")
            .map_err(QueueError::StorageWriteFailed)?;
        let result = self.conn.execute(
            "INSERT INTO queued_records (queue, record_id, payload, enqueued_at, attempts, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                queue.as_str(),
                record.id,
                payload,
                record.enqueued_at.to_rfc3339(),
                record.attempts,
                record.last_error,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(QueueError::DuplicateRecord {
                    queue,
                    id: record.id.clone(),
                })
            }
            Err(e) => Err(QueueError::StorageWriteFailed(
                anyhow::Error::new(e).context("Failed to insert queued record"),
            )),
        }
    }

    /// Highest insertion sequence currently present in `queue`, if any.
    pub fn max_seq(&self, queue: QueueName) -> Result<Option<i64>, QueueError> {
        self.conn
            .query_row(
                "SELECT MAX(seq) FROM queued_records WHERE queue = ?1",
                params![queue.as_str()],
                |row| row.get(0),
            )
            .context("Failed to read max sequence")
            .map_err(QueueError::Storage)
    }

    /// Rows with `after < seq <= upto`, oldest first, at most `limit` of them.
    ///
    /// A row whose payload or timestamp no longer parses is logged and left
    /// out of `records`, but still counts towards `scanned` and `last_seq` so
    /// a cursor moves past it.
    pub fn page(
        &self,
        queue: QueueName,
        after: i64,
        upto: i64,
        limit: usize,
    ) -> Result<Page, QueueError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, record_id, payload, enqueued_at, attempts, last_error
                 FROM queued_records
                 WHERE queue = ?1 AND seq > ?2 AND seq <= ?3
                 ORDER BY seq
                 LIMIT ?4",
            )
            .context("Failed to prepare page")
            .map_err(QueueError::Storage)?;
        let rows = stmt
            .query_map(
                params![queue.as_str(), after, upto, limit as i64],
                RecordRow::from_row,
            )
            .context("Failed to query queued records")
            .map_err(QueueError::Storage)?;
        let mut page = Page::default();
        for row in rows {
            let r = row
                .context("Failed to read queued record row")
                .map_err(QueueError::Storage)?;
            page.scanned += 1;
            page.last_seq = Some(r.seq);
            let (seq, id) = (r.seq, r.record_id.clone());
            match r.into_record() {
                Ok(record) => page.records.push(record),
                Err(e) => warn!(
                    queue = %queue,
                    seq,
                    id = %id,
                    error = %e,
                    "Skipping unreadable queued record"
                ),
            }
        }
        Ok(page)
    }

    /// Replace a record's stored payload text verbatim.
    #[cfg(test)]
    pub(crate) fn overwrite_payload(&self, queue: QueueName, id: &str, raw: &str) {
        self.conn
            .execute(
                "UPDATE queued_records SET payload = ?3 WHERE queue = ?1 AND record_id = ?2",
                params![queue.as_str(), id, raw],
            )
            .unwrap();
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) {
        self.conn.execute_batch(sql).unwrap();
    }

    pub fn get(&self, queue: QueueName, id: &str) -> Result<Option<QueuedRecord>, QueueError> {
        let row = self
            .conn
            .query_row(
                "SELECT seq, record_id, payload, enqueued_at, attempts, last_error
                 FROM queued_records WHERE queue = ?1 AND record_id = ?2",
                params![queue.as_str(), id],
                RecordRow::from_row,
            )
            .optional()
            .context("Failed to query queued record")
            .map_err(QueueError::Storage)?;
        match row {
            Some(r) => Ok(Some(r.into_record()?.1)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, queue: QueueName, id: &str) -> Result<bool, QueueError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM queued_records WHERE queue = ?1 AND record_id = ?2",
                params![queue.as_str(), id],
            )
            .context("Failed to delete queued record")
            .map_err(QueueError::Storage)?;
        Ok(deleted > 0)
    }

    pub fn mark_failed(&self, queue: QueueName, id: &str, error: &str) -> Result<(), QueueError> {
        self.conn
            .execute(
                "UPDATE queued_records SET attempts = attempts + 1, last_error = ?3
                 WHERE queue = ?1 AND record_id = ?2",
                params![queue.as_str(), id, error],
            )
            .context("Failed to record delivery failure")
            .map_err(QueueError::Storage)?;
        Ok(())
    }

    pub fn count(&self, queue: QueueName) -> Result<u64, QueueError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM queued_records WHERE queue = ?1",
                params![queue.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count queued records")
            .map_err(QueueError::Storage)?;
        Ok(count as u64)
    }

    pub fn stats(&self) -> Result<Vec<QueueStats>, QueueError> {
        let mut stats = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            let (pending, retrying, oldest): (i64, i64, Option<String>) = self
                .conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(attempts > 0), 0), MIN(enqueued_at)
                     FROM queued_records WHERE queue = ?1",
                    params![queue.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .context("Failed to read queue stats")
                .map_err(QueueError::Storage)?;
            let oldest_enqueued_at = oldest.as_deref().map(parse_timestamp).transpose()?;
            stats.push(QueueStats {
                queue,
                pending: pending as u64,
                retrying: retrying as u64,
                oldest_enqueued_at,
            });
        }
        Ok(stats)
    }

    /// Delete every record in `queue`. Returns the number removed.
    pub fn purge(&self, queue: QueueName) -> Result<usize, QueueError> {
        self.conn
            .execute(
                "DELETE FROM queued_records WHERE queue = ?1",
                params![queue.as_str()],
            )
            .context("Failed to purge queue")
            .map_err(QueueError::Storage)
    }
}

/// One page of a queue read by `QueueStore::page`.
#[derive(Debug, Default)]
pub struct Page {
    /// Readable records with their insertion sequence.
    pub records: Vec<(i64, QueuedRecord)>,
    /// Rows read, including unreadable ones.
    pub scanned: usize,
    /// Sequence of the last row read.
    pub last_seq: Option<i64>,
}

struct RecordRow {
    seq: i64,
    record_id: String,
    payload: String,
    enqueued_at: String,
    attempts: u32,
    last_error: Option<String>,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            record_id: row.get(1)?,
            payload: row.get(2)?,
            enqueued_at: row.get(3)?,
            attempts: row.get(4)?,
            last_error: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<(i64, QueuedRecord), QueueError> {
        let payload = serde_json::from_str(&self.payload)
            .with_context(|| format!("Corrupt payload for record {}", self.record_id))
            .map_err(QueueError::Storage)?;
        Ok((
            self.seq,
            QueuedRecord {
                id: self.record_id,
                payload,
                enqueued_at: parse_timestamp(&self.enqueued_at)?,
                attempts: self.attempts,
                last_error: self.last_error,
            },
        ))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: {}", raw))
        .map_err(QueueError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    fn ids(store: &QueueStore, queue: QueueName) -> Vec<String> {
        store
            .page(queue, 0, i64::MAX, 100)
            .unwrap()
            .records
            .into_iter()
            .map(|(_, r)| r.id)
            .collect()
    }

    #[test]
    fn test_open_creates_named_queues() {
        let store = QueueStore::open_in_memory().unwrap();
        assert_eq!(
            store.queue_names().unwrap(),
            vec!["expenses", "location", "timesheets"]
        );
    }

    #[test]
    fn test_open_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        let store = QueueStore::open(&path).unwrap();
        store
            .enqueue(
                QueueName::Timesheets,
                &QueuedRecord::with_id("t1", payload(json!({"hours": 8}))),
            )
            .unwrap();
        drop(store);

        let reopened = QueueStore::open(&path).unwrap();
        assert_eq!(reopened.queue_names().unwrap().len(), 3);
        assert_eq!(ids(&reopened, QueueName::Timesheets), vec!["t1"]);
    }

    #[test]
    fn test_open_unwritable_location_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = QueueStore::open(&blocker.join("queue.db")).err().unwrap();
        assert!(matches!(err, QueueError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_page_skips_unreadable_rows_but_advances_past_them() {
        let store = QueueStore::open_in_memory().unwrap();
        for id in ["t1", "t2", "t3"] {
            store
                .enqueue(QueueName::Timesheets, &QueuedRecord::with_id(id, Map::new()))
                .unwrap();
        }
        store.overwrite_payload(QueueName::Timesheets, "t1", "not json");

        let page = store.page(QueueName::Timesheets, 0, i64::MAX, 2).unwrap();
        assert_eq!(page.scanned, 2);
        let readable: Vec<&str> = page.records.iter().map(|(_, r)| r.id.as_str()).collect();
        assert_eq!(readable, vec!["t2"]);
        assert_eq!(page.last_seq, Some(page.records[0].0));

        // The unreadable row is still queued.
        assert_eq!(store.count(QueueName::Timesheets).unwrap(), 3);
    }

    #[test]
    fn test_enqueue_preserves_insertion_order() {
        let store = QueueStore::open_in_memory().unwrap();
        for id in ["c", "a", "b"] {
            store
                .enqueue(QueueName::Location, &QueuedRecord::with_id(id, Map::new()))
                .unwrap();
        }
        assert_eq!(ids(&store, QueueName::Location), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_queues_are_independent() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .enqueue(QueueName::Timesheets, &QueuedRecord::with_id("x", Map::new()))
            .unwrap();
        // Same id in a different queue is a different record.
        store
            .enqueue(QueueName::Expenses, &QueuedRecord::with_id("x", Map::new()))
            .unwrap();

        assert!(store.remove(QueueName::Timesheets, "x").unwrap());
        assert!(ids(&store, QueueName::Timesheets).is_empty());
        assert_eq!(ids(&store, QueueName::Expenses), vec!["x"]);
    }

    #[test]
    fn test_duplicate_id_is_rejected_and_original_kept() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .enqueue(
                QueueName::Timesheets,
                &QueuedRecord::with_id("t1", payload(json!({"hours": 8}))),
            )
            .unwrap();

        let err = store
            .enqueue(
                QueueName::Timesheets,
                &QueuedRecord::with_id("t1", payload(json!({"hours": 2}))),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::DuplicateRecord { queue: QueueName::Timesheets, ref id } if id == "t1"
        ));

        let kept = store.get(QueueName::Timesheets, "t1").unwrap().unwrap();
        assert_eq!(kept.payload["hours"], json!(8));
        assert_eq!(store.count(QueueName::Timesheets).unwrap(), 1);
    }

    #[test]
    fn test_remove_absent_id_is_noop() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .enqueue(QueueName::Expenses, &QueuedRecord::with_id("e1", Map::new()))
            .unwrap();
        let before = ids(&store, QueueName::Expenses);

        assert!(!store.remove(QueueName::Expenses, "missing").unwrap());
        assert_eq!(ids(&store, QueueName::Expenses), before);
    }

    #[test]
    fn test_payload_round_trips() {
        let store = QueueStore::open_in_memory().unwrap();
        let record = QueuedRecord::with_id(
            "e1",
            payload(json!({"amount": 42.5, "currency": "EUR", "tags": ["travel"]})),
        );
        store.enqueue(QueueName::Expenses, &record).unwrap();

        let loaded = store.get(QueueName::Expenses, "e1").unwrap().unwrap();
        assert_eq!(loaded.payload, record.payload);
        assert_eq!(loaded.enqueued_at.timestamp(), record.enqueued_at.timestamp());
    }

    #[test]
    fn test_mark_failed_increments_attempts() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .enqueue(QueueName::Timesheets, &QueuedRecord::with_id("t1", Map::new()))
            .unwrap();

        store.mark_failed(QueueName::Timesheets, "t1", "503").unwrap();
        store.mark_failed(QueueName::Timesheets, "t1", "timeout").unwrap();
        store.mark_failed(QueueName::Timesheets, "gone", "ignored").unwrap();

        let record = store.get(QueueName::Timesheets, "t1").unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_seq_is_not_reused_after_removal() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .enqueue(QueueName::Location, &QueuedRecord::with_id("p1", Map::new()))
            .unwrap();
        let first = store.max_seq(QueueName::Location).unwrap().unwrap();
        store.remove(QueueName::Location, "p1").unwrap();
        store
            .enqueue(QueueName::Location, &QueuedRecord::with_id("p2", Map::new()))
            .unwrap();
        let second = store.max_seq(QueueName::Location).unwrap().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_stats_and_purge() {
        let store = QueueStore::open_in_memory().unwrap();
        for id in ["t1", "t2"] {
            store
                .enqueue(QueueName::Timesheets, &QueuedRecord::with_id(id, Map::new()))
                .unwrap();
        }
        store.mark_failed(QueueName::Timesheets, "t2", "boom").unwrap();

        let stats = store.stats().unwrap();
        let timesheets = stats
            .iter()
            .find(|s| s.queue == QueueName::Timesheets)
            .unwrap();
        assert_eq!(timesheets.pending, 2);
        assert_eq!(timesheets.retrying, 1);
        assert!(timesheets.oldest_enqueued_at.is_some());
        let expenses = stats.iter().find(|s| s.queue == QueueName::Expenses).unwrap();
        assert_eq!(expenses.pending, 0);
        assert!(expenses.oldest_enqueued_at.is_none());

        assert_eq!(store.purge(QueueName::Timesheets).unwrap(), 2);
        assert_eq!(store.count(QueueName::Timesheets).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_runs_operations_on_blocking_pool() {
        let handle = StoreHandle::open_in_memory().unwrap();
        handle
            .enqueue(QueueName::Timesheets, QueuedRecord::with_id("t1", Map::new()))
            .await
            .unwrap();
        assert_eq!(handle.count(QueueName::Timesheets).await.unwrap(), 1);
        assert!(handle.remove(QueueName::Timesheets, "t1").await.unwrap());
        assert!(!handle.remove(QueueName::Timesheets, "t1").await.unwrap());
    }
}

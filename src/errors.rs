//! Typed error hierarchy for the offline queue.
//!
//! Two enums cover the two halves of the system:
//! - `QueueError` - opening the store and reading/writing queued records
//! - `DeliveryError` - a single record's delivery attempt during a flush

use thiserror::Error;

use crate::queue::QueueName;

/// Errors from the persistent queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The store could not be opened at all. Callers should fall back to
    /// submitting the mutation inline, without offline durability.
    #[error("Queue store unavailable at {path}: {source}")]
    StorageUnavailable {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// A record could not be persisted (quota, read-only file, corruption).
    #[error("Failed to persist queued record: {0}")]
    StorageWriteFailed(#[source] anyhow::Error),

    #[error("Record {id} is already queued in {queue}")]
    DuplicateRecord { queue: QueueName, id: String },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Errors from one delivery attempt of one record.
///
/// These never abort a flush; they are recorded on the record and in the
/// flush report, and the record stays queued for the next trigger.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("No delivery endpoint configured for queue {queue}")]
    EndpointNotConfigured { queue: QueueName },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Remote API rejected record with status {status}")]
    Rejected { status: u16 },

    #[error("Delivery timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Delivery task panicked: {0}")]
    Panicked(String),
}

/// Transport failures only; status codes are checked on the response.
impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_unavailable_carries_path() {
        let path = std::path::PathBuf::from("/readonly/queue.db");
        let err = QueueError::StorageUnavailable {
            path: path.clone(),
            source: anyhow::anyhow!("permission denied"),
        };
        match &err {
            QueueError::StorageUnavailable { path: p, .. } => assert_eq!(p, &path),
            _ => panic!("Expected StorageUnavailable"),
        }
        assert!(err.to_string().contains("/readonly/queue.db"));
    }

    #[test]
    fn duplicate_record_names_queue_and_id() {
        let err = QueueError::DuplicateRecord {
            queue: QueueName::Timesheets,
            id: "t1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("t1"));
        assert!(msg.contains("timesheets"));
    }

    #[test]
    fn rejected_carries_status() {
        let err = DeliveryError::Rejected { status: 503 };
        match &err {
            DeliveryError::Rejected { status } => assert_eq!(*status, 503),
            _ => panic!("Expected Rejected"),
        }
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn endpoint_not_configured_names_queue() {
        let err = DeliveryError::EndpointNotConfigured {
            queue: QueueName::Expenses,
        };
        assert!(err.to_string().contains("expenses"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&QueueError::StorageWriteFailed(anyhow::anyhow!("disk full")));
        assert_std_error(&DeliveryError::Timeout { timeout_ms: 100 });
    }
}

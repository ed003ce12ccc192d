use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix the host uses when tagging sync triggers, e.g. `sync-timesheets`.
pub const SYNC_TAG_PREFIX: &str = "sync-";

/// One of the three independent named queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Timesheets,
    Expenses,
    Location,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [Self::Timesheets, Self::Expenses, Self::Location];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timesheets => "timesheets",
            Self::Expenses => "expenses",
            Self::Location => "location",
        }
    }

    /// Tag of the host sync trigger bound to this queue.
    pub fn sync_tag(&self) -> String {
        format!("{}{}", SYNC_TAG_PREFIX, self.as_str())
    }

    /// Resolve a host sync trigger tag back to its queue.
    pub fn from_sync_tag(tag: &str) -> Option<Self> {
        tag.strip_prefix(SYNC_TAG_PREFIX)?.parse().ok()
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Timesheets => 0,
            Self::Expenses => 1,
            Self::Location => 2,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timesheets" => Ok(Self::Timesheets),
            "expenses" => Ok(Self::Expenses),
            "location" => Ok(Self::Location),
            _ => Err(format!(
                "Invalid queue: {}. Valid values: timesheets, expenses, location",
                s
            )),
        }
    }
}

/// Per-record delivery state.
///
/// `InFlight` only exists while a flush awaits the remote API; it is never
/// persisted. `Delivered` is terminal and the record is gone from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    InFlight,
    Delivered,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
        }
    }
}

/// A persisted snapshot of a domain mutation awaiting remote delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRecord {
    pub id: String,
    pub payload: Map<String, Value>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueuedRecord {
    /// New record with a generated UUID v4 identifier.
    pub fn new(payload: Map<String, Value>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), payload)
    }

    pub fn with_id(id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

/// Pending record count for one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: QueueName,
    pub pending: u64,
    /// Records that have failed at least once and are still queued.
    pub retrying: u64,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

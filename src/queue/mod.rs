//! Durable offline queues.
//!
//! Mutations created while the client is offline are written to one of three
//! named queues (`timesheets`, `expenses`, `location`) in a SQLite file and
//! read back in insertion order when the host signals a sync opportunity.
//!
//! | Module   | Responsibility                                            |
//! |----------|-----------------------------------------------------------|
//! | `models` | `QueueName`, `QueuedRecord`, `RecordState`, `QueueStats`   |
//! | `store`  | `QueueStore` (SQLite) and the async `StoreHandle`          |
//! | `drain`  | `Drain`, the lazy restartable snapshot cursor              |

pub mod drain;
pub mod models;
pub mod store;

pub use drain::Drain;
pub use models::{QueueName, QueueStats, QueuedRecord, RecordState, SYNC_TAG_PREFIX};
pub use store::{Page, QueueStore, StoreHandle};

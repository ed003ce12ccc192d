pub mod config;
pub mod delivery;
pub mod errors;
pub mod logging;
pub mod queue;
pub mod server;
pub mod sync;

pub use delivery::{Deliverer, HttpDeliverer};
pub use errors::{DeliveryError, QueueError};
pub use queue::{Drain, QueueName, QueuedRecord, StoreHandle};
pub use sync::{FlushReport, SyncService, flush};

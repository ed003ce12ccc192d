//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                                  |
//! |-----------|---------------------------------------------------|
//! | `queue`   | `Enqueue`, `List`, `Remove`, `Purge`, `Status`    |
//! | `sync`    | `Flush`, `Serve`, `Tags`                          |
//! | `config`  | `Init`, `Config`                                  |

pub mod config;
pub mod queue;
pub mod sync;

pub use config::{cmd_config, cmd_init};
pub use queue::{cmd_enqueue, cmd_list, cmd_purge, cmd_remove, cmd_status};
pub use sync::{cmd_flush, cmd_serve, cmd_tags};

use anyhow::{Result, anyhow};
use fieldsync::config::FieldsyncConfig;
use fieldsync::errors::QueueError;
use fieldsync::queue::StoreHandle;

/// Open the configured store on the blocking pool; SQLite setup and
/// migrations are synchronous.
pub(crate) async fn try_open_store(config: &FieldsyncConfig) -> Result<StoreHandle, QueueError> {
    let path = config.db_path();
    tokio::task::spawn_blocking(move || StoreHandle::open(&path))
        .await
        .map_err(|e| QueueError::Storage(anyhow!("Store open task failed: {}", e)))?
}

/// Open the configured store for commands that only make sense with it.
pub(crate) async fn open_store(config: &FieldsyncConfig) -> Result<StoreHandle> {
    match try_open_store(config).await {
        Ok(store) => Ok(store),
        Err(e @ QueueError::StorageUnavailable { .. }) => {
            Err(anyhow::Error::new(e).context("Offline queue unavailable"))
        }
        Err(e) => Err(e.into()),
    }
}

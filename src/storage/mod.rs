//! Relational storage for event-sourced aggregates.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::Result;

pub mod aggregate;
pub mod compaction;
pub mod cursor;
pub mod event_count;
pub mod event_records;
pub mod id;
pub mod lifecycle_flags;
pub mod schema;
pub mod sql;
pub mod table;

pub use aggregate::{
    AggregateStorage, AggregateStorageBuilder, AggregateStore, DEFAULT_HISTORY_BATCH_SIZE,
};
pub use cursor::{CursorRegistry, DbCursor};
pub use event_count::EventCountTable;
pub use event_records::EventRecordTable;
pub use id::{EntityId, IdColumn, IdStrategy, IdType, MessageId};
pub use lifecycle_flags::LifecycleFlagsTable;
pub use schema::TableNames;
pub use sql::{Dialect, SqlType};
pub use table::{RecordColumns, Table};

/// Open a connection pool as configured.
///
/// Installs the compiled-in sqlx drivers before connecting, so any URL
/// scheme enabled by cargo features is accepted.
pub async fn connect(config: &StorageConfig) -> Result<AnyPool> {
    sqlx::any::install_default_drivers();
    info!(dialect = %config.dialect, max_connections = config.max_connections, "Connecting storage");

    if let Some(path) = sqlite_file(&config.url) {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let pool = AnyPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// File path of a file-backed SQLite URL.
fn sqlite_file(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Some(path)
}

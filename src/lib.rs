//! Aggregate storage - relational backing store for event-sourced aggregates.
//!
//! Each aggregate type gets an append-only event-record table, a lifecycle
//! flags table and an event-count table. History is read newest first through
//! streaming cursors and compacted behind retained snapshots.

pub mod config;
pub mod error;
pub mod record;
pub mod serializer;
pub mod storage;
pub mod utils;

pub use config::StorageConfig;
pub use error::{ConfigError, Result, StorageError};
pub use record::{EventRecord, LifecycleFlags, RecordKind};
pub use storage::{AggregateStorage, AggregateStore, DbCursor, Dialect, MessageId};

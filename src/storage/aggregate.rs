//! Storage facade for one aggregate type.
//!
//! Composes the event-record, lifecycle-flags and event-count tables behind
//! [`AggregateStore`], the contract the event-sourcing layer depends on.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use prost_types::Timestamp;
use sqlx::AnyPool;
use tracing::{debug, info, info_span, Span};

use super::cursor::{CursorRegistry, DbCursor};
use super::event_count::EventCountTable;
use super::event_records::EventRecordTable;
use super::id::{EntityId, IdColumn};
use super::lifecycle_flags::LifecycleFlagsTable;
use super::schema::{TableNames, ID_COLUMN};
use super::sql::{Dialect, SqlType};
use crate::config::StorageConfig;
use crate::error::{ConfigError, Result, StorageError};
use crate::record::{EventRecord, LifecycleFlags};

/// Batch size used when a history read asks for none.
pub const DEFAULT_HISTORY_BATCH_SIZE: usize = 100;

/// Persistence contract of an event-sourced aggregate type.
#[async_trait]
pub trait AggregateStore<I: EntityId>: Send + Sync {
    /// Append one event or snapshot to the history of `id`.
    async fn write_record(&self, id: &I, record: &EventRecord) -> Result<()>;

    /// History of `id`, newest first.
    ///
    /// `batch_size` is a streaming hint; `0` selects the configured default.
    /// The cursor holds a connection until exhausted or closed.
    async fn history_backward(&self, id: &I, batch_size: usize) -> Result<DbCursor<EventRecord>>;

    /// Keep the newest `snapshot_index + 1` snapshots of every aggregate and
    /// everything recorded after the oldest of them.
    async fn truncate(&self, snapshot_index: u32) -> Result<u64> {
        self.truncate_older_than(snapshot_index, None).await
    }

    /// Like [`truncate`](Self::truncate), additionally keeping every record
    /// at or after `cutoff`.
    async fn truncate_older_than(
        &self,
        snapshot_index: u32,
        cutoff: Option<Timestamp>,
    ) -> Result<u64>;

    /// Ids of every aggregate with recorded history.
    async fn distinct_aggregate_ids(&self) -> Result<DbCursor<I>>;

    async fn read_lifecycle_flags(&self, id: &I) -> Result<Option<LifecycleFlags>>;

    async fn write_lifecycle_flags(&self, id: &I, flags: &LifecycleFlags) -> Result<()>;

    /// Events recorded since the last snapshot; `0` if never written.
    async fn read_event_count_after_last_snapshot(&self, id: &I) -> Result<i32>;

    async fn write_event_count_after_last_snapshot(&self, id: &I, count: i32) -> Result<()>;

    /// Release open cursors and the connection pool.
    async fn close(&self) -> Result<()>;
}

/// SQL-backed [`AggregateStore`].
pub struct AggregateStorage<I> {
    names: TableNames,
    records: EventRecordTable<I>,
    flags: LifecycleFlagsTable<I>,
    counts: EventCountTable<I>,
    pool: AnyPool,
    cursors: CursorRegistry,
    history_batch_size: usize,
    closed: AtomicBool,
    span: Span,
}

impl<I: EntityId> AggregateStorage<I> {
    pub fn builder() -> AggregateStorageBuilder<I> {
        AggregateStorageBuilder::new()
    }

    pub fn table_names(&self) -> &TableNames {
        &self.names
    }

    pub fn records(&self) -> &EventRecordTable<I> {
        &self.records
    }

    pub fn lifecycle_flags(&self) -> &LifecycleFlagsTable<I> {
        &self.flags
    }

    pub fn event_counts(&self) -> &EventCountTable<I> {
        &self.counts
    }

    pub fn history_batch_size(&self) -> usize {
        self.history_batch_size
    }

    /// Cursors handed out that have not been dropped yet.
    pub fn open_cursors(&self) -> usize {
        self.cursors.live_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn track<T: Send + 'static>(&self, cursor: DbCursor<T>) -> Result<DbCursor<T>> {
        self.cursors.register(cursor.release_handle())?;
        Ok(cursor)
    }
}

#[async_trait]
impl<I: EntityId> AggregateStore<I> for AggregateStorage<I> {
    async fn write_record(&self, id: &I, record: &EventRecord) -> Result<()> {
        self.ensure_open()?;
        self.records.write(id, record).await
    }

    async fn history_backward(&self, id: &I, batch_size: usize) -> Result<DbCursor<EventRecord>> {
        self.ensure_open()?;
        let fetch_size = if batch_size == 0 {
            self.history_batch_size
        } else {
            batch_size
        };
        let cursor = self.records.select_history(id, Some(fetch_size))?;
        self.track(cursor)
    }

    async fn truncate_older_than(
        &self,
        snapshot_index: u32,
        cutoff: Option<Timestamp>,
    ) -> Result<u64> {
        self.ensure_open()?;
        let retained_snapshots = u64::from(snapshot_index) + 1;
        self.records.compact(retained_snapshots, cutoff.as_ref()).await
    }

    async fn distinct_aggregate_ids(&self) -> Result<DbCursor<I>> {
        self.ensure_open()?;
        self.track(self.records.index())
    }

    async fn read_lifecycle_flags(&self, id: &I) -> Result<Option<LifecycleFlags>> {
        self.ensure_open()?;
        self.flags.read(id).await
    }

    async fn write_lifecycle_flags(&self, id: &I, flags: &LifecycleFlags) -> Result<()> {
        self.ensure_open()?;
        self.flags.write(id, flags).await
    }

    async fn read_event_count_after_last_snapshot(&self, id: &I) -> Result<i32> {
        self.ensure_open()?;
        Ok(self.counts.read(id).await?.unwrap_or(0))
    }

    async fn write_event_count_after_last_snapshot(&self, id: &I, count: i32) -> Result<()> {
        self.ensure_open()?;
        self.counts.write(id, count).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let released = self.cursors.close_all();
        self.pool.close().await;

        let released = released?;
        info!(parent: &self.span, released_cursors = released, "Aggregate storage closed");
        Ok(())
    }
}

/// Builds an [`AggregateStorage`] and creates its tables.
pub struct AggregateStorageBuilder<I> {
    pool: Option<AnyPool>,
    dialect: Option<Dialect>,
    names: Option<TableNames>,
    id_sql_type: Option<SqlType>,
    native_upsert: Option<bool>,
    history_batch_size: Option<usize>,
    span: Option<Span>,
    _marker: PhantomData<fn() -> I>,
}

impl<I: EntityId> AggregateStorageBuilder<I> {
    fn new() -> Self {
        Self {
            pool: None,
            dialect: None,
            names: None,
            id_sql_type: None,
            native_upsert: None,
            history_batch_size: None,
            span: None,
            _marker: PhantomData,
        }
    }

    pub fn pool(mut self, pool: AnyPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Base name of the aggregate's tables.
    pub fn aggregate_name(mut self, name: &str) -> Self {
        self.names = Some(TableNames::new(name));
        self
    }

    /// Derive the table names from the aggregate's Rust type.
    pub fn aggregate_type<A: ?Sized>(mut self) -> Self {
        self.names = Some(TableNames::for_type::<A>());
        self
    }

    /// Declare the SQL type of the id column instead of deriving it from `I`.
    pub fn id_sql_type(mut self, sql_type: SqlType) -> Self {
        self.id_sql_type = Some(sql_type);
        self
    }

    pub fn native_upsert(mut self, enabled: bool) -> Self {
        self.native_upsert = Some(enabled);
        self
    }

    pub fn history_batch_size(mut self, size: usize) -> Self {
        self.history_batch_size = Some(size);
        self
    }

    /// Span the storage and its tables log under.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Apply dialect, upsert and batch-size settings from configuration.
    pub fn from_config(mut self, config: &StorageConfig) -> Self {
        self.dialect = Some(config.dialect);
        if config.native_upsert.is_some() {
            self.native_upsert = config.native_upsert;
        }
        self.history_batch_size = Some(config.history_batch_size);
        self
    }

    /// Validate the settings, then create every table if missing.
    pub async fn build(self) -> Result<AggregateStorage<I>> {
        let pool = self.pool.ok_or(ConfigError::MissingField("pool"))?;
        let dialect = self.dialect.ok_or(ConfigError::MissingField("dialect"))?;
        let names = self.names.ok_or(ConfigError::MissingField("aggregate_name"))?;
        let id_column = match self.id_sql_type {
            Some(declared) => IdColumn::<I>::with_declared_type(ID_COLUMN, declared)?,
            None => IdColumn::<I>::for_type(ID_COLUMN),
        };
        let native_upsert = self
            .native_upsert
            .unwrap_or_else(|| dialect.prefers_native_upsert());
        let history_batch_size = match self.history_batch_size {
            Some(0) | None => DEFAULT_HISTORY_BATCH_SIZE,
            Some(size) => size,
        };
        let span = self
            .span
            .unwrap_or_else(|| info_span!("aggregate_storage", aggregate = %names.event_records()));
        let table_span = |table: &str| info_span!(parent: &span, "table", table = %table);

        let records = EventRecordTable::new(
            names.event_records(),
            id_column.clone(),
            pool.clone(),
            dialect,
        )
        .with_span(table_span(&names.event_records()));
        let flags = LifecycleFlagsTable::new(
            names.lifecycle_flags(),
            id_column.clone(),
            pool.clone(),
            dialect,
        )
        .with_native_upsert(native_upsert)
        .with_span(table_span(&names.lifecycle_flags()));
        let counts = EventCountTable::new(names.event_count(), id_column, pool.clone(), dialect)
            .with_native_upsert(native_upsert)
            .with_span(table_span(&names.event_count()));

        records.create().await?;
        flags.create().await?;
        counts.create().await?;
        debug!(
            parent: &span,
            %dialect,
            native_upsert,
            history_batch_size,
            "Aggregate tables ready"
        );

        Ok(AggregateStorage {
            names,
            records,
            flags,
            counts,
            pool,
            cursors: CursorRegistry::new(),
            history_batch_size,
            closed: AtomicBool::new(false),
            span,
        })
    }
}

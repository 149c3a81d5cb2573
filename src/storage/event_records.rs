//! Append-only event-record table.
//!
//! Holds every event and snapshot of an aggregate type. The table is keyed by
//! aggregate id but not unique on it, so rows are only ever inserted or
//! deleted in bulk.

use prost_types::{Any, Timestamp};
use sea_query::{Expr, Index, Order, Query};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::{warn, Instrument, Span};

use super::cursor::DbCursor;
use super::id::{EntityId, IdColumn};
use super::schema::{ColumnSpec, EventRecords};
use super::sql::{execute_ddl, execute_write, open_cursor, Dialect, SqlType, Statement};
use super::table::{read_int, ColumnValues, RecordColumns, Table};
use crate::error::Result;
use crate::record::{EventRecord, RecordKind};
use crate::serializer;

/// Column mapping of [`EventRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRecordColumns;

impl RecordColumns for EventRecordColumns {
    type Record = EventRecord;

    fn columns(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::id(EventRecords::Id),
            ColumnSpec::new(EventRecords::Payload, SqlType::Bytes),
            ColumnSpec::new(EventRecords::Kind, SqlType::Text),
            ColumnSpec::new(EventRecords::Version, SqlType::Int),
            ColumnSpec::new(EventRecords::Timestamp, SqlType::Long),
            ColumnSpec::new(EventRecords::TimestampNanos, SqlType::Int),
        ]
    }

    fn values(&self, record: &EventRecord) -> Result<ColumnValues> {
        Ok(vec![
            ("payload".to_string(), serializer::encode(&record.payload).into()),
            ("kind".to_string(), record.kind.as_str().into()),
            ("version".to_string(), record.version.into()),
            ("timestamp".to_string(), record.timestamp.seconds.into()),
            ("timestamp_nanos".to_string(), record.timestamp.nanos.into()),
        ])
    }

    fn read(&self, row: &AnyRow) -> Result<EventRecord> {
        let payload: Vec<u8> = row.try_get("payload")?;
        let kind: String = row.try_get("kind")?;
        Ok(EventRecord {
            payload: serializer::decode::<Any>(&payload)?,
            kind: kind.parse::<RecordKind>()?,
            version: read_int(row, "version")?,
            timestamp: Timestamp {
                seconds: row.try_get::<i64, _>("timestamp")?,
                nanos: read_int(row, "timestamp_nanos")?,
            },
        })
    }
}

/// The history table of one aggregate type.
pub struct EventRecordTable<I> {
    table: Table<I, EventRecordColumns>,
}

impl<I: EntityId> EventRecordTable<I> {
    pub fn new(name: impl Into<String>, id_column: IdColumn<I>, pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            table: Table::new(name, id_column, EventRecordColumns, pool, dialect),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.table = self.table.with_span(span);
        self
    }

    /// The generic table underneath, for reads and deletes by id.
    pub fn table(&self) -> &Table<I, EventRecordColumns> {
        &self.table
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        self.table.pool()
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.table.dialect()
    }

    pub(crate) fn id_column(&self) -> &IdColumn<I> {
        self.table.id_column()
    }

    fn index_name(&self) -> String {
        format!("{}_id_version_idx", self.table.name())
    }

    /// DDL for the `(id, version)` lookup index.
    pub fn create_index_sql(&self) -> String {
        Index::create()
            .if_not_exists()
            .name(self.index_name())
            .table(self.table.table_ref())
            .col(EventRecords::Id)
            .col(EventRecords::Version)
            .to_owned()
            .build_any(self.table.dialect().schema_builder())
    }

    /// Create the table and its index if missing.
    pub async fn create(&self) -> Result<()> {
        self.table.create().await?;
        execute_ddl(self.table.pool(), &self.create_index_sql())
            .instrument(self.table.span().clone())
            .await
    }

    /// Append a record.
    pub async fn write(&self, id: &I, record: &EventRecord) -> Result<()> {
        self.table.insert(id, record).await
    }

    /// Records are never changed in place; the record is appended instead.
    pub async fn update(&self, id: &I, record: &EventRecord) -> Result<()> {
        warn!(
            parent: self.table.span(),
            table = self.table.name(),
            "Event records are immutable, inserting instead of updating"
        );
        self.table.insert(id, record).await
    }

    /// Newest-first history of one aggregate.
    ///
    /// Ordered by version, then timestamp seconds, then nanos, all
    /// descending. `fetch_size` is a streaming hint only.
    pub fn select_history(&self, id: &I, fetch_size: Option<usize>) -> Result<DbCursor<EventRecord>> {
        let statement = self.history_statement(id)?;
        Ok(open_cursor(
            self.table.pool(),
            statement,
            fetch_size,
            |row: &AnyRow| EventRecordColumns.read(row),
        ))
    }

    fn history_statement(&self, id: &I) -> Result<Statement> {
        let stmt = self
            .table
            .select_all_columns()
            .and_where(self.table.id_equals(id)?)
            .order_by(EventRecords::Version, Order::Desc)
            .order_by(EventRecords::Timestamp, Order::Desc)
            .order_by(EventRecords::TimestampNanos, Order::Desc)
            .to_owned();
        Ok(Statement::select(&stmt, self.table.dialect()))
    }

    /// Delete the rows of `id` older than `version`. Returns the count removed.
    pub async fn delete_prior_records(&self, id: &I, version: i32) -> Result<u64> {
        let statement = self.prior_records_statement(id, version)?;
        execute_write(self.table.pool(), &statement)
            .instrument(self.table.span().clone())
            .await
    }

    fn prior_records_statement(&self, id: &I, version: i32) -> Result<Statement> {
        let stmt = Query::delete()
            .from_table(self.table.table_ref())
            .and_where(self.table.id_equals(id)?)
            .and_where(Expr::col(EventRecords::Version).lt(version))
            .to_owned();
        Ok(Statement::delete(&stmt, self.table.dialect()))
    }

    /// Distinct aggregate ids with at least one record.
    pub fn index(&self) -> DbCursor<I> {
        self.table.index()
    }

    pub async fn delete_all(&self) -> Result<u64> {
        self.table.delete_all().await
    }

    pub(crate) fn span(&self) -> &Span {
        self.table.span()
    }
}

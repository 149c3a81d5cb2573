//! Cached count of events recorded since an aggregate's last snapshot.
//!
//! The cache is advisory. A missing row means the count was never written,
//! which readers treat as zero.

use sqlx::any::AnyRow;
use sqlx::AnyPool;
use tracing::Span;

use super::id::{EntityId, IdColumn};
use super::schema::{ColumnSpec, EventCountColumns};
use super::sql::{Dialect, SqlType};
use super::table::{read_int, ColumnValues, RecordColumns, Table};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct EventCountMapping;

impl RecordColumns for EventCountMapping {
    type Record = i32;

    fn columns(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::id(EventCountColumns::Id).primary_key(),
            ColumnSpec::new(EventCountColumns::EventCount, SqlType::Int),
        ]
    }

    fn values(&self, count: &i32) -> Result<ColumnValues> {
        Ok(vec![("event_count".to_string(), (*count).into())])
    }

    fn read(&self, row: &AnyRow) -> Result<i32> {
        read_int(row, "event_count")
    }
}

pub struct EventCountTable<I> {
    table: Table<I, EventCountMapping>,
}

impl<I: EntityId> EventCountTable<I> {
    pub fn new(name: impl Into<String>, id_column: IdColumn<I>, pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            table: Table::new(name, id_column, EventCountMapping, pool, dialect),
        }
    }

    pub fn with_native_upsert(mut self, enabled: bool) -> Self {
        self.table = self.table.with_native_upsert(enabled);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.table = self.table.with_span(span);
        self
    }

    pub fn table(&self) -> &Table<I, EventCountMapping> {
        &self.table
    }

    pub async fn create(&self) -> Result<()> {
        self.table.create().await
    }

    pub async fn read(&self, id: &I) -> Result<Option<i32>> {
        self.table.read(id).await
    }

    pub async fn write(&self, id: &I, count: i32) -> Result<()> {
        self.table.write(id, &count).await
    }
}

//! Per-aggregate lifecycle flags, one row per id.

use sqlx::any::AnyRow;
use sqlx::AnyPool;
use tracing::Span;

use super::id::{EntityId, IdColumn};
use super::schema::{ColumnSpec, LifecycleFlagsColumns};
use super::sql::{Dialect, SqlType};
use super::table::{read_bool, ColumnValues, RecordColumns, Table};
use crate::error::Result;
use crate::record::LifecycleFlags;

/// Column mapping of [`LifecycleFlags`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleFlagsMapping;

impl RecordColumns for LifecycleFlagsMapping {
    type Record = LifecycleFlags;

    fn columns(&self) -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::id(LifecycleFlagsColumns::Id).primary_key(),
            ColumnSpec::new(LifecycleFlagsColumns::Archived, SqlType::Boolean),
            ColumnSpec::new(LifecycleFlagsColumns::Deleted, SqlType::Boolean),
        ]
    }

    fn values(&self, flags: &LifecycleFlags) -> Result<ColumnValues> {
        Ok(vec![
            ("archived".to_string(), flags.archived.into()),
            ("deleted".to_string(), flags.deleted.into()),
        ])
    }

    fn read(&self, row: &AnyRow) -> Result<LifecycleFlags> {
        Ok(LifecycleFlags {
            archived: read_bool(row, "archived")?,
            deleted: read_bool(row, "deleted")?,
        })
    }
}

pub struct LifecycleFlagsTable<I> {
    table: Table<I, LifecycleFlagsMapping>,
}

impl<I: EntityId> LifecycleFlagsTable<I> {
    pub fn new(name: impl Into<String>, id_column: IdColumn<I>, pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            table: Table::new(name, id_column, LifecycleFlagsMapping, pool, dialect),
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

    pub fn table(&self) -> &Table<I, LifecycleFlagsMapping> {
        &self.table
    }

    pub async fn create(&self) -> Result<()> {
        self.table.create().await
    }

    /// Stored flags, `None` if none were ever written for `id`.
    pub async fn read(&self, id: &I) -> Result<Option<LifecycleFlags>> {
        self.table.read(id).await
    }

    pub async fn write(&self, id: &I, flags: &LifecycleFlags) -> Result<()> {
        self.table.write(id, flags).await
    }
}

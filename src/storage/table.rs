//! Generic single-table access.
//!
//! A [`Table`] knows its name, its column declarations and the identifier
//! column. It renders every statement through sea-query for the configured
//! dialect and runs writes through [`execute_write`].

use async_trait::async_trait;
use sea_query::{
    Alias, ColumnDef, Expr, Index, OnConflict, Query, SelectStatement, SimpleExpr, Table as SqlTable,
    Value,
};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use tracing::{debug, info_span, Instrument, Span};

use super::cursor::{single, DbCursor};
use super::id::{EntityId, IdColumn};
use super::schema::ColumnSpec;
use super::sql::{
    execute_ddl, execute_write, fetch_optional, open_cursor, Dialect, Statement, WriteQuery,
};
use crate::error::Result;

/// Column values of one record, keyed by column name. The id is not included.
pub type ColumnValues = Vec<(String, Value)>;

/// Maps a record type onto table columns.
pub trait RecordColumns: Send + Sync + 'static {
    type Record: Send + 'static;

    /// Every column in declaration order, including the identifier column.
    fn columns(&self) -> Vec<ColumnSpec>;

    /// Values of the non-identifier columns for `record`.
    ///
    /// Columns left out fall back to their declared default.
    fn values(&self, record: &Self::Record) -> Result<ColumnValues>;

    /// Decode a record from a row selected with [`columns`](Self::columns).
    fn read(&self, row: &AnyRow) -> Result<Self::Record>;
}

/// Read a boolean column, accepting engines that hand booleans back as integers.
pub(crate) fn read_bool(row: &AnyRow, column: &str) -> Result<bool> {
    match row.try_get::<bool, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnDecode { .. }) => Ok(row.try_get::<i64, _>(column)? != 0),
        Err(e) => Err(e.into()),
    }
}

/// Read an integer column stored as `INT`.
pub(crate) fn read_int(row: &AnyRow, column: &str) -> Result<i32> {
    let value = row.try_get::<i64, _>(column)?;
    i32::try_from(value).map_err(|_| {
        sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: format!("{value} does not fit into i32").into(),
        }
        .into()
    })
}

/// One relational table holding records of type `C::Record` keyed by `I`.
pub struct Table<I, C> {
    name: String,
    id_column: IdColumn<I>,
    columns: C,
    pool: AnyPool,
    dialect: Dialect,
    native_upsert: bool,
    span: Span,
}

impl<I: EntityId, C: RecordColumns> Table<I, C> {
    pub fn new(
        name: impl Into<String>,
        id_column: IdColumn<I>,
        columns: C,
        pool: AnyPool,
        dialect: Dialect,
    ) -> Self {
        let name = name.into();
        let span = info_span!("table", table = %name);
        Self {
            name,
            id_column,
            columns,
            pool,
            native_upsert: dialect.prefers_native_upsert(),
            dialect,
            span,
        }
    }

    /// Write through one `INSERT .. ON CONFLICT` statement instead of
    /// select-then-insert-or-update.
    pub fn with_native_upsert(mut self, enabled: bool) -> Self {
        self.native_upsert = enabled;
        self
    }

    /// Log inside `span` instead of the default per-table span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_column(&self) -> &IdColumn<I> {
        &self.id_column
    }

    pub fn columns(&self) -> &C {
        &self.columns
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn uses_native_upsert(&self) -> bool {
        self.native_upsert
    }

    pub(crate) fn table_ref(&self) -> Alias {
        Alias::new(self.name.as_str())
    }

    pub(crate) fn id_ref(&self) -> Alias {
        Alias::new(self.id_column.name())
    }

    pub(crate) fn id_equals(&self, id: &I) -> Result<SimpleExpr> {
        Ok(Expr::col(self.id_ref()).eq(self.id_column.normalize(id)?))
    }

    /// `CREATE TABLE IF NOT EXISTS` for this table.
    pub fn create_sql(&self) -> String {
        let mut stmt = SqlTable::create();
        stmt.table(self.table_ref()).if_not_exists();

        let mut key = Index::create();
        let mut has_key = false;
        for spec in self.columns.columns() {
            let mut def = ColumnDef::new(Alias::new(spec.name()));
            spec.sql_type()
                .unwrap_or_else(|| self.id_column.sql_type())
                .apply(&mut def, self.dialect);
            if !spec.is_nullable() {
                def.not_null();
            }
            if let Some(default) = spec.default_value() {
                def.default(default);
            }
            stmt.col(&mut def);

            if spec.is_primary_key() {
                key.col(Alias::new(spec.name()));
                has_key = true;
            }
        }
        if has_key {
            stmt.primary_key(&mut key);
        }

        stmt.build_any(self.dialect.schema_builder())
    }

    /// Create the table if it does not exist yet.
    pub async fn create(&self) -> Result<()> {
        execute_ddl(&self.pool, &self.create_sql())
            .instrument(self.span.clone())
            .await
    }

    pub(crate) fn select_all_columns(&self) -> SelectStatement {
        let mut stmt = Query::select();
        for spec in self.columns.columns() {
            stmt.column(Alias::new(spec.name()));
        }
        stmt.from(self.table_ref());
        stmt
    }

    fn contains_statement(&self, id: &I) -> Result<Statement> {
        let stmt = Query::select()
            .column(self.id_ref())
            .from(self.table_ref())
            .and_where(self.id_equals(id)?)
            .limit(1)
            .to_owned();
        Ok(Statement::select(&stmt, self.dialect))
    }

    /// Column names and values for a write, with defaults filled in.
    fn complete_values(&self, record: &C::Record) -> Result<ColumnValues> {
        let mut given = self.columns.values(record)?;
        let mut values = Vec::with_capacity(given.len());
        for spec in self.columns.columns() {
            if spec.name() == self.id_column.name() {
                continue;
            }
            match given.iter().position(|(name, _)| name == spec.name()) {
                Some(index) => values.push(given.swap_remove(index)),
                None => {
                    if let Some(default) = spec.default_value() {
                        values.push((spec.name().to_string(), default));
                    }
                }
            }
        }
        Ok(values)
    }

    pub(crate) fn insert_statement(&self, id: &I, record: &C::Record) -> Result<Statement> {
        let values = self.complete_values(record)?;
        let mut columns = vec![self.id_ref()];
        let mut row: Vec<SimpleExpr> = vec![self.id_column.normalize(id)?.into()];
        for (name, value) in values {
            columns.push(Alias::new(name));
            row.push(value.into());
        }

        let stmt = Query::insert()
            .into_table(self.table_ref())
            .columns(columns)
            .values_panic(row)
            .to_owned();
        Ok(Statement::insert(&stmt, self.dialect))
    }

    fn update_statement(&self, id: &I, record: &C::Record) -> Result<Statement> {
        let values = self.complete_values(record)?;
        let stmt = Query::update()
            .table(self.table_ref())
            .values(
                values
                    .into_iter()
                    .map(|(name, value)| (Alias::new(name), SimpleExpr::from(value))),
            )
            .and_where(self.id_equals(id)?)
            .to_owned();
        Ok(Statement::update(&stmt, self.dialect))
    }

    fn upsert_statement(&self, id: &I, record: &C::Record) -> Result<Statement> {
        let values = self.complete_values(record)?;
        let mut columns = vec![self.id_ref()];
        let mut row: Vec<SimpleExpr> = vec![self.id_column.normalize(id)?.into()];
        let mut updated = Vec::with_capacity(values.len());
        for (name, value) in values {
            updated.push(Alias::new(name.as_str()));
            columns.push(Alias::new(name));
            row.push(value.into());
        }

        let mut conflict = OnConflict::column(self.id_ref());
        if updated.is_empty() {
            conflict.do_nothing();
        } else {
            conflict.update_columns(updated);
        }

        let stmt = Query::insert()
            .into_table(self.table_ref())
            .columns(columns)
            .values_panic(row)
            .on_conflict(conflict)
            .to_owned();
        Ok(Statement::insert(&stmt, self.dialect))
    }

    fn read_statement(&self, id: &I) -> Result<Statement> {
        let stmt = self
            .select_all_columns()
            .and_where(self.id_equals(id)?)
            .limit(1)
            .to_owned();
        Ok(Statement::select(&stmt, self.dialect))
    }

    fn delete_statement(&self, id: &I) -> Result<Statement> {
        let stmt = Query::delete()
            .from_table(self.table_ref())
            .and_where(self.id_equals(id)?)
            .to_owned();
        Ok(Statement::delete(&stmt, self.dialect))
    }

    fn delete_all_statement(&self) -> Statement {
        let stmt = Query::delete().from_table(self.table_ref()).to_owned();
        Statement::delete(&stmt, self.dialect)
    }

    /// Whether a row with this id exists.
    pub async fn contains(&self, id: &I) -> Result<bool> {
        let statement = self.contains_statement(id)?;
        Ok(fetch_optional(&self.pool, &statement)
            .instrument(self.span.clone())
            .await?
            .is_some())
    }

    /// The record stored under `id`, if any.
    ///
    /// For tables that are not unique on the id, the first matching row wins.
    pub async fn read(&self, id: &I) -> Result<Option<C::Record>> {
        let statement = self.read_statement(id)?;
        let row = fetch_optional(&self.pool, &statement)
            .instrument(self.span.clone())
            .await?;
        row.map(|row| self.columns.read(&row)).transpose()
    }

    /// Insert the row if the id is absent, update it otherwise.
    pub async fn write(&self, id: &I, record: &C::Record) -> Result<()> {
        if self.native_upsert {
            return self.upsert(id, record).await;
        }

        let query = SelectThenWrite {
            exists: self.contains_statement(id)?,
            insert: self.insert_statement(id, record)?,
            update: self.update_statement(id, record)?,
        };
        execute_write(&self.pool, &query)
            .instrument(self.span.clone())
            .await?;
        Ok(())
    }

    pub async fn insert(&self, id: &I, record: &C::Record) -> Result<()> {
        let statement = self.insert_statement(id, record)?;
        execute_write(&self.pool, &statement)
            .instrument(self.span.clone())
            .await?;
        Ok(())
    }

    /// Overwrite the row stored under `id`. Returns the number of rows changed.
    pub async fn update(&self, id: &I, record: &C::Record) -> Result<u64> {
        let statement = self.update_statement(id, record)?;
        execute_write(&self.pool, &statement)
            .instrument(self.span.clone())
            .await
    }

    /// Insert or overwrite in a single statement.
    pub async fn upsert(&self, id: &I, record: &C::Record) -> Result<()> {
        let statement = self.upsert_statement(id, record)?;
        execute_write(&self.pool, &statement)
            .instrument(self.span.clone())
            .await?;
        Ok(())
    }

    /// Delete every row stored under `id`. Returns `false` if none matched.
    pub async fn delete(&self, id: &I) -> Result<bool> {
        let statement = self.delete_statement(id)?;
        let deleted = execute_write(&self.pool, &statement)
            .instrument(self.span.clone())
            .await?;
        Ok(deleted > 0)
    }

    /// Delete every row. Returns the number of rows removed.
    pub async fn delete_all(&self) -> Result<u64> {
        let statement = self.delete_all_statement();
        let deleted = execute_write(&self.pool, &statement)
            .instrument(self.span.clone())
            .await?;
        debug!(parent: &self.span, deleted, "Deleted all rows");
        Ok(deleted)
    }

    /// Distinct identifiers present in the table.
    pub fn index(&self) -> DbCursor<I> {
        let stmt = Query::select()
            .distinct()
            .column(self.id_ref())
            .from(self.table_ref())
            .to_owned();
        let statement = Statement::select(&stmt, self.dialect);

        open_cursor(&self.pool, statement, None, single(self.id_column.clone()))
    }
}

/// Insert-or-update issued inside one transaction.
struct SelectThenWrite {
    exists: Statement,
    insert: Statement,
    update: Statement,
}

#[async_trait]
impl WriteQuery for SelectThenWrite {
    async fn execute_in(&self, conn: &mut AnyConnection) -> Result<u64> {
        if self.exists.fetch_optional_on(&mut *conn).await?.is_some() {
            self.update.execute_on(conn).await
        } else {
            self.insert.execute_on(conn).await
        }
    }
}

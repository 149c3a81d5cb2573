//! Statement execution against the `Any` pool.
//!
//! Statements are rendered by sea-query with every value lifted into a bound
//! parameter. Writes go through [`execute_write`], the single place where
//! transactions are opened, committed and rolled back.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use sea_query::{
    DeleteStatement, InsertStatement, SelectStatement, UpdateStatement, Value, Values,
};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::{AnyConnection, AnyPool, Arguments};
use tracing::{debug, warn};

use super::Dialect;
use crate::error::{Result, StorageError};
use crate::storage::cursor::DbCursor;

/// A rendered statement together with its bound values.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub values: Values,
}

impl Statement {
    pub fn select(stmt: &SelectStatement, dialect: Dialect) -> Self {
        let (sql, values) = stmt.build_any(dialect.query_builder());
        Self { sql, values }
    }

    pub fn insert(stmt: &InsertStatement, dialect: Dialect) -> Self {
        let (sql, values) = stmt.build_any(dialect.query_builder());
        Self { sql, values }
    }

    pub fn update(stmt: &UpdateStatement, dialect: Dialect) -> Self {
        let (sql, values) = stmt.build_any(dialect.query_builder());
        Self { sql, values }
    }

    pub fn delete(stmt: &DeleteStatement, dialect: Dialect) -> Self {
        let (sql, values) = stmt.build_any(dialect.query_builder());
        Self { sql, values }
    }

    /// Run the statement on an open connection, returning the affected row count.
    pub async fn execute_on(&self, conn: &mut AnyConnection) -> Result<u64> {
        let args = bind_values(&self.values)?;
        let result = sqlx::query_with(&self.sql, args).execute(conn).await?;
        Ok(result.rows_affected())
    }

    /// Fetch at most one row on an open connection.
    pub async fn fetch_optional_on(&self, conn: &mut AnyConnection) -> Result<Option<AnyRow>> {
        let args = bind_values(&self.values)?;
        Ok(sqlx::query_with(&self.sql, args)
            .fetch_optional(conn)
            .await?)
    }
}

/// Convert sea-query values into `Any` driver arguments.
///
/// The `Any` driver has no unsigned integers; sea-query emits them for
/// `LIMIT`, so they are narrowed to `i64` here.
pub(crate) fn bind_values<'q>(values: &Values) -> Result<AnyArguments<'q>> {
    let mut args = AnyArguments::default();
    for value in values.0.iter() {
        let added = match value {
            Value::Bool(v) => args.add(*v),
            Value::TinyInt(v) => args.add(v.map(i16::from)),
            Value::SmallInt(v) => args.add(*v),
            Value::Int(v) => args.add(*v),
            Value::BigInt(v) => args.add(*v),
            Value::TinyUnsigned(v) => args.add(v.map(i16::from)),
            Value::SmallUnsigned(v) => args.add(v.map(i32::from)),
            Value::Unsigned(v) => args.add(v.map(i64::from)),
            Value::BigUnsigned(v) => {
                let narrowed = v
                    .map(i64::try_from)
                    .transpose()
                    .map_err(|_| StorageError::UnsupportedValue("u64 above i64::MAX".into()))?;
                args.add(narrowed)
            }
            Value::Float(v) => args.add(*v),
            Value::Double(v) => args.add(*v),
            Value::String(v) => args.add(v.as_ref().map(|s| s.to_string())),
            Value::Char(v) => args.add(v.map(|c| c.to_string())),
            Value::Bytes(v) => args.add(v.as_ref().map(|b| b.to_vec())),
        };
        added.map_err(|e| StorageError::UnsupportedValue(e.to_string()))?;
    }
    Ok(args)
}

/// A write performed inside a transaction opened by [`execute_write`].
///
/// Implementations issue their statements on the given connection and never
/// begin, commit or roll back themselves.
#[async_trait]
pub trait WriteQuery: Send + Sync {
    async fn execute_in(&self, conn: &mut AnyConnection) -> Result<u64>;
}

#[async_trait]
impl WriteQuery for Statement {
    async fn execute_in(&self, conn: &mut AnyConnection) -> Result<u64> {
        self.execute_on(conn).await
    }
}

/// Run a write query in its own transaction.
///
/// Commits on success. On failure the transaction is rolled back before the
/// error is returned; a failing rollback is logged and the original error wins.
pub async fn execute_write<Q: WriteQuery + ?Sized>(pool: &AnyPool, query: &Q) -> Result<u64> {
    let mut tx = pool.begin().await?;

    match query.execute_in(&mut *tx).await {
        Ok(affected) => {
            tx.commit().await?;
            Ok(affected)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed after write error");
            }
            Err(e)
        }
    }
}

/// Execute a DDL statement outside of any transaction.
pub async fn execute_ddl(pool: &AnyPool, sql: &str) -> Result<()> {
    debug!(sql, "Executing DDL");
    sqlx::query(sql).execute(pool).await?;
    Ok(())
}

/// Fetch at most one row using a connection held only for this call.
pub async fn fetch_optional(pool: &AnyPool, statement: &Statement) -> Result<Option<AnyRow>> {
    let mut conn = pool.acquire().await?;
    statement.fetch_optional_on(&mut *conn).await
}

/// Open a streaming cursor over the rows of `statement`.
///
/// The cursor owns a pooled connection until it is exhausted, closed or
/// dropped. `read` decodes each row when the cursor advances onto it.
pub fn open_cursor<T, F>(
    pool: &AnyPool,
    statement: Statement,
    fetch_size: Option<usize>,
    read: F,
) -> DbCursor<T>
where
    T: Send + 'static,
    F: Fn(&AnyRow) -> Result<T> + Send + Sync + 'static,
{
    let pool = pool.clone();
    let rows = async_stream::try_stream! {
        let Statement { sql, values } = statement;
        let args = bind_values(&values)?;
        let mut conn = pool.acquire().await?;
        let mut rows = sqlx::query_with(&sql, args).fetch(&mut *conn);
        while let Some(row) = rows.try_next().await? {
            yield read(&row)?;
        }
        drop(rows);
        drop(conn);
    };
    DbCursor::new(rows.boxed(), fetch_size)
}

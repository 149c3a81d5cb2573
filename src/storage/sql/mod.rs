//! SQL dialect support.
//!
//! Every table is written once against sea-query statements; the dialect
//! decides which query builder renders them and how abstract column types map
//! onto engine types.

mod query;

pub use query::{execute_ddl, execute_write, fetch_optional, open_cursor, Statement, WriteQuery};

use std::fmt;
use std::str::FromStr;

use sea_query::{
    ColumnDef, PostgresQueryBuilder, QueryBuilder, SchemaBuilder, SqliteQueryBuilder,
};
use serde::Deserialize;

use crate::error::ConfigError;

/// SQL engines the storage can talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Builder rendering DML for this dialect.
    pub fn query_builder(&self) -> &'static dyn QueryBuilder {
        match self {
            Dialect::Sqlite => &SqliteQueryBuilder,
            Dialect::Postgres => &PostgresQueryBuilder,
        }
    }

    /// Builder rendering DDL for this dialect.
    pub fn schema_builder(&self) -> &'static dyn SchemaBuilder {
        match self {
            Dialect::Sqlite => &SqliteQueryBuilder,
            Dialect::Postgres => &PostgresQueryBuilder,
        }
    }

    /// Whether single-row tables write through one atomic upsert statement
    /// unless configured otherwise.
    pub fn prefers_native_upsert(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(ConfigError::UnknownDialect(other.to_string())),
        }
    }
}

/// Engine-independent column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    Int,
    Long,
    /// Text bounded to 255 characters, used for identifiers.
    String255,
    Text,
    Bytes,
}

impl SqlType {
    /// Apply this type to a sea-query column definition.
    ///
    /// SQLite booleans are declared `integer`: the `Any` driver cannot decode
    /// columns SQLite reports as `BOOLEAN`.
    pub(crate) fn apply(&self, def: &mut ColumnDef, dialect: Dialect) {
        match self {
            SqlType::Boolean if dialect == Dialect::Sqlite => def.integer(),
            SqlType::Boolean => def.boolean(),
            SqlType::Int => def.integer(),
            SqlType::Long => def.big_integer(),
            SqlType::String255 => def.string_len(255),
            SqlType::Text => def.text(),
            SqlType::Bytes => def.blob(),
        };
    }
}

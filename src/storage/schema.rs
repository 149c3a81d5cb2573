//! Database schema definitions using sea-query.
//!
//! These define the column identifiers for type-safe query building. Table
//! names are not fixed: every aggregate type gets its own set of tables, named
//! by [`TableNames`].

use sea_query::{Iden, Value};

use super::sql::SqlType;

/// Event-record table schema.
#[derive(Iden, Clone, Copy, Debug)]
pub enum EventRecords {
    #[iden = "id"]
    Id,
    #[iden = "payload"]
    Payload,
    #[iden = "kind"]
    Kind,
    #[iden = "version"]
    Version,
    #[iden = "timestamp"]
    Timestamp,
    #[iden = "timestamp_nanos"]
    TimestampNanos,
}

/// Lifecycle-flags table schema.
#[derive(Iden, Clone, Copy, Debug)]
pub enum LifecycleFlagsColumns {
    #[iden = "id"]
    Id,
    #[iden = "archived"]
    Archived,
    #[iden = "deleted"]
    Deleted,
}

/// Event-count table schema.
#[derive(Iden, Clone, Copy, Debug)]
pub enum EventCountColumns {
    #[iden = "id"]
    Id,
    #[iden = "event_count"]
    EventCount,
}

/// Name of the identifier column shared by every table.
pub const ID_COLUMN: &str = "id";

/// Declaration of one table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    name: String,
    /// `None` means the column takes the identifier's SQL type.
    sql_type: Option<SqlType>,
    primary_key: bool,
}

impl ColumnSpec {
    pub fn new(column: impl Iden, sql_type: SqlType) -> Self {
        Self {
            name: Iden::to_string(&column),
            sql_type: Some(sql_type),
            primary_key: false,
        }
    }

    /// The identifier column; its type comes from the table's id strategy.
    pub fn id(column: impl Iden) -> Self {
        Self {
            name: Iden::to_string(&column),
            sql_type: None,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql_type(&self) -> Option<SqlType> {
        self.sql_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Every declared column is `NOT NULL`.
    pub fn is_nullable(&self) -> bool {
        false
    }

    /// Default applied when a write omits this column.
    pub fn default_value(&self) -> Option<Value> {
        column_default(&self.name)
    }
}

/// Defaults for well-known column names.
pub fn column_default(name: &str) -> Option<Value> {
    match name {
        "archived" | "deleted" => Some(false.into()),
        "version" => Some(0i32.into()),
        _ => None,
    }
}

/// Table names for one aggregate type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    base: String,
}

impl TableNames {
    const LIFECYCLE_FLAGS_SUFFIX: &'static str = "_lifecycle_flags";
    const EVENT_COUNT_SUFFIX: &'static str = "_event_count";

    pub fn new(aggregate_name: &str) -> Self {
        Self {
            base: sanitize(aggregate_name),
        }
    }

    /// Derive the names from a Rust type path, e.g. `shop::order::Order`
    /// becomes `shop_order_order`.
    pub fn for_type<A: ?Sized>() -> Self {
        Self::new(std::any::type_name::<A>())
    }

    pub fn event_records(&self) -> String {
        self.base.clone()
    }

    pub fn lifecycle_flags(&self) -> String {
        format!("{}{}", self.base, Self::LIFECYCLE_FLAGS_SUFFIX)
    }

    pub fn event_count(&self) -> String {
        format!("{}{}", self.base, Self::EVENT_COUNT_SUFFIX)
    }
}

fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

//! Identifier normalization.
//!
//! Aggregates may be keyed by `i32`, `i64`, `String` or a structured message.
//! [`IdColumn`] picks one [`IdStrategy`] when a table is built and uses it for
//! every query afterwards: integers and strings pass through unchanged,
//! structured messages are stored as compact JSON.

use std::fmt::Debug;
use std::marker::PhantomData;

use sea_query::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::any::AnyRow;
use sqlx::Row;

use super::cursor::ColumnReader;
use super::sql::SqlType;
use crate::error::{ConfigError, Result, StorageError};
use crate::serializer;

/// Longest identifier text accepted by the `String255` column type.
pub const MAX_ID_LENGTH: usize = 255;

/// Runtime kind of an identifier type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Int,
    Long,
    String,
    Message,
}

impl IdType {
    fn name(&self) -> &'static str {
        match self {
            IdType::Int => "integer",
            IdType::Long => "long",
            IdType::String => "string",
            IdType::Message => "message",
        }
    }
}

/// A storable scalar form of an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdValue {
    Int(i32),
    Long(i64),
    Text(String),
}

/// An identifier type an aggregate can be keyed by.
pub trait EntityId: Clone + Debug + Send + Sync + 'static {
    const ID_TYPE: IdType;

    fn to_id_value(&self) -> Result<IdValue>;

    fn from_id_value(value: IdValue) -> Result<Self>;
}

impl EntityId for i32 {
    const ID_TYPE: IdType = IdType::Int;

    fn to_id_value(&self) -> Result<IdValue> {
        Ok(IdValue::Int(*self))
    }

    fn from_id_value(value: IdValue) -> Result<Self> {
        match value {
            IdValue::Int(v) => Ok(v),
            IdValue::Long(v) => i32::try_from(v)
                .map_err(|_| StorageError::InvalidId(format!("{v} does not fit into i32"))),
            IdValue::Text(v) => Err(StorageError::InvalidId(format!("expected integer, got '{v}'"))),
        }
    }
}

impl EntityId for i64 {
    const ID_TYPE: IdType = IdType::Long;

    fn to_id_value(&self) -> Result<IdValue> {
        Ok(IdValue::Long(*self))
    }

    fn from_id_value(value: IdValue) -> Result<Self> {
        match value {
            IdValue::Int(v) => Ok(i64::from(v)),
            IdValue::Long(v) => Ok(v),
            IdValue::Text(v) => Err(StorageError::InvalidId(format!("expected long, got '{v}'"))),
        }
    }
}

impl EntityId for String {
    const ID_TYPE: IdType = IdType::String;

    fn to_id_value(&self) -> Result<IdValue> {
        Ok(IdValue::Text(self.clone()))
    }

    fn from_id_value(value: IdValue) -> Result<Self> {
        match value {
            IdValue::Text(v) => Ok(v),
            other => Err(StorageError::InvalidId(format!("expected string, got {other:?}"))),
        }
    }
}

/// A structured identifier, stored as its compact JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId<M>(pub M);

impl<M> EntityId for MessageId<M>
where
    M: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static,
{
    const ID_TYPE: IdType = IdType::Message;

    fn to_id_value(&self) -> Result<IdValue> {
        Ok(IdValue::Text(serializer::to_compact_json(&self.0)?))
    }

    fn from_id_value(value: IdValue) -> Result<Self> {
        match value {
            IdValue::Text(json) => Ok(MessageId(serializer::from_json(&json)?)),
            other => Err(StorageError::InvalidId(format!("expected JSON text, got {other:?}"))),
        }
    }
}

/// How an identifier column stores its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    Int,
    Long,
    String,
    Message,
}

impl IdStrategy {
    fn for_type(id_type: IdType) -> Self {
        match id_type {
            IdType::Int => IdStrategy::Int,
            IdType::Long => IdStrategy::Long,
            IdType::String => IdStrategy::String,
            IdType::Message => IdStrategy::Message,
        }
    }

    fn for_declared(declared: SqlType, id_type: IdType) -> std::result::Result<Self, ConfigError> {
        let mismatch = || ConfigError::IdTypeMismatch {
            declared,
            actual: id_type.name(),
        };
        match declared {
            SqlType::Boolean | SqlType::Bytes => Err(ConfigError::UnsupportedIdType(declared)),
            SqlType::Int => match id_type {
                IdType::Int => Ok(IdStrategy::Int),
                _ => Err(mismatch()),
            },
            SqlType::Long => match id_type {
                IdType::Int | IdType::Long => Ok(IdStrategy::Long),
                _ => Err(mismatch()),
            },
            SqlType::String255 | SqlType::Text => match id_type {
                IdType::String => Ok(IdStrategy::String),
                IdType::Message => Ok(IdStrategy::Message),
                _ => Err(mismatch()),
            },
        }
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            IdStrategy::Int => SqlType::Int,
            IdStrategy::Long => SqlType::Long,
            IdStrategy::String | IdStrategy::Message => SqlType::String255,
        }
    }

    fn normalize(&self, value: IdValue) -> Result<Value> {
        match (self, value) {
            (IdStrategy::Int, IdValue::Int(v)) => Ok(v.into()),
            (IdStrategy::Long, IdValue::Int(v)) => Ok(i64::from(v).into()),
            (IdStrategy::Long, IdValue::Long(v)) => Ok(v.into()),
            (IdStrategy::String | IdStrategy::Message, IdValue::Text(v)) => {
                if v.chars().count() > MAX_ID_LENGTH {
                    return Err(StorageError::InvalidId(format!(
                        "identifier longer than {MAX_ID_LENGTH} characters"
                    )));
                }
                Ok(v.into())
            }
            (strategy, value) => Err(StorageError::InvalidId(format!(
                "{value:?} cannot be stored by the {strategy:?} strategy"
            ))),
        }
    }

    fn read(&self, row: &AnyRow, column: &str, id_type: IdType) -> Result<IdValue> {
        match self {
            IdStrategy::Int => Ok(IdValue::Long(row.try_get::<i64, _>(column)?)),
            IdStrategy::Long => {
                let value = row.try_get::<i64, _>(column)?;
                match id_type {
                    IdType::Int => i32::try_from(value).map(IdValue::Int).map_err(|_| {
                        StorageError::InvalidId(format!("{value} does not fit into i32"))
                    }),
                    _ => Ok(IdValue::Long(value)),
                }
            }
            IdStrategy::String | IdStrategy::Message => {
                Ok(IdValue::Text(row.try_get::<String, _>(column)?))
            }
        }
    }
}

/// The identifier column of one table, with its strategy resolved.
#[derive(Debug)]
pub struct IdColumn<I> {
    name: String,
    strategy: IdStrategy,
    _marker: PhantomData<fn() -> I>,
}

impl<I> Clone for IdColumn<I> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            strategy: self.strategy,
            _marker: PhantomData,
        }
    }
}

impl<I: EntityId> IdColumn<I> {
    /// Choose the strategy from the identifier type itself.
    pub fn for_type(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: IdStrategy::for_type(I::ID_TYPE),
            _marker: PhantomData,
        }
    }

    /// Choose the strategy from an explicitly declared column type.
    ///
    /// Fails if the declared type cannot hold identifiers of type `I`.
    pub fn with_declared_type(
        name: impl Into<String>,
        declared: SqlType,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            name: name.into(),
            strategy: IdStrategy::for_declared(declared, I::ID_TYPE)?,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }

    pub fn sql_type(&self) -> SqlType {
        self.strategy.sql_type()
    }

    /// Storable value for `id`.
    pub fn normalize(&self, id: &I) -> Result<Value> {
        self.strategy.normalize(id.to_id_value()?)
    }

    /// Decode an identifier from this column of `row`.
    pub fn read(&self, row: &AnyRow) -> Result<I> {
        let value = self.strategy.read(row, &self.name, I::ID_TYPE)?;
        I::from_id_value(value)
    }
}

impl<I: EntityId> ColumnReader<I> for IdColumn<I> {
    fn read(&self, row: &AnyRow) -> Result<I> {
        IdColumn::read(self, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ProjectId {
        uuid: String,
    }

    #[test]
    fn test_strategy_follows_id_type() {
        assert_eq!(IdColumn::<i32>::for_type("id").strategy(), IdStrategy::Int);
        assert_eq!(IdColumn::<i64>::for_type("id").strategy(), IdStrategy::Long);
        assert_eq!(IdColumn::<String>::for_type("id").strategy(), IdStrategy::String);
        assert_eq!(
            IdColumn::<MessageId<ProjectId>>::for_type("id").strategy(),
            IdStrategy::Message
        );
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(IdColumn::<i32>::for_type("id").sql_type(), SqlType::Int);
        assert_eq!(IdColumn::<i64>::for_type("id").sql_type(), SqlType::Long);
        assert_eq!(IdColumn::<String>::for_type("id").sql_type(), SqlType::String255);
        assert_eq!(
            IdColumn::<MessageId<ProjectId>>::for_type("id").sql_type(),
            SqlType::String255
        );
    }

    #[test]
    fn test_scalar_ids_pass_through() {
        assert_eq!(IdColumn::<i32>::for_type("id").normalize(&7).unwrap(), Value::Int(Some(7)));
        assert_eq!(
            IdColumn::<i64>::for_type("id").normalize(&(1 << 40)).unwrap(),
            Value::BigInt(Some(1 << 40))
        );
        assert_eq!(
            IdColumn::<String>::for_type("id")
                .normalize(&"order-1".to_string())
                .unwrap(),
            Value::from("order-1")
        );
    }

    #[test]
    fn test_message_id_normalizes_to_compact_json() {
        let column = IdColumn::<MessageId<ProjectId>>::for_type("id");
        let id = MessageId(ProjectId {
            uuid: "p-1".to_string(),
        });

        assert_eq!(column.normalize(&id).unwrap(), Value::from(r#"{"uuid":"p-1"}"#));
    }

    #[test]
    fn test_message_id_roundtrips_through_id_value() {
        let id = MessageId(ProjectId {
            uuid: "p-2".to_string(),
        });

        let value = id.to_id_value().unwrap();
        assert_eq!(MessageId::<ProjectId>::from_id_value(value).unwrap(), id);
    }

    #[test]
    fn test_overlong_string_id_is_rejected() {
        let column = IdColumn::<String>::for_type("id");
        let id = "x".repeat(MAX_ID_LENGTH + 1);

        assert!(matches!(column.normalize(&id), Err(StorageError::InvalidId(_))));
        assert!(column.normalize(&"x".repeat(MAX_ID_LENGTH)).is_ok());
    }

    #[test]
    fn test_declared_long_widens_int_ids() {
        let column = IdColumn::<i32>::with_declared_type("id", SqlType::Long).unwrap();

        assert_eq!(column.strategy(), IdStrategy::Long);
        assert_eq!(column.normalize(&5).unwrap(), Value::BigInt(Some(5)));
    }

    #[test]
    fn test_declared_text_keeps_message_encoding() {
        let column =
            IdColumn::<MessageId<ProjectId>>::with_declared_type("id", SqlType::Text).unwrap();
        assert_eq!(column.strategy(), IdStrategy::Message);
    }

    #[test]
    fn test_unsupported_declared_types_fail_fast() {
        assert!(matches!(
            IdColumn::<String>::with_declared_type("id", SqlType::Boolean),
            Err(ConfigError::UnsupportedIdType(SqlType::Boolean))
        ));
        assert!(matches!(
            IdColumn::<i64>::with_declared_type("id", SqlType::Bytes),
            Err(ConfigError::UnsupportedIdType(SqlType::Bytes))
        ));
    }

    #[test]
    fn test_mismatched_declared_types_fail_fast() {
        assert!(matches!(
            IdColumn::<i64>::with_declared_type("id", SqlType::Int),
            Err(ConfigError::IdTypeMismatch { actual: "long", .. })
        ));
        assert!(matches!(
            IdColumn::<String>::with_declared_type("id", SqlType::Long),
            Err(ConfigError::IdTypeMismatch { actual: "string", .. })
        ));
    }

    #[test]
    fn test_int_id_rejects_out_of_range_values() {
        assert!(i32::from_id_value(IdValue::Long(i64::MAX)).is_err());
        assert_eq!(i32::from_id_value(IdValue::Long(12)).unwrap(), 12);
        assert!(String::from_id_value(IdValue::Int(1)).is_err());
    }
}

//! Stored record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use prost_types::{Any, Timestamp};

use crate::error::StorageError;

/// Discriminates events from snapshots in an aggregate's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Event,
    Snapshot,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Event => "EVENT",
            RecordKind::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EVENT" => Ok(RecordKind::Event),
            "SNAPSHOT" => Ok(RecordKind::Snapshot),
            other => Err(StorageError::UnknownRecordKind(other.to_string())),
        }
    }
}

/// One immutable entry of an aggregate's history.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub payload: Any,
    pub kind: RecordKind,
    pub version: i32,
    pub timestamp: Timestamp,
}

impl EventRecord {
    pub fn event(payload: Any, version: i32, timestamp: Timestamp) -> Self {
        Self {
            payload,
            kind: RecordKind::Event,
            version,
            timestamp,
        }
    }

    pub fn snapshot(payload: Any, version: i32, timestamp: Timestamp) -> Self {
        Self {
            payload,
            kind: RecordKind::Snapshot,
            version,
            timestamp,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == RecordKind::Snapshot
    }
}

/// Out-of-band status of an aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleFlags {
    pub archived: bool,
    pub deleted: bool,
}

impl LifecycleFlags {
    pub fn is_active(&self) -> bool {
        !self.archived && !self.deleted
    }
}

/// Current time as a protobuf timestamp.
pub fn now() -> Timestamp {
    to_timestamp(Utc::now())
}

pub fn to_timestamp(time: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: time.timestamp(),
        nanos: time.timestamp_subsec_nanos() as i32,
    }
}

/// Convert back to chrono; `None` if the timestamp is out of range.
pub fn from_timestamp(ts: &Timestamp) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(ts.nanos).ok()?;
    DateTime::from_timestamp(ts.seconds, nanos)
}

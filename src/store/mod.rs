pub mod message_store;
pub mod schema;

pub use message_store::MessageStore;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which pipeline owns a row: ingestion writes `Inbound`, senders write `Outbound`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction `{other}`")),
        }
    }
}

impl ToSql for Direction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Direction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// A row of the `messages` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRow {
    pub message_id: i64,
    pub sender: String,
    pub sender_id: i64,
    pub recipient: Option<String>,
    pub action: String,
    /// JSON text, exactly as stored.
    pub payload: Option<String>,
    pub sent: Option<i64>,
    pub received: i64,
    pub direction: Direction,
    pub processed: bool,
}

#[derive(Debug, Clone)]
pub struct NewInboundMessage {
    pub message_id: i64,
    pub sender: String,
    pub sender_id: i64,
    pub action: String,
    pub payload: serde_json::Value,
    pub sent: i64,
}

#[derive(Debug, Clone)]
pub struct NewOutboundMessage {
    pub message_id: i64,
    pub recipient: String,
    pub sender: String,
    pub sender_id: i64,
    pub action: String,
    pub payload: serde_json::Value,
}

/// A consumer activation slot (a row of the `actions` table).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionSlot {
    pub action: String,
    pub active: bool,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFilter {
    pub direction: Option<Direction>,
    pub unprocessed_only: bool,
}

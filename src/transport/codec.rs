//! Message documents as they appear on disk.
//!
//! Peers write JSON with `", "` and `": "` separators, and the outbound `payload`
//! field carries the stored payload as a JSON *string* (double encoded). Both are
//! part of the wire format and are reproduced here byte for byte.

use crate::error::RelayError;
use crate::store::MessageRow;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::ser::Formatter;
use std::io;
use std::path::Path;

/// Stored payload text used when a row has no payload.
const NULL_PAYLOAD: &str = "null";

/// Compact JSON with a space after every `,` and `:`, and every non-ASCII character
/// escaped as `\uXXXX` (UTF-16 units, lowercase hex).
#[derive(Debug, Clone, Copy, Default)]
struct PeerFormatter;

impl Formatter for PeerFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..i])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PeerFormatter);
    value.serialize(&mut ser).context("encode JSON")?;
    Ok(String::from_utf8(buf)?)
}

/// Schema of a message file dropped into the inbound directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundDocument {
    pub message_id: i64,
    pub sender: String,
    pub sender_id: i64,
    pub action: String,
    pub payload: Value,
    pub sent: i64,
}

/// Schema of a message file written to the outbound directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundDocument {
    pub message_id: i64,
    pub recipient: String,
    pub sender: String,
    pub sender_id: i64,
    pub action: String,
    /// The stored payload JSON text, embedded as a string.
    pub payload: String,
    pub sent: i64,
}

impl OutboundDocument {
    pub fn from_row(row: &MessageRow, sent: i64) -> Result<Self> {
        let recipient = row
            .recipient
            .clone()
            .with_context(|| format!("outbound message {} has no recipient", row.message_id))?;
        Ok(Self {
            message_id: row.message_id,
            recipient,
            sender: row.sender.clone(),
            sender_id: row.sender_id,
            action: row.action.clone(),
            payload: row
                .payload
                .clone()
                .unwrap_or_else(|| NULL_PAYLOAD.to_string()),
            sent,
        })
    }

    /// `<recipient>_<sender_id>`
    pub fn base_name(&self) -> String {
        format!("{}_{}", self.recipient, self.sender_id)
    }

    /// Decode the inner payload string back into a value.
    pub fn payload_value(&self) -> Result<Value> {
        serde_json::from_str(&self.payload)
            .with_context(|| format!("decode payload of message {}", self.message_id))
    }

    pub fn encode(&self) -> Result<String> {
        encode_json(self)
    }
}

/// Decode an inbound message file. Any failure is a [`RelayError::MalformedMessage`].
pub fn decode_inbound(raw: &[u8], path: &Path) -> Result<InboundDocument, RelayError> {
    serde_json::from_slice(raw).map_err(|e| RelayError::MalformedMessage {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

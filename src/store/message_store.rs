use crate::error::RelayError;
use crate::store::{
    ActionSlot, Direction, MessageFilter, MessageRow, NewInboundMessage, NewOutboundMessage,
    schema,
};
use crate::transport::codec;
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

const MESSAGE_COLUMNS: &str = "message_id, sender, sender_id, recipient, action, payload, sent, received, direction, processed";

/// The durable ledger shared by every relay component.
///
/// Each method issues a single statement; nothing here spans a multi-statement
/// transaction, so the pipelines decide their own commit ordering.
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Insert an inbound row. Returns `false` when the same message is already stored,
    /// which happens when a pair is re-read after a crash before archiving.
    ///
    /// The same message means an inbound row with equal `message_id`, `sender` and
    /// `sender_id`. Any other row holding the id is a [`RelayError::MessageIdConflict`].
    pub fn insert_inbound(&self, msg: &NewInboundMessage) -> Result<bool> {
        let payload = codec::encode_json(&msg.payload)?;
        let inserted = self.conn.execute(
            "INSERT INTO messages (message_id, sender, sender_id, action, payload, sent, direction)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(message_id) DO NOTHING",
            params![
                msg.message_id,
                msg.sender,
                msg.sender_id,
                msg.action,
                payload,
                msg.sent,
                Direction::Inbound
            ],
        )?;
        if inserted > 0 {
            return Ok(true);
        }

        let Some(existing) = self.get_message(msg.message_id)? else {
            return Ok(false);
        };
        let redelivery = existing.direction == Direction::Inbound
            && existing.sender == msg.sender
            && existing.sender_id == msg.sender_id;
        if !redelivery {
            return Err(RelayError::MessageIdConflict {
                message_id: msg.message_id,
                existing: format!(
                    "{} row from {} sender_id {}",
                    existing.direction, existing.sender, existing.sender_id
                ),
            }
            .into());
        }
        Ok(false)
    }

    /// Queue an outbound row. `(recipient, sender_id)` names the file pair, so it must be
    /// unique among outbound rows.
    pub fn insert_outbound(&self, msg: &NewOutboundMessage) -> Result<()> {
        let payload = codec::encode_json(&msg.payload)?;
        self.conn
            .execute(
                "INSERT INTO messages (message_id, recipient, sender, sender_id, action, payload, direction)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.message_id,
                    msg.recipient,
                    msg.sender,
                    msg.sender_id,
                    msg.action,
                    payload,
                    Direction::Outbound
                ],
            )
            .with_context(|| {
                format!(
                    "insert outbound message {} (recipient {}, sender_id {})",
                    msg.message_id, msg.recipient, msg.sender_id
                )
            })?;
        Ok(())
    }

    pub fn next_message_id(&self) -> Result<i64> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(message_id) FROM messages", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn get_message(&self, message_id: i64) -> Result<Option<MessageRow>> {
        self.conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![message_id],
                map_message_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Unprocessed rows of one direction, oldest id first.
    pub fn unprocessed(&self, direction: Direction) -> Result<Vec<MessageRow>> {
        self.list_messages(MessageFilter {
            direction: Some(direction),
            unprocessed_only: true,
        })
    }

    pub fn list_messages(&self, filter: MessageFilter) -> Result<Vec<MessageRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (?1 IS NULL OR direction = ?1) AND (?2 = 0 OR processed = 0)
             ORDER BY message_id ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![filter.direction, filter.unprocessed_only],
                map_message_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flip `processed` for one row. Only ever sets it, never clears it.
    pub fn mark_processed(&self, message_id: i64) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE messages SET processed = 1 WHERE message_id = ?1 AND processed = 0",
            params![message_id],
        )?;
        Ok(updated > 0)
    }

    /// Record the emission time and mark one outbound row processed.
    pub fn mark_sent(&self, message_id: i64, sent: i64) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE messages SET sent = ?2, processed = 1
             WHERE message_id = ?1 AND direction = ?3 AND processed = 0",
            params![message_id, sent, Direction::Outbound],
        )?;
        Ok(updated > 0)
    }

    /// Create an activation slot if it does not exist yet. Existing flags are kept.
    pub fn register_action(&self, action: &str, active: bool) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO actions (action, active) VALUES (?1, ?2)
             ON CONFLICT(action) DO NOTHING",
            params![action, active],
        )?;
        Ok(inserted > 0)
    }

    /// Overwrite a slot's payload. Returns `false` when no such slot exists.
    pub fn set_action_payload(&self, action: &str, payload: Option<&str>) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE actions SET payload = ?2 WHERE action = ?1",
            params![action, payload],
        )?;
        Ok(updated > 0)
    }

    pub fn activate_action(&self, action: &str) -> Result<bool> {
        self.set_action_active(action, true)
    }

    pub fn deactivate_action(&self, action: &str) -> Result<bool> {
        self.set_action_active(action, false)
    }

    fn set_action_active(&self, action: &str, active: bool) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE actions SET active = ?2 WHERE action = ?1",
            params![action, active],
        )?;
        Ok(updated > 0)
    }

    /// Unknown actions read as inactive.
    pub fn is_action_active(&self, action: &str) -> Result<bool> {
        let active: Option<bool> = self
            .conn
            .query_row(
                "SELECT active FROM actions WHERE action = ?1",
                params![action],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active.unwrap_or(false))
    }

    pub fn get_action(&self, action: &str) -> Result<Option<ActionSlot>> {
        self.conn
            .query_row(
                "SELECT action, active, payload FROM actions WHERE action = ?1",
                params![action],
                map_action_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_actions(&self) -> Result<Vec<ActionSlot>> {
        let mut stmt = self
            .conn
            .prepare("SELECT action, active, payload FROM actions ORDER BY action ASC")?;
        let rows = stmt
            .query_map([], map_action_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        message_id: row.get(0)?,
        sender: row.get(1)?,
        sender_id: row.get(2)?,
        recipient: row.get(3)?,
        action: row.get(4)?,
        payload: row.get(5)?,
        sent: row.get(6)?,
        received: row.get(7)?,
        direction: row.get(8)?,
        processed: row.get(9)?,
    })
}

fn map_action_row(row: &Row<'_>) -> rusqlite::Result<ActionSlot> {
    Ok(ActionSlot {
        action: row.get(0)?,
        active: row.get(1)?,
        payload: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outbound(message_id: i64) -> NewOutboundMessage {
        NewOutboundMessage {
            message_id,
            recipient: "UnitTest".to_string(),
            sender: "Relay".to_string(),
            sender_id: message_id,
            action: "Consume".to_string(),
            payload: json!({"k": "v"}),
        }
    }

    fn inbound(message_id: i64) -> NewInboundMessage {
        NewInboundMessage {
            message_id,
            sender: "Peer".to_string(),
            sender_id: 7,
            action: "Consume".to_string(),
            payload: json!({"n": 1}),
            sent: 1_700_000_000,
        }
    }

    #[test]
    fn inbound_insert_defaults_received_and_ignores_duplicates() {
        let store = MessageStore::open_in_memory().unwrap();
        assert!(store.insert_inbound(&inbound(10)).unwrap());
        assert!(!store.insert_inbound(&inbound(10)).unwrap());

        let row = store.get_message(10).unwrap().unwrap();
        assert_eq!(row.direction, Direction::Inbound);
        assert!(!row.processed);
        assert!(row.received > 0);
        assert_eq!(row.recipient, None);
        assert_eq!(row.payload.as_deref(), Some("{\"n\": 1}"));
        assert_eq!(store.list_messages(MessageFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn inbound_id_held_by_another_message_is_a_conflict() {
        let store = MessageStore::open_in_memory().unwrap();
        store.insert_outbound(&outbound(1)).unwrap();
        let err = store.insert_inbound(&inbound(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::MessageIdConflict { message_id: 1, .. })
        ));

        store.insert_inbound(&inbound(2)).unwrap();
        let mut other_sender = inbound(2);
        other_sender.sender = "Elsewhere".to_string();
        assert!(store.insert_inbound(&other_sender).is_err());
        let mut other_sender_id = inbound(2);
        other_sender_id.sender_id = 8;
        assert!(store.insert_inbound(&other_sender_id).is_err());

        let row = store.get_message(1).unwrap().unwrap();
        assert_eq!(row.direction, Direction::Outbound);
    }

    #[test]
    fn outbound_pair_name_must_be_unique() {
        let store = MessageStore::open_in_memory().unwrap();
        store.insert_outbound(&outbound(1)).unwrap();
        let mut clash = outbound(2);
        clash.sender_id = 1;
        let err = store.insert_outbound(&clash).unwrap_err();
        assert!(format!("{err:#}").contains("UNIQUE"));
        assert!(store.get_message(2).unwrap().is_none());

        let mut other_recipient = outbound(3);
        other_recipient.sender_id = 1;
        other_recipient.recipient = "Other".to_string();
        store.insert_outbound(&other_recipient).unwrap();
        // Inbound rows do not take part in outbound pair names.
        let mut inbound_row = inbound(4);
        inbound_row.sender_id = 1;
        store.insert_inbound(&inbound_row).unwrap();
    }

    #[test]
    fn unprocessed_is_scoped_by_direction() {
        let store = MessageStore::open_in_memory().unwrap();
        store.insert_outbound(&outbound(1)).unwrap();
        store.insert_inbound(&inbound(2)).unwrap();

        let out = store.unprocessed(Direction::Outbound).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_id, 1);
        let inb = store.unprocessed(Direction::Inbound).unwrap();
        assert_eq!(inb.len(), 1);
        assert_eq!(inb[0].message_id, 2);
    }

    #[test]
    fn mark_sent_touches_only_the_named_row() {
        let store = MessageStore::open_in_memory().unwrap();
        store.insert_outbound(&outbound(1)).unwrap();
        store.insert_outbound(&outbound(2)).unwrap();

        assert!(store.mark_sent(1, 1_700_000_123).unwrap());
        assert!(!store.mark_sent(1, 1_700_000_999).unwrap());

        let first = store.get_message(1).unwrap().unwrap();
        assert!(first.processed);
        assert_eq!(first.sent, Some(1_700_000_123));
        let second = store.get_message(2).unwrap().unwrap();
        assert!(!second.processed);
        assert_eq!(second.sent, None);
    }

    #[test]
    fn action_slots_keep_existing_flags_on_register() {
        let store = MessageStore::open_in_memory().unwrap();
        assert!(store.register_action("Consume", false).unwrap());
        assert!(store.activate_action("Consume").unwrap());
        assert!(!store.register_action("Consume", false).unwrap());
        assert!(store.is_action_active("Consume").unwrap());

        assert!(store.set_action_payload("Consume", Some("{}")).unwrap());
        assert!(!store.set_action_payload("Missing", Some("{}")).unwrap());
        assert!(!store.is_action_active("Missing").unwrap());

        let slot = store.get_action("Consume").unwrap().unwrap();
        assert_eq!(slot.payload.as_deref(), Some("{}"));
        assert_eq!(store.list_actions().unwrap().len(), 1);
    }

    #[test]
    fn next_message_id_follows_the_highest_id() {
        let store = MessageStore::open_in_memory().unwrap();
        assert_eq!(store.next_message_id().unwrap(), 1);
        store.insert_inbound(&inbound(41)).unwrap();
        assert_eq!(store.next_message_id().unwrap(), 42);
    }
}

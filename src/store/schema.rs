use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            message_id INTEGER NOT NULL PRIMARY KEY,
            sender TEXT NOT NULL,
            sender_id INTEGER NOT NULL,
            recipient TEXT,
            action TEXT NOT NULL,
            payload TEXT,
            sent INTEGER,
            received INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER)),
            direction TEXT NOT NULL CHECK(direction IN ('inbound','outbound')),
            processed INTEGER NOT NULL DEFAULT 0 CHECK(processed IN (0, 1))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_direction_processed
            ON messages(direction, processed, message_id);

        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_outbound_pair
            ON messages(recipient, sender_id) WHERE direction = 'outbound';

        CREATE TABLE IF NOT EXISTS actions (
            action TEXT NOT NULL PRIMARY KEY,
            active INTEGER NOT NULL DEFAULT 0 CHECK(active IN (0, 1)),
            payload TEXT
        );
        ",
    )?;

    Ok(())
}

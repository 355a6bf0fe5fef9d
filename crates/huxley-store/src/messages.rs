use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewMessage, StoredMessage};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, ciphertext, nonce, delivered, timestamp";

impl Database {
    /// Persist one encrypted message with `delivered = 0`. Returns the
    /// monotonic row id and the server-assigned timestamp.
    pub fn insert_message(
        &self,
        sender_id: i64,
        recipient_id: i64,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<NewMessage> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO messages (sender_id, recipient_id, ciphertext, nonce, delivered)
             VALUES (?1, ?2, ?3, ?4, 0)
             RETURNING id, timestamp",
        )?;
        let row = stmt.query_row(
            params![sender_id, recipient_id, ciphertext, nonce],
            |row| {
                Ok(NewMessage {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                })
            },
        )?;
        Ok(row)
    }

    /// Undelivered messages for a recipient, ascending by id. Offline
    /// delivery replays these in exactly this order.
    pub fn queued_messages(&self, recipient_id: i64) -> Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE recipient_id = ?1 AND delivered = 0
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![recipient_id], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Both directions of a two-party conversation, newest first.
    pub fn conversation(
        &self,
        user_a: i64,
        user_b: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(params![user_a, user_b, limit, offset], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Flip `delivered` to 1. Idempotent; the flag never goes back to 0.
    pub fn mark_delivered(&self, message_id: i64) -> Result<bool> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("UPDATE messages SET delivered = 1 WHERE id = ?1")?;
        let affected = stmt.execute(params![message_id])?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        ciphertext: row.get(3)?,
        nonce: row.get(4)?,
        delivered: row.get::<_, i64>(5)? != 0,
        timestamp: row.get(6)?,
    })
}

//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `users`, `messages`, and the append-only
//! `logs` audit table, plus the indexes the hot queries lean on.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,                      -- Argon2id PHC string
    created_at    DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_username ON users(username);

-- ----------------------------------------------------------------
-- Messages (ciphertext at rest; tag appended, nonce alongside)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id    INTEGER NOT NULL,
    recipient_id INTEGER NOT NULL,
    ciphertext   BLOB NOT NULL,
    nonce        BLOB NOT NULL,
    delivered    INTEGER NOT NULL DEFAULT 0,          -- boolean 0/1
    timestamp    DATETIME DEFAULT CURRENT_TIMESTAMP,

    FOREIGN KEY (sender_id)    REFERENCES users(id),
    FOREIGN KEY (recipient_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_recipient_delivered
    ON messages(recipient_id, delivered);
CREATE INDEX IF NOT EXISTS idx_sender_timestamp
    ON messages(sender_id, timestamp);

-- ----------------------------------------------------------------
-- Audit log (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS logs (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    level     TEXT NOT NULL,
    log       TEXT NOT NULL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

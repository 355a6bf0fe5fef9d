use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a new user row. Returns `Ok(false)` when the username is
    /// already taken instead of surfacing the unique-constraint violation.
    pub fn insert_user(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("INSERT INTO users (username, password_hash) VALUES (?1, ?2)")?;
        match stmt.execute(params![username, password_hash]) {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(err) => Err(StoreError::Sqlite(err)),
        }
    }

    pub fn find_user(&self, username: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("SELECT password_hash FROM users WHERE username = ?1")?;
        Ok(stmt
            .query_row(params![username], |row| row.get(0))
            .optional()?)
    }

    pub fn find_user_id(&self, username: &str) -> Result<Option<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT id FROM users WHERE username = ?1")?;
        Ok(stmt
            .query_row(params![username], |row| row.get(0))
            .optional()?)
    }

    pub fn find_username(&self, user_id: i64) -> Result<Option<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT username FROM users WHERE id = ?1")?;
        Ok(stmt
            .query_row(params![user_id], |row| row.get(0))
            .optional()?)
    }

    /// All registered usernames in registration order.
    pub fn list_usernames(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT username FROM users ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

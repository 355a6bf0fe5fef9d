//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] behind a mutex
//! and guarantees that pragmas and migrations have run before any other
//! operation. Every worker thread shares one connection; statement reuse
//! goes through the connection's prepared-statement cache, which resets
//! and unbinds statements on every exit path.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

/// 256 MiB mmap hint for the main database file.
const MMAP_SIZE: u64 = 256 * 1024 * 1024;

pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// Configures WAL journaling, NORMAL synchronous, foreign-key
    /// enforcement, the mmap hint, and a 4 KiB page size, then runs schema
    /// migrations. Open and schema failures here are fatal; once this
    /// returns, per-call errors are reported as values.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(&path)?;

        // page_size only takes effect before the first table is written.
        conn.execute_batch(&format!(
            "PRAGMA page_size = 4096;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = {MMAP_SIZE};"
        ))?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Filesystem path of the open database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_configures_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).expect("should open");

        let conn = db.conn();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");

        let fk: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = Database::open(&path).unwrap();
            assert!(db.insert_user("alice", "$argon2id$stub").unwrap());
        }

        let db = Database::open(&path).unwrap();
        assert!(db.find_user("alice").unwrap().is_some());
    }
}

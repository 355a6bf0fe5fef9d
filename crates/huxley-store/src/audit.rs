use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AuditEntry, AuditLevel};

impl Database {
    /// Append to the audit log. Best-effort: a storage failure must never
    /// take down the request path that tried to log, so it is traced and
    /// dropped.
    pub fn log_activity(&self, level: AuditLevel, message: &str) {
        let conn = self.conn();
        let outcome = conn
            .prepare_cached("INSERT INTO logs (level, log) VALUES (?1, ?2)")
            .and_then(|mut stmt| stmt.execute(params![level.as_str(), message]));
        if let Err(err) = outcome {
            tracing::debug!(error = %err, "audit append failed");
        }
    }

    /// Most recent audit entries, newest first. Diagnostic read used by
    /// inspection tooling and tests.
    pub fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, level, log, timestamp FROM logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                level: row.get(1)?,
                message: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

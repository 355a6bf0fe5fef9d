/// One persisted message: ciphertext with the Poly1305 tag appended, plus
/// the 24-byte nonce it was sealed with. Timestamps are the server-assigned
/// `CURRENT_TIMESTAMP` strings straight from SQLite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub delivered: bool,
    pub timestamp: String,
}

/// Row id and server-assigned timestamp handed back by a message insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: i64,
    pub timestamp: String,
}

/// Severity of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditLevel::Info => "INFO",
            AuditLevel::Warn => "WARN",
            AuditLevel::Error => "ERROR",
        }
    }
}

/// One row of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: i64,
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

//! Message routing: realtime fan-out to online recipients, encrypted
//! offline queueing for everyone else.
//!
//! The router owns the active-client table. Its lock is scoped to the map
//! operation itself; connection pointers are copied out before any store or
//! enqueue call so the router never holds its mutex while taking a
//! connection's outbound lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use huxley_store::{AuditLevel, Database};

use crate::connection::ClientState;
use crate::crypto::CryptoEngine;

pub struct MessageRouter {
    db: Arc<Database>,
    crypto: Arc<CryptoEngine>,
    active_clients: Mutex<HashMap<String, Arc<ClientState>>>,
}

impl MessageRouter {
    pub fn new(db: Arc<Database>, crypto: Arc<CryptoEngine>) -> Self {
        Self {
            db,
            crypto,
            active_clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_client(&self, username: &str, state: Arc<ClientState>) {
        self.active_clients
            .lock()
            .insert(username.to_string(), state);
        self.db
            .log_activity(AuditLevel::Info, &format!("Client online: {username}"));
    }

    pub fn unregister_client(&self, username: &str) {
        self.active_clients.lock().remove(username);
        self.db
            .log_activity(AuditLevel::Info, &format!("Client offline: {username}"));
    }

    pub fn is_registered(&self, username: &str) -> bool {
        self.active_clients.lock().contains_key(username)
    }

    /// Encrypt, persist, and deliver one message. True means the message is
    /// durably stored, whether or not the recipient was online to get the
    /// realtime copy.
    pub fn route_message(&self, sender: &str, recipient: &str, plaintext: &str) -> bool {
        let cipher = match self.crypto.encrypt(plaintext.as_bytes()) {
            Ok(cipher) => cipher,
            Err(err) => {
                tracing::error!(error = %err, "message encryption failed");
                return false;
            }
        };

        let ids = (
            self.db.find_user_id(sender),
            self.db.find_user_id(recipient),
        );
        let (sender_id, recipient_id) = match ids {
            (Ok(Some(sender_id)), Ok(Some(recipient_id))) => (sender_id, recipient_id),
            _ => {
                self.db.log_activity(
                    AuditLevel::Warn,
                    "Failed to persist message - unknown user",
                );
                return false;
            }
        };

        let stored = match self.db.insert_message(
            sender_id,
            recipient_id,
            &cipher.ciphertext,
            &cipher.nonce,
        ) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::error!(error = %err, "message insert failed");
                self.db
                    .log_activity(AuditLevel::Error, "Failed to persist message");
                return false;
            }
        };

        let Some(recipient_state) = self.find_active_client(recipient) else {
            return true; // stored for later delivery
        };

        recipient_state.queue_incoming_message(
            sender,
            plaintext,
            Some(&stored.timestamp),
            Some(stored.id),
        );
        if !matches!(self.db.mark_delivered(stored.id), Ok(true)) {
            self.db.log_activity(
                AuditLevel::Error,
                &format!("Failed to mark delivered for message {}", stored.id),
            );
        }
        self.db.log_activity(
            AuditLevel::Info,
            &format!("Queued realtime delivery: {sender} -> {recipient}"),
        );
        true
    }

    /// All registered usernames, as the LIST_USERS payload.
    pub fn list_users(&self) -> Option<Value> {
        match self.db.list_usernames() {
            Ok(names) => Some(json!(names)),
            Err(err) => {
                tracing::error!(error = %err, "user listing failed");
                None
            }
        }
    }

    /// Currently connected usernames, as the LIST_ONLINE payload. Sorted
    /// for stable output.
    pub fn list_online(&self) -> Value {
        let mut names: Vec<String> = self.active_clients.lock().keys().cloned().collect();
        names.sort();
        json!(names)
    }

    /// Assemble the GET_HISTORY payload: both directions between `user`
    /// and `peer`, decrypted server-side, ascending by message id. Rows
    /// that fail authentication are skipped and audited.
    pub fn conversation_history(
        &self,
        user: &str,
        peer: &str,
        limit: u32,
        offset: u32,
    ) -> Option<Value> {
        let user_id = self.db.find_user_id(user).ok()??;
        let peer_id = self.db.find_user_id(peer).ok()??;

        let mut rows = match self.db.conversation(user_id, peer_id, limit, offset) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "conversation read failed");
                return None;
            }
        };
        // stored newest-first for paging; presented ascending
        rows.reverse();

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let plaintext = match self.crypto.decrypt(&row.nonce, &row.ciphertext) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => {
                    self.db.log_activity(
                        AuditLevel::Error,
                        &format!("Failed to decrypt stored message {}", row.id),
                    );
                    continue;
                }
            };
            let (sender, recipient) = if row.sender_id == user_id {
                (user, peer)
            } else {
                (peer, user)
            };
            entries.push(json!({
                "id": row.id,
                "sender": sender,
                "recipient": recipient,
                "content": plaintext,
                "timestamp": row.timestamp,
            }));
        }
        Some(Value::Array(entries))
    }

    fn find_active_client(&self, username: &str) -> Option<Arc<ClientState>> {
        self.active_clients.lock().get(username).cloned()
    }
}

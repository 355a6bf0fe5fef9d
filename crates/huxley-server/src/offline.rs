//! Replay of queued messages when a user comes online.

use huxley_store::{AuditLevel, Database};

use crate::connection::ClientState;
use crate::crypto::CryptoEngine;

/// Decrypt every undelivered message for `username`, enqueue it on the now
/// live connection in ascending id order, and mark it delivered. Rows that
/// fail authentication are skipped and left queued; they stay eligible for
/// a later replay instead of being lost.
pub fn deliver_queued_messages(
    db: &Database,
    crypto: &CryptoEngine,
    username: &str,
    state: &ClientState,
) -> bool {
    let recipient_id = match db.find_user_id(username) {
        Ok(Some(id)) => id,
        _ => {
            db.log_activity(
                AuditLevel::Warn,
                &format!("Offline delivery aborted - unknown user {username}"),
            );
            return false;
        }
    };

    let queued = match db.queued_messages(recipient_id) {
        Ok(rows) => rows,
        Err(err) => {
            tracing::error!(error = %err, username, "queued message read failed");
            return false;
        }
    };
    if queued.is_empty() {
        return true;
    }

    let mut all_marked = true;
    for stored in &queued {
        let plaintext = match crypto.decrypt(&stored.nonce, &stored.ciphertext) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => {
                db.log_activity(
                    AuditLevel::Error,
                    &format!("Failed to decrypt stored message {}", stored.id),
                );
                continue;
            }
        };

        let sender = match db.find_username(stored.sender_id) {
            Ok(Some(name)) => name,
            _ => String::from("unknown"),
        };

        state.queue_incoming_message(&sender, &plaintext, Some(&stored.timestamp), Some(stored.id));
        if !matches!(db.mark_delivered(stored.id), Ok(true)) {
            all_marked = false;
            db.log_activity(
                AuditLevel::Error,
                &format!(
                    "Failed to mark delivered for message {} (recipient: {username})",
                    stored.id
                ),
            );
        }
    }

    if all_marked {
        db.log_activity(
            AuditLevel::Info,
            &format!("Delivered queued messages to {username}"),
        );
    } else {
        db.log_activity(
            AuditLevel::Warn,
            &format!("Delivered queued messages to {username} with pending delivery state errors"),
        );
    }
    all_marked
}

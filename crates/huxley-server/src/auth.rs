//! Password hashing and the active-session set.
//!
//! Verifiers are Argon2id PHC strings with interactive-class costs, checked
//! with the KDF's constant-time comparison. Hashing runs synchronously on
//! the calling worker thread; it is CPU-bound for tens of milliseconds.

use std::collections::HashSet;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use parking_lot::Mutex;

use huxley_store::{AuditLevel, Database};

/// Interactive-class Argon2id costs: 64 MiB, two passes, one lane.
const ARGON2_M_COST_KIB: u32 = 64 * 1024;
const ARGON2_T_COST: u32 = 2;
const ARGON2_P_COST: u32 = 1;

pub struct AuthManager {
    db: Arc<Database>,
    sessions: Mutex<HashSet<String>>,
    hasher: Argon2<'static>,
}

impl AuthManager {
    pub fn new(db: Arc<Database>) -> Self {
        let params =
            Params::new(ARGON2_M_COST_KIB, ARGON2_T_COST, ARGON2_P_COST, None).unwrap_or_default();
        Self {
            db,
            sessions: Mutex::new(HashSet::new()),
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Create a user with a fresh Argon2id verifier. False on empty
    /// credentials, a taken username, or a storage failure.
    pub fn register_user(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        let Some(hash) = self.hash_password(password) else {
            return false;
        };

        match self.db.insert_user(username, &hash) {
            Ok(true) => {
                self.db
                    .log_activity(AuditLevel::Info, &format!("Registered user: {username}"));
                true
            }
            Ok(false) => false,
            Err(err) => {
                tracing::error!(error = %err, username, "user insert failed");
                false
            }
        }
    }

    /// Check credentials and add the user to the active-session set. The
    /// caller guards against the same user logging in from a second
    /// connection before touching any connection state.
    pub fn login_user(&self, username: &str, password: &str) -> bool {
        let stored = match self.db.find_user(username) {
            Ok(Some(hash)) => hash,
            Ok(None) => return false,
            Err(err) => {
                tracing::error!(error = %err, username, "verifier lookup failed");
                return false;
            }
        };
        if !self.verify_password(password, &stored) {
            return false;
        }

        self.sessions.lock().insert(username.to_string());
        self.db
            .log_activity(AuditLevel::Info, &format!("User login: {username}"));
        true
    }

    pub fn logout_user(&self, username: &str) {
        self.sessions.lock().remove(username);
        self.db
            .log_activity(AuditLevel::Info, &format!("User logout: {username}"));
    }

    /// Active-session membership, for protected paths and diagnostics.
    pub fn verify_session(&self, username: &str) -> bool {
        self.sessions.lock().contains(username)
    }

    fn hash_password(&self, password: &str) -> Option<String> {
        let salt = SaltString::generate(&mut OsRng);
        match self.hasher.hash_password(password.as_bytes(), &salt) {
            Ok(hash) => Some(hash.to_string()),
            Err(err) => {
                tracing::error!(error = %err, "password hashing failed");
                None
            }
        }
    }

    fn verify_password(&self, password: &str, stored: &str) -> bool {
        PasswordHash::new(stored)
            .map(|parsed| {
                self.hasher
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth() -> (tempfile::TempDir, AuthManager) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("test.db")).unwrap());
        (dir, AuthManager::new(db))
    }

    #[test]
    fn register_stores_argon2id_verifier() {
        let (_dir, auth) = test_auth();

        assert!(auth.register_user("alice", "pw1"));
        let stored = auth.db.find_user("alice").unwrap().unwrap();
        assert!(stored.starts_with("$argon2id$"));
        // verifier is salted, never the raw password
        assert!(!stored.contains("pw1"));
    }

    #[test]
    fn register_rejects_empty_credentials() {
        let (_dir, auth) = test_auth();

        assert!(!auth.register_user("", "pw"));
        assert!(!auth.register_user("alice", ""));
    }

    #[test]
    fn duplicate_registration_fails() {
        let (_dir, auth) = test_auth();

        assert!(auth.register_user("bob", "pw"));
        assert!(!auth.register_user("bob", "pw"));
    }

    #[test]
    fn login_checks_credentials_and_tracks_session() {
        let (_dir, auth) = test_auth();
        auth.register_user("alice", "pw1");

        assert!(!auth.login_user("alice", "wrong"));
        assert!(!auth.login_user("nobody", "pw1"));
        assert!(!auth.verify_session("alice"));

        assert!(auth.login_user("alice", "pw1"));
        assert!(auth.verify_session("alice"));

        auth.logout_user("alice");
        assert!(!auth.verify_session("alice"));
    }
}

//! Authenticated encryption of message payloads and session-key bootstrap.
//!
//! Messages at rest are sealed with XChaCha20-Poly1305: a fresh random
//! 24-byte nonce per encryption and the 16-byte tag appended to the
//! ciphertext. The 32-byte session key itself lives on disk sealed under a
//! master key; the master key is read once at construction, used to unseal
//! the session key, and wiped. The session key is wiped on drop.

use std::fs;
use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use huxley_shared::constants::{KEY_LEN, NONCE_LEN, SEALED_KEY_LEN, TAG_LEN};

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key file {path}: {reason}")]
    KeyFile { path: String, reason: String },

    #[error("sealed session key rejected")]
    SealedKeyRejected,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}

/// Nonce plus tag-appended ciphertext, exactly as persisted.
#[derive(Debug, Clone)]
pub struct CipherMessage {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

pub struct CryptoEngine {
    session_key: Zeroizing<[u8; KEY_LEN]>,
}

impl CryptoEngine {
    /// Bootstrap from the master key file (exactly 32 raw bytes) and the
    /// sealed session-key blob (24-byte nonce followed by the 48-byte
    /// sealed key). Any size or authentication failure here is fatal.
    pub fn from_key_files(master_path: &Path, sealed_path: &Path) -> Result<Self, CryptoError> {
        let master = Zeroizing::new(read_key_file(master_path)?);

        let sealed = fs::read(sealed_path).map_err(|err| CryptoError::KeyFile {
            path: sealed_path.display().to_string(),
            reason: err.to_string(),
        })?;
        if sealed.len() != NONCE_LEN + SEALED_KEY_LEN {
            return Err(CryptoError::KeyFile {
                path: sealed_path.display().to_string(),
                reason: format!(
                    "expected {} bytes, got {}",
                    NONCE_LEN + SEALED_KEY_LEN,
                    sealed.len()
                ),
            });
        }
        let (nonce, blob) = sealed.split_at(NONCE_LEN);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&master[..]));
        let mut unsealed = cipher
            .decrypt(XNonce::from_slice(nonce), blob)
            .map_err(|_| CryptoError::SealedKeyRejected)?;
        if unsealed.len() != KEY_LEN {
            unsealed.zeroize();
            return Err(CryptoError::SealedKeyRejected);
        }

        let mut session_key = Zeroizing::new([0u8; KEY_LEN]);
        session_key.copy_from_slice(&unsealed);
        unsealed.zeroize();

        tracing::info!("session key unsealed");
        Ok(Self { session_key })
    }

    /// Build an engine around a raw session key. Used by the provisioning
    /// tooling and tests; the daemon itself always goes through
    /// [`CryptoEngine::from_key_files`].
    pub fn from_session_key(key: [u8; KEY_LEN]) -> Self {
        Self {
            session_key: Zeroizing::new(key),
        }
    }

    /// Seal a plaintext under the session key with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<CipherMessage, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.session_key[..]));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(CipherMessage { nonce, ciphertext })
    }

    /// Open a stored message. Size violations and tag mismatches both come
    /// back as [`CryptoError::DecryptionFailed`]; callers decide whether to
    /// skip the row or surface the failure.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_LEN || ciphertext.len() < TAG_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.session_key[..]));
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

fn read_key_file(path: &Path) -> Result<[u8; KEY_LEN], CryptoError> {
    let mut bytes = fs::read(path).map_err(|err| CryptoError::KeyFile {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    if bytes.len() != KEY_LEN {
        bytes.zeroize();
        return Err(CryptoError::KeyFile {
            path: path.display().to_string(),
            reason: format!("expected exactly {KEY_LEN} bytes, got {}", bytes.len()),
        });
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(key)
}

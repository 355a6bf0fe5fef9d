/// Size of the big-endian length prefix on every frame
pub const FRAME_HEADER_LEN: usize = 4;

/// Maximum frame payload size in bytes (64 KiB). Anything larger is a
/// protocol violation and the connection is closed.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag size in bytes (appended to the ciphertext)
pub const TAG_LEN: usize = 16;

/// Symmetric key size in bytes
pub const KEY_LEN: usize = 32;

/// Sealed session-key blob size: 16-byte tag + 32-byte key
pub const SEALED_KEY_LEN: usize = TAG_LEN + KEY_LEN;

/// Default TCP listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default page size for GET_HISTORY
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

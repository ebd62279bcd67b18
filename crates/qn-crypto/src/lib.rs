//! qn-crypto: versioned protocol operators
//!
//! Key hierarchy:
//! ```text
//! Root key (password-derived: PBKDF2 for 001-003, Argon2id for 004)
//!   ├── 001-003: wraps a random per-item key directly (AES-CBC + HMAC-SHA256)
//!   └── 004: wraps items keys (XChaCha20-Poly1305); items keys wrap the
//!       random per-item key that encrypts content
//! ```
//!
//! Each operator implements derivation, item encryption, and item decryption
//! for one protocol version. The registry memoizes operator instances and is
//! the only construction path the service layer uses.

pub mod operator;
pub mod primitives;
pub mod registry;
pub mod root_key;
pub mod v001;
pub mod v002;
pub mod v003;
pub mod v004;

pub use operator::{
    EncryptedItem, EncryptionKey, PayloadFormat, ProtocolOperator,
};
pub use registry::OperatorRegistry;
pub use root_key::{KeyParams, RootKey};

/// Size of a binary key in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit).
pub const NONCE_SIZE: usize = 24;

/// Size of an AES-CBC initialization vector.
pub const IV_SIZE: usize = 16;

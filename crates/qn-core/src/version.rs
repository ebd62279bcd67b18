//! Protocol versions 001–004 with total ordering and expiry policy.
//!
//! Expired versions remain decryptable forever; they are refused for new
//! encryption at the service layer. Versions newer than this library are
//! refused outright.

use serde::{Deserialize, Serialize};

use crate::time::UnixMillis;

/// Encryption protocol version of a payload or root key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ProtocolVersion {
    #[serde(rename = "001")]
    V001,
    #[serde(rename = "002")]
    V002,
    #[serde(rename = "003")]
    V003,
    #[serde(rename = "004")]
    V004,
}

/// Newest version this library can produce.
pub const LIBRARY_VERSION: ProtocolVersion = ProtocolVersion::V004;

/// Last version where per-item keys derive from the root key and no
/// separate ItemsKey entity exists.
pub const LAST_NONROOT_ITEMS_KEY_VERSION: ProtocolVersion = ProtocolVersion::V003;

// 2018-01-01T00:00:00Z and 2020-01-01T00:00:00Z
const V001_EXPIRY_MS: UnixMillis = 1_514_764_800_000;
const V002_EXPIRY_MS: UnixMillis = 1_577_836_800_000;

impl ProtocolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V001 => "001",
            ProtocolVersion::V002 => "002",
            ProtocolVersion::V003 => "003",
            ProtocolVersion::V004 => "004",
        }
    }

    /// Parse from the three-character prefix of a versioned string.
    pub fn from_prefix(s: &str) -> Option<Self> {
        match s.get(0..3)? {
            "001" => Some(ProtocolVersion::V001),
            "002" => Some(ProtocolVersion::V002),
            "003" => Some(ProtocolVersion::V003),
            "004" => Some(ProtocolVersion::V004),
            _ => None,
        }
    }

    /// Whether this version has passed its sunset date at `now`.
    ///
    /// Expired versions decrypt but are refused for new encryption.
    pub fn is_expired(self, now: UnixMillis) -> bool {
        match self {
            ProtocolVersion::V001 => now >= V001_EXPIRY_MS,
            ProtocolVersion::V002 => now >= V002_EXPIRY_MS,
            ProtocolVersion::V003 | ProtocolVersion::V004 => false,
        }
    }

    pub fn is_newer_than_library(self) -> bool {
        self > LIBRARY_VERSION
    }

    /// An account at this version can upgrade if a newer, non-expired
    /// version exists in the library.
    pub fn upgrade_available(self) -> bool {
        self < LIBRARY_VERSION
    }

    /// Whether per-item keys at this version are wrapped by the root key
    /// (no separate ItemsKey entity).
    pub fn uses_root_key_for_items(self) -> bool {
        self <= LAST_NONROOT_ITEMS_KEY_VERSION
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

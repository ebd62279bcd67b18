//! Device contracts supplied by the host: raw key-value storage and the
//! platform keychain.
//!
//! The keychain implementation uses the `keyring` crate for cross-platform
//! access (macOS Keychain Services, Linux Secret Service, Windows Credential
//! Manager). Tests and headless hosts use the in-memory variants.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{QnError, QnResult};

const SERVICE_NAME: &str = "quillnotes";

/// Raw string-keyed storage supplied by the host (disk, browser storage, …).
///
/// The storage façade layers its wrapped/nonwrapped value domains on top of
/// this; values at this level are opaque strings.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> QnResult<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> QnResult<()>;
    fn remove(&mut self, key: &str) -> QnResult<()>;
    /// All keys currently present, unordered.
    fn keys(&self) -> QnResult<Vec<String>>;
    /// Remove every key. Used by the ephemeral persistence policy and
    /// sign-out.
    fn clear(&mut self) -> QnResult<()>;
}

/// OS keychain holding the plaintext root key when no wrapper is set.
pub trait Keychain {
    fn get_value(&self) -> QnResult<Option<SecretString>>;
    fn set_value(&mut self, value: &SecretString) -> QnResult<()>;
    fn clear_value(&mut self) -> QnResult<()>;
}

// ── In-memory implementations ─────────────────────────────────────────────────

/// HashMap-backed store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: HashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> QnResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> QnResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> QnResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> QnResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn clear(&mut self) -> QnResult<()> {
        self.entries.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKeychain {
    value: Option<SecretString>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn get_value(&self) -> QnResult<Option<SecretString>> {
        Ok(self.value.clone())
    }

    fn set_value(&mut self, value: &SecretString) -> QnResult<()> {
        self.value = Some(value.clone());
        Ok(())
    }

    fn clear_value(&mut self) -> QnResult<()> {
        self.value = None;
        Ok(())
    }
}

// ── Platform keychain ─────────────────────────────────────────────────────────

/// Keychain entry scoped to an account namespace (one entry per namespace).
pub struct PlatformKeychain {
    namespace: String,
}

impl PlatformKeychain {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn entry(&self) -> QnResult<keyring::Entry> {
        keyring::Entry::new(SERVICE_NAME, &self.namespace)
            .map_err(|e| QnError::Keychain(format!("entry creation: {e}")))
    }
}

impl Keychain for PlatformKeychain {
    fn get_value(&self) -> QnResult<Option<SecretString>> {
        match self.entry()?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::new(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(QnError::Keychain(format!(
                "get for '{}': {e}",
                self.namespace
            ))),
        }
    }

    fn set_value(&mut self, value: &SecretString) -> QnResult<()> {
        self.entry()?
            .set_password(value.expose_secret())
            .map_err(|e| QnError::Keychain(format!("store for '{}': {e}", self.namespace)))?;
        tracing::debug!(namespace = %self.namespace, "stored root key in platform keychain");
        Ok(())
    }

    fn clear_value(&mut self) -> QnResult<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => {
                tracing::debug!(namespace = %self.namespace, "cleared platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()), // already cleared
            Err(e) => Err(QnError::Keychain(format!(
                "delete for '{}': {e}",
                self.namespace
            ))),
        }
    }
}

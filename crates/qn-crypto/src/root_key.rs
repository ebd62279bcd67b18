//! Root key material and the portable key params that re-derive it.
//!
//! The root key lives in RAM only; the persisted form is a version-stamped
//! content record, wrapped at rest when a passcode is set. Key material is
//! hex-encoded, zeroized on drop, and redacted from Debug output.

use anyhow::Result;
use qn_core::{ProtocolVersion, QnError, QnResult};
use qn_model::{ItemContent, ItemsKeyContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

/// Password-derived key pair: master key plus, for versions ≤ 003, a data
/// authentication key.
#[derive(Clone)]
pub struct RootKey {
    master_key: Zeroizing<String>,
    data_authentication_key: Option<Zeroizing<String>>,
    version: ProtocolVersion,
}

impl RootKey {
    pub fn new(
        master_key: String,
        data_authentication_key: Option<String>,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            master_key: Zeroizing::new(master_key),
            data_authentication_key: data_authentication_key.map(Zeroizing::new),
            version,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn master_key_hex(&self) -> &str {
        &self.master_key
    }

    pub fn data_authentication_key_hex(&self) -> Option<&str> {
        self.data_authentication_key.as_ref().map(|k| k.as_str())
    }

    /// Two root keys are interchangeable if their material and version match.
    pub fn matches(&self, other: &RootKey) -> bool {
        self.version == other.version
            && *self.master_key == *other.master_key
            && self.data_authentication_key_hex() == other.data_authentication_key_hex()
    }

    /// Persisted content form (wrapped at rest or kept in the keychain).
    pub fn to_content(&self) -> ItemContent {
        let mut content = ItemContent::new();
        content.set_extra("master_key", Value::String(self.master_key.to_string()));
        if let Some(dak) = &self.data_authentication_key {
            content.set_extra(
                "data_authentication_key",
                Value::String(dak.to_string()),
            );
        }
        content.set_extra(
            "version",
            serde_json::to_value(self.version).expect("version serializes"),
        );
        content
    }

    pub fn from_content(content: &ItemContent) -> QnResult<Self> {
        let master_key = content
            .get_extra_str("master_key")
            .ok_or_else(|| QnError::StorageReadError("root key content missing master_key".into()))?
            .to_string();
        let dak = content
            .get_extra_str("data_authentication_key")
            .map(str::to_string);
        let version: ProtocolVersion = content
            .extra
            .get("version")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| QnError::StorageReadError("root key content missing version".into()))?;
        Ok(Self::new(master_key, dak, version))
    }

    /// Serialized keychain form.
    pub fn to_keychain_string(&self) -> String {
        serde_json::to_value(self.to_content())
            .expect("root key content serializes")
            .to_string()
    }

    pub fn from_keychain_string(raw: &str) -> QnResult<Self> {
        let content: ItemContent = serde_json::from_str(raw)
            .map_err(|e| QnError::StorageReadError(format!("keychain root key: {e}")))?;
        Self::from_content(&content)
    }

    /// Items-key content mirroring this root key, used for versions ≤ 003
    /// where per-item keys derive from the root key and no independent items
    /// key exists.
    pub fn mirrored_items_key_content(&self) -> ItemsKeyContent {
        ItemsKeyContent {
            items_key: self.master_key.to_string(),
            data_authentication_key: self
                .data_authentication_key_hex()
                .map(str::to_string),
            version: self.version,
            is_default: false,
        }
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("version", &self.version)
            .field("master_key", &"[REDACTED]")
            .field("data_authentication_key", &"[REDACTED]")
            .finish()
    }
}

/// Portable descriptor needed to re-derive a root key from a password.
///
/// Two independent slots exist at the account level: the account key params
/// and the wrapper (passcode) key params. Sent to the server for login
/// derivation and bundled into backup files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw_cost: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw_salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw_nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub version: ProtocolVersion,
}

impl KeyParams {
    pub fn salt(&self) -> Result<&str> {
        self.pw_salt
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("key params missing pw_salt"))
    }

    pub fn nonce(&self) -> Result<&str> {
        self.pw_nonce
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("key params missing pw_nonce"))
    }

    pub fn cost(&self) -> Result<u32> {
        self.pw_cost
            .ok_or_else(|| anyhow::anyhow!("key params missing pw_cost"))
    }
}

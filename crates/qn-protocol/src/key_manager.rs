//! The key-mode state machine governing the root key, the optional
//! passcode-derived wrapping key, and their at-rest placement.
//!
//! ```text
//!         register / sign-in                  set passcode
//! None ────────────────────────► RootKeyOnly ───────────────► RootKeyPlusWrapper
//!  │ set passcode                     ▲ remove passcode           │ remove passcode
//!  ▼                                  │                           ▼
//! WrapperOnly ────────────────────(same)                      RootKeyOnly
//! ```
//!
//! Placement invariants:
//! - `RootKeyOnly`: plaintext root key in the OS keychain, nothing wrapped.
//! - `WrapperOnly`: no account; the wrapping key *is* the root key and
//!   storage itself is encrypted with it.
//! - `RootKeyPlusWrapper`: root key in app storage wrapped by the passcode
//!   key; keychain cleared.
//! - `None`: no crypto state, plaintext storage.

use qn_core::device::Keychain;
use qn_core::{ContentType, QnError, QnResult};
use qn_crypto::{EncryptionKey, KeyParams, OperatorRegistry, PayloadFormat, RootKey};
use qn_model::{ItemMutator, ItemStore, MutationType, Payload, PayloadSource};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::storage::{StorageFacade, StorageValueMode};

pub(crate) const KEY_ROOT_KEY_PARAMS: &str = "root_key_params";
pub(crate) const KEY_WRAPPER_KEY_PARAMS: &str = "root_key_wrapper_key_params";
pub(crate) const KEY_WRAPPED_ROOT_KEY: &str = "wrapped_root_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    None,
    RootKeyOnly,
    WrapperOnly,
    RootKeyPlusWrapper,
}

impl std::fmt::Display for KeyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyMode::None => "none",
            KeyMode::RootKeyOnly => "root-key-only",
            KeyMode::WrapperOnly => "wrapper-only",
            KeyMode::RootKeyPlusWrapper => "root-key-plus-wrapper",
        };
        f.write_str(s)
    }
}

pub struct KeyManager {
    mode: KeyMode,
    root_key: Option<RootKey>,
    keychain: Box<dyn Keychain>,
}

impl KeyManager {
    pub fn new(keychain: Box<dyn Keychain>) -> Self {
        Self {
            mode: KeyMode::None,
            root_key: None,
            keychain,
        }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    pub fn root_key(&self) -> Option<&RootKey> {
        self.root_key.as_ref()
    }

    pub fn has_account(&self, storage: &StorageFacade) -> bool {
        self.account_key_params(storage).is_some()
    }

    pub fn account_key_params(&self, storage: &StorageFacade) -> Option<KeyParams> {
        storage
            .peek_value(KEY_ROOT_KEY_PARAMS, StorageValueMode::Nonwrapped)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn wrapper_key_params(&self, storage: &StorageFacade) -> Option<KeyParams> {
        storage
            .peek_value(KEY_WRAPPER_KEY_PARAMS, StorageValueMode::Nonwrapped)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    fn wrapped_root_key_payload(&self, storage: &StorageFacade) -> Option<Payload> {
        storage
            .peek_value(KEY_WRAPPED_ROOT_KEY, StorageValueMode::Nonwrapped)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Recompute the key mode from persisted state; called on load, before
    /// any unlock challenge runs.
    pub fn compute_mode_on_load(&mut self, storage: &StorageFacade) -> QnResult<KeyMode> {
        let has_wrapper = self.wrapper_key_params(storage).is_some();
        let has_wrapped_root = self.wrapped_root_key_payload(storage).is_some();
        let has_account = self.account_key_params(storage).is_some();

        self.mode = match (has_wrapper, has_wrapped_root, has_account) {
            (true, true, _) => KeyMode::RootKeyPlusWrapper,
            (true, false, _) => KeyMode::WrapperOnly,
            (false, _, true) => KeyMode::RootKeyOnly,
            (false, _, false) => KeyMode::None,
        };

        if self.mode == KeyMode::RootKeyOnly {
            if let Some(value) = self.keychain.get_value()? {
                self.root_key = Some(RootKey::from_keychain_string(value.expose_secret())?);
            }
        }
        debug!(mode = %self.mode, "computed key mode on load");
        Ok(self.mode)
    }

    fn wrap_root_key(
        root_key: &RootKey,
        wrapping_key: &RootKey,
        registry: &mut OperatorRegistry,
    ) -> QnResult<Payload> {
        let payload = Payload::new_decrypted(ContentType::RootKey, root_key.to_content());
        let operator = registry.operator_for(wrapping_key.version())?;
        operator.encrypt_parameters(
            &payload,
            Some(&EncryptionKey::Root(wrapping_key)),
            PayloadFormat::EncryptedString,
        )
    }

    fn try_unwrap(
        wrapped: &Payload,
        wrapping_key: &RootKey,
        registry: &mut OperatorRegistry,
    ) -> QnResult<RootKey> {
        let version = wrapped
            .content_version()
            .ok_or(QnError::WrappingKeyInvalid)?;
        let operator = registry.operator_for(version)?;
        let content = operator
            .decrypt_item(wrapped, &EncryptionKey::Root(wrapping_key))
            .map_err(|_| QnError::WrappingKeyInvalid)?;
        RootKey::from_content(&content)
    }

    /// Unlock with a passcode-derived key. Valid only in `WrapperOnly` and
    /// `RootKeyPlusWrapper`.
    pub fn unwrap_root_key(
        &mut self,
        wrapping_key: &RootKey,
        registry: &mut OperatorRegistry,
        storage: &StorageFacade,
    ) -> QnResult<()> {
        match self.mode {
            KeyMode::WrapperOnly => {
                // The wrapping key is the root key.
                self.root_key = Some(wrapping_key.clone());
                Ok(())
            }
            KeyMode::RootKeyPlusWrapper => {
                let wrapped = self
                    .wrapped_root_key_payload(storage)
                    .ok_or(QnError::WrappingKeyInvalid)?;
                self.root_key = Some(Self::try_unwrap(&wrapped, wrapping_key, registry)?);
                Ok(())
            }
            other => Err(QnError::InvalidKeyMode {
                mode: other.to_string(),
            }),
        }
    }

    /// Verify a candidate wrapping key without mutating state: decrypt the
    /// wrapped root key, or in `WrapperOnly` the encrypted storage blob.
    pub fn validate_wrapping_key(
        &self,
        candidate: &RootKey,
        registry: &mut OperatorRegistry,
        storage: &StorageFacade,
    ) -> QnResult<bool> {
        match self.mode {
            KeyMode::RootKeyPlusWrapper => {
                let wrapped = self
                    .wrapped_root_key_payload(storage)
                    .ok_or(QnError::WrappingKeyInvalid)?;
                Ok(Self::try_unwrap(&wrapped, candidate, registry).is_ok())
            }
            KeyMode::WrapperOnly => {
                if let Some(encrypted) = storage.encrypted_wrapped_payload() {
                    let version = encrypted
                        .content_version()
                        .ok_or(QnError::WrappingKeyInvalid)?;
                    let operator = registry.operator_for(version)?;
                    Ok(operator
                        .decrypt_item(encrypted, &EncryptionKey::Root(candidate))
                        .is_ok())
                } else if let Some(root) = &self.root_key {
                    Ok(root.matches(candidate))
                } else {
                    Ok(false)
                }
            }
            other => Err(QnError::InvalidKeyMode {
                mode: other.to_string(),
            }),
        }
    }

    /// Install a new account root key: transition mode, persist params,
    /// persist either the wrapped form (wrapper present) or the plaintext
    /// keychain value, and mark every items key dirty so the next sync
    /// re-uploads them under the new root key.
    pub fn set_new_root_key(
        &mut self,
        key: RootKey,
        key_params: &KeyParams,
        wrapping_key: Option<&RootKey>,
        registry: &mut OperatorRegistry,
        storage: &mut StorageFacade,
        store: &mut ItemStore,
    ) -> QnResult<()> {
        let wrapper_expected = matches!(
            self.mode,
            KeyMode::WrapperOnly | KeyMode::RootKeyPlusWrapper
        );
        if wrapper_expected != wrapping_key.is_some() {
            return Err(QnError::InvalidKeyMode {
                mode: self.mode.to_string(),
            });
        }

        storage.poke_value(
            KEY_ROOT_KEY_PARAMS,
            serde_json::to_value(key_params)
                .map_err(|e| QnError::StorageWriteError(e.to_string()))?,
            StorageValueMode::Nonwrapped,
        );

        match wrapping_key {
            Some(wrapper) => {
                let wrapped = Self::wrap_root_key(&key, wrapper, registry)?;
                storage.poke_value(
                    KEY_WRAPPED_ROOT_KEY,
                    serde_json::to_value(&wrapped)
                        .map_err(|e| QnError::StorageWriteError(e.to_string()))?,
                    StorageValueMode::Nonwrapped,
                );
                self.keychain.clear_value()?;
                self.mode = KeyMode::RootKeyPlusWrapper;
            }
            None => {
                self.keychain
                    .set_value(&SecretString::new(key.to_keychain_string()))?;
                storage.purge_value(KEY_WRAPPED_ROOT_KEY, StorageValueMode::Nonwrapped);
                self.mode = KeyMode::RootKeyOnly;
            }
        }
        self.root_key = Some(key);

        mark_items_keys_dirty(store);
        debug!(mode = %self.mode, "installed new root key");
        Ok(())
    }

    /// Add a passcode wrapper. From `None` the wrapping key becomes the root
    /// key; from `RootKeyOnly` the account root key moves from the keychain
    /// into wrapped app storage.
    pub fn set_passcode(
        &mut self,
        wrapping_key: &RootKey,
        wrapper_params: &KeyParams,
        registry: &mut OperatorRegistry,
        storage: &mut StorageFacade,
        store: &mut ItemStore,
    ) -> QnResult<()> {
        match self.mode {
            KeyMode::None => {
                self.persist_wrapper_params(wrapper_params, storage)?;
                self.root_key = Some(wrapping_key.clone());
                self.mode = KeyMode::WrapperOnly;
            }
            KeyMode::RootKeyOnly => {
                let root = self
                    .root_key
                    .clone()
                    .ok_or_else(|| QnError::KeyMissing {
                        operation: "wrap root key".into(),
                    })?;
                self.persist_wrapper_params(wrapper_params, storage)?;
                let wrapped = Self::wrap_root_key(&root, wrapping_key, registry)?;
                storage.poke_value(
                    KEY_WRAPPED_ROOT_KEY,
                    serde_json::to_value(&wrapped)
                        .map_err(|e| QnError::StorageWriteError(e.to_string()))?,
                    StorageValueMode::Nonwrapped,
                );
                self.keychain.clear_value()?;
                self.mode = KeyMode::RootKeyPlusWrapper;
            }
            other => {
                // Wrapping an already-wrapped key is a programmer error.
                return Err(QnError::InvalidKeyMode {
                    mode: other.to_string(),
                });
            }
        }
        mark_items_keys_dirty(store);
        debug!(mode = %self.mode, "passcode set");
        Ok(())
    }

    /// Remove the passcode wrapper. The caller has already validated the
    /// passcode challenge.
    pub fn remove_passcode(&mut self, storage: &mut StorageFacade) -> QnResult<()> {
        match self.mode {
            KeyMode::WrapperOnly => {
                storage.purge_value(KEY_WRAPPER_KEY_PARAMS, StorageValueMode::Nonwrapped);
                self.root_key = None;
                self.mode = KeyMode::None;
            }
            KeyMode::RootKeyPlusWrapper => {
                let root = self.root_key.as_ref().ok_or_else(|| QnError::KeyMissing {
                    operation: "unwrap before passcode removal".into(),
                })?;
                self.keychain
                    .set_value(&SecretString::new(root.to_keychain_string()))?;
                storage.purge_value(KEY_WRAPPED_ROOT_KEY, StorageValueMode::Nonwrapped);
                storage.purge_value(KEY_WRAPPER_KEY_PARAMS, StorageValueMode::Nonwrapped);
                self.mode = KeyMode::RootKeyOnly;
            }
            other => {
                return Err(QnError::InvalidKeyMode {
                    mode: other.to_string(),
                });
            }
        }
        debug!(mode = %self.mode, "passcode removed");
        Ok(())
    }

    /// Swap the wrapper key params in place during a protocol upgrade; the
    /// mode must already have a wrapper. The caller re-wraps the root key
    /// through `set_new_root_key` afterwards.
    pub fn replace_wrapper_params(
        &mut self,
        wrapper_params: &KeyParams,
        storage: &mut StorageFacade,
    ) -> QnResult<()> {
        if !matches!(
            self.mode,
            KeyMode::WrapperOnly | KeyMode::RootKeyPlusWrapper
        ) {
            return Err(QnError::InvalidKeyMode {
                mode: self.mode.to_string(),
            });
        }
        self.persist_wrapper_params(wrapper_params, storage)
    }

    fn persist_wrapper_params(
        &mut self,
        wrapper_params: &KeyParams,
        storage: &mut StorageFacade,
    ) -> QnResult<()> {
        storage.poke_value(
            KEY_WRAPPER_KEY_PARAMS,
            serde_json::to_value(wrapper_params)
                .map_err(|e| QnError::StorageWriteError(e.to_string()))?,
            StorageValueMode::Nonwrapped,
        );
        Ok(())
    }

    /// Sign-out: drop the root key, clear the keychain and every persisted
    /// key artifact.
    pub fn clear(&mut self, storage: &mut StorageFacade) -> QnResult<()> {
        self.keychain.clear_value()?;
        self.root_key = None;
        self.mode = KeyMode::None;
        storage.purge_value(KEY_ROOT_KEY_PARAMS, StorageValueMode::Nonwrapped);
        storage.purge_value(KEY_WRAPPER_KEY_PARAMS, StorageValueMode::Nonwrapped);
        storage.purge_value(KEY_WRAPPED_ROOT_KEY, StorageValueMode::Nonwrapped);
        Ok(())
    }

    /// Test hook: what the keychain currently holds.
    pub fn keychain_value(&self) -> QnResult<Option<SecretString>> {
        self.keychain.get_value()
    }
}

/// Dirty every non-deleted items key so the next sync re-uploads them under
/// the new key material.
fn mark_items_keys_dirty(store: &mut ItemStore) {
    let dirtied: Vec<Payload> = store
        .of_type(ContentType::ItemsKey)
        .into_iter()
        .map(|item| {
            ItemMutator::new_from_payload(
                item.payload().clone(),
                MutationType::Internal,
            )
            .finish()
        })
        .collect();
    if !dirtied.is_empty() {
        store.apply(dirtied, PayloadSource::LocalChanged);
    }
}

//! Encryption intents and the enforced intent→format table.

use qn_core::{QnError, QnResult};
use qn_crypto::PayloadFormat;

/// Why a payload copy is being produced; decides its output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionIntent {
    Sync,
    SyncDecrypted,
    LocalStorageEncrypted,
    LocalStoragePreferEncrypted,
    LocalStorageDecrypted,
    FileEncrypted,
    FilePreferEncrypted,
    FileDecrypted,
}

impl EncryptionIntent {
    /// Resolve the output format given key availability. Intents that
    /// require a key fail with `KeyMissing` when none is available.
    pub fn format(self, key_available: bool) -> QnResult<PayloadFormat> {
        match self {
            EncryptionIntent::Sync
            | EncryptionIntent::LocalStorageEncrypted
            | EncryptionIntent::FileEncrypted => {
                if key_available {
                    Ok(PayloadFormat::EncryptedString)
                } else {
                    Err(QnError::KeyMissing {
                        operation: format!("{self:?}"),
                    })
                }
            }
            EncryptionIntent::SyncDecrypted => Ok(PayloadFormat::DecryptedBase64String),
            EncryptionIntent::LocalStoragePreferEncrypted
            | EncryptionIntent::FilePreferEncrypted => Ok(if key_available {
                PayloadFormat::EncryptedString
            } else {
                PayloadFormat::DecryptedBareObject
            }),
            EncryptionIntent::LocalStorageDecrypted | EncryptionIntent::FileDecrypted => {
                Ok(PayloadFormat::DecryptedBareObject)
            }
        }
    }

    /// Whether payloads under this intent may leave the device.
    pub fn is_outbound(self) -> bool {
        matches!(self, EncryptionIntent::Sync | EncryptionIntent::SyncDecrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_key_intents_fail_without_key() {
        for intent in [
            EncryptionIntent::Sync,
            EncryptionIntent::LocalStorageEncrypted,
            EncryptionIntent::FileEncrypted,
        ] {
            assert!(matches!(
                intent.format(false),
                Err(QnError::KeyMissing { .. })
            ));
            assert_eq!(intent.format(true).unwrap(), PayloadFormat::EncryptedString);
        }
    }

    #[test]
    fn test_prefer_encrypted_falls_back() {
        assert_eq!(
            EncryptionIntent::LocalStoragePreferEncrypted.format(true).unwrap(),
            PayloadFormat::EncryptedString
        );
        assert_eq!(
            EncryptionIntent::LocalStoragePreferEncrypted.format(false).unwrap(),
            PayloadFormat::DecryptedBareObject
        );
    }

    #[test]
    fn test_decrypted_intents() {
        assert_eq!(
            EncryptionIntent::SyncDecrypted.format(false).unwrap(),
            PayloadFormat::DecryptedBase64String
        );
        assert_eq!(
            EncryptionIntent::FileDecrypted.format(true).unwrap(),
            PayloadFormat::DecryptedBareObject
        );
    }
}

use serde::{Deserialize, Serialize};

/// Content-type tag carried by every payload.
///
/// The generic pipeline operates on the base payload; typed views are
/// constructed on demand from this tag (no inheritance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Note,
    Tag,
    SmartTag,
    ItemsKey,
    Component,
    Theme,
    Editor,
    ActionsExtension,
    Privileges,
    HistorySession,
    UserPrefs,
    EncryptedStorage,
    /// Never synced; exists only as an in-memory and wrapped-at-rest record.
    RootKey,
}

impl ContentType {
    /// Content types encrypted directly with the root key rather than an
    /// items key.
    pub fn is_root_key_encrypted(self) -> bool {
        matches!(self, ContentType::ItemsKey | ContentType::EncryptedStorage)
    }

    /// Content types where at most one live instance may exist; the newest
    /// wins and losers are tombstoned.
    pub fn is_singleton(self) -> bool {
        matches!(self, ContentType::UserPrefs | ContentType::Privileges)
    }

    /// Content types that never leave the device.
    pub fn is_local_only(self) -> bool {
        matches!(self, ContentType::RootKey | ContentType::EncryptedStorage)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Note => "note",
            ContentType::Tag => "tag",
            ContentType::SmartTag => "smart-tag",
            ContentType::ItemsKey => "items-key",
            ContentType::Component => "component",
            ContentType::Theme => "theme",
            ContentType::Editor => "editor",
            ContentType::ActionsExtension => "actions-extension",
            ContentType::Privileges => "privileges",
            ContentType::HistorySession => "history-session",
            ContentType::UserPrefs => "user-prefs",
            ContentType::EncryptedStorage => "encrypted-storage",
            ContentType::RootKey => "root-key",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_tags() {
        let json = serde_json::to_string(&ContentType::ItemsKey).unwrap();
        assert_eq!(json, "\"items-key\"");
        let back: ContentType = serde_json::from_str("\"smart-tag\"").unwrap();
        assert_eq!(back, ContentType::SmartTag);
    }

    #[test]
    fn test_root_key_encrypted_types() {
        assert!(ContentType::ItemsKey.is_root_key_encrypted());
        assert!(ContentType::EncryptedStorage.is_root_key_encrypted());
        assert!(!ContentType::Note.is_root_key_encrypted());
    }

    #[test]
    fn test_local_only_types() {
        assert!(ContentType::RootKey.is_local_only());
        assert!(!ContentType::Tag.is_local_only());
    }
}

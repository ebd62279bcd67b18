//! Items: typed live views over the latest payload for a uuid.
//!
//! Variant dispatch is a tagged match on `content_type`; the typed content
//! structs are projected out of the flattened content map on demand.

use qn_core::time::UnixMillis;
use qn_core::{ContentType, ProtocolVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::content::{ItemContent, Reference};
use crate::payload::Payload;

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    payload: Payload,
}

impl Item {
    pub fn from_payload(payload: Payload) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn uuid(&self) -> Uuid {
        self.payload.uuid
    }

    pub fn content_type(&self) -> ContentType {
        self.payload.content_type
    }

    pub fn deleted(&self) -> bool {
        self.payload.deleted
    }

    pub fn dirty(&self) -> bool {
        self.payload.dirty
    }

    pub fn error_decrypting(&self) -> bool {
        self.payload.error_decrypting
    }

    pub fn updated_at(&self) -> UnixMillis {
        self.payload.updated_at
    }

    pub fn content(&self) -> Option<&ItemContent> {
        self.payload.decrypted_content()
    }

    /// Denormalized reference list; empty for encrypted or errored items.
    pub fn references(&self) -> &[Reference] {
        self.content().map(|c| c.references.as_slice()).unwrap_or(&[])
    }

    pub fn conflict_of(&self) -> Option<Uuid> {
        self.content()
            .and_then(|c| c.extra.get("conflict_of"))
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    fn typed_content<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        let content = self.content()?;
        serde_json::from_value(Value::Object(content.extra.clone())).ok()
    }

    pub fn as_note(&self) -> Option<NoteContent> {
        (self.content_type() == ContentType::Note)
            .then(|| self.typed_content())
            .flatten()
    }

    pub fn as_tag(&self) -> Option<TagContent> {
        (self.content_type() == ContentType::Tag)
            .then(|| self.typed_content())
            .flatten()
    }

    pub fn as_smart_tag(&self) -> Option<SmartTagContent> {
        (self.content_type() == ContentType::SmartTag)
            .then(|| self.typed_content())
            .flatten()
    }

    pub fn as_items_key(&self) -> Option<ItemsKeyContent> {
        (self.content_type() == ContentType::ItemsKey)
            .then(|| self.typed_content())
            .flatten()
    }

    pub fn as_component(&self) -> Option<ComponentContent> {
        matches!(
            self.content_type(),
            ContentType::Component | ContentType::Theme | ContentType::Editor
        )
        .then(|| self.typed_content())
        .flatten()
    }
}

// ── Typed content ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagContent {
    #[serde(default)]
    pub title: String,
}

/// A smart tag holds a predicate, not references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartTagContent {
    #[serde(default)]
    pub title: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub keypath: String,
    pub operator: String,
    pub value: Value,
}

/// Content of a synced items key.
///
/// For versions ≤ 003 the material mirrors the root key; from 004 on it is
/// independent random key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsKeyContent {
    pub items_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_authentication_key: Option<String>,
    pub version: ProtocolVersion,
    #[serde(default)]
    pub is_default: bool,
}

impl ItemsKeyContent {
    pub fn into_item_content(self) -> ItemContent {
        let mut content = ItemContent::new();
        let value = serde_json::to_value(&self).expect("items key content serializes");
        if let Value::Object(map) = value {
            content.extra = map;
        }
        content
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentContent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub area: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadContent;
    use serde_json::json;

    fn note_payload(title: &str, text: &str) -> Payload {
        let mut content = ItemContent::new();
        content.set_extra("title", json!(title));
        content.set_extra("text", json!(text));
        Payload::new_decrypted(ContentType::Note, content)
    }

    #[test]
    fn test_note_view() {
        let item = Item::from_payload(note_payload("T", "X"));
        let note = item.as_note().unwrap();
        assert_eq!(note.title, "T");
        assert_eq!(note.text, "X");
        assert!(item.as_tag().is_none(), "wrong variant view is None");
    }

    #[test]
    fn test_encrypted_item_has_no_views() {
        let mut payload = Payload::new(Uuid::new_v4(), ContentType::Note);
        payload.content = Some(PayloadContent::Encrypted("004:a:b:c".into()));
        let item = Item::from_payload(payload);
        assert!(item.as_note().is_none());
        assert!(item.references().is_empty());
    }

    #[test]
    fn test_items_key_content_roundtrip() {
        let key_content = ItemsKeyContent {
            items_key: "ab".repeat(32),
            data_authentication_key: None,
            version: ProtocolVersion::V004,
            is_default: true,
        };
        let payload = Payload::new_decrypted(
            ContentType::ItemsKey,
            key_content.clone().into_item_content(),
        );
        let item = Item::from_payload(payload);
        assert_eq!(item.as_items_key().unwrap(), key_content);
    }

    #[test]
    fn test_smart_tag_predicate() {
        let mut content = ItemContent::new();
        content.set_extra("title", json!("Pinned"));
        content.set_extra(
            "predicate",
            json!({"keypath": "pinned", "operator": "=", "value": true}),
        );
        let item = Item::from_payload(Payload::new_decrypted(ContentType::SmartTag, content));
        let smart = item.as_smart_tag().unwrap();
        assert_eq!(smart.predicate.keypath, "pinned");
        assert!(item.references().is_empty(), "smart tags hold no references");
    }

    #[test]
    fn test_conflict_of() {
        let original = Uuid::new_v4();
        let mut content = ItemContent::new();
        content.set_extra("conflict_of", json!(original.to_string()));
        let item = Item::from_payload(Payload::new_decrypted(ContentType::Note, content));
        assert_eq!(item.conflict_of(), Some(original));
    }
}

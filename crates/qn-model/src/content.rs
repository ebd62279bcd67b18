//! Decrypted item content: the references array, client app data, and the
//! variant-specific fields kept as a flattened map.

use qn_core::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// App-data keys excluded from content-equality comparisons.
const VOLATILE_APP_DATA_KEYS: &[&str] = &["client_updated_at", "user_modified_date"];

/// A directed reference from one item to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub uuid: Uuid,
    pub content_type: ContentType,
}

/// Structured content of a decrypted payload.
///
/// Every non-errored item's content carries the `references` array; the
/// reference graph reflects it exactly. Variant fields (note title, items-key
/// material, …) live in the flattened `extra` map and are projected into
/// typed views on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemContent {
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub app_data: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn references_to(&self, uuid: Uuid) -> bool {
        self.references.iter().any(|r| r.uuid == uuid)
    }

    /// Content equality ignoring volatile client bookkeeping keys.
    pub fn content_equals(&self, other: &ItemContent) -> bool {
        if self.references != other.references || self.extra != other.extra {
            return false;
        }
        let strip = |m: &Map<String, Value>| -> Map<String, Value> {
            m.iter()
                .filter(|(k, _)| !VOLATILE_APP_DATA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        strip(&self.app_data) == strip(&other.app_data)
    }

    pub fn set_app_data(&mut self, key: &str, value: Value) {
        self.app_data.insert(key.to_string(), value);
    }

    pub fn get_extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn set_extra(&mut self, key: &str, value: Value) {
        self.extra.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(uuid: Uuid) -> Reference {
        Reference {
            uuid,
            content_type: ContentType::Note,
        }
    }

    #[test]
    fn test_serde_shape() {
        let mut content = ItemContent::new();
        content.set_extra("title", json!("T"));
        content.references.push(reference(Uuid::nil()));

        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["title"], json!("T"));
        assert_eq!(
            value["references"][0]["uuid"],
            json!("00000000-0000-0000-0000-000000000000")
        );

        let back: ItemContent = serde_json::from_value(value).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_references_always_serialized() {
        let content = ItemContent::new();
        let value = serde_json::to_value(&content).unwrap();
        assert!(value.get("references").is_some());
    }

    #[test]
    fn test_content_equals_ignores_volatile_keys() {
        let mut a = ItemContent::new();
        a.set_extra("title", json!("same"));
        let mut b = a.clone();

        a.set_app_data("user_modified_date", json!(1000));
        b.set_app_data("user_modified_date", json!(2000));
        assert!(a.content_equals(&b));

        b.set_extra("title", json!("different"));
        assert!(!a.content_equals(&b));
    }

    #[test]
    fn test_content_equals_sees_app_data() {
        let mut a = ItemContent::new();
        let mut b = ItemContent::new();
        a.set_app_data("pinned", json!(true));
        b.set_app_data("pinned", json!(false));
        assert!(!a.content_equals(&b));
    }
}

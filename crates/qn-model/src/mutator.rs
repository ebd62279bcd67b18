//! Typed mutators: the only write path onto items.
//!
//! A mutator snapshots the item, applies caller edits, and produces a new
//! payload stamped dirty. The source item is never touched.

use qn_core::time::now_ms;
use qn_core::QnResult;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::content::{ItemContent, Reference};
use crate::item::Item;
use crate::payload::{Payload, PayloadContent};

/// User-interaction mutations additionally stamp `user_modified_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    UserInteraction,
    Internal,
}

/// Generic mutator over the base payload; variant mutators wrap this.
pub struct ItemMutator {
    payload: Payload,
    content: ItemContent,
    mutation_type: MutationType,
}

impl ItemMutator {
    pub fn new(item: &Item, mutation_type: MutationType) -> QnResult<Self> {
        let content = item
            .content()
            .cloned()
            .ok_or_else(|| qn_core::QnError::DecryptFailure {
                uuid: item.uuid().to_string(),
            })?;
        Ok(Self {
            payload: item.payload().clone(),
            content,
            mutation_type,
        })
    }

    /// Mutator over a tombstone or otherwise content-less payload.
    pub fn new_from_payload(payload: Payload, mutation_type: MutationType) -> Self {
        let content = payload
            .decrypted_content()
            .cloned()
            .unwrap_or_default();
        Self {
            payload,
            content,
            mutation_type,
        }
    }

    pub fn content_mut(&mut self) -> &mut ItemContent {
        &mut self.content
    }

    pub fn set_deleted(&mut self) {
        self.payload.deleted = true;
    }

    pub fn set_references(&mut self, references: Vec<Reference>) {
        self.content.references = references;
    }

    pub fn add_reference(&mut self, reference: Reference) {
        if !self.content.references_to(reference.uuid) {
            self.content.references.push(reference);
        }
    }

    pub fn remove_reference(&mut self, uuid: Uuid) {
        self.content.references.retain(|r| r.uuid != uuid);
    }

    /// Produce the dirty successor payload.
    pub fn finish(mut self) -> Payload {
        let now = now_ms();
        if self.mutation_type == MutationType::UserInteraction {
            self.content.set_app_data("user_modified_date", json!(now));
        }
        self.payload.content = Some(PayloadContent::Decrypted(self.content));
        self.payload.dirty = true;
        self.payload.dirtied_at = Some(now);
        self.payload
    }
}

/// Common surface shared by the per-variant mutators.
pub trait PayloadMutation: Sized {
    fn base_mut(&mut self) -> &mut ItemMutator;
    fn into_base(self) -> ItemMutator;

    fn finish(self) -> Payload {
        self.into_base().finish()
    }
}

impl PayloadMutation for ItemMutator {
    fn base_mut(&mut self) -> &mut ItemMutator {
        self
    }
    fn into_base(self) -> ItemMutator {
        self
    }
}

macro_rules! variant_mutator {
    ($name:ident) => {
        pub struct $name(ItemMutator);

        impl $name {
            pub fn new(item: &Item, mutation_type: MutationType) -> QnResult<Self> {
                Ok(Self(ItemMutator::new(item, mutation_type)?))
            }
        }

        impl PayloadMutation for $name {
            fn base_mut(&mut self) -> &mut ItemMutator {
                &mut self.0
            }
            fn into_base(self) -> ItemMutator {
                self.0
            }
        }
    };
}

variant_mutator!(NoteMutator);
variant_mutator!(TagMutator);
variant_mutator!(ItemsKeyMutator);
variant_mutator!(ComponentMutator);

impl NoteMutator {
    pub fn set_title(&mut self, title: &str) {
        self.0.content.set_extra("title", Value::String(title.into()));
    }

    pub fn set_text(&mut self, text: &str) {
        self.0.content.set_extra("text", Value::String(text.into()));
    }
}

impl TagMutator {
    pub fn set_title(&mut self, title: &str) {
        self.0.content.set_extra("title", Value::String(title.into()));
    }
}

impl ItemsKeyMutator {
    pub fn set_is_default(&mut self, is_default: bool) {
        self.0.content.set_extra("is_default", Value::Bool(is_default));
    }
}

impl ComponentMutator {
    pub fn set_url(&mut self, url: &str) {
        self.0.content.set_extra("url", Value::String(url.into()));
    }
}

//! Scene element model and the record stored in the shared collection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::CoreError;
use crate::position::PositionKey;

/// A graphical element as the host scene sees it.
///
/// Only `id`, `version` and `isDeleted` carry meaning for reconciliation;
/// geometry and style live in the flattened, opaque `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    /// Bumped by the host on every local mutation, including reorders.
    pub version: u64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Elements are shared with the host by reference; pointer identity of the
/// `Arc` is what remote reconciliation preserves for unchanged items.
pub type SharedElement = Arc<Element>;

impl Element {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            is_deleted: false,
            payload: Map::new(),
        }
    }

    /// Builder-style payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Set a payload field and bump the version, as a host edit would.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(key.into(), value.into());
        self.version += 1;
    }

    /// Logically delete the element and bump the version.
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
        self.version += 1;
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn into_shared(self) -> SharedElement {
        Arc::new(self)
    }
}

/// One record of the shared ordered collection: an element and its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedEntry {
    #[serde(rename = "el")]
    pub element: Element,
    pub pos: PositionKey,
}

impl OrderedEntry {
    pub fn new(element: Element, pos: PositionKey) -> Self {
        Self { element, pos }
    }

    pub fn id(&self) -> &str {
        &self.element.id
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::DeserializationError(e.to_string()))
    }
}

/// Sort records into document order: by position key, then by id so that
/// replicas that minted the same key concurrently still agree.
pub fn sort_entries(entries: &mut [OrderedEntry]) {
    entries.sort_by(|a, b| a.pos.cmp(&b.pos).then_with(|| a.element.id.cmp(&b.element.id)));
}

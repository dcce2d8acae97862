//! Binary attachments and the additive-only asset delta.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::CoreError;

/// An immutable binary blob referenced by image-like elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub id: String,
    pub mime_type: String,
    #[serde(rename = "dataURL")]
    pub data_url: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retrieved: Option<u64>,
}

impl AssetRecord {
    pub fn new(
        id: impl Into<String>,
        mime_type: impl Into<String>,
        data_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            mime_type: mime_type.into(),
            data_url: data_url.into(),
            created: 0,
            last_retrieved: None,
        }
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::DeserializationError(e.to_string()))
    }
}

/// Assets are only ever added; there is no update or delete variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOperation {
    Insert(AssetRecord),
}

/// Result of [`asset_operations`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetDelta {
    pub operations: Vec<AssetOperation>,
    /// `known` plus every id inserted by `operations`.
    pub known: BTreeSet<String>,
}

/// Insert operations for every local blob whose id is not in `known`.
///
/// Operations come out sorted by file id so two calls over the same input
/// produce the same batch regardless of the host's map iteration order.
pub fn asset_operations<'a>(
    known: &BTreeSet<String>,
    files: impl IntoIterator<Item = &'a AssetRecord>,
) -> AssetDelta {
    let mut fresh: Vec<&AssetRecord> = files
        .into_iter()
        .filter(|file| !known.contains(&file.id))
        .collect();
    fresh.sort_by(|a, b| a.id.cmp(&b.id));
    fresh.dedup_by(|a, b| a.id == b.id);

    let mut known = known.clone();
    let operations = fresh
        .into_iter()
        .map(|file| {
            known.insert(file.id.clone());
            AssetOperation::Insert(file.clone())
        })
        .collect();

    AssetDelta { operations, known }
}

//! Additive-only mirroring of binary assets.
//!
//! Local blobs go into the shared map once and are never updated or
//! removed; remote additions are handed to the host once. The known set
//! covers both directions, so nothing is mirrored back.

use std::collections::BTreeSet;

use sketchsync_core::{asset_operations, AssetOperation, AssetRecord};

use crate::doc::{AssetsEvent, SharedAssets};
use crate::error::SyncError;
use crate::origin::Origin;

/// Insert each operation's record unless the key already exists. Returns
/// the number of records stored.
pub fn apply_asset_operations(
    assets: &SharedAssets,
    origin: Origin,
    operations: &[AssetOperation],
) -> Result<usize, SyncError> {
    if operations.is_empty() {
        return Ok(0);
    }
    assets.transact(origin, |txn| {
        let mut stored = 0;
        for op in operations {
            let AssetOperation::Insert(record) = op;
            if txn.insert_if_absent(record)? {
                stored += 1;
            } else {
                log::debug!("asset {} already shared, not overwriting", record.id);
            }
        }
        Ok(stored)
    })
}

/// Per-binding asset mirror.
#[derive(Debug, Clone)]
pub struct AssetSync {
    origin: Origin,
    known: BTreeSet<String>,
}

impl AssetSync {
    /// Seed from what is already shared. Returns the sync plus those
    /// records, for the host to register.
    pub fn new(
        origin: Origin,
        assets: &SharedAssets,
    ) -> Result<(Self, Vec<AssetRecord>), SyncError> {
        let known = assets.keys();
        let mut existing = Vec::with_capacity(known.len());
        for id in &known {
            if let Some(record) = assets.get(id)? {
                existing.push(record);
            }
        }
        Ok((Self { origin, known }, existing))
    }

    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    /// Local → shared. Returns how many blobs were inserted.
    pub fn push_local(
        &mut self,
        assets: &SharedAssets,
        files: &[AssetRecord],
    ) -> Result<usize, SyncError> {
        let delta = asset_operations(&self.known, files);
        if delta.operations.is_empty() {
            return Ok(0);
        }
        let stored = apply_asset_operations(assets, self.origin, &delta.operations)?;
        self.known = delta.known;
        if stored > 0 {
            log::info!("shared {stored} new assets");
        }
        Ok(stored)
    }

    /// Shared → local. Returns the records the host has not seen yet;
    /// empty for this binding's own transactions.
    pub fn pull_remote(
        &mut self,
        assets: &SharedAssets,
        event: &AssetsEvent,
    ) -> Result<Vec<AssetRecord>, SyncError> {
        if event.is_from(self.origin) {
            return Ok(Vec::new());
        }
        let mut added = Vec::new();
        for key in &event.keys_changed {
            if self.known.contains(key) {
                continue;
            }
            // Keys can show up as removals in a raw update; there is
            // nothing to register for those.
            if let Some(record) = assets.get(key)? {
                self.known.insert(key.clone());
                added.push(record);
            }
        }
        Ok(added)
    }
}

//! Rebuilds the local scene from transactions made by someone else.
//!
//! ```text
//! ElementsEvent (origin ≠ own)
//!       │
//!       ├── changed ids ─────────────┐
//!       ▼                            ▼
//! collection, sorted by pos ──► rebuild_scene ──► host.replace_elements
//!       │                            ▲
//!       └── SnapshotTracker::rebuild │ unchanged ids: the host's own Arc
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use sketchsync_core::{OrderedEntry, SharedElement, SnapshotTracker};

use crate::doc::{ElementsEvent, SharedElements};
use crate::error::SyncError;
use crate::origin::Origin;

/// Remote-change reconciler for one binding.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    origin: Origin,
}

impl Reconciler {
    pub fn new(origin: Origin) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// True for events produced by this binding's own transactions.
    pub fn is_echo(&self, event: &ElementsEvent) -> bool {
        event.is_from(self.origin)
    }

    /// Rebuild the full scene after `event`, or `None` for an echo.
    ///
    /// `local` is the host's current element sequence, used to keep
    /// unchanged elements pointer-identical. The tracker is re-derived from
    /// the collection.
    pub fn reconcile(
        &self,
        event: &ElementsEvent,
        elements: &SharedElements,
        local: &[SharedElement],
        tracker: &mut SnapshotTracker,
    ) -> Result<Option<Vec<SharedElement>>, SyncError> {
        if self.is_echo(event) {
            return Ok(None);
        }

        let entries = elements.entries()?;
        tracker.rebuild(&entries);

        let changed = event.changed_ids();
        let scene = rebuild_scene(entries, &changed, local);
        log::debug!(
            "reconciled {} changed records into a scene of {}",
            changed.len(),
            scene.len()
        );
        Ok(Some(scene))
    }
}

/// Scene in document order: changed ids take the collection's element,
/// unchanged ids reuse the local `Arc` when there is one.
pub fn rebuild_scene(
    entries: Vec<OrderedEntry>,
    changed: &BTreeSet<&str>,
    local: &[SharedElement],
) -> Vec<SharedElement> {
    let identity: HashMap<&str, &SharedElement> =
        local.iter().map(|el| (el.id.as_str(), el)).collect();

    entries
        .into_iter()
        .map(|entry| {
            let id = entry.element.id.as_str();
            if changed.contains(id) {
                return Arc::new(entry.element);
            }
            match identity.get(id) {
                Some(existing) => Arc::clone(existing),
                None => Arc::new(entry.element),
            }
        })
        .collect()
}

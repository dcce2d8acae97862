//! Last-known view of the shared collection, used for cheap change
//! detection.
//!
//! The host fires change notifications far more often than anything
//! changes (every pointer move). Comparing `(id, version)` pairs
//! positionally against the cached snapshot lets those be dropped before
//! any diffing happens.

use std::borrow::Borrow;

use crate::element::{sort_entries, Element, OrderedEntry};
use crate::position::PositionKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub id: String,
    pub version: u64,
    pub pos: PositionKey,
}

/// Ordered `(id, version, position)` triples in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from collection records, sorting them into document order.
    pub fn from_entries(entries: &[OrderedEntry]) -> Self {
        let mut sorted = entries.to_vec();
        sort_entries(&mut sorted);
        Self::from_sorted(&sorted)
    }

    /// Build from records already in document order.
    pub fn from_sorted(entries: &[OrderedEntry]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|e| SnapshotEntry {
                    id: e.element.id.clone(),
                    version: e.element.version,
                    pos: e.pos.clone(),
                })
                .collect(),
        }
    }

    pub(crate) fn from_raw(entries: Vec<SnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position_of(&self, id: &str) -> Option<&PositionKey> {
        self.entries.iter().find(|e| e.id == id).map(|e| &e.pos)
    }

    /// Same length and identical `(id, version)` pairs positionally.
    pub fn same_elements(&self, other: &Snapshot) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.id == b.id && a.version == b.version)
    }

    /// Compare against the host's current elements without allocating.
    /// Logically deleted elements are skipped.
    pub fn matches<E: Borrow<Element>>(&self, elements: &[E]) -> bool {
        let mut active = elements
            .iter()
            .map(<E as Borrow<Element>>::borrow)
            .filter(|el| !el.is_deleted);
        for entry in &self.entries {
            match active.next() {
                Some(el) if el.id == entry.id && el.version == entry.version => {}
                _ => return false,
            }
        }
        active.next().is_none()
    }
}

/// Owns the cached snapshot between reconciliation cycles.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTracker {
    snapshot: Snapshot,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// True when `elements` carries nothing the last cycle has not seen.
    pub fn is_unchanged<E: Borrow<Element>>(&self, elements: &[E]) -> bool {
        self.snapshot.matches(elements)
    }

    /// Re-derive the snapshot from the shared collection's records.
    pub fn rebuild(&mut self, entries: &[OrderedEntry]) {
        self.snapshot = Snapshot::from_entries(entries);
    }

    pub fn replace(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::SharedElement;

    fn entry(id: &str, version: u64, pos: &str) -> OrderedEntry {
        OrderedEntry::new(Element::new(id, version), PositionKey::parse(pos).unwrap())
    }

    #[test]
    fn test_from_entries_sorts_by_position() {
        let snap = Snapshot::from_entries(&[entry("b", 1, "b"), entry("a", 1, "a")]);
        let ids: Vec<&str> = snap.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(snap.position_of("b").map(|p| p.as_str()), Some("b"));
    }

    #[test]
    fn test_same_elements_ignores_positions() {
        let a = Snapshot::from_entries(&[entry("a", 1, "a"), entry("b", 2, "b")]);
        let b = Snapshot::from_entries(&[entry("a", 1, "c"), entry("b", 2, "d")]);
        assert!(a.same_elements(&b));
    }

    #[test]
    fn test_single_version_difference_flips_equality() {
        let a = Snapshot::from_entries(&[entry("a", 1, "a"), entry("b", 2, "b")]);
        let b = Snapshot::from_entries(&[entry("a", 1, "a"), entry("b", 3, "b")]);
        assert!(!a.same_elements(&b));
    }

    #[test]
    fn test_length_difference_flips_equality() {
        let a = Snapshot::from_entries(&[entry("a", 1, "a")]);
        let b = Snapshot::from_entries(&[entry("a", 1, "a"), entry("b", 1, "b")]);
        assert!(!a.same_elements(&b));
        assert!(!b.same_elements(&a));
    }

    #[test]
    fn test_matches_skips_deleted() {
        let snap = Snapshot::from_entries(&[entry("a", 1, "a")]);
        let mut gone = Element::new("b", 4);
        gone.is_deleted = true;
        let elements: Vec<SharedElement> =
            vec![Element::new("a", 1).into_shared(), gone.into_shared()];
        assert!(snap.matches(&elements));
    }

    #[test]
    fn test_matches_detects_order_and_extra() {
        let snap = Snapshot::from_entries(&[entry("a", 1, "a"), entry("b", 1, "b")]);
        assert!(!snap.matches(&[Element::new("b", 1), Element::new("a", 1)]));
        assert!(!snap.matches(&[Element::new("a", 1)]));
        assert!(!snap.matches(&[Element::new("a", 1), Element::new("b", 1), Element::new("c", 1)]));
        assert!(snap.matches(&[Element::new("a", 1), Element::new("b", 1)]));
    }

    #[test]
    fn test_tracker_rebuild() {
        let mut tracker = SnapshotTracker::new();
        assert!(tracker.is_unchanged::<Element>(&[]));
        tracker.rebuild(&[entry("x", 2, "V")]);
        assert_eq!(tracker.snapshot().len(), 1);
        assert!(tracker.is_unchanged(&[Element::new("x", 2)]));
        assert!(!tracker.is_unchanged(&[Element::new("x", 3)]));
    }
}

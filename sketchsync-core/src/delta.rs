//! Delta computation: previous snapshot vs. current scene → operations.
//!
//! ```text
//! previous  A(v1)@a   B(v1)@d
//! current   A(v1)     B(v2)     C(v1)
//!           ─────     ───────   ───────────────
//!           nothing   Update B  Insert C @ after(d)
//! ```
//!
//! Elements that keep their relative order keep their position keys. The
//! kept set is the longest increasing subsequence (by previous index) of
//! the surviving elements; everything else among the survivors is moved,
//! and new elements get fresh keys between their final neighbors.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};

use crate::config::SyncConfig;
use crate::element::Element;
use crate::error::CoreError;
use crate::position::{PositionKey, DEFAULT_STEP};
use crate::snapshot::{Snapshot, SnapshotEntry};

/// A single mutation of the shared ordered collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert { element: Element, pos: PositionKey },
    Update { id: String, element: Element },
    Delete { id: String },
    Move { id: String, pos: PositionKey },
}

impl Operation {
    /// Id of the element the operation targets.
    pub fn id(&self) -> &str {
        match self {
            Operation::Insert { element, .. } => &element.id,
            Operation::Update { id, .. }
            | Operation::Delete { id }
            | Operation::Move { id, .. } => id,
        }
    }
}

/// Output of [`DeltaComputer::compute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub operations: Vec<Operation>,
    /// What the collection looks like once `operations` are applied.
    pub snapshot: Snapshot,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Diffs the host's element sequence against the last snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DeltaComputer {
    position_step: u8,
}

impl Default for DeltaComputer {
    fn default() -> Self {
        Self::new(DEFAULT_STEP)
    }
}

impl DeltaComputer {
    pub fn new(position_step: u8) -> Self {
        Self { position_step }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.position_step)
    }

    /// Compute the operations turning `previous` into `current`.
    ///
    /// `current` is the host's full sequence; logically deleted elements
    /// are dropped first, and when an id appears twice the last occurrence
    /// wins. Deletes come first, then per-element operations in current
    /// order (Update before Move).
    pub fn compute<E: Borrow<Element>>(
        &self,
        previous: &Snapshot,
        current: &[E],
    ) -> Result<Delta, CoreError> {
        let current = active_elements(current);
        let before = previous.entries();

        let prev_index: HashMap<&str, usize> = before
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.as_str(), i))
            .collect();
        let current_ids: HashSet<&str> = current.iter().map(|el| el.id.as_str()).collect();

        let mut operations = Vec::new();
        for entry in before {
            if !current_ids.contains(entry.id.as_str()) {
                operations.push(Operation::Delete {
                    id: entry.id.clone(),
                });
            }
        }

        let anchors = self.anchors(before, &current, &prev_index);
        let keys = self.assign_keys(before, &anchors)?;

        let mut snapshot = Vec::with_capacity(current.len());
        for ((el, pos), anchor) in current.iter().zip(keys).zip(&anchors) {
            match prev_index.get(el.id.as_str()) {
                None => operations.push(Operation::Insert {
                    element: (*el).clone(),
                    pos: pos.clone(),
                }),
                Some(&pi) => {
                    if before[pi].version != el.version {
                        operations.push(Operation::Update {
                            id: el.id.clone(),
                            element: (*el).clone(),
                        });
                    }
                    if anchor.is_none() {
                        operations.push(Operation::Move {
                            id: el.id.clone(),
                            pos: pos.clone(),
                        });
                    }
                }
            }
            snapshot.push(SnapshotEntry {
                id: el.id.clone(),
                version: el.version,
                pos,
            });
        }

        if !operations.is_empty() {
            log::debug!(
                "delta: {} operations over {} elements",
                operations.len(),
                snapshot.len()
            );
        }

        Ok(Delta {
            operations,
            snapshot: Snapshot::from_raw(snapshot),
        })
    }

    /// For each current element, the previous index whose key it keeps.
    fn anchors(
        &self,
        before: &[SnapshotEntry],
        current: &[&Element],
        prev_index: &HashMap<&str, usize>,
    ) -> Vec<Option<usize>> {
        let survivors: Vec<(usize, usize)> = current
            .iter()
            .enumerate()
            .filter_map(|(ci, el)| prev_index.get(el.id.as_str()).map(|&pi| (ci, pi)))
            .collect();
        let order: Vec<usize> = survivors.iter().map(|&(_, pi)| pi).collect();

        let mut anchors = vec![None; current.len()];
        let mut last_key: Option<&PositionKey> = None;
        for si in longest_increasing(&order) {
            let (ci, pi) = survivors[si];
            let key = &before[pi].pos;
            // Two anchors sharing a key (concurrent inserts on different
            // replicas) would leave no room between them; re-key the later.
            if last_key.map_or(true, |last| last < key) {
                anchors[ci] = Some(pi);
                last_key = Some(key);
            }
        }
        anchors
    }

    fn assign_keys(
        &self,
        before: &[SnapshotEntry],
        anchors: &[Option<usize>],
    ) -> Result<Vec<PositionKey>, CoreError> {
        let mut keys: Vec<PositionKey> = Vec::with_capacity(anchors.len());
        let mut ci = 0;
        while ci < anchors.len() {
            if let Some(pi) = anchors[ci] {
                keys.push(before[pi].pos.clone());
                ci += 1;
                continue;
            }
            let start = ci;
            while ci < anchors.len() && anchors[ci].is_none() {
                ci += 1;
            }
            let lower = keys.last().cloned();
            let upper = anchors
                .get(ci)
                .copied()
                .flatten()
                .map(|pi| before[pi].pos.clone());
            keys.extend(PositionKey::n_between(
                lower.as_ref(),
                upper.as_ref(),
                ci - start,
                self.position_step,
            )?);
        }
        Ok(keys)
    }
}

/// Non-deleted elements, keeping only the last occurrence of each id.
fn active_elements<E: Borrow<Element>>(elements: &[E]) -> Vec<&Element> {
    let active: Vec<&Element> = elements
        .iter()
        .map(<E as Borrow<Element>>::borrow)
        .filter(|el| !el.is_deleted)
        .collect();

    let mut last: HashMap<&str, usize> = HashMap::with_capacity(active.len());
    for (i, el) in active.iter().enumerate() {
        last.insert(el.id.as_str(), i);
    }
    if last.len() == active.len() {
        return active;
    }

    log::warn!(
        "scene contains {} duplicate element ids, keeping last occurrences",
        active.len() - last.len()
    );
    active
        .iter()
        .enumerate()
        .filter(|(i, el)| last.get(el.id.as_str()) == Some(i))
        .map(|(_, el)| *el)
        .collect()
}

/// Indices into `seq` of one longest strictly increasing subsequence.
fn longest_increasing(seq: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let slot = tails.partition_point(|&t| seq[t] < value);
        if slot > 0 {
            parent[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = parent[i];
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(id: &str, version: u64) -> Element {
        Element::new(id, version)
    }

    fn seeded(elements: &[Element]) -> Snapshot {
        DeltaComputer::default()
            .compute(&Snapshot::new(), elements)
            .unwrap()
            .snapshot
    }

    #[test]
    fn test_longest_increasing() {
        assert_eq!(longest_increasing(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing(&[2, 0, 1]), vec![1, 2]);
        assert_eq!(longest_increasing(&[0, 1, 2]), vec![0, 1, 2]);
        assert_eq!(longest_increasing(&[3, 2, 1]).len(), 1);
    }

    #[test]
    fn test_insert_into_empty() {
        let delta = DeltaComputer::default()
            .compute(&Snapshot::new(), &[el("a", 1), el("b", 1)])
            .unwrap();
        assert_eq!(delta.operations.len(), 2);
        match (&delta.operations[0], &delta.operations[1]) {
            (Operation::Insert { pos: p1, .. }, Operation::Insert { pos: p2, .. }) => {
                assert!(p1 < p2);
            }
            other => panic!("expected two inserts, got {other:?}"),
        }
    }

    #[test]
    fn test_update_and_append() {
        let previous = seeded(&[el("A", 1), el("B", 1)]);
        let delta = DeltaComputer::default()
            .compute(&previous, &[el("A", 1), el("B", 2), el("C", 1)])
            .unwrap();

        assert_eq!(delta.operations.len(), 2);
        assert_eq!(
            delta.operations[0],
            Operation::Update {
                id: "B".into(),
                element: el("B", 2)
            }
        );
        match &delta.operations[1] {
            Operation::Insert { element, pos } => {
                assert_eq!(element.id, "C");
                assert!(pos > previous.position_of("B").unwrap());
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn test_delete() {
        let previous = seeded(&[el("A", 1), el("B", 1)]);
        let delta = DeltaComputer::default().compute(&previous, &[el("B", 1)]).unwrap();
        assert_eq!(delta.operations, vec![Operation::Delete { id: "A".into() }]);
        assert_eq!(delta.snapshot.len(), 1);
    }

    #[test]
    fn test_logically_deleted_becomes_delete() {
        let previous = seeded(&[el("A", 1), el("B", 1)]);
        let mut gone = el("A", 1);
        gone.mark_deleted();
        let delta = DeltaComputer::default().compute(&previous, &[gone, el("B", 1)]).unwrap();
        assert_eq!(delta.operations, vec![Operation::Delete { id: "A".into() }]);
    }

    #[test]
    fn test_reorder_emits_update_and_move() {
        let previous = seeded(&[el("A", 1), el("B", 1), el("C", 1)]);
        let delta = DeltaComputer::default()
            .compute(&previous, &[el("C", 2), el("A", 1), el("B", 1)])
            .unwrap();

        assert_eq!(delta.operations.len(), 2);
        assert!(matches!(&delta.operations[0], Operation::Update { id, .. } if id == "C"));
        match &delta.operations[1] {
            Operation::Move { id, pos } => {
                assert_eq!(id, "C");
                assert!(pos < previous.position_of("A").unwrap());
            }
            other => panic!("expected move, got {other:?}"),
        }
    }

    #[test]
    fn test_unchanged_emits_nothing() {
        let elements = [el("A", 3), el("B", 7)];
        let previous = seeded(&elements);
        let delta = DeltaComputer::default().compute(&previous, &elements).unwrap();
        assert!(delta.is_empty());
        assert!(delta.snapshot.same_elements(&previous));
    }

    #[test]
    fn test_duplicate_ids_last_occurrence_wins() {
        let delta = DeltaComputer::default()
            .compute(&Snapshot::new(), &[el("A", 1), el("B", 1), el("A", 2)])
            .unwrap();
        let ids: Vec<&str> = delta.snapshot.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["B", "A"]);
        assert_eq!(delta.snapshot.entries()[1].version, 2);
    }

    #[test]
    fn test_batch_inserts_get_distinct_keys() {
        let previous = seeded(&[el("A", 1), el("Z", 1)]);
        let mut current = vec![el("A", 1)];
        current.extend((0..20).map(|i| el(&format!("n{i}"), 1)));
        current.push(el("Z", 1));

        let delta = DeltaComputer::default().compute(&previous, &current).unwrap();
        assert_eq!(delta.operations.len(), 20);
        let keys: Vec<&PositionKey> = delta.snapshot.entries().iter().map(|e| &e.pos).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_tied_keys_are_rekeyed() {
        let tie = PositionKey::first();
        let previous = Snapshot::from_raw(vec![
            SnapshotEntry {
                id: "X".into(),
                version: 1,
                pos: tie.clone(),
            },
            SnapshotEntry {
                id: "Y".into(),
                version: 1,
                pos: tie,
            },
        ]);
        let delta = DeltaComputer::default()
            .compute(&previous, &[el("X", 1), el("N", 1), el("Y", 1)])
            .unwrap();

        assert!(matches!(
            &delta.operations[0],
            Operation::Insert { element, .. } if element.id == "N"
        ));
        assert!(matches!(&delta.operations[1], Operation::Move { id, .. } if id == "Y"));
        let keys: Vec<&PositionKey> = delta.snapshot.entries().iter().map(|e| &e.pos).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_operation_id() {
        assert_eq!(Operation::Delete { id: "q".into() }.id(), "q");
        let insert = Operation::Insert {
            element: el("w", 1),
            pos: PositionKey::first(),
        };
        assert_eq!(insert.id(), "w");
    }
}

//! Property-based tests for delta computation and position keys.
//!
//! - Replay: applying a delta to the previous collection reproduces the
//!   current scene order exactly.
//! - Idempotence: diffing a scene against the snapshot it produced is empty.
//! - Density: keys can always be minted between two distinct keys.

use proptest::prelude::*;
use sketchsync_core::{DeltaComputer, Element, Operation, PositionKey, Snapshot};
use std::collections::HashMap;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn scene_strategy() -> impl Strategy<Value = Vec<Element>> {
    prop::collection::vec((0u8..12, 1u64..4, any::<bool>()), 0..16).prop_map(|raw| {
        raw.into_iter()
            .map(|(n, version, deleted)| {
                let mut el = Element::new(format!("e{n}"), version);
                // Roughly one in eight elements is logically deleted.
                el.is_deleted = deleted && n % 4 == 0;
                el
            })
            .collect()
    })
}

fn key_strategy() -> impl Strategy<Value = PositionKey> {
    prop::string::string_regex("[0-9A-Za-z]{0,5}[1-9A-Za-z]")
        .unwrap()
        .prop_map(|s| PositionKey::parse(s).unwrap())
}

/// Active elements with the last occurrence of each id winning.
fn expected(scene: &[Element]) -> Vec<(String, u64)> {
    let active: Vec<&Element> = scene.iter().filter(|el| !el.is_deleted).collect();
    let mut last = HashMap::new();
    for (i, el) in active.iter().enumerate() {
        last.insert(el.id.clone(), i);
    }
    active
        .iter()
        .enumerate()
        .filter(|(i, el)| last[&el.id] == *i)
        .map(|(_, el)| (el.id.clone(), el.version))
        .collect()
}

/// Apply `ops` to a model of the collection described by `previous`.
fn replay(previous: &Snapshot, ops: &[Operation]) -> Vec<(String, u64, PositionKey)> {
    let mut model: HashMap<String, (u64, PositionKey)> = previous
        .entries()
        .iter()
        .map(|e| (e.id.clone(), (e.version, e.pos.clone())))
        .collect();

    for op in ops {
        match op {
            Operation::Insert { element, pos } => {
                model.insert(element.id.clone(), (element.version, pos.clone()));
            }
            Operation::Update { id, element } => {
                if let Some(record) = model.get_mut(id) {
                    record.0 = element.version;
                }
            }
            Operation::Delete { id } => {
                model.remove(id);
            }
            Operation::Move { id, pos } => {
                if let Some(record) = model.get_mut(id) {
                    record.1 = pos.clone();
                }
            }
        }
    }

    let mut rows: Vec<(String, u64, PositionKey)> =
        model.into_iter().map(|(id, (v, p))| (id, v, p)).collect();
    rows.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
    rows
}

// =============================================================================
// DELTA PROPERTIES
// =============================================================================

mod delta_properties {
    use super::*;

    proptest! {
        /// Replaying the delta over the previous collection yields the
        /// current scene, in order, with strictly increasing keys.
        #[test]
        fn replay_reproduces_scene(before in scene_strategy(), after in scene_strategy()) {
            let computer = DeltaComputer::default();
            let previous = computer.compute(&Snapshot::new(), &before).unwrap().snapshot;
            let delta = computer.compute(&previous, &after).unwrap();

            let rows = replay(&previous, &delta.operations);
            let got: Vec<(String, u64)> = rows.iter().map(|(id, v, _)| (id.clone(), *v)).collect();
            prop_assert_eq!(got, expected(&after));
            prop_assert!(rows.windows(2).all(|w| w[0].2 < w[1].2));

            let snapshot_keys: Vec<&PositionKey> =
                delta.snapshot.entries().iter().map(|e| &e.pos).collect();
            let replay_keys: Vec<&PositionKey> = rows.iter().map(|r| &r.2).collect();
            prop_assert_eq!(snapshot_keys, replay_keys);
        }

        /// A second pass over the same scene emits nothing.
        #[test]
        fn second_pass_is_empty(before in scene_strategy(), after in scene_strategy()) {
            let computer = DeltaComputer::default();
            let previous = computer.compute(&Snapshot::new(), &before).unwrap().snapshot;
            let delta = computer.compute(&previous, &after).unwrap();
            let again = computer.compute(&delta.snapshot, &after).unwrap();
            prop_assert!(again.operations.is_empty());
            prop_assert!(delta.snapshot.matches(&after));
        }

        /// Deletes always precede every other operation.
        #[test]
        fn deletes_come_first(before in scene_strategy(), after in scene_strategy()) {
            let computer = DeltaComputer::default();
            let previous = computer.compute(&Snapshot::new(), &before).unwrap().snapshot;
            let delta = computer.compute(&previous, &after).unwrap();
            let first_other = delta
                .operations
                .iter()
                .position(|op| !matches!(op, Operation::Delete { .. }))
                .unwrap_or(delta.operations.len());
            let no_deletes_after = delta.operations[first_other..]
                .iter()
                .all(|op| !matches!(op, Operation::Delete { .. }));
            prop_assert!(no_deletes_after);
        }
    }
}

// =============================================================================
// POSITION KEY PROPERTIES
// =============================================================================

mod position_properties {
    use super::*;

    proptest! {
        #[test]
        fn between_is_strictly_inside(a in key_strategy(), b in key_strategy()) {
            prop_assume!(a != b);
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let mid = PositionKey::between(Some(&lo), Some(&hi), 8).unwrap();
            prop_assert!(lo < mid && mid < hi);
        }

        #[test]
        fn n_between_is_ascending(a in key_strategy(), b in key_strategy(), count in 1usize..40) {
            prop_assume!(a != b);
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let keys = PositionKey::n_between(Some(&lo), Some(&hi), count, 8).unwrap();
            prop_assert_eq!(keys.len(), count);
            prop_assert!(lo < keys[0] && keys[count - 1] < hi);
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn sequential_appends_grow(count in 1usize..200) {
            let mut last = PositionKey::first();
            for _ in 0..count {
                let next = PositionKey::between(Some(&last), None, 8).unwrap();
                prop_assert!(next > last);
                last = next;
            }
        }
    }
}

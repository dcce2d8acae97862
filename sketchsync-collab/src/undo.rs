//! Undo scope manager over the shared element collection.
//!
//! Only transactions whose origin is tracked become undo steps. Each step
//! stores, per touched record, the raw value before and after; undo writes
//! "before" back wherever the record still holds "after", so edits made
//! since by other replicas are left alone.
//!
//! ```text
//!  tracked txn ──► capture ──(within capture_timeout?)──► merge into top
//!                     │                                    else push
//!                     └── clears redo
//!
//!  undo(): pop undo ──► txn(origin = manager) ──► push inverse on redo
//!  redo(): pop redo ──► txn(origin = manager) ──► push inverse on undo
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use sketchsync_core::SyncConfig;

use crate::doc::{ElementsEvent, SharedElements};
use crate::feed::Subscription;
use crate::origin::Origin;

/// Undo history tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoConfig {
    /// Maximum items per stack. Default: 100.
    pub capacity: usize,
    /// Tracked transactions closer together than this merge into one
    /// item. Default: 500ms.
    pub capture_timeout: Duration,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            capture_timeout: Duration::from_millis(500),
        }
    }
}

impl UndoConfig {
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            capacity: config.undo_capacity,
            capture_timeout: config.capture_timeout,
        }
    }

    /// Config for testing (every transaction is its own item).
    pub fn for_testing() -> Self {
        Self {
            capacity: 16,
            capture_timeout: Duration::ZERO,
        }
    }
}

/// Record id → (value before, value after) of one reversible step.
#[derive(Debug, Clone, Default)]
struct StackItem {
    records: BTreeMap<String, (Option<String>, Option<String>)>,
}

#[derive(Debug, Default)]
struct History {
    undo: VecDeque<StackItem>,
    redo: VecDeque<StackItem>,
    last_capture: Option<Instant>,
    split_next: bool,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

struct UndoInner {
    elements: SharedElements,
    origin: Origin,
    config: UndoConfig,
    tracked: RefCell<BTreeSet<Origin>>,
    history: RefCell<History>,
    subscription: RefCell<Option<Subscription>>,
}

/// Handle to an undo manager. Clones share the same history.
#[derive(Clone)]
pub struct UndoManager {
    inner: Rc<UndoInner>,
}

impl std::fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let history = self.inner.history.borrow();
        f.debug_struct("UndoManager")
            .field("origin", &self.inner.origin)
            .field("undo", &history.undo.len())
            .field("redo", &history.redo.len())
            .finish()
    }
}

impl UndoManager {
    pub fn new(elements: &SharedElements, config: UndoConfig) -> Self {
        let inner = Rc::new(UndoInner {
            elements: elements.clone(),
            origin: Origin::new(),
            config,
            tracked: RefCell::new(BTreeSet::new()),
            history: RefCell::new(History::default()),
            subscription: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let subscription = elements.observe_deep(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.capture(event);
            }
        });
        *inner.subscription.borrow_mut() = Some(subscription);

        Self { inner }
    }

    /// Origin of the transactions undo and redo run in.
    pub fn origin(&self) -> Origin {
        self.inner.origin
    }

    pub fn add_tracked_origin(&self, origin: Origin) {
        self.inner.tracked.borrow_mut().insert(origin);
    }

    pub fn remove_tracked_origin(&self, origin: Origin) {
        self.inner.tracked.borrow_mut().remove(&origin);
    }

    pub fn is_tracking(&self, origin: Origin) -> bool {
        self.inner.tracked.borrow().contains(&origin)
    }

    /// Revert the most recent step that still changes something.
    /// Returns false if there was none.
    pub fn undo(&self) -> bool {
        self.inner.pop(Direction::Undo)
    }

    pub fn redo(&self) -> bool {
        self.inner.pop(Direction::Redo)
    }

    pub fn can_undo(&self) -> bool {
        !self.inner.history.borrow().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.inner.history.borrow().redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.inner.history.borrow().undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.inner.history.borrow().redo.len()
    }

    /// Start a new undo item with the next tracked transaction, even if it
    /// falls within the capture timeout.
    pub fn stop_capturing(&self) {
        self.inner.history.borrow_mut().split_next = true;
    }

    pub fn clear(&self) {
        let mut history = self.inner.history.borrow_mut();
        history.undo.clear();
        history.redo.clear();
        history.last_capture = None;
    }
}

impl UndoInner {
    fn capture(&self, event: &ElementsEvent) {
        let Some(origin) = event.origin else {
            return;
        };
        if origin == self.origin || !self.tracked.borrow().contains(&origin) {
            return;
        }

        let now = Instant::now();
        let mut guard = self.history.borrow_mut();
        let history = &mut *guard;
        history.redo.clear();

        let within_timeout = history
            .last_capture
            .map_or(false, |last| now.duration_since(last) < self.config.capture_timeout);
        if !within_timeout || history.split_next || history.undo.is_empty() {
            history.undo.push_back(StackItem::default());
            trim(&mut history.undo, self.config.capacity);
        }
        let Some(top) = history.undo.back_mut() else {
            return;
        };

        for change in &event.changes {
            top.records
                .entry(change.id.clone())
                .and_modify(|record| record.1 = change.new.clone())
                .or_insert_with(|| (change.old.clone(), change.new.clone()));
        }

        history.last_capture = Some(now);
        history.split_next = false;
        log::trace!("captured {} records from {}", event.changes.len(), origin);
    }

    fn pop(&self, direction: Direction) -> bool {
        loop {
            let item = {
                let mut history = self.history.borrow_mut();
                match direction {
                    Direction::Undo => history.undo.pop_back(),
                    Direction::Redo => history.redo.pop_back(),
                }
            };
            let Some(item) = item else {
                return false;
            };

            let inverse = self.elements.transact(self.origin, |txn| {
                let mut inverse = StackItem::default();
                for (id, (before, after)) in &item.records {
                    if txn.get_raw(id) != *after {
                        log::debug!("{id} changed since it was captured, leaving it");
                        continue;
                    }
                    match txn.set_raw(id, before.as_deref()) {
                        Ok(true) => {
                            inverse
                                .records
                                .insert(id.clone(), (after.clone(), before.clone()));
                        }
                        Ok(false) => {}
                        Err(e) => log::warn!("cannot restore {id}: {e}"),
                    }
                }
                inverse
            });

            if inverse.records.is_empty() {
                continue;
            }

            log::debug!("{direction:?} reverted {} records", inverse.records.len());
            let mut history = self.history.borrow_mut();
            let target = match direction {
                Direction::Undo => &mut history.redo,
                Direction::Redo => &mut history.undo,
            };
            target.push_back(inverse);
            trim(target, self.config.capacity);
            history.split_next = true;
            return true;
        }
    }
}

fn trim(stack: &mut VecDeque<StackItem>, capacity: usize) {
    while stack.len() > capacity.max(1) {
        stack.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::apply_operations;
    use crate::doc::SharedDoc;
    use sketchsync_core::{Element, Operation, PositionKey};

    fn insert(id: &str, pos: &str) -> Operation {
        Operation::Insert {
            element: Element::new(id, 1),
            pos: PositionKey::parse(pos).unwrap(),
        }
    }

    fn update(id: &str, version: u64) -> Operation {
        Operation::Update {
            id: id.into(),
            element: Element::new(id, version),
        }
    }

    fn setup(config: UndoConfig) -> (SharedDoc, UndoManager, Origin) {
        let doc = SharedDoc::new();
        let undo = UndoManager::new(&doc.elements(), config);
        let origin = Origin::new();
        undo.add_tracked_origin(origin);
        (doc, undo, origin)
    }

    fn version(doc: &SharedDoc, id: &str) -> Option<u64> {
        doc.elements().get(id).unwrap().map(|e| e.element.version)
    }

    #[test]
    fn test_undo_redo_insert() {
        let (doc, undo, origin) = setup(UndoConfig::for_testing());
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        assert!(undo.can_undo());

        assert!(undo.undo());
        assert!(doc.elements().is_empty());
        assert!(undo.can_redo());

        assert!(undo.redo());
        assert_eq!(version(&doc, "a"), Some(1));
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_untracked_origins_ignored() {
        let (doc, undo, _) = setup(UndoConfig::for_testing());
        apply_operations(&doc.elements(), Origin::new(), &[insert("a", "V")]).unwrap();
        assert!(!undo.can_undo());
        assert!(!undo.undo());
    }

    #[test]
    fn test_each_step_separate_with_zero_timeout() {
        let (doc, undo, origin) = setup(UndoConfig::for_testing());
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        apply_operations(&doc.elements(), origin, &[update("a", 2)]).unwrap();
        assert_eq!(undo.undo_depth(), 2);

        undo.undo();
        assert_eq!(version(&doc, "a"), Some(1));
    }

    #[test]
    fn test_merge_within_timeout() {
        let config = UndoConfig {
            capacity: 10,
            capture_timeout: Duration::from_secs(60),
        };
        let (doc, undo, origin) = setup(config);
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        apply_operations(&doc.elements(), origin, &[update("a", 2)]).unwrap();
        assert_eq!(undo.undo_depth(), 1);

        undo.undo();
        assert!(doc.elements().is_empty());
    }

    #[test]
    fn test_stop_capturing_splits() {
        let config = UndoConfig {
            capacity: 10,
            capture_timeout: Duration::from_secs(60),
        };
        let (doc, undo, origin) = setup(config);
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        undo.stop_capturing();
        apply_operations(&doc.elements(), origin, &[update("a", 2)]).unwrap();
        assert_eq!(undo.undo_depth(), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let config = UndoConfig {
            capacity: 2,
            capture_timeout: Duration::ZERO,
        };
        let (doc, undo, origin) = setup(config);
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        apply_operations(&doc.elements(), origin, &[update("a", 2)]).unwrap();
        apply_operations(&doc.elements(), origin, &[update("a", 3)]).unwrap();
        assert_eq!(undo.undo_depth(), 2);

        assert!(undo.undo());
        assert!(undo.undo());
        assert!(!undo.undo());
        assert_eq!(version(&doc, "a"), Some(1));
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let (doc, undo, origin) = setup(UndoConfig::for_testing());
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        undo.undo();
        assert!(undo.can_redo());

        apply_operations(&doc.elements(), origin, &[insert("b", "d")]).unwrap();
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_superseded_record_left_alone() {
        let (doc, undo, origin) = setup(UndoConfig::for_testing());
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        apply_operations(&doc.elements(), origin, &[update("a", 2)]).unwrap();
        apply_operations(&doc.elements(), Origin::new(), &[update("a", 7)]).unwrap();

        // The step that produced v2 no longer matches; the one before it
        // (the insert) does not either, so nothing is undone.
        assert!(!undo.undo());
        assert_eq!(version(&doc, "a"), Some(7));
    }

    #[test]
    fn test_undo_runs_as_manager_origin() {
        let (doc, undo, origin) = setup(UndoConfig::for_testing());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            doc.elements().observe_deep(move |e: &ElementsEvent| seen.borrow_mut().push(e.origin))
        };

        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        undo.undo();
        assert_eq!(*seen.borrow(), vec![Some(origin), Some(undo.origin())]);
        assert!(!undo.can_undo());
    }

    #[test]
    fn test_remove_tracked_origin() {
        let (doc, undo, origin) = setup(UndoConfig::for_testing());
        undo.remove_tracked_origin(origin);
        assert!(!undo.is_tracking(origin));
        apply_operations(&doc.elements(), origin, &[insert("a", "V")]).unwrap();
        assert!(!undo.can_undo());
    }

    #[test]
    fn test_dropping_manager_unsubscribes() {
        let doc = SharedDoc::new();
        let undo = UndoManager::new(&doc.elements(), UndoConfig::default());
        assert_eq!(doc.elements().observer_count(), 1);
        drop(undo);
        assert_eq!(doc.elements().observer_count(), 0);
    }
}

//! Shared document: the replicated element collection and asset map.
//!
//! ```text
//!  yrs::Doc
//!  ├── "elements"  Map<id, Map { "el": "{…}", "pos": "V" }>   deep feed
//!  └── "assets"    Map<fileId, "{\"id\":…,\"dataURL\":…}">    shallow feed
//! ```
//!
//! Each element record is a nested map, so an update rewrites only `el`
//! and a move only `pos`. Concurrent edits to different fields of one
//! record both survive, and an edit racing a delete lands inside the
//! deleted record instead of recreating it.
//!
//! Every write goes through a transaction tagged with an [`Origin`]; once
//! it commits, the encoded update is queued for the transport and an event
//! describing each touched record's old and new value is emitted. Updates
//! arriving from other replicas go through [`SharedDoc::apply_update`] and
//! are reported with no origin. Touched ids are collected by yrs observers,
//! so the cost of an event is proportional to what the transaction changed.
//!
//! Events and the undo manager see a record as one raw JSON string,
//! `{"el":{…},"pos":"V"}`.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use sketchsync_core::{sort_entries, AssetRecord, Element, OrderedEntry, PositionKey};
use yrs::types::{Event, PathSegment};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, DeepObservable, Doc, Map, MapPrelim, MapRef, Observable, Out, ReadTxn, StateVector,
    Transact, TransactionMut, Update,
};

use crate::error::SyncError;
use crate::feed::{Feed, Subscription};
use crate::origin::Origin;

/// Root name of the element collection.
pub const ELEMENTS_ROOT: &str = "elements";
/// Root name of the asset map.
pub const ASSETS_ROOT: &str = "assets";

const EL_FIELD: &str = "el";
const POS_FIELD: &str = "pos";

// ───────────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────────

/// Old and new raw JSON of one record touched by a transaction.
/// `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryChange {
    pub id: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

impl EntryChange {
    pub fn is_insert(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }

    pub fn is_delete(&self) -> bool {
        self.old.is_some() && self.new.is_none()
    }
}

/// Deep change event of the element collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementsEvent {
    /// `None` for updates received from other replicas.
    pub origin: Option<Origin>,
    pub changes: Vec<EntryChange>,
}

impl ElementsEvent {
    pub fn changed_ids(&self) -> BTreeSet<&str> {
        self.changes.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn is_from(&self, origin: Origin) -> bool {
        self.origin == Some(origin)
    }
}

/// Shallow change event of the asset map: only the keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetsEvent {
    pub origin: Option<Origin>,
    pub keys_changed: Vec<String>,
}

impl AssetsEvent {
    pub fn is_from(&self, origin: Origin) -> bool {
        self.origin == Some(origin)
    }
}

// ───────────────────────────────────────────────────────────────────
// Shared document
// ───────────────────────────────────────────────────────────────────

/// Keys reported by the yrs observers since the last drain.
#[derive(Default)]
struct Touched {
    elements: RefCell<BTreeSet<String>>,
    assets: RefCell<BTreeSet<String>>,
}

struct DocInner {
    doc: Doc,
    elements: MapRef,
    assets: MapRef,
    elements_feed: Feed<ElementsEvent>,
    assets_feed: Feed<AssetsEvent>,
    outgoing: RefCell<VecDeque<Vec<u8>>>,
    touched: Rc<Touched>,
    /// Raw value of every record as of the last emitted event.
    records: RefCell<HashMap<String, String>>,
    _observers: [yrs::Subscription; 2],
}

impl DocInner {
    /// Turn the ids touched since the last call into changes, skipping
    /// records that ended up where they started.
    fn take_element_changes(&self) -> Vec<EntryChange> {
        let touched = std::mem::take(&mut *self.touched.elements.borrow_mut());
        if touched.is_empty() {
            return Vec::new();
        }

        let txn = self.doc.transact();
        let mut records = self.records.borrow_mut();
        touched
            .into_iter()
            .filter_map(|id| {
                let new = read_raw(&self.elements, &txn, &id);
                let old = match &new {
                    Some(raw) => records.insert(id.clone(), raw.clone()),
                    None => records.remove(&id),
                };
                (old != new).then_some(EntryChange { id, old, new })
            })
            .collect()
    }

    fn take_asset_keys(&self) -> Vec<String> {
        std::mem::take(&mut *self.touched.assets.borrow_mut())
            .into_iter()
            .collect()
    }
}

/// Handle to one replica of the shared document. Clones share state.
#[derive(Clone)]
pub struct SharedDoc {
    inner: Rc<DocInner>,
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SharedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDoc")
            .field("elements", &self.elements().len())
            .field("assets", &self.assets().len())
            .field("outgoing", &self.inner.outgoing.borrow().len())
            .finish()
    }
}

impl SharedDoc {
    pub fn new() -> Self {
        let doc = Doc::new();
        let elements = doc.get_or_insert_map(ELEMENTS_ROOT);
        let assets = doc.get_or_insert_map(ASSETS_ROOT);
        let touched = Rc::new(Touched::default());

        let elements_observer = {
            let touched = Rc::clone(&touched);
            elements.observe_deep(move |txn, events| {
                let mut ids = touched.elements.borrow_mut();
                for event in events.iter() {
                    match event.path().pop_front() {
                        // A field of the record under this key changed.
                        Some(PathSegment::Key(id)) => {
                            ids.insert(id.to_string());
                        }
                        Some(PathSegment::Index(_)) => {}
                        None => {
                            if let Event::Map(event) = event {
                                ids.extend(event.keys(txn).keys().map(|id| id.to_string()));
                            }
                        }
                    }
                }
            })
        };
        let assets_observer = {
            let touched = Rc::clone(&touched);
            assets.observe(move |txn, event| {
                let keys = event.keys(txn).keys().map(|key| key.to_string());
                touched.assets.borrow_mut().extend(keys);
            })
        };

        Self {
            inner: Rc::new(DocInner {
                doc,
                elements,
                assets,
                elements_feed: Feed::new(),
                assets_feed: Feed::new(),
                outgoing: RefCell::new(VecDeque::new()),
                touched,
                records: RefCell::new(HashMap::new()),
                _observers: [elements_observer, assets_observer],
            }),
        }
    }

    pub fn elements(&self) -> SharedElements {
        SharedElements {
            inner: Rc::clone(&self.inner),
        }
    }

    pub fn assets(&self) -> SharedAssets {
        SharedAssets {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Integrate an update produced by another replica.
    ///
    /// Emits an elements event and/or an assets event (origin `None`) for
    /// whatever records the update actually changed.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), SyncError> {
        let update = Update::decode_v1(update)?;
        let integrated = {
            let mut txn = self.inner.doc.transact_mut();
            txn.apply_update(update)
        };

        // Whatever was integrated before a failure is still reported.
        let changes = self.inner.take_element_changes();
        let keys_changed = self.inner.take_asset_keys();
        log::debug!(
            "remote update: {} element records, {} asset keys changed",
            changes.len(),
            keys_changed.len()
        );

        if !changes.is_empty() {
            self.inner.elements_feed.emit(&ElementsEvent {
                origin: None,
                changes,
            });
        }
        if !keys_changed.is_empty() {
            self.inner.assets_feed.emit(&AssetsEvent {
                origin: None,
                keys_changed,
            });
        }
        integrated.map_err(|e| SyncError::UpdateError(e.to_string()))
    }

    /// Encoded state vector of this replica.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.inner.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Full document state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.inner.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Everything a replica with `remote_state_vector` is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        let remote = StateVector::decode_v1(remote_state_vector)?;
        let txn = self.inner.doc.transact();
        Ok(txn.encode_diff_v1(&remote))
    }

    /// Take the updates produced by local transactions since the last call,
    /// oldest first.
    pub fn drain_outgoing(&self) -> Vec<Vec<u8>> {
        self.inner.outgoing.borrow_mut().drain(..).collect()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.inner.outgoing.borrow().is_empty()
    }
}

// ───────────────────────────────────────────────────────────────────
// Element collection
// ───────────────────────────────────────────────────────────────────

/// View of the element collection of a [`SharedDoc`].
#[derive(Clone)]
pub struct SharedElements {
    inner: Rc<DocInner>,
}

impl SharedElements {
    pub fn len(&self) -> usize {
        let txn = self.inner.doc.transact();
        self.inner.elements.len(&txn) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in document order (position key, then id).
    pub fn entries(&self) -> Result<Vec<OrderedEntry>, SyncError> {
        let txn = self.inner.doc.transact();
        let mut entries = self
            .inner
            .elements
            .iter(&txn)
            .map(|(key, value)| read_entry(key, value, &txn))
            .collect::<Result<Vec<_>, _>>()?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    pub fn get(&self, id: &str) -> Result<Option<OrderedEntry>, SyncError> {
        let txn = self.inner.doc.transact();
        self.inner
            .elements
            .get(&txn, id)
            .map(|value| read_entry(id, value, &txn))
            .transpose()
    }

    /// Raw JSON of the record under `id`.
    pub fn raw(&self, id: &str) -> Option<String> {
        let txn = self.inner.doc.transact();
        read_raw(&self.inner.elements, &txn, id)
    }

    /// Run `f` inside one write transaction tagged with `origin`.
    ///
    /// `f` must not touch the document through any other handle. The
    /// change event is emitted after the transaction has committed.
    pub fn transact<R>(&self, origin: Origin, f: impl FnOnce(&mut ElementsTxn<'_>) -> R) -> R {
        let (result, update) = {
            let mut txn = ElementsTxn {
                txn: self.inner.doc.transact_mut(),
                map: &self.inner.elements,
            };
            let result = f(&mut txn);
            let update = wrote(&txn.txn).then(|| txn.txn.encode_update_v1());
            (result, update)
        };

        // Writes that net out still advance this replica's clock, so the
        // update ships even when no record changed.
        if let Some(update) = update {
            self.inner.outgoing.borrow_mut().push_back(update);
        }
        let changes = self.inner.take_element_changes();
        if !changes.is_empty() {
            log::trace!("local txn {origin}: {} element records", changes.len());
            self.inner.elements_feed.emit(&ElementsEvent {
                origin: Some(origin),
                changes,
            });
        }
        result
    }

    /// Deep feed: one event per committed transaction that changed records.
    pub fn observe_deep(&self, observer: impl Fn(&ElementsEvent) + 'static) -> Subscription {
        self.inner.elements_feed.subscribe(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.elements_feed.observer_count()
    }
}

/// Write access to the element collection inside one transaction.
pub struct ElementsTxn<'doc> {
    txn: TransactionMut<'doc>,
    map: &'doc MapRef,
}

impl ElementsTxn<'_> {
    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(&self.txn, id)
    }

    pub fn get_raw(&self, id: &str) -> Option<String> {
        read_raw(self.map, &self.txn, id)
    }

    pub fn get(&self, id: &str) -> Result<Option<OrderedEntry>, SyncError> {
        self.map
            .get(&self.txn, id)
            .map(|value| read_entry(id, value, &self.txn))
            .transpose()
    }

    /// Store `entry` under its element id. An existing record is rewritten
    /// field by field. Returns whether anything was written.
    pub fn set(&mut self, entry: &OrderedEntry) -> Result<bool, SyncError> {
        let el = serde_json::to_string(&entry.element)?;
        let pos = entry.pos.as_str().to_string();

        match self.record(entry.id()) {
            Some(record) => {
                let el_written = self.write_field(&record, EL_FIELD, el);
                let pos_written = self.write_field(&record, POS_FIELD, pos);
                Ok(el_written || pos_written)
            }
            None => {
                let record: MapPrelim = [(EL_FIELD, el), (POS_FIELD, pos)].into_iter().collect();
                self.map.insert(&mut self.txn, entry.id().to_string(), record);
                Ok(true)
            }
        }
    }

    /// Replace the element of an existing record, leaving its position.
    /// Returns false if `id` has no record.
    pub fn set_element(&mut self, id: &str, element: &Element) -> Result<bool, SyncError> {
        let Some(record) = self.record(id) else {
            return Ok(false);
        };
        let el = serde_json::to_string(element)?;
        self.write_field(&record, EL_FIELD, el);
        Ok(true)
    }

    /// Replace the position of an existing record, leaving its element.
    /// Returns false if `id` has no record.
    pub fn set_position(&mut self, id: &str, pos: &PositionKey) -> bool {
        let Some(record) = self.record(id) else {
            return false;
        };
        self.write_field(&record, POS_FIELD, pos.as_str().to_string());
        true
    }

    /// Returns false if there was nothing to remove.
    pub fn remove(&mut self, id: &str) -> bool {
        self.map.remove(&mut self.txn, id).is_some()
    }

    /// Write (or, for `None`, remove) a record given as raw JSON. Returns
    /// whether anything was written.
    pub fn set_raw(&mut self, id: &str, raw: Option<&str>) -> Result<bool, SyncError> {
        match raw {
            Some(raw) => {
                let entry = parse_entry(id, raw)?;
                self.set(&entry)
            }
            None => Ok(self.remove(id)),
        }
    }

    fn record(&self, id: &str) -> Option<MapRef> {
        match self.map.get(&self.txn, id) {
            Some(Out::YMap(record)) => Some(record),
            _ => None,
        }
    }

    fn write_field(&mut self, record: &MapRef, field: &str, value: String) -> bool {
        if read_str(record, &self.txn, field).as_deref() == Some(value.as_str()) {
            return false;
        }
        record.insert(&mut self.txn, field, value);
        true
    }
}

// ───────────────────────────────────────────────────────────────────
// Asset map
// ───────────────────────────────────────────────────────────────────

/// View of the asset map of a [`SharedDoc`].
#[derive(Clone)]
pub struct SharedAssets {
    inner: Rc<DocInner>,
}

impl SharedAssets {
    pub fn len(&self) -> usize {
        let txn = self.inner.doc.transact();
        self.inner.assets.len(&txn) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> BTreeSet<String> {
        let txn = self.inner.doc.transact();
        self.inner.assets.keys(&txn).map(|k| k.to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Result<Option<AssetRecord>, SyncError> {
        let txn = self.inner.doc.transact();
        read_str(&self.inner.assets, &txn, id)
            .map(|json| AssetRecord::from_json(&json).map_err(|e| malformed(id, e)))
            .transpose()
    }

    pub fn transact<R>(&self, origin: Origin, f: impl FnOnce(&mut AssetsTxn<'_>) -> R) -> R {
        let (result, update) = {
            let mut txn = AssetsTxn {
                txn: self.inner.doc.transact_mut(),
                map: &self.inner.assets,
            };
            let result = f(&mut txn);
            let update = wrote(&txn.txn).then(|| txn.txn.encode_update_v1());
            (result, update)
        };

        if let Some(update) = update {
            self.inner.outgoing.borrow_mut().push_back(update);
        }
        let keys_changed = self.inner.take_asset_keys();
        if !keys_changed.is_empty() {
            self.inner.assets_feed.emit(&AssetsEvent {
                origin: Some(origin),
                keys_changed,
            });
        }
        result
    }

    /// Shallow feed: changed keys only.
    pub fn observe(&self, observer: impl Fn(&AssetsEvent) + 'static) -> Subscription {
        self.inner.assets_feed.subscribe(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.assets_feed.observer_count()
    }
}

/// Write access to the asset map. Insert-only.
pub struct AssetsTxn<'doc> {
    txn: TransactionMut<'doc>,
    map: &'doc MapRef,
}

impl AssetsTxn<'_> {
    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(&self.txn, id)
    }

    /// Store `record` unless its id is already present. Returns whether it
    /// was stored.
    pub fn insert_if_absent(&mut self, record: &AssetRecord) -> Result<bool, SyncError> {
        if self.contains(&record.id) {
            return Ok(false);
        }
        let json = record.to_json()?;
        self.map.insert(&mut self.txn, record.id.clone(), json);
        Ok(true)
    }
}

// ───────────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────────

/// Whether the transaction created or deleted anything so far.
fn wrote(txn: &TransactionMut<'_>) -> bool {
    !txn.delete_set().is_empty() || *txn.before_state() != txn.state_vector()
}

fn read_str<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<String> {
    match map.get(txn, key)? {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        _ => None,
    }
}

/// Raw JSON of one record. Fields that are missing come out as `null`, and
/// a value that is not a record map is rendered as-is; both fail to parse.
fn read_raw<T: ReadTxn>(map: &MapRef, txn: &T, id: &str) -> Option<String> {
    match map.get(txn, id)? {
        Out::YMap(record) => {
            let el = read_str(&record, txn, EL_FIELD).unwrap_or_else(|| "null".into());
            let pos = read_str(&record, txn, POS_FIELD)
                .map_or(serde_json::Value::Null, serde_json::Value::String);
            Some(format!("{{\"el\":{el},\"pos\":{pos}}}"))
        }
        other => Some(other.to_string(txn)),
    }
}

fn read_entry<T: ReadTxn>(key: &str, value: Out, txn: &T) -> Result<OrderedEntry, SyncError> {
    let Out::YMap(record) = value else {
        return Err(malformed(key, "value is not a record map"));
    };
    let el = read_str(&record, txn, EL_FIELD).ok_or_else(|| malformed(key, "missing \"el\""))?;
    let pos = read_str(&record, txn, POS_FIELD).ok_or_else(|| malformed(key, "missing \"pos\""))?;

    let element: Element = serde_json::from_str(&el).map_err(|e| malformed(key, e))?;
    let pos = PositionKey::parse(pos).map_err(|e| malformed(key, e))?;
    check_id(key, OrderedEntry::new(element, pos))
}

fn parse_entry(key: &str, json: &str) -> Result<OrderedEntry, SyncError> {
    let entry = OrderedEntry::from_json(json).map_err(|e| malformed(key, e))?;
    check_id(key, entry)
}

fn check_id(key: &str, entry: OrderedEntry) -> Result<OrderedEntry, SyncError> {
    if entry.id() != key {
        return Err(malformed(
            key,
            format!("element id {:?} does not match its key", entry.id()),
        ));
    }
    Ok(entry)
}

fn malformed(key: &str, reason: impl ToString) -> SyncError {
    SyncError::MalformedEntry {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

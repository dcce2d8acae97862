//! Ephemeral per-replica state (cursors, selections, user profile).
//!
//! Each client owns one JSON object slot identified by its client id and
//! guarded by a logical clock. Local writes bump the own clock; remote
//! writes are accepted only when their clock is newer, so late or
//! duplicated deliveries are harmless.
//!
//! ```text
//! set_local_state_field("pointer", …)
//!       │ clock + 1
//!       ▼
//! states: { 17: {...}, 42: {...} } ──► AwarenessChange { added, updated, removed, local }
//!       ▲
//! apply_remote_state(AwarenessUpdate { client_id: 42, clock: 9, state })
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::feed::{Feed, Subscription};

/// What one mutation of the store changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwarenessChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
    /// The change was made through this store's own local slot.
    pub local: bool,
}

impl AwarenessChange {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// A client's slot as exchanged between replicas. `state: None` means the
/// client went offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessUpdate {
    pub client_id: u64,
    pub clock: u32,
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Default)]
struct ClientSlot {
    clock: u32,
    state: Option<Value>,
}

struct AwarenessInner {
    client_id: u64,
    clients: RefCell<BTreeMap<u64, ClientSlot>>,
    feed: Feed<AwarenessChange>,
}

/// Handle to the awareness store of one replica. Clones share state.
#[derive(Clone)]
pub struct Awareness {
    inner: Rc<AwarenessInner>,
}

impl Default for Awareness {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Awareness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awareness")
            .field("client_id", &self.inner.client_id)
            .field("clients", &self.inner.clients.borrow().len())
            .finish()
    }
}

impl Awareness {
    /// Store with a random client id and an empty local state.
    pub fn new() -> Self {
        Self::with_client_id(Uuid::new_v4().as_u128() as u64)
    }

    pub fn with_client_id(client_id: u64) -> Self {
        let mut clients = BTreeMap::new();
        clients.insert(
            client_id,
            ClientSlot {
                clock: 0,
                state: Some(Value::Object(Map::new())),
            },
        );
        Self {
            inner: Rc::new(AwarenessInner {
                client_id,
                clients: RefCell::new(clients),
                feed: Feed::new(),
            }),
        }
    }

    pub fn client_id(&self) -> u64 {
        self.inner.client_id
    }

    pub fn local_state(&self) -> Option<Value> {
        self.state(self.inner.client_id)
    }

    pub fn state(&self, client_id: u64) -> Option<Value> {
        self.inner
            .clients
            .borrow()
            .get(&client_id)
            .and_then(|slot| slot.state.clone())
    }

    /// Every client with a live state, including this one.
    pub fn states(&self) -> BTreeMap<u64, Value> {
        self.inner
            .clients
            .borrow()
            .iter()
            .filter_map(|(id, slot)| slot.state.clone().map(|s| (*id, s)))
            .collect()
    }

    /// Replace the local state; `None` marks this client offline.
    pub fn set_local_state(&self, state: Option<Value>) {
        let client_id = self.inner.client_id;
        let change = {
            let mut clients = self.inner.clients.borrow_mut();
            let slot = clients.entry(client_id).or_default();
            let previous = slot.state.take();
            slot.clock += 1;
            slot.state = state.clone();
            classify(client_id, previous.as_ref(), state.as_ref(), true)
        };
        self.emit(change);
    }

    /// Set one top-level field of the local state object.
    pub fn set_local_state_field(&self, field: &str, value: Value) {
        let mut state = match self.local_state() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        state.insert(field.to_string(), value);
        self.set_local_state(Some(Value::Object(state)));
    }

    /// The local slot, for the transport to broadcast.
    pub fn local_update(&self) -> AwarenessUpdate {
        let clients = self.inner.clients.borrow();
        let slot = clients.get(&self.inner.client_id).cloned().unwrap_or_default();
        AwarenessUpdate {
            client_id: self.inner.client_id,
            clock: slot.clock,
            state: slot.state,
        }
    }

    /// Merge another client's slot. Stale clocks are ignored, and so are
    /// updates addressed to this client's own slot.
    pub fn apply_remote_state(&self, update: &AwarenessUpdate) {
        if update.client_id == self.inner.client_id {
            log::trace!("ignoring remote awareness for own client {}", update.client_id);
            return;
        }

        let change = {
            let mut clients = self.inner.clients.borrow_mut();
            let slot = clients.entry(update.client_id).or_default();
            let newer = slot.clock < update.clock
                || (slot.clock == update.clock && update.state.is_none() && slot.state.is_some());
            if !newer {
                return;
            }
            let previous = slot.state.take();
            slot.clock = update.clock;
            slot.state = update.state.clone();
            classify(update.client_id, previous.as_ref(), update.state.as_ref(), false)
        };
        self.emit(change);
    }

    /// Drop another client's state, e.g. after its connection timed out.
    pub fn remove_remote_state(&self, client_id: u64) {
        if client_id == self.inner.client_id {
            return;
        }
        let change = {
            let mut clients = self.inner.clients.borrow_mut();
            match clients.get_mut(&client_id) {
                Some(slot) => {
                    let previous = slot.state.take();
                    classify(client_id, previous.as_ref(), None, false)
                }
                None => return,
            }
        };
        self.emit(change);
    }

    pub fn observe(&self, observer: impl Fn(&AwarenessChange) + 'static) -> Subscription {
        self.inner.feed.subscribe(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.feed.observer_count()
    }

    fn emit(&self, change: AwarenessChange) {
        if change.is_empty() {
            return;
        }
        log::trace!(
            "awareness change: +{:?} ~{:?} -{:?}",
            change.added,
            change.updated,
            change.removed
        );
        self.inner.feed.emit(&change);
    }
}

fn classify(
    client_id: u64,
    previous: Option<&Value>,
    next: Option<&Value>,
    local: bool,
) -> AwarenessChange {
    let mut change = AwarenessChange {
        local,
        ..AwarenessChange::default()
    };
    match (previous, next) {
        (None, Some(_)) => change.added.push(client_id),
        (Some(_), None) => change.removed.push(client_id),
        (Some(a), Some(b)) if a != b => change.updated.push(client_id),
        _ => {}
    }
    change
}

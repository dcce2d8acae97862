//! Binds a host scene to a shared document until destroyed.
//!
//! ## Architecture
//!
//! ```text
//!        host                           SceneBinding                         SharedDoc
//! ┌──────────────┐  on_scene_change  ┌──────────────────────┐  one txn   ┌──────────────┐
//! │ SceneHost    │ ────────────────► │ SnapshotTracker      │ ─────────► │ "elements"   │
//! │              │                   │ DeltaComputer        │  (origin)  │ "assets"     │
//! │              │ ◄──────────────── │ Reconciler           │ ◄───────── │ deep feed    │
//! └──────────────┘ replace_elements  │ AssetSync            │  remote    └──────────────┘
//!        ▲                           │ PresenceSync ◄───────┼── Awareness
//!        └── replace_collaborators ──┤ UndoManager (opt.)   │
//!                                    └──────────────────────┘
//! ```
//!
//! Every feed registration made during construction is held as a
//! [`Subscription`]; [`SceneBinding::destroy`] revokes all of them once.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use sketchsync_core::{DeltaComputer, Snapshot, SnapshotTracker, SyncConfig};

use crate::applier::apply_operations;
use crate::assets::AssetSync;
use crate::awareness::{Awareness, AwarenessChange};
use crate::doc::{AssetsEvent, ElementsEvent, SharedDoc};
use crate::error::SyncError;
use crate::feed::Subscription;
use crate::host::{HostHandle, SceneChange};
use crate::origin::Origin;
use crate::presence::{Collaborators, PointerUpdate, PresenceSync};
use crate::reconciler::Reconciler;
use crate::triggers::{ControlId, ControlSurface, HistoryAction, HistoryControls, KeyChord};
use crate::undo::UndoManager;

/// Optional collaborators of a binding.
#[derive(Default)]
pub struct BindingOptions {
    pub config: SyncConfig,
    pub awareness: Option<Awareness>,
    pub undo: Option<UndoManager>,
    pub controls: Option<Rc<dyn ControlSurface>>,
}

impl BindingOptions {
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_awareness(mut self, awareness: Awareness) -> Self {
        self.awareness = Some(awareness);
        self
    }

    pub fn with_undo(mut self, undo: UndoManager) -> Self {
        self.undo = Some(undo);
        self
    }

    pub fn with_controls(mut self, controls: Rc<dyn ControlSurface>) -> Self {
        self.controls = Some(controls);
        self
    }
}

/// What one local change notification did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Element operations computed by the delta.
    pub operations: usize,
    pub applied: usize,
    pub dropped: usize,
    pub assets_shared: usize,
}

impl CycleReport {
    pub fn is_noop(&self) -> bool {
        self.operations == 0 && self.assets_shared == 0
    }
}

struct BindingState {
    tracker: SnapshotTracker,
    computer: DeltaComputer,
    assets: AssetSync,
    controls: Option<HistoryControls>,
}

struct BindingShared {
    origin: Origin,
    host: HostHandle,
    doc: SharedDoc,
    reconciler: Reconciler,
    undo: Option<UndoManager>,
    presence: Option<RefCell<PresenceSync>>,
    state: RefCell<BindingState>,
}

/// A live host ↔ shared-document binding.
pub struct SceneBinding {
    shared: Rc<BindingShared>,
    teardown: Vec<Subscription>,
    destroyed: bool,
}

impl std::fmt::Debug for SceneBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneBinding")
            .field("origin", &self.shared.origin)
            .field("subscriptions", &self.teardown.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl SceneBinding {
    /// Attach `host` to `doc`: push the current collection, assets and
    /// collaborators to the host, then start listening in both directions.
    pub fn new(
        host: HostHandle,
        doc: SharedDoc,
        options: BindingOptions,
    ) -> Result<Self, SyncError> {
        let origin = Origin::new();

        let entries = doc.elements().entries()?;
        let mut tracker = SnapshotTracker::new();
        tracker.rebuild(&entries);
        let scene = entries
            .into_iter()
            .map(|entry| Arc::new(entry.element))
            .collect::<Vec<_>>();

        let (assets, existing_files) = AssetSync::new(origin, &doc.assets())?;
        let presence = options.awareness.map(PresenceSync::new);
        let initial_collaborators = presence.as_ref().map(|p| p.collaborators().clone());

        let shared = Rc::new(BindingShared {
            origin,
            host,
            doc,
            reconciler: Reconciler::new(origin),
            undo: options.undo,
            presence: presence.map(RefCell::new),
            state: RefCell::new(BindingState {
                tracker,
                computer: DeltaComputer::from_config(&options.config),
                assets,
                controls: options.controls.map(HistoryControls::new),
            }),
        });

        let mut teardown = Vec::new();

        let weak = Rc::downgrade(&shared);
        teardown.push(shared.doc.elements().observe_deep(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_remote_elements(event);
            }
        }));

        let weak = Rc::downgrade(&shared);
        teardown.push(shared.doc.assets().observe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_remote_assets(event);
            }
        }));

        if let Some(presence) = &shared.presence {
            let weak = Rc::downgrade(&shared);
            let awareness = presence.borrow().awareness().clone();
            teardown.push(awareness.observe(move |change| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_awareness_change(change);
                }
            }));
        }

        if let Some(undo) = &shared.undo {
            undo.add_tracked_origin(origin);
            let undo = undo.clone();
            teardown.push(Subscription::new(move || undo.remove_tracked_origin(origin)));
        }

        if shared.state.borrow().controls.is_some() {
            let weak: Weak<BindingShared> = Rc::downgrade(&shared);
            teardown.push(Subscription::new(move || {
                if let Some(shared) = weak.upgrade() {
                    if let Some(controls) = shared.state.borrow_mut().controls.as_mut() {
                        controls.release();
                    }
                }
            }));
        }

        log::info!(
            "binding {origin} attached: {} elements, {} assets, {} teardown steps",
            scene.len(),
            existing_files.len(),
            teardown.len()
        );

        shared.host.replace_elements(scene);
        if !existing_files.is_empty() {
            shared.host.register_files(existing_files);
        }
        if let Some(collaborators) = initial_collaborators {
            shared.host.replace_collaborators(collaborators);
        }

        Ok(Self {
            shared,
            teardown,
            destroyed: false,
        })
    }

    pub fn origin(&self) -> Origin {
        self.shared.origin
    }

    pub fn doc(&self) -> &SharedDoc {
        &self.shared.doc
    }

    pub fn undo_manager(&self) -> Option<&UndoManager> {
        self.shared.undo.as_ref()
    }

    /// Last-known view of the collection.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.borrow().tracker.snapshot().clone()
    }

    pub fn collaborators(&self) -> Option<Collaborators> {
        self.shared
            .presence
            .as_ref()
            .map(|p| p.borrow().collaborators().clone())
    }

    /// Number of registrations still to be revoked.
    pub fn subscription_count(&self) -> usize {
        self.teardown.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Handle the host's change notification: elements, then assets,
    /// then presence.
    pub fn on_scene_change(&self, change: &SceneChange) -> Result<CycleReport, SyncError> {
        if self.destroyed {
            log::warn!("scene change after destroy ignored");
            return Ok(CycleReport::default());
        }
        let shared = &self.shared;
        let mut report = CycleReport::default();

        let delta = {
            let state = shared.state.borrow();
            if state.tracker.is_unchanged(&change.elements) {
                None
            } else {
                Some(state.computer.compute(state.tracker.snapshot(), &change.elements)?)
            }
        };

        if let Some(delta) = delta {
            let elements = shared.doc.elements();
            let applied = apply_operations(&elements, shared.origin, &delta.operations)?;
            report.operations = delta.operations.len();
            report.applied = applied.applied;
            report.dropped = applied.dropped;

            let entries = elements.entries()?;
            shared.state.borrow_mut().tracker.rebuild(&entries);
        }

        if !change.files.is_empty() {
            let assets = shared.doc.assets();
            report.assets_shared = shared
                .state
                .borrow_mut()
                .assets
                .push_local(&assets, &change.files)?;
        }

        if let Some(presence) = &shared.presence {
            let presence = presence.borrow();
            presence.publish_selection(&change.selected_element_ids);
            if let Some(pointer) = &change.pointer {
                presence.publish_pointer(pointer)?;
            }
        }

        if !report.is_noop() {
            log::debug!(
                "local cycle: {} operations ({} dropped), {} assets",
                report.operations,
                report.dropped,
                report.assets_shared
            );
        }
        Ok(report)
    }

    /// Publish a raw pointer move.
    pub fn on_pointer_update(&self, update: &PointerUpdate) -> Result<(), SyncError> {
        if self.destroyed {
            return Ok(());
        }
        match &self.shared.presence {
            Some(presence) => presence.borrow().publish_pointer(update),
            None => Ok(()),
        }
    }

    /// Returns false without an undo manager or with nothing to undo.
    pub fn undo(&self) -> bool {
        self.run(HistoryAction::Undo)
    }

    pub fn redo(&self) -> bool {
        self.run(HistoryAction::Redo)
    }

    /// Run the history action bound to `chord`. Returns whether the chord
    /// was consumed.
    pub fn handle_key(&self, chord: &KeyChord) -> bool {
        if self.destroyed || self.shared.undo.is_none() {
            return false;
        }
        match HistoryAction::from_chord(chord) {
            Some(action) => {
                self.run(action);
                true
            }
            None => false,
        }
    }

    /// Re-acquire undo/redo controls after the host's layout changed.
    pub fn on_layout_change(&self) {
        if self.destroyed {
            return;
        }
        if let Some(controls) = self.shared.state.borrow_mut().controls.as_mut() {
            if controls.reacquire() {
                log::debug!("history controls re-acquired");
            }
        }
    }

    /// A host control was activated. Returns whether it was one of ours.
    pub fn on_control_activated(&self, control: &ControlId) -> bool {
        if self.destroyed {
            return false;
        }
        let action = self
            .shared
            .state
            .borrow()
            .controls
            .as_ref()
            .and_then(|c| c.action_for(control));
        match action {
            Some(action) => {
                self.run(action);
                true
            }
            None => false,
        }
    }

    /// Revoke every registration made by [`SceneBinding::new`]. Calling it
    /// again does nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        let count = self.teardown.len();
        for subscription in self.teardown.drain(..) {
            subscription.unsubscribe();
        }
        self.destroyed = true;
        log::info!("binding {} destroyed, {count} registrations revoked", self.shared.origin);
    }

    fn run(&self, action: HistoryAction) -> bool {
        if self.destroyed {
            return false;
        }
        let Some(undo) = &self.shared.undo else {
            return false;
        };
        match action {
            HistoryAction::Undo => undo.undo(),
            HistoryAction::Redo => undo.redo(),
        }
    }
}

impl BindingShared {
    fn on_remote_elements(&self, event: &ElementsEvent) {
        if self.reconciler.is_echo(event) {
            return;
        }

        let local = self.host.elements();
        let scene = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                log::error!("remote change arrived during a local cycle, deferring to next event");
                return;
            };
            self.reconciler
                .reconcile(event, &self.doc.elements(), &local, &mut state.tracker)
        };

        match scene {
            Ok(Some(scene)) => self.host.replace_elements(scene),
            Ok(None) => {}
            Err(e) => log::error!("remote reconciliation failed: {e}"),
        }
    }

    fn on_remote_assets(&self, event: &AssetsEvent) {
        if event.is_from(self.origin) {
            return;
        }

        let added = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                log::error!("remote assets arrived during a local cycle, deferring to next event");
                return;
            };
            state.assets.pull_remote(&self.doc.assets(), event)
        };

        match added {
            Ok(files) if !files.is_empty() => {
                log::info!("registering {} remote assets", files.len());
                self.host.register_files(files);
            }
            Ok(_) => {}
            Err(e) => log::error!("remote asset sync failed: {e}"),
        }
    }

    fn on_awareness_change(&self, change: &AwarenessChange) {
        if change.local {
            return;
        }
        let Some(presence) = &self.presence else {
            return;
        };

        let collaborators = match presence.try_borrow_mut() {
            Ok(mut presence) => presence.apply_change(change).cloned(),
            Err(_) => {
                log::error!("awareness change arrived while publishing, deferring to next event");
                return;
            }
        };
        if let Some(collaborators) = collaborators {
            log::trace!("{} collaborators", collaborators.len());
            self.host.replace_collaborators(collaborators);
        }
    }
}

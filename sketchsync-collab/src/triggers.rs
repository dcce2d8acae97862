//! Undo/redo triggers: keyboard chords and host controls.
//!
//! Host controls (toolbar buttons) can be destroyed and recreated when the
//! layout changes, so bindings hold them by id and re-acquire any that are
//! missing or disconnected on every layout-change signal.

use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryAction {
    Undo,
    Redo,
}

impl HistoryAction {
    /// Ctrl+Z → undo; Ctrl+Shift+Z and Ctrl+Y → redo.
    pub fn from_chord(chord: &KeyChord) -> Option<Self> {
        if !chord.ctrl || chord.alt {
            return None;
        }
        match chord.key.to_lowercase().as_str() {
            "z" if chord.shift => Some(HistoryAction::Redo),
            "z" => Some(HistoryAction::Undo),
            "y" if !chord.shift => Some(HistoryAction::Redo),
            _ => None,
        }
    }
}

/// A key press with its modifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyChord {
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl KeyChord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }
}

/// Host-assigned identifier of a control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlId(pub String);

impl ControlId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Where the host's undo/redo controls live.
pub trait ControlSurface {
    /// The control currently bound to `action`, if the layout has one.
    fn find_control(&self, action: HistoryAction) -> Option<ControlId>;

    /// Whether `control` is still part of the layout.
    fn is_connected(&self, control: &ControlId) -> bool;
}

/// The undo and redo controls a binding is listening to.
pub struct HistoryControls {
    surface: Rc<dyn ControlSurface>,
    undo: Option<ControlId>,
    redo: Option<ControlId>,
}

impl std::fmt::Debug for HistoryControls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryControls")
            .field("undo", &self.undo)
            .field("redo", &self.redo)
            .finish()
    }
}

impl HistoryControls {
    pub fn new(surface: Rc<dyn ControlSurface>) -> Self {
        let mut controls = Self {
            surface,
            undo: None,
            redo: None,
        };
        controls.reacquire();
        controls
    }

    /// Re-bind every control that is missing or no longer connected.
    /// Returns whether any binding changed.
    pub fn reacquire(&mut self) -> bool {
        let undo = Self::refresh(self.surface.as_ref(), &mut self.undo, HistoryAction::Undo);
        let redo = Self::refresh(self.surface.as_ref(), &mut self.redo, HistoryAction::Redo);
        undo || redo
    }

    pub fn control(&self, action: HistoryAction) -> Option<&ControlId> {
        match action {
            HistoryAction::Undo => self.undo.as_ref(),
            HistoryAction::Redo => self.redo.as_ref(),
        }
    }

    /// The action for an activated control; `None` for controls that are
    /// not (or no longer) bound.
    pub fn action_for(&self, control: &ControlId) -> Option<HistoryAction> {
        if self.undo.as_ref() == Some(control) {
            Some(HistoryAction::Undo)
        } else if self.redo.as_ref() == Some(control) {
            Some(HistoryAction::Redo)
        } else {
            None
        }
    }

    pub fn release(&mut self) {
        self.undo = None;
        self.redo = None;
    }

    fn refresh(
        surface: &dyn ControlSurface,
        slot: &mut Option<ControlId>,
        action: HistoryAction,
    ) -> bool {
        if slot.as_ref().is_some_and(|c| surface.is_connected(c)) {
            return false;
        }
        let found = surface.find_control(action);
        if found.is_none() {
            log::debug!("{action:?} control unavailable, retrying on next layout change");
        }
        let changed = *slot != found;
        *slot = found;
        changed
    }
}

//! The host scene a binding keeps in sync.

use std::collections::BTreeSet;
use std::rc::Rc;

use sketchsync_core::{AssetRecord, SharedElement};

use crate::presence::{Collaborators, PointerUpdate};

/// The editor side of a binding.
///
/// Methods take `&self`: hosts are UI objects with their own interior
/// state, and a binding may call back into the host while the host is
/// notifying it.
pub trait SceneHost {
    /// Active (non-deleted) elements in scene order.
    fn elements(&self) -> Vec<SharedElement>;

    fn replace_elements(&self, elements: Vec<SharedElement>);

    fn replace_collaborators(&self, collaborators: Collaborators);

    /// Make blobs added by other replicas available locally.
    fn register_files(&self, files: Vec<AssetRecord>);
}

pub type HostHandle = Rc<dyn SceneHost>;

/// Payload of the host's change notification.
#[derive(Debug, Clone, Default)]
pub struct SceneChange {
    /// Full element sequence; may include logically deleted elements.
    pub elements: Vec<SharedElement>,
    pub selected_element_ids: BTreeSet<String>,
    pub files: Vec<AssetRecord>,
    pub pointer: Option<PointerUpdate>,
}

impl SceneChange {
    pub fn new(elements: Vec<SharedElement>) -> Self {
        Self {
            elements,
            ..Self::default()
        }
    }

    pub fn with_selection(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.selected_element_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_files(mut self, files: Vec<AssetRecord>) -> Self {
        self.files = files;
        self
    }

    pub fn with_pointer(mut self, pointer: PointerUpdate) -> Self {
        self.pointer = Some(pointer);
        self
    }
}

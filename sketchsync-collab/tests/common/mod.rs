//! Shared helpers: an in-memory host and replica plumbing.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sketchsync_collab::{
    BindingOptions, Collaborators, CycleReport, SceneBinding, SceneChange, SceneHost, SharedDoc,
};
use sketchsync_core::{AssetRecord, Element, SharedElement};

#[derive(Default)]
pub struct TestHost {
    pub elements: RefCell<Vec<SharedElement>>,
    pub collaborators: RefCell<Collaborators>,
    pub files: RefCell<Vec<AssetRecord>>,
    pub replacements: Cell<usize>,
}

impl TestHost {
    pub fn ids(&self) -> Vec<String> {
        self.elements.borrow().iter().map(|el| el.id.clone()).collect()
    }

    pub fn element(&self, id: &str) -> Option<SharedElement> {
        self.elements.borrow().iter().find(|el| el.id == id).cloned()
    }
}

impl SceneHost for TestHost {
    fn elements(&self) -> Vec<SharedElement> {
        self.elements.borrow().clone()
    }

    fn replace_elements(&self, elements: Vec<SharedElement>) {
        self.replacements.set(self.replacements.get() + 1);
        *self.elements.borrow_mut() = elements;
    }

    fn replace_collaborators(&self, collaborators: Collaborators) {
        *self.collaborators.borrow_mut() = collaborators;
    }

    fn register_files(&self, files: Vec<AssetRecord>) {
        self.files.borrow_mut().extend(files);
    }
}

/// A document, a host and the binding between them.
pub struct Replica {
    pub doc: SharedDoc,
    pub host: Rc<TestHost>,
    pub binding: SceneBinding,
}

impl Replica {
    pub fn new() -> Self {
        Self::with_options(BindingOptions::default())
    }

    pub fn with_options(options: BindingOptions) -> Self {
        Self::on_doc(SharedDoc::new(), options)
    }

    pub fn on_doc(doc: SharedDoc, options: BindingOptions) -> Self {
        let host = Rc::new(TestHost::default());
        let binding = SceneBinding::new(host.clone(), doc.clone(), options).unwrap();
        Self { doc, host, binding }
    }

    /// Replace the host scene the way an editor would and notify.
    pub fn edit(&self, elements: Vec<SharedElement>) -> CycleReport {
        self.commit(SceneChange::new(elements))
    }

    pub fn commit(&self, change: SceneChange) -> CycleReport {
        *self.host.elements.borrow_mut() = change.elements.clone();
        self.binding.on_scene_change(&change).unwrap()
    }
}

pub fn el(id: &str, version: u64) -> SharedElement {
    Element::new(id, version).into_shared()
}

/// Deliver every pending update of `from` to `to`.
pub fn deliver(from: &Replica, to: &Replica) {
    for update in from.doc.drain_outgoing() {
        to.doc.apply_update(&update).unwrap();
    }
}

/// Exchange full state both ways.
pub fn sync(a: &Replica, b: &Replica) {
    let a_updates = a.doc.drain_outgoing();
    let b_updates = b.doc.drain_outgoing();
    for update in &a_updates {
        b.doc.apply_update(update).unwrap();
    }
    for update in &b_updates {
        a.doc.apply_update(update).unwrap();
    }
}

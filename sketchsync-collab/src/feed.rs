//! Change feeds and revocable subscriptions.
//!
//! ```text
//! Feed::subscribe(f) ──► Subscription ──drop / unsubscribe──► f removed
//!        │
//!   Feed::emit(&e) ──► snapshot observer list ──► f(&e) for each
//! ```
//!
//! Dispatch works on a snapshot of the observer list, so an observer may
//! subscribe, unsubscribe or emit on other feeds while it is being called.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Observer<E> = Rc<dyn Fn(&E)>;

struct FeedInner<E> {
    next_id: Cell<u64>,
    observers: RefCell<Vec<(u64, Observer<E>)>>,
}

/// A single-threaded observer registry for events of type `E`.
pub struct Feed<E> {
    inner: Rc<FeedInner<E>>,
}

impl<E> Clone for Feed<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: 'static> Default for Feed<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Feed<E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(FeedInner {
                next_id: Cell::new(0),
                observers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register `observer`; it stays registered until the returned
    /// subscription is dropped or revoked.
    pub fn subscribe(&self, observer: impl Fn(&E) + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .observers
            .borrow_mut()
            .push((id, Rc::new(observer)));

        let feed: Weak<FeedInner<E>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(feed) = feed.upgrade() {
                feed.observers.borrow_mut().retain(|(oid, _)| *oid != id);
            }
        })
    }

    pub fn emit(&self, event: &E) {
        let observers: Vec<Observer<E>> = self
            .inner
            .observers
            .borrow()
            .iter()
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for observer in observers {
            observer(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }
}

/// Handle to one registration (or any other teardown step).
///
/// The revocation runs exactly once: on [`Subscription::unsubscribe`] or
/// on drop, whichever comes first.
#[must_use = "dropping a Subscription revokes it immediately"]
pub struct Subscription {
    revoke: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(revoke: impl FnOnce() + 'static) -> Self {
        Self {
            revoke: Some(Box::new(revoke)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.revoke.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.revoke_now();
    }

    fn revoke_now(&mut self) {
        if let Some(revoke) = self.revoke.take() {
            revoke();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.revoke_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

//! The observation context.
//!
//! One context serves a whole object graph. It owns three pieces of shared
//! state:
//!
//! - a registry of **named roots** that anchor absolute observer paths
//!   (`"app.controller.name"` resolves its first segment here),
//! - a queue of **deferred path observers** whose roots have not been
//!   registered yet; [`flush_deferred`](ObservationContext::flush_deferred)
//!   installs any whose root has since appeared,
//! - a **suspension counter**; while it is positive, per-object
//!   notification is parked and coalesced, and resuming to zero drains the
//!   set of objects with pending changes.
//!
//! Constructors take a context explicitly; create one per graph (or one per
//! process when a single graph is enough).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::object::{ObservableObject, WeakObservable};
use crate::observer::Observer;
use crate::path::split_root;
use crate::KvoError;

struct PendingObserver {
    root: String,
    path: String,
    observer: Observer,
}

#[derive(Default)]
struct ContextInner {
    next_object_id: Cell<u64>,
    suspend_count: Cell<u32>,
    roots: RefCell<HashMap<String, ObservableObject>>,
    pending: RefCell<Vec<PendingObserver>>,
    changed: RefCell<Vec<(u64, WeakObservable)>>,
}

/// Shared observation state for one object graph. Clones share identity.
#[derive(Clone, Default)]
pub struct ObservationContext {
    inner: Rc<ContextInner>,
}

impl ObservationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate_object_id(&self) -> u64 {
        let id = self.inner.next_object_id.get() + 1;
        self.inner.next_object_id.set(id);
        id
    }

    // ── Named roots ────────────────────────────────────────────────────────

    /// Registers `object` under `name` as a path root and installs any
    /// deferred observers waiting for it.
    pub fn register_root(&self, name: impl Into<String>, object: &ObservableObject) -> &Self {
        self.inner
            .roots
            .borrow_mut()
            .insert(name.into(), object.clone());
        self.flush_deferred();
        self
    }

    pub fn unregister_root(&self, name: &str) -> &Self {
        self.inner.roots.borrow_mut().remove(name);
        self
    }

    pub fn root(&self, name: &str) -> Option<ObservableObject> {
        self.inner.roots.borrow().get(name).cloned()
    }

    // ── Path observers ─────────────────────────────────────────────────────

    /// Registers an observer on an absolute path whose first segment names a
    /// root. When the root is not registered yet, the registration is
    /// deferred until it appears; the queue is deduplicated by
    /// `(path, target, method)`.
    pub fn add_observer(&self, path: &str, observer: &Observer) -> Result<&Self, KvoError> {
        let (root_name, remainder) = split_root(path)?;
        if let Some(root) = self.root(root_name) {
            root.add_observer(remainder, observer)?;
            return Ok(self);
        }
        let mut pending = self.inner.pending.borrow_mut();
        let duplicate = pending.iter().any(|p| {
            p.root == root_name
                && p.path == remainder
                && p.observer.target() == observer.target()
                && p.observer.method() == observer.method()
        });
        if !duplicate {
            tracing::trace!(path, "deferring path observer until root registers");
            pending.push(PendingObserver {
                root: root_name.to_owned(),
                path: remainder.to_owned(),
                observer: observer.clone(),
            });
        }
        Ok(self)
    }

    /// Removes a path observer, whether installed or still deferred.
    pub fn remove_observer(
        &self,
        path: &str,
        target: &str,
        method: &str,
    ) -> Result<&Self, KvoError> {
        let (root_name, remainder) = split_root(path)?;
        let removed_pending = {
            let mut pending = self.inner.pending.borrow_mut();
            let before = pending.len();
            pending.retain(|p| {
                !(p.root == root_name
                    && p.path == remainder
                    && p.observer.target() == target
                    && p.observer.method() == method)
            });
            pending.len() != before
        };
        if removed_pending {
            return Ok(self);
        }
        match self.root(root_name) {
            Some(root) => {
                root.remove_observer(remainder, target, method)?;
                Ok(self)
            }
            None => Err(KvoError::UnknownRoot(root_name.to_owned())),
        }
    }

    /// Installs every deferred observer whose root now resolves. Idempotent
    /// and cheap when nothing is pending.
    pub fn flush_deferred(&self) -> &Self {
        if self.inner.pending.borrow().is_empty() {
            return self;
        }
        let ready: Vec<PendingObserver> = {
            let mut pending = self.inner.pending.borrow_mut();
            let mut ready = Vec::new();
            let mut index = 0;
            while index < pending.len() {
                if self.inner.roots.borrow().contains_key(&pending[index].root) {
                    ready.push(pending.remove(index));
                } else {
                    index += 1;
                }
            }
            ready
        };
        for entry in ready {
            if let Some(root) = self.root(&entry.root) {
                tracing::trace!(root = %entry.root, path = %entry.path, "installing deferred path observer");
                // The path was validated when it was queued.
                let _ = root.add_observer(&entry.path, &entry.observer);
            }
        }
        self
    }

    // ── Suspension ─────────────────────────────────────────────────────────

    pub fn is_suspended(&self) -> bool {
        self.inner.suspend_count.get() > 0
    }

    /// Increments the suspension counter. While it is positive, property
    /// changes coalesce in their objects' pending sets.
    pub fn suspend_observing(&self) -> &Self {
        self.inner
            .suspend_count
            .set(self.inner.suspend_count.get() + 1);
        self
    }

    /// Decrements the suspension counter; reaching zero drains every object
    /// that accumulated changes while suspended.
    pub fn resume_observing(&self) -> &Self {
        let count = self.inner.suspend_count.get();
        if count == 0 {
            return self;
        }
        self.inner.suspend_count.set(count - 1);
        if count == 1 {
            let parked: Vec<(u64, WeakObservable)> = self.inner.changed.take();
            tracing::trace!(objects = parked.len(), "resuming observation");
            for (_, weak) in parked {
                if let Some(object) = weak.upgrade() {
                    object.flush_suspended_changes();
                }
            }
        }
        self
    }

    /// Records that `object` holds a non-empty pending change set while the
    /// context is suspended.
    pub(crate) fn note_pending_changes(&self, object: &ObservableObject) {
        let mut changed = self.inner.changed.borrow_mut();
        let id = object.object_id();
        if !changed.iter().any(|(existing, _)| *existing == id) {
            changed.push((id, object.downgrade()));
        }
    }

    pub(crate) fn forget_object(&self, id: u64) {
        self.inner
            .changed
            .borrow_mut()
            .retain(|(existing, _)| *existing != id);
    }
}

impl std::fmt::Debug for ObservationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationContext")
            .field("suspended", &self.inner.suspend_count.get())
            .field("pending_paths", &self.inner.pending.borrow().len())
            .finish()
    }
}

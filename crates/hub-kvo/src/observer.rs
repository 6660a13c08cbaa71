//! Observer registrations and the per-key observer set.
//!
//! An [`Observer`] pairs a `(target, method)` identity with a handler
//! closure. The string pair exists for the configuration boundary: two
//! observers with the same target and method name are the same
//! registration, so re-adding overwrites the context and removing needs no
//! access to the original closure.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;

use crate::object::ObservableObject;

/// Payload handed to every observer handler.
pub struct Notification<'a> {
    /// The object whose property changed.
    pub object: &'a ObservableObject,
    /// The key that changed (`"*"` when every property may have changed).
    pub key: &'a str,
    /// The context value supplied at registration, if any.
    pub context: Option<&'a Value>,
    /// The object revision at fan-out time. Handlers comparing revisions
    /// can use this to deduplicate across several observed keys.
    pub revision: u64,
}

pub type Handler = Rc<dyn Fn(&Notification<'_>)>;

/// A keyed observer registration.
#[derive(Clone)]
pub struct Observer {
    target: String,
    method: String,
    context: Option<Value>,
    handler: Handler,
}

impl Observer {
    pub fn new(
        target: impl Into<String>,
        method: impl Into<String>,
        handler: impl Fn(&Notification<'_>) + 'static,
    ) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            context: None,
            handler: Rc::new(handler),
        }
    }

    /// Attaches a context value delivered with every notification.
    /// Re-registering the same `(target, method)` pair overwrites it.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn handler(&self) -> Handler {
        Rc::clone(&self.handler)
    }

    pub(crate) fn context_value(&self) -> Option<&Value> {
        self.context.as_ref()
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("target", &self.target)
            .field("method", &self.method)
            .finish()
    }
}

struct Member {
    target: String,
    method: String,
    context: Option<Value>,
    handler: Handler,
    last_notified: Rc<Cell<u64>>,
}

/// A snapshot entry produced by [`ObserverSet::members`].
///
/// The `last_notified` cell is shared with the live set on purpose: fan-out
/// mutates it in place so a member enqueued twice within one revision (for
/// example through dependent-key expansion) is notified once.
#[derive(Clone)]
pub struct ObserverMember {
    pub context: Option<Value>,
    handler: Handler,
    last_notified: Rc<Cell<u64>>,
}

impl ObserverMember {
    /// True when this member has not yet been notified at `revision`.
    pub fn should_notify(&self, revision: u64) -> bool {
        self.last_notified.get() != revision
    }

    /// Marks the member notified at `revision` and invokes the handler.
    pub fn notify(&self, object: &ObservableObject, key: &str, revision: u64) {
        self.last_notified.set(revision);
        (self.handler)(&Notification {
            object,
            key,
            context: self.context.as_ref(),
            revision,
        });
    }
}

/// A small multiset of observer registrations keyed by `(target, method)`
/// identity. Adding the same pair twice overwrites the context and handler;
/// the dedup revision cell survives the overwrite.
#[derive(Default)]
pub struct ObserverSet {
    members: Vec<Member>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: &Observer) {
        let slot = self
            .members
            .iter_mut()
            .find(|m| m.target == observer.target && m.method == observer.method);
        match slot {
            Some(m) => {
                m.context = observer.context.clone();
                m.handler = observer.handler();
            }
            None => self.members.push(Member {
                target: observer.target.clone(),
                method: observer.method.clone(),
                context: observer.context.clone(),
                handler: observer.handler(),
                last_notified: Rc::new(Cell::new(0)),
            }),
        }
    }

    /// Removes the registration for `(target, method)`. Returns whether a
    /// member was removed.
    pub fn remove(&mut self, target: &str, method: &str) -> bool {
        let before = self.members.len();
        self.members
            .retain(|m| !(m.target == target && m.method == method));
        self.members.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// A stable snapshot of the current members. Removal during fan-out is
    /// tolerated because iteration runs over this snapshot; additions are
    /// picked up on the next pass.
    pub fn members(&self) -> Vec<ObserverMember> {
        self.members
            .iter()
            .map(|m| ObserverMember {
                context: m.context.clone(),
                handler: Rc::clone(&m.handler),
                last_notified: Rc::clone(&m.last_notified),
            })
            .collect()
    }
}

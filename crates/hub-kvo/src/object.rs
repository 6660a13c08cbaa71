//! Observable objects.
//!
//! # Overview
//!
//! An [`ObservableObject`] is a cheaply clonable handle onto a bag of
//! dynamic properties. Reads and writes go through [`get`]/[`set`], which
//! understand computed-property descriptors, memoization and dependent-key
//! invalidation. Every mutation funnels into
//! [`property_did_change`], which either fans out to observers immediately
//! or parks the key in the pending change set while a property-change group
//! or a context suspension is active.
//!
//! The notification routine preserves a handful of ordering guarantees:
//! pending keys are drained LIFO, dependent keys are expanded (and their
//! memos cleared) before any observer fires, each observer fires at most
//! once per object revision, and keys queued by observer callbacks are
//! processed in a follow-up pass of the same invocation rather than
//! interleaved into the current one.
//!
//! [`get`]: ObservableObject::get
//! [`set`]: ObservableObject::set
//! [`property_did_change`]: ObservableObject::property_did_change

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::chain::{ChainLink, ChainRegistration};
use crate::context::ObservationContext;
use crate::observer::{Handler, Notification, Observer, ObserverMember, ObserverSet};
use crate::path::{is_path, parse_segments, strip_receiver_prefix};
use crate::property::ComputedProperty;
use crate::value::PropValue;
use crate::KvoError;

/// Hooks a host object can install on an observable object.
///
/// The store layer's records use this to funnel attribute reads and writes
/// through the data hash while keeping notification semantics here.
pub trait PropertyDelegate {
    /// Called when `get` finds neither a descriptor nor a stored value.
    fn unknown_property(&self, object: &ObservableObject, key: &str) -> Option<PropValue> {
        let _ = (object, key);
        None
    }

    /// Called when `set` targets a key with no descriptor and no stored
    /// value. Returning `true` claims the write; returning `false` lets the
    /// object store the value itself.
    fn set_unknown_property(&self, object: &ObservableObject, key: &str, value: PropValue) -> bool {
        let _ = (object, key, value);
        false
    }

    /// Invoked before a mutation is applied. Default is a no-op; hosts can
    /// snapshot state here.
    fn property_will_change(&self, object: &ObservableObject, key: &str) {
        let _ = (object, key);
    }

    /// Invoked at the tail of fan-out for every notified key.
    fn property_observer(&self, object: &ObservableObject, key: &str, revision: u64) {
        let _ = (object, key, revision);
    }
}

#[derive(Clone)]
struct LocalObserver {
    method: String,
    handler: Handler,
    last_notified: Rc<Cell<u64>>,
}

#[derive(Clone)]
struct SeenEntry {
    revision: u64,
    value: Option<PropValue>,
}

struct ObjectCore {
    ctx: ObservationContext,
    id: u64,
    revision: Cell<u64>,
    change_level: Cell<u32>,
    destroyed: Cell<bool>,
    values: RefCell<HashMap<String, PropValue>>,
    properties: RefCell<HashMap<String, Rc<ComputedProperty>>>,
    cache: RefCell<HashMap<String, PropValue>>,
    last_set: RefCell<HashMap<String, PropValue>>,
    dependents: RefCell<HashMap<String, Vec<String>>>,
    cache_dep: RefCell<HashMap<String, Option<Rc<Vec<String>>>>>,
    observers: RefCell<HashMap<String, ObserverSet>>,
    local_observers: RefCell<HashMap<String, Vec<LocalObserver>>>,
    observed_keys: RefCell<HashSet<String>>,
    chains: RefCell<HashMap<String, Vec<Rc<ChainLink>>>>,
    chain_roots: RefCell<Vec<ChainRegistration>>,
    changes: RefCell<Vec<String>>,
    manual_keys: RefCell<HashSet<String>>,
    seen: RefCell<HashMap<String, HashMap<String, SeenEntry>>>,
    delegate: RefCell<Option<Rc<dyn PropertyDelegate>>>,
}

/// A handle onto one observable object. Clones share identity and state.
#[derive(Clone)]
pub struct ObservableObject {
    core: Rc<ObjectCore>,
}

/// A non-owning handle; used where back-references must not keep the
/// object alive (chain links, suspended-change bookkeeping).
#[derive(Clone)]
pub struct WeakObservable {
    core: Weak<ObjectCore>,
}

impl WeakObservable {
    pub fn upgrade(&self) -> Option<ObservableObject> {
        self.core.upgrade().map(|core| ObservableObject { core })
    }
}

fn push_unique(list: &mut Vec<String>, key: &str) {
    if !list.iter().any(|k| k == key) {
        list.push(key.to_owned());
    }
}

impl ObservableObject {
    pub fn new(ctx: &ObservationContext) -> Self {
        Self {
            core: Rc::new(ObjectCore {
                ctx: ctx.clone(),
                id: ctx.allocate_object_id(),
                revision: Cell::new(1),
                change_level: Cell::new(0),
                destroyed: Cell::new(false),
                values: RefCell::new(HashMap::new()),
                properties: RefCell::new(HashMap::new()),
                cache: RefCell::new(HashMap::new()),
                last_set: RefCell::new(HashMap::new()),
                dependents: RefCell::new(HashMap::new()),
                cache_dep: RefCell::new(HashMap::new()),
                observers: RefCell::new(HashMap::new()),
                local_observers: RefCell::new(HashMap::new()),
                observed_keys: RefCell::new(HashSet::new()),
                chains: RefCell::new(HashMap::new()),
                chain_roots: RefCell::new(Vec::new()),
                changes: RefCell::new(Vec::new()),
                manual_keys: RefCell::new(HashSet::new()),
                seen: RefCell::new(HashMap::new()),
                delegate: RefCell::new(None),
            }),
        }
    }

    /// Process-unique identity of this object.
    pub fn object_id(&self) -> u64 {
        self.core.id
    }

    /// Monotonic change counter; strictly increased by every
    /// `property_did_change`.
    pub fn revision(&self) -> u64 {
        self.core.revision.get()
    }

    pub fn context(&self) -> &ObservationContext {
        &self.core.ctx
    }

    pub fn downgrade(&self) -> WeakObservable {
        WeakObservable {
            core: Rc::downgrade(&self.core),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.destroyed.get()
    }

    pub fn set_delegate(&self, delegate: Rc<dyn PropertyDelegate>) -> &Self {
        *self.core.delegate.borrow_mut() = Some(delegate);
        self
    }

    // ── Properties ─────────────────────────────────────────────────────────

    /// Installs a computed-property descriptor under `key` and registers its
    /// declared dependent keys.
    pub fn define_property(&self, key: &str, property: ComputedProperty) -> &Self {
        let deps: Vec<String> = property.dependent_keys().to_vec();
        self.core
            .properties
            .borrow_mut()
            .insert(key.to_owned(), Rc::new(property));
        self.core.cache.borrow_mut().remove(key);
        if !deps.is_empty() {
            let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
            self.register_dependent_key(key, &dep_refs);
        }
        self
    }

    /// Records that `key` must be invalidated and re-notified whenever any
    /// of `deps` changes.
    pub fn register_dependent_key(&self, key: &str, deps: &[&str]) -> &Self {
        {
            let mut dependents = self.core.dependents.borrow_mut();
            for dep in deps {
                let list = dependents.entry((*dep).to_owned()).or_default();
                push_unique(list, key);
            }
        }
        // The flattened closure memo is stale once the graph grows.
        self.core.cache_dep.borrow_mut().clear();
        self
    }

    /// Suppresses (or restores) automatic will/did notifications for `key`.
    /// With notifications off, `set` mutates silently and the caller drives
    /// `notify_property_change` by hand.
    pub fn set_automatic_notification(&self, key: &str, enabled: bool) -> &Self {
        let mut manual = self.core.manual_keys.borrow_mut();
        if enabled {
            manual.remove(key);
        } else {
            manual.insert(key.to_owned());
        }
        self
    }

    pub fn automatically_notifies_observers_for(&self, key: &str) -> bool {
        !self.core.manual_keys.borrow().contains(key)
    }

    // ── Reads ──────────────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> PropValue {
        let descriptor = self.core.properties.borrow().get(key).cloned();
        if let Some(descriptor) = descriptor {
            if descriptor.is_cacheable() {
                if let Some(cached) = self.core.cache.borrow().get(key) {
                    return cached.clone();
                }
            }
            let value = descriptor.call(self, key, None).unwrap_or_default();
            if descriptor.is_cacheable() {
                self.core
                    .cache
                    .borrow_mut()
                    .insert(key.to_owned(), value.clone());
            }
            return value;
        }
        if let Some(value) = self.core.values.borrow().get(key) {
            return value.clone();
        }
        let delegate = self.core.delegate.borrow().clone();
        if let Some(delegate) = delegate {
            if let Some(value) = delegate.unknown_property(self, key) {
                return value;
            }
        }
        PropValue::null()
    }

    /// Reads several keys at once.
    pub fn get_each(&self, keys: &[&str]) -> Vec<PropValue> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Resolves a dotted path rooted at the receiver. Returns `None` when an
    /// intermediate segment is missing or not an object.
    pub fn get_path(&self, path: &str) -> Option<PropValue> {
        let segments = parse_segments(strip_receiver_prefix(path)).ok()?;
        let mut object = self.clone();
        let last = segments.len() - 1;
        for (index, segment) in segments.iter().enumerate() {
            let value = object.get(segment);
            if index == last {
                return Some(value);
            }
            object = value.as_object()?.clone();
        }
        None
    }

    // ── Writes ─────────────────────────────────────────────────────────────

    pub fn set(&self, key: &str, value: impl Into<PropValue>) -> &Self {
        let value = value.into();
        let auto = self.automatically_notifies_observers_for(key);
        let descriptor = self.core.properties.borrow().get(key).cloned();

        if let Some(descriptor) = descriptor {
            if !descriptor.is_volatile() {
                if self.core.last_set.borrow().get(key) == Some(&value) {
                    return self;
                }
                self.core
                    .last_set
                    .borrow_mut()
                    .insert(key.to_owned(), value.clone());
            }
            // Group the write: a descriptor body may flip further keys on
            // the receiver, and all of them must land in one fan-out pass.
            self.begin_property_changes();
            if auto {
                self.property_will_change(key);
            }
            let canonical = descriptor.call(self, key, Some(&value));
            if descriptor.is_cacheable() {
                let mut cache = self.core.cache.borrow_mut();
                match &canonical {
                    Some(v) => {
                        cache.insert(key.to_owned(), v.clone());
                    }
                    None => {
                        cache.remove(key);
                    }
                }
            }
            if auto {
                // The fresh cache slot holds the canonical value; keep it.
                self.property_did_change_keeping_cache(key);
            }
            self.end_property_changes();
            return self;
        }

        let current = self.core.values.borrow().get(key).cloned();
        if current.is_none() {
            let delegate = self.core.delegate.borrow().clone();
            if let Some(delegate) = delegate {
                self.begin_property_changes();
                if auto {
                    self.property_will_change(key);
                }
                let handled = delegate.set_unknown_property(self, key, value.clone());
                if !handled {
                    self.core.values.borrow_mut().insert(key.to_owned(), value);
                }
                if auto {
                    self.property_did_change(key);
                }
                self.end_property_changes();
                return self;
            }
        }

        if current.as_ref() == Some(&value) {
            return self;
        }
        if auto {
            self.property_will_change(key);
            self.core.values.borrow_mut().insert(key.to_owned(), value);
            self.property_did_change(key);
        } else {
            self.core.values.borrow_mut().insert(key.to_owned(), value);
        }
        self
    }

    /// Writes only when the new value differs from the current one; a no-op
    /// write invokes no observers and leaves the revision untouched.
    pub fn set_if_changed(&self, key: &str, value: impl Into<PropValue>) -> &Self {
        let value = value.into();
        if self.get(key) != value {
            self.set(key, value);
        }
        self
    }

    /// Writes through a dotted path rooted at the receiver.
    pub fn set_path(&self, path: &str, value: impl Into<PropValue>) -> Result<&Self, KvoError> {
        let (target, leaf) = self.resolve_path_parent(path)?;
        target.set(&leaf, value);
        Ok(self)
    }

    /// Path-flavored [`set_if_changed`](Self::set_if_changed).
    pub fn set_path_if_changed(
        &self,
        path: &str,
        value: impl Into<PropValue>,
    ) -> Result<&Self, KvoError> {
        let (target, leaf) = self.resolve_path_parent(path)?;
        target.set_if_changed(&leaf, value);
        Ok(self)
    }

    fn resolve_path_parent(&self, path: &str) -> Result<(ObservableObject, String), KvoError> {
        let segments = parse_segments(strip_receiver_prefix(path))?;
        let mut object = self.clone();
        for segment in &segments[..segments.len() - 1] {
            let value = object.get(segment);
            object = match value.as_object() {
                Some(next) => next.clone(),
                None => {
                    return Err(KvoError::PathNotResolvable {
                        path: path.to_owned(),
                        segment: segment.clone(),
                    })
                }
            };
        }
        Ok((object, segments[segments.len() - 1].clone()))
    }

    /// Adds `by` to a numeric property and returns the new value. A missing
    /// or non-numeric current value counts as zero.
    pub fn increment_property(&self, key: &str, by: i64) -> PropValue {
        let current = self.get(key);
        let next = match current.as_json() {
            Some(Value::Number(n)) if n.is_f64() => Value::from(n.as_f64().unwrap_or(0.0) + by as f64),
            Some(Value::Number(n)) => Value::from(n.as_i64().unwrap_or(0) + by),
            _ => Value::from(by),
        };
        let next = PropValue::Json(next);
        self.set(key, next.clone());
        next
    }

    pub fn decrement_property(&self, key: &str, by: i64) -> PropValue {
        self.increment_property(key, -by)
    }

    /// Flips a boolean property and returns the new value.
    pub fn toggle_property(&self, key: &str) -> PropValue {
        self.toggle_property_between(key, PropValue::from(true), PropValue::from(false))
    }

    /// Sets `key` to `alternate` when its current value equals `value`, and
    /// to `value` otherwise. Returns the value written.
    pub fn toggle_property_between(
        &self,
        key: &str,
        value: PropValue,
        alternate: PropValue,
    ) -> PropValue {
        let next = if self.get(key) == value { alternate } else { value };
        self.set(key, next.clone());
        next
    }

    // ── Change grouping ────────────────────────────────────────────────────

    /// Opens a property-change group: notifications coalesce until the
    /// matching [`end_property_changes`](Self::end_property_changes).
    pub fn begin_property_changes(&self) -> &Self {
        self.core.change_level.set(self.core.change_level.get() + 1);
        self
    }

    /// Closes a property-change group. When the outermost group closes with
    /// pending changes and the context is not suspended, fan-out runs.
    pub fn end_property_changes(&self) -> &Self {
        let level = self.core.change_level.get();
        if level == 0 {
            return self;
        }
        self.core.change_level.set(level - 1);
        if level == 1
            && !self.core.changes.borrow().is_empty()
            && !self.core.ctx.is_suspended()
        {
            self.notify_property_observers(None);
        }
        self
    }

    // ── Change notification ────────────────────────────────────────────────

    /// Pre-mutation hook; forwards to the delegate.
    pub fn property_will_change(&self, key: &str) -> &Self {
        let delegate = self.core.delegate.borrow().clone();
        if let Some(delegate) = delegate {
            delegate.property_will_change(self, key);
        }
        self
    }

    pub fn property_did_change(&self, key: &str) -> &Self {
        self.property_did_change_with(key, false)
    }

    /// Like [`property_did_change`](Self::property_did_change) but preserves
    /// the computed-property cache slot for `key` (used when the caller has
    /// just refreshed it).
    pub fn property_did_change_keeping_cache(&self, key: &str) -> &Self {
        self.property_did_change_with(key, true)
    }

    fn property_did_change_with(&self, key: &str, keep_cache: bool) -> &Self {
        self.core.revision.set(self.core.revision.get() + 1);
        if !keep_cache {
            self.core.cache.borrow_mut().remove(key);
        }
        if let Some(closure) = self.cached_dependents_for(key) {
            let mut cache = self.core.cache.borrow_mut();
            for dependent in closure.iter() {
                cache.remove(dependent);
            }
        }
        let suspended = self.core.ctx.is_suspended();
        if self.core.change_level.get() > 0 || suspended {
            push_unique(&mut self.core.changes.borrow_mut(), key);
            if suspended {
                self.core.ctx.note_pending_changes(self);
            }
        } else {
            self.notify_property_observers(Some(key));
        }
        self
    }

    /// Manual notification: fires will/did for `key` without touching the
    /// stored value.
    pub fn notify_property_change(&self, key: &str) -> &Self {
        self.property_will_change(key);
        self.property_did_change(key)
    }

    /// Invalidates every computed cache and notifies every observed key.
    pub fn all_properties_did_change(&self) -> &Self {
        self.core.cache.borrow_mut().clear();
        self.core.revision.set(self.core.revision.get() + 1);
        let suspended = self.core.ctx.is_suspended();
        if self.core.change_level.get() > 0 || suspended {
            push_unique(&mut self.core.changes.borrow_mut(), "*");
            if suspended {
                self.core.ctx.note_pending_changes(self);
            }
        } else {
            self.notify_property_observers(Some("*"));
        }
        self
    }

    /// Change detection scoped to a caller token. Compares the object
    /// revision against the token's last observation first, then the current
    /// value; both caches are refreshed. The wildcard key `"*"` compares
    /// revisions only.
    pub fn did_change_for(&self, token: &str, keys: &[&str]) -> bool {
        let revision = self.core.revision.get();
        let mut changed = false;
        for key in keys {
            let previous = self
                .core
                .seen
                .borrow()
                .get(token)
                .and_then(|m| m.get(*key))
                .cloned();
            if *key == "*" {
                if previous.map(|e| e.revision) != Some(revision) {
                    changed = true;
                    self.remember_seen(token, key, revision, None);
                }
                continue;
            }
            if previous.as_ref().map(|e| e.revision) == Some(revision) {
                continue;
            }
            let current = self.get(key);
            let value_changed = match &previous {
                Some(entry) => entry.value.as_ref() != Some(&current),
                None => true,
            };
            self.remember_seen(token, key, revision, Some(current));
            if value_changed {
                changed = true;
            }
        }
        changed
    }

    fn remember_seen(&self, token: &str, key: &str, revision: u64, value: Option<PropValue>) {
        self.core
            .seen
            .borrow_mut()
            .entry(token.to_owned())
            .or_default()
            .insert(key.to_owned(), SeenEntry { revision, value });
    }

    // ── Observer registration ──────────────────────────────────────────────

    /// Registers an observer on a key or a dotted path. Paths construct a
    /// chain of per-segment links that re-wire as intermediate objects
    /// appear and disappear.
    pub fn add_observer(&self, key_or_path: &str, observer: &Observer) -> Result<&Self, KvoError> {
        if is_path(key_or_path) {
            let segments = parse_segments(strip_receiver_prefix(key_or_path))?;
            let head = ChainLink::build(&segments, observer.clone())
                .ok_or_else(|| KvoError::MalformedPath(key_or_path.to_owned()))?;
            head.prime(Some(self.clone()));
            self.core.chain_roots.borrow_mut().push(ChainRegistration {
                path: key_or_path.to_owned(),
                target: observer.target().to_owned(),
                method: observer.method().to_owned(),
                head,
            });
        } else {
            self.core
                .observers
                .borrow_mut()
                .entry(key_or_path.to_owned())
                .or_default()
                .add(observer);
            self.core
                .observed_keys
                .borrow_mut()
                .insert(key_or_path.to_owned());
        }
        Ok(self)
    }

    /// Removes the observer registered under `(target, method)` for the key
    /// or path.
    pub fn remove_observer(
        &self,
        key_or_path: &str,
        target: &str,
        method: &str,
    ) -> Result<&Self, KvoError> {
        if is_path(key_or_path) {
            let registration = {
                let mut roots = self.core.chain_roots.borrow_mut();
                let index = roots.iter().position(|r| {
                    r.path == key_or_path && r.target == target && r.method == method
                });
                index.map(|i| roots.remove(i))
            };
            if let Some(registration) = registration {
                registration.head.destroy();
            }
        } else {
            let mut remove_entry = false;
            if let Some(set) = self.core.observers.borrow_mut().get_mut(key_or_path) {
                set.remove(target, method);
                remove_entry = set.is_empty();
            }
            if remove_entry {
                self.core.observers.borrow_mut().remove(key_or_path);
            }
            self.prune_observed_key(key_or_path);
        }
        Ok(self)
    }

    /// Registers a handler on the receiver itself for several keys at once.
    /// `method` is the registration's identity for later removal. The
    /// handler is revision-deduplicated like any other observer, so one
    /// change pass touching several of the keys notifies it once.
    pub fn add_local_observer(
        &self,
        keys: &[&str],
        method: &str,
        handler: impl Fn(&Notification<'_>) + 'static,
    ) -> &Self {
        let local = LocalObserver {
            method: method.to_owned(),
            handler: Rc::new(handler),
            last_notified: Rc::new(Cell::new(0)),
        };
        let mut locals = self.core.local_observers.borrow_mut();
        let mut observed = self.core.observed_keys.borrow_mut();
        for key in keys {
            locals.entry((*key).to_owned()).or_default().push(local.clone());
            observed.insert((*key).to_owned());
        }
        self
    }

    /// Removes every local-observer registration made under `method`.
    pub fn remove_local_observer(&self, method: &str) -> &Self {
        let emptied: Vec<String> = {
            let mut locals = self.core.local_observers.borrow_mut();
            let mut emptied = Vec::new();
            for (key, list) in locals.iter_mut() {
                list.retain(|l| l.method != method);
                if list.is_empty() {
                    emptied.push(key.clone());
                }
            }
            for key in &emptied {
                locals.remove(key);
            }
            emptied
        };
        for key in &emptied {
            self.prune_observed_key(key);
        }
        self
    }

    /// True when any observer is live on `key` (set member, local observer,
    /// or a chain link terminating here). Flushes deferred path observers
    /// first so a registration parked on the context counts.
    pub fn has_observer_for(&self, key: &str) -> bool {
        self.core.ctx.flush_deferred();
        if self
            .core
            .observers
            .borrow()
            .get(key)
            .is_some_and(|s| !s.is_empty())
        {
            return true;
        }
        if self
            .core
            .local_observers
            .borrow()
            .get(key)
            .is_some_and(|l| !l.is_empty())
        {
            return true;
        }
        self.core
            .chains
            .borrow()
            .get(key)
            .is_some_and(|c| !c.is_empty())
    }

    fn prune_observed_key(&self, key: &str) {
        let live = self
            .core
            .observers
            .borrow()
            .get(key)
            .is_some_and(|s| !s.is_empty())
            || self
                .core
                .local_observers
                .borrow()
                .get(key)
                .is_some_and(|l| !l.is_empty())
            || self.core.chains.borrow().get(key).is_some_and(|c| !c.is_empty());
        if !live {
            self.core.observed_keys.borrow_mut().remove(key);
        }
    }

    // ── Chain plumbing ─────────────────────────────────────────────────────

    pub(crate) fn register_chain(&self, key: &str, link: Rc<ChainLink>) {
        self.core
            .chains
            .borrow_mut()
            .entry(key.to_owned())
            .or_default()
            .push(link);
        self.core.observed_keys.borrow_mut().insert(key.to_owned());
    }

    pub(crate) fn unregister_chain(&self, key: &str, link: &Rc<ChainLink>) {
        let mut remove_entry = false;
        if let Some(list) = self.core.chains.borrow_mut().get_mut(key) {
            list.retain(|l| !Rc::ptr_eq(l, link));
            remove_entry = list.is_empty();
        }
        if remove_entry {
            self.core.chains.borrow_mut().remove(key);
        }
        self.prune_observed_key(key);
    }

    // ── Fan-out ────────────────────────────────────────────────────────────

    /// Drains pending changes for this object; called by the context when a
    /// suspension ends.
    pub(crate) fn flush_suspended_changes(&self) {
        if self.core.change_level.get() == 0 && !self.core.changes.borrow().is_empty() {
            self.notify_property_observers(None);
        }
    }

    fn members_snapshot(&self, key: &str) -> Vec<ObserverMember> {
        self.core
            .observers
            .borrow()
            .get(key)
            .map(ObserverSet::members)
            .unwrap_or_default()
    }

    fn locals_snapshot(&self, key: &str) -> Vec<LocalObserver> {
        self.core
            .local_observers
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn chains_snapshot(&self, key: &str) -> Vec<Rc<ChainLink>> {
        self.core
            .chains
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn notify_property_observers(&self, triggering: Option<&str>) {
        if self.core.destroyed.get() {
            return;
        }
        // Deferred path observers targeting this object must exist before
        // fan-out so they see this change.
        self.core.ctx.flush_deferred();
        // Guard against recursive flushes from observers that call set on
        // the receiver: their keys park in `changes` for the next pass.
        self.core.change_level.set(self.core.change_level.get() + 1);

        let mut first = true;
        loop {
            let mut keys: Vec<String> = self.core.changes.take();
            if first {
                if let Some(key) = triggering {
                    push_unique(&mut keys, key);
                }
                first = false;
            }
            if keys.is_empty() {
                break;
            }

            if keys.iter().any(|k| k == "*") {
                let observed: Vec<String> =
                    self.core.observed_keys.borrow().iter().cloned().collect();
                for key in observed {
                    push_unique(&mut keys, &key);
                }
            }

            // Dependent expansion runs to a fixed point before any observer
            // fires, clearing cacheable memos along the way.
            let mut index = 0;
            while index < keys.len() {
                let deps: Vec<String> = self
                    .core
                    .dependents
                    .borrow()
                    .get(&keys[index])
                    .cloned()
                    .unwrap_or_default();
                for dep in deps {
                    let cacheable = self
                        .core
                        .properties
                        .borrow()
                        .get(&dep)
                        .is_some_and(|d| d.is_cacheable());
                    if cacheable {
                        self.core.cache.borrow_mut().remove(&dep);
                    }
                    push_unique(&mut keys, &dep);
                }
                index += 1;
            }

            let revision = self.core.revision.get();
            while let Some(key) = keys.pop() {
                for member in self.members_snapshot(&key) {
                    if member.should_notify(revision) {
                        member.notify(self, &key, revision);
                    }
                }
                for local in self.locals_snapshot(&key) {
                    if local.last_notified.get() != revision {
                        local.last_notified.set(revision);
                        (local.handler)(&Notification {
                            object: self,
                            key: &key,
                            context: None,
                            revision,
                        });
                    }
                }
                if key != "*" {
                    for member in self.members_snapshot("*") {
                        if member.should_notify(revision) {
                            member.notify(self, &key, revision);
                        }
                    }
                }
                for link in self.chains_snapshot(&key) {
                    link.source_key_did_change();
                }
                let delegate = self.core.delegate.borrow().clone();
                if let Some(delegate) = delegate {
                    delegate.property_observer(self, &key, revision);
                }
            }

            if self.core.changes.borrow().is_empty() {
                break;
            }
        }

        self.core.change_level.set(self.core.change_level.get() - 1);
    }

    // ── Dependent keys ─────────────────────────────────────────────────────

    /// The transitive closure of cacheable descriptors reachable from `key`
    /// through the dependent-key graph. Memoized per key; `None` is a valid
    /// memo meaning "no cacheable dependents". A cycle in the user-declared
    /// graph terminates via the seen-set.
    fn cached_dependents_for(&self, key: &str) -> Option<Rc<Vec<String>>> {
        if let Some(memo) = self.core.cache_dep.borrow().get(key) {
            return memo.clone();
        }
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(key.to_owned());
        let mut queue: Vec<String> = self
            .core
            .dependents
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default();
        let mut closure: Vec<String> = Vec::new();
        while let Some(next) = queue.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if self
                .core
                .properties
                .borrow()
                .get(&next)
                .is_some_and(|d| d.is_cacheable())
            {
                closure.push(next.clone());
            }
            if let Some(more) = self.core.dependents.borrow().get(&next) {
                queue.extend(more.iter().cloned());
            }
        }
        let memo = if closure.is_empty() {
            None
        } else {
            Some(Rc::new(closure))
        };
        self.core
            .cache_dep
            .borrow_mut()
            .insert(key.to_owned(), memo.clone());
        memo
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Tears down every observation hookup this object owns or hosts.
    /// Chains rooted here are destroyed along the whole path.
    pub fn destroy(&self) {
        if self.core.destroyed.replace(true) {
            return;
        }
        for registration in self.core.chain_roots.take() {
            registration.head.destroy();
        }
        self.core.observers.borrow_mut().clear();
        self.core.local_observers.borrow_mut().clear();
        self.core.chains.borrow_mut().clear();
        self.core.observed_keys.borrow_mut().clear();
        self.core.changes.borrow_mut().clear();
        *self.core.delegate.borrow_mut() = None;
        self.core.ctx.forget_object(self.core.id);
    }
}

impl std::fmt::Debug for ObservableObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableObject")
            .field("id", &self.core.id)
            .field("revision", &self.core.revision.get())
            .finish()
    }
}

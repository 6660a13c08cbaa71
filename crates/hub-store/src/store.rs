//! The copy-on-write data-hash store and nested editing contexts.
//!
//! # Overview
//!
//! A root [`Store`] owns the authoritative maps from StoreKey to data hash,
//! status and revision. [`Store::create_editing_context`] produces a child
//! store that shadows those maps sparsely; a whole family shares one key
//! space, so a StoreKey means the same logical record everywhere.
//!
//! The per-`(context, StoreKey)` edit state machine:
//!
//! - **Inherited** — no local entry; reads fall through to the parent, and
//!   parent writes are visible here the moment they land.
//! - **Locked** — [`read_data_hash`](Store::read_data_hash) in a child
//!   snapshots the parent's revision at read time. Reads still fall
//!   through (the hash reference stays shared), but the snapshot is the
//!   baseline that [`commit_changes`](Store::commit_changes) compares
//!   against to detect conflicting parent writes.
//! - **Editable** — [`read_editable_data_hash`](Store::read_editable_data_hash)
//!   (or any write) privatizes the hash via clone-on-write; from here on
//!   parent writes no longer show through, and the private copy is what
//!   [`commit_changes`](Store::commit_changes) merges back into the
//!   parent.
//!
//! [`write_data_hash`](Store::write_data_hash) never advances the stored
//! revision; revisions belong to
//! [`data_hash_did_change`](Store::data_hash_did_change), which also fans
//! the change out to the materialized record and to every child context
//! still inheriting the key.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use thiserror::Error;

use hub_kvo::{ObservableObject, ObservationContext};

use crate::attribute::RecordType;
use crate::record::Record;
use crate::source::DataSource;
use crate::status::Status;

/// Process-unique integer identity of one logical record.
pub type StoreKey = u64;

/// A shared, immutable-by-convention attribute hash. Sharing the `Rc` is
/// the locked state; `Rc::make_mut` is the copy-on-write step.
pub type DataHash = Rc<Map<String, Value>>;

/// Edit state of one StoreKey within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    /// No local entry; reads resolve through the parent chain.
    Inherited,
    /// A shared reference snapshot; readable here, not writable.
    Locked,
    /// A private copy owned by this store.
    Editable,
}

/// API misuse errors. Domain failures (missing hashes, illegal lifecycle
/// transitions, data-source rejections) surface as [`Status`] values
/// instead so callers can branch on status.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not a nested editing context")]
    NoParentStore,
    #[error("operation is not supported on a nested editing context")]
    UnsupportedInNestedStore,
    #[error("record type {0:?} is not registered")]
    UnknownRecordType(String),
    #[error("record of type {record_type:?} with id {id:?} already exists")]
    RecordExists { record_type: String, id: String },
    #[error("store has no data source")]
    NoDataSource,
    #[error("store key {0} changed in the parent after this context locked it")]
    ConflictingChanges(StoreKey),
}

/// StoreKey allocation and record-type registry shared by one store family.
struct KeySpace {
    next_key: Cell<StoreKey>,
    by_type_id: RefCell<HashMap<(String, String), StoreKey>>,
    types_by_key: RefCell<HashMap<StoreKey, Rc<RecordType>>>,
    ids_by_key: RefCell<HashMap<StoreKey, String>>,
    record_types: RefCell<HashMap<String, Rc<RecordType>>>,
}

impl KeySpace {
    fn new() -> Self {
        Self {
            next_key: Cell::new(0),
            by_type_id: RefCell::new(HashMap::new()),
            types_by_key: RefCell::new(HashMap::new()),
            ids_by_key: RefCell::new(HashMap::new()),
            record_types: RefCell::new(HashMap::new()),
        }
    }
}

pub(crate) struct StoreCore {
    ctx: ObservationContext,
    keys: Rc<KeySpace>,
    parent: Option<Store>,
    children: RefCell<Vec<Weak<StoreCore>>>,
    data_hashes: RefCell<HashMap<StoreKey, DataHash>>,
    statuses: RefCell<HashMap<StoreKey, Status>>,
    revisions: RefCell<HashMap<StoreKey, u64>>,
    editables: RefCell<HashSet<StoreKey>>,
    /// Nested only: parent revision snapshot taken when a key locked.
    locks: RefCell<HashMap<StoreKey, u64>>,
    /// Keys edited in this store; drained by `commit_changes`.
    changed: RefCell<BTreeSet<StoreKey>>,
    records: RefCell<HashMap<StoreKey, Record>>,
    source: RefCell<Option<Rc<dyn DataSource>>>,
}

/// A handle onto one store or editing context. Clones share identity.
#[derive(Clone)]
pub struct Store {
    core: Rc<StoreCore>,
}

impl Store {
    /// Creates a root store.
    pub fn new(ctx: &ObservationContext) -> Self {
        Self {
            core: Rc::new(StoreCore {
                ctx: ctx.clone(),
                keys: Rc::new(KeySpace::new()),
                parent: None,
                children: RefCell::new(Vec::new()),
                data_hashes: RefCell::new(HashMap::new()),
                statuses: RefCell::new(HashMap::new()),
                revisions: RefCell::new(HashMap::new()),
                editables: RefCell::new(HashSet::new()),
                locks: RefCell::new(HashMap::new()),
                changed: RefCell::new(BTreeSet::new()),
                records: RefCell::new(HashMap::new()),
                source: RefCell::new(None),
            }),
        }
    }

    /// Creates a nested editing context inheriting every key from the
    /// receiver.
    pub fn create_editing_context(&self) -> Store {
        let child = Store {
            core: Rc::new(StoreCore {
                ctx: self.core.ctx.clone(),
                keys: Rc::clone(&self.core.keys),
                parent: Some(self.clone()),
                children: RefCell::new(Vec::new()),
                data_hashes: RefCell::new(HashMap::new()),
                statuses: RefCell::new(HashMap::new()),
                revisions: RefCell::new(HashMap::new()),
                editables: RefCell::new(HashSet::new()),
                locks: RefCell::new(HashMap::new()),
                changed: RefCell::new(BTreeSet::new()),
                records: RefCell::new(HashMap::new()),
                source: RefCell::new(self.core.source.borrow().clone()),
            }),
        };
        self.core.children.borrow_mut().push(Rc::downgrade(&child.core));
        child
    }

    pub(crate) fn from_core(core: Rc<StoreCore>) -> Self {
        Self { core }
    }

    pub(crate) fn from_weak(core: &Weak<StoreCore>) -> Option<Self> {
        core.upgrade().map(Store::from_core)
    }

    pub(crate) fn weak_core(&self) -> Weak<StoreCore> {
        Rc::downgrade(&self.core)
    }

    pub fn context(&self) -> &ObservationContext {
        &self.core.ctx
    }

    pub fn parent_store(&self) -> Option<Store> {
        self.core.parent.clone()
    }

    pub fn is_nested(&self) -> bool {
        self.core.parent.is_some()
    }

    pub fn set_data_source(&self, source: Rc<dyn DataSource>) -> &Self {
        *self.core.source.borrow_mut() = Some(source);
        self
    }

    // ── Record types and store keys ────────────────────────────────────────

    /// Registers a record type for the whole store family and returns the
    /// shared handle used by `find` and materialization.
    pub fn register_record_type(&self, record_type: RecordType) -> Rc<RecordType> {
        let shared = Rc::new(record_type);
        self.core
            .keys
            .record_types
            .borrow_mut()
            .insert(shared.name().to_owned(), Rc::clone(&shared));
        shared
    }

    pub fn record_type(&self, name: &str) -> Option<Rc<RecordType>> {
        self.core.keys.record_types.borrow().get(name).cloned()
    }

    /// Resolves (allocating on first reference) the StoreKey for
    /// `(type, id)`. StoreKeys are never reused within a process.
    pub fn store_key_for(&self, type_name: &str, id: &str) -> Result<StoreKey, StoreError> {
        let record_type = self
            .record_type(type_name)
            .ok_or_else(|| StoreError::UnknownRecordType(type_name.to_owned()))?;
        let mut by_type_id = self.core.keys.by_type_id.borrow_mut();
        let slot = (type_name.to_owned(), id.to_owned());
        if let Some(existing) = by_type_id.get(&slot) {
            return Ok(*existing);
        }
        let key = self.core.keys.next_key.get() + 1;
        self.core.keys.next_key.set(key);
        by_type_id.insert(slot, key);
        self.core.keys.types_by_key.borrow_mut().insert(key, record_type);
        self.core.keys.ids_by_key.borrow_mut().insert(key, id.to_owned());
        Ok(key)
    }

    pub fn record_type_for(&self, store_key: StoreKey) -> Option<Rc<RecordType>> {
        self.core.keys.types_by_key.borrow().get(&store_key).cloned()
    }

    pub fn id_for(&self, store_key: StoreKey) -> Option<String> {
        self.core.keys.ids_by_key.borrow().get(&store_key).cloned()
    }

    /// Every StoreKey with a hash or status visible from this store.
    pub fn store_keys(&self) -> Vec<StoreKey> {
        let mut keys: BTreeSet<StoreKey> = BTreeSet::new();
        let mut cursor = Some(self.clone());
        while let Some(store) = cursor {
            keys.extend(store.core.data_hashes.borrow().keys().copied());
            keys.extend(store.core.statuses.borrow().keys().copied());
            cursor = store.core.parent.clone();
        }
        keys.into_iter().collect()
    }

    // ── Data hashes, statuses, revisions ───────────────────────────────────

    /// Reads the current hash for `store_key`. In a nested context an
    /// inherited key locks: the parent's revision is snapshotted as the
    /// conflict baseline for a later commit. Reads keep falling through to
    /// the parent until the key becomes editable here.
    pub fn read_data_hash(&self, store_key: StoreKey) -> Option<DataHash> {
        if let Some(hash) = self.core.data_hashes.borrow().get(&store_key) {
            return Some(Rc::clone(hash));
        }
        let parent = self.core.parent.clone()?;
        let hash = parent.read_data_hash(store_key)?;
        let mut locks = self.core.locks.borrow_mut();
        if !locks.contains_key(&store_key) {
            locks.insert(store_key, parent.read_revision(store_key));
        }
        Some(hash)
    }

    /// Reads the hash and transitions the key to `Editable`: the store now
    /// owns a private copy it may mutate. Returns `None` when no hash
    /// exists anywhere in the chain (the key is `EMPTY`).
    pub fn read_editable_data_hash(&self, store_key: StoreKey) -> Option<DataHash> {
        self.ensure_editable(store_key)?;
        self.core.data_hashes.borrow().get(&store_key).map(Rc::clone)
    }

    /// Mutates the private copy of the hash in place. The closure must not
    /// reenter the store. Returns `None` when the key is `EMPTY`.
    pub fn with_editable_data_hash<R>(
        &self,
        store_key: StoreKey,
        f: impl FnOnce(&mut Map<String, Value>) -> R,
    ) -> Option<R> {
        self.ensure_editable(store_key)?;
        let mut hashes = self.core.data_hashes.borrow_mut();
        let slot = hashes.get_mut(&store_key)?;
        Some(f(Rc::make_mut(slot)))
    }

    fn ensure_editable(&self, store_key: StoreKey) -> Option<()> {
        if !self.core.data_hashes.borrow().contains_key(&store_key) {
            // Pull the inherited hash into a local entry, snapshotting the
            // status and revision along with it: fall-through stops here.
            let hash = self.read_data_hash(store_key)?;
            let status = self.read_status(store_key);
            let revision = self.read_revision(store_key);
            self.core.data_hashes.borrow_mut().insert(store_key, hash);
            self.core.statuses.borrow_mut().insert(store_key, status);
            self.core.revisions.borrow_mut().insert(store_key, revision);
        }
        if self.core.editables.borrow_mut().insert(store_key) {
            // First edit here: privatize the shared reference.
            let mut hashes = self.core.data_hashes.borrow_mut();
            if let Some(slot) = hashes.get_mut(&store_key) {
                Rc::make_mut(slot);
            }
        }
        Some(())
    }

    /// Replaces the hash (and optionally the status) for `store_key`,
    /// transitioning it to `Editable`. Does not advance the revision:
    /// revision changes belong to
    /// [`data_hash_did_change`](Self::data_hash_did_change).
    pub fn write_data_hash(
        &self,
        store_key: StoreKey,
        hash: Map<String, Value>,
        status: Option<Status>,
    ) -> &Self {
        self.core
            .data_hashes
            .borrow_mut()
            .insert(store_key, Rc::new(hash));
        self.core.editables.borrow_mut().insert(store_key);
        if let Some(status) = status {
            self.core.statuses.borrow_mut().insert(store_key, status);
        }
        self.core.changed.borrow_mut().insert(store_key);
        self
    }

    pub fn read_status(&self, store_key: StoreKey) -> Status {
        if let Some(status) = self.core.statuses.borrow().get(&store_key) {
            return *status;
        }
        match &self.core.parent {
            Some(parent) => parent.read_status(store_key),
            None => Status::EMPTY,
        }
    }

    /// Writes the status without notification; pair with
    /// [`data_hash_did_change`](Self::data_hash_did_change) when observers
    /// should hear about it.
    pub fn write_status(&self, store_key: StoreKey, status: Status) -> &Self {
        self.core.statuses.borrow_mut().insert(store_key, status);
        self.core.changed.borrow_mut().insert(store_key);
        self
    }

    pub fn read_revision(&self, store_key: StoreKey) -> u64 {
        if let Some(revision) = self.core.revisions.borrow().get(&store_key) {
            return *revision;
        }
        match &self.core.parent {
            Some(parent) => parent.read_revision(store_key),
            None => 0,
        }
    }

    /// Edit state of `store_key` in this store. A root store is never
    /// `Inherited`.
    pub fn store_key_edit_state(&self, store_key: StoreKey) -> EditState {
        if self.core.editables.borrow().contains(&store_key) {
            return EditState::Editable;
        }
        if self.core.parent.is_none() {
            return EditState::Locked;
        }
        if self.core.data_hashes.borrow().contains_key(&store_key)
            || self.core.locks.borrow().contains_key(&store_key)
        {
            return EditState::Locked;
        }
        EditState::Inherited
    }

    /// Advances the revision for `store_key` and fans the change out: the
    /// materialized record here is notified, then every child context whose
    /// edit state for the key is still `Inherited`, recursively.
    pub fn data_hash_did_change(
        &self,
        store_key: StoreKey,
        key: Option<&str>,
        status_only: bool,
    ) -> &Self {
        let revision = self.read_revision(store_key) + 1;
        self.core.revisions.borrow_mut().insert(store_key, revision);
        self.core.changed.borrow_mut().insert(store_key);
        self.notify_record_and_children(store_key, key, status_only);
        self
    }

    fn notify_record_and_children(&self, store_key: StoreKey, key: Option<&str>, status_only: bool) {
        let record = self.core.records.borrow().get(&store_key).cloned();
        if let Some(record) = record {
            record.store_did_change_properties(key, status_only);
        }
        for child in self.live_children() {
            if child.store_key_edit_state(store_key) == EditState::Inherited {
                child.notify_record_and_children(store_key, key, status_only);
            }
        }
    }

    fn live_children(&self) -> Vec<Store> {
        let mut children = self.core.children.borrow_mut();
        children.retain(|weak| weak.strong_count() > 0);
        children
            .iter()
            .filter_map(|weak| Store::from_weak(weak))
            .collect()
    }

    /// A record-originated attribute write: bumps the revision, dirties a
    /// clean status (queuing the `status` notification on the originating
    /// object, whose own fan-out is already in flight), and notifies the
    /// records of inheriting child contexts. The originating record's own
    /// key notification is driven by the object layer.
    pub(crate) fn record_did_change(
        &self,
        store_key: StoreKey,
        key: Option<&str>,
        origin: &ObservableObject,
    ) {
        let revision = self.read_revision(store_key) + 1;
        self.core.revisions.borrow_mut().insert(store_key, revision);
        self.core.changed.borrow_mut().insert(store_key);
        if self.read_status(store_key) == Status::READY_CLEAN {
            self.core
                .statuses
                .borrow_mut()
                .insert(store_key, Status::READY_DIRTY);
            origin.property_did_change("status");
        }
        for child in self.live_children() {
            if child.store_key_edit_state(store_key) == EditState::Inherited {
                child.notify_record_and_children(store_key, key, false);
            }
        }
    }

    // ── Records ────────────────────────────────────────────────────────────

    /// Creates a new record in this store with status `READY_NEW`.
    pub fn create_record(
        &self,
        type_name: &str,
        id: &str,
        mut attributes: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let record_type = self
            .record_type(type_name)
            .ok_or_else(|| StoreError::UnknownRecordType(type_name.to_owned()))?;
        let store_key = self.store_key_for(type_name, id)?;
        let current = self.read_status(store_key);
        if current != Status::EMPTY && !current.is_error() {
            return Err(StoreError::RecordExists {
                record_type: type_name.to_owned(),
                id: id.to_owned(),
            });
        }
        let primary_key = record_type.primary_key();
        if !attributes.contains_key(primary_key) {
            attributes.insert(primary_key.to_owned(), Value::String(id.to_owned()));
        }
        self.write_data_hash(store_key, attributes, Some(Status::READY_NEW));
        self.data_hash_did_change(store_key, None, false);
        self.record(store_key)
            .ok_or_else(|| StoreError::UnknownRecordType(type_name.to_owned()))
    }

    /// Loads clean hashes in bulk; each hash must carry the record type's
    /// primary key. Returns the StoreKeys in load order.
    pub fn load_records(
        &self,
        type_name: &str,
        hashes: Vec<Map<String, Value>>,
    ) -> Result<Vec<StoreKey>, StoreError> {
        let record_type = self
            .record_type(type_name)
            .ok_or_else(|| StoreError::UnknownRecordType(type_name.to_owned()))?;
        let primary_key = record_type.primary_key();
        let mut loaded = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let id = hash.get(primary_key).and_then(Value::as_str).map(str::to_owned);
            let Some(id) = id else {
                tracing::warn!(type_name, "skipping load of hash without primary key");
                continue;
            };
            let store_key = self.store_key_for(type_name, &id)?;
            self.write_data_hash(store_key, hash, Some(Status::READY_CLEAN));
            self.data_hash_did_change(store_key, None, false);
            loaded.push(store_key);
        }
        tracing::debug!(type_name, count = loaded.len(), "loaded records");
        Ok(loaded)
    }

    /// Resolves a record by registered type name and id. Returns `Ok(None)`
    /// when nothing is loaded under the id.
    pub fn find(&self, type_name: &str, id: &str) -> Result<Option<Record>, StoreError> {
        self.record_type(type_name)
            .ok_or_else(|| StoreError::UnknownRecordType(type_name.to_owned()))?;
        let existing = self
            .core
            .keys
            .by_type_id
            .borrow()
            .get(&(type_name.to_owned(), id.to_owned()))
            .copied();
        let Some(store_key) = existing else {
            return Ok(None);
        };
        if self.read_status(store_key) == Status::EMPTY {
            return Ok(None);
        }
        Ok(self.record(store_key))
    }

    /// The materialized record for `store_key` in this store, creating it on
    /// first access. Each store materializes its own instances.
    pub fn record(&self, store_key: StoreKey) -> Option<Record> {
        if let Some(existing) = self.core.records.borrow().get(&store_key) {
            return Some(existing.clone());
        }
        let record_type = self.record_type_for(store_key)?;
        let id = self.id_for(store_key)?;
        let record = Record::materialize(self, store_key, record_type, id);
        self.core
            .records
            .borrow_mut()
            .insert(store_key, record.clone());
        Some(record)
    }

    /// Marks a record destroyed. `READY_NEW` records vanish immediately;
    /// clean or dirty ready records become `DESTROYED_DIRTY` pending
    /// commit. Any other state is returned unchanged so callers can branch
    /// on it.
    pub fn destroy_store_key(&self, store_key: StoreKey) -> Status {
        let status = self.read_status(store_key);
        let next = if status == Status::READY_NEW {
            self.core.data_hashes.borrow_mut().remove(&store_key);
            self.core.editables.borrow_mut().remove(&store_key);
            self.core.changed.borrow_mut().remove(&store_key);
            self.core.statuses.borrow_mut().insert(store_key, Status::EMPTY);
            Status::EMPTY
        } else if status == Status::READY_CLEAN || status == Status::READY_DIRTY {
            // Claim the key so a nested context carries the destruction
            // through its commit.
            self.ensure_editable(store_key);
            self.core
                .statuses
                .borrow_mut()
                .insert(store_key, Status::DESTROYED_DIRTY);
            self.core.changed.borrow_mut().insert(store_key);
            Status::DESTROYED_DIRTY
        } else {
            return status;
        };
        self.data_hash_did_change(store_key, None, true);
        next
    }

    /// Destroys by type name and id. Unknown records report `EMPTY`.
    pub fn destroy_record(&self, type_name: &str, id: &str) -> Result<Status, StoreError> {
        self.record_type(type_name)
            .ok_or_else(|| StoreError::UnknownRecordType(type_name.to_owned()))?;
        let existing = self
            .core
            .keys
            .by_type_id
            .borrow()
            .get(&(type_name.to_owned(), id.to_owned()))
            .copied();
        match existing {
            Some(store_key) => Ok(self.destroy_store_key(store_key)),
            None => Ok(Status::EMPTY),
        }
    }

    // ── Commit flow ────────────────────────────────────────────────────────

    /// Merges every editable entry of this nested context back into the
    /// parent — hash, status and revision — then resets those entries to
    /// `Inherited` so parent state shows through again.
    ///
    /// When a key this context locked has since advanced in the parent, the
    /// commit aborts with [`StoreError::ConflictingChanges`] before merging
    /// anything.
    pub fn commit_changes(&self) -> Result<&Self, StoreError> {
        let parent = self.core.parent.clone().ok_or(StoreError::NoParentStore)?;
        {
            let locks = self.core.locks.borrow();
            let editables = self.core.editables.borrow();
            for store_key in self.core.changed.borrow().iter() {
                if !editables.contains(store_key) {
                    continue;
                }
                if let Some(baseline) = locks.get(store_key) {
                    if parent.read_revision(*store_key) > *baseline {
                        return Err(StoreError::ConflictingChanges(*store_key));
                    }
                }
            }
        }
        let changed: Vec<StoreKey> = self.core.changed.take().into_iter().collect();
        tracing::debug!(count = changed.len(), "committing editing context");
        for store_key in changed {
            if !self.core.editables.borrow().contains(&store_key) {
                // A create-then-destroy that never left this context; the
                // local residue resolves to the parent's view.
                self.reset_store_key(store_key);
                continue;
            }
            let hash = self.core.data_hashes.borrow().get(&store_key).map(Rc::clone);
            let status = self.core.statuses.borrow().get(&store_key).copied();
            let revision = self.core.revisions.borrow().get(&store_key).copied();

            if let Some(hash) = hash {
                parent.core.data_hashes.borrow_mut().insert(store_key, hash);
                parent.core.editables.borrow_mut().insert(store_key);
            }
            if let Some(status) = status {
                parent.core.statuses.borrow_mut().insert(store_key, status);
            }
            if let Some(revision) = revision {
                let merged = revision.max(parent.read_revision(store_key));
                parent.core.revisions.borrow_mut().insert(store_key, merged);
            }
            parent.core.changed.borrow_mut().insert(store_key);

            // Reset before the parent notifies so this context inherits the
            // merged state instead of shadowing it.
            self.reset_store_key(store_key);
            parent.data_hash_did_change(store_key, None, false);
        }
        Ok(self)
    }

    /// Throws away every local entry of this nested context.
    pub fn discard_changes(&self) -> Result<&Self, StoreError> {
        if self.core.parent.is_none() {
            return Err(StoreError::NoParentStore);
        }
        let touched: Vec<StoreKey> = {
            let mut keys: BTreeSet<StoreKey> = BTreeSet::new();
            keys.extend(self.core.data_hashes.borrow().keys().copied());
            keys.extend(self.core.statuses.borrow().keys().copied());
            keys.into_iter().collect()
        };
        tracing::debug!(count = touched.len(), "discarding editing context changes");
        for store_key in &touched {
            self.reset_store_key(*store_key);
        }
        self.core.changed.borrow_mut().clear();
        for store_key in touched {
            self.notify_record_and_children(store_key, None, false);
        }
        Ok(self)
    }

    fn reset_store_key(&self, store_key: StoreKey) {
        self.core.data_hashes.borrow_mut().remove(&store_key);
        self.core.statuses.borrow_mut().remove(&store_key);
        self.core.revisions.borrow_mut().remove(&store_key);
        self.core.editables.borrow_mut().remove(&store_key);
        self.core.locks.borrow_mut().remove(&store_key);
    }

    /// Drives dirty records through the data source. Only valid on a root
    /// store. Candidates default to every dirty key; `record_types`, `ids`
    /// and `store_keys` narrow the set. Failed keys transition to `ERROR`;
    /// the successfully committed StoreKeys are returned.
    pub fn commit_records(
        &self,
        record_types: Option<&[&str]>,
        ids: Option<&[&str]>,
        store_keys: Option<&[StoreKey]>,
    ) -> Result<Vec<StoreKey>, StoreError> {
        if self.core.parent.is_some() {
            return Err(StoreError::UnsupportedInNestedStore);
        }
        let source = self
            .core
            .source
            .borrow()
            .clone()
            .ok_or(StoreError::NoDataSource)?;

        let mut candidates: Vec<StoreKey> = match (record_types, ids, store_keys) {
            (_, _, Some(keys)) => keys.to_vec(),
            (Some(types), Some(ids), None) => {
                let by_type_id = self.core.keys.by_type_id.borrow();
                types
                    .iter()
                    .zip(ids.iter())
                    .filter_map(|(t, i)| {
                        by_type_id.get(&((*t).to_owned(), (*i).to_owned())).copied()
                    })
                    .collect()
            }
            (Some(types), None, None) => {
                let wanted: HashSet<&str> = types.iter().copied().collect();
                let by_type_id = self.core.keys.by_type_id.borrow();
                by_type_id
                    .iter()
                    .filter(|((t, _), _)| wanted.contains(t.as_str()))
                    .map(|(_, sk)| *sk)
                    .collect()
            }
            _ => self.store_keys(),
        };
        candidates.sort_unstable();
        candidates.dedup();

        let mut committed = Vec::new();
        for store_key in candidates {
            let status = self.read_status(store_key);
            if !status.needs_commit() {
                continue;
            }
            let (busy, done, op): (
                Status,
                Status,
                fn(&dyn DataSource, &Store, StoreKey) -> crate::source::SourceResult,
            ) = match status {
                Status::READY_NEW => (
                    Status::BUSY_CREATING,
                    Status::READY_CLEAN,
                    |s, store, sk| s.create_record(store, sk),
                ),
                Status::READY_DIRTY => (
                    Status::BUSY_COMMITTING,
                    Status::READY_CLEAN,
                    |s, store, sk| s.update_record(store, sk),
                ),
                _ => (
                    Status::BUSY_DESTROYING,
                    Status::DESTROYED_CLEAN,
                    |s, store, sk| s.destroy_record(store, sk),
                ),
            };

            self.core.statuses.borrow_mut().insert(store_key, busy);
            self.data_hash_did_change(store_key, None, true);

            match op(source.as_ref(), self, store_key) {
                Ok(new_hash) => {
                    let status_only = new_hash.is_none();
                    if let Some(hash) = new_hash {
                        self.core
                            .data_hashes
                            .borrow_mut()
                            .insert(store_key, Rc::new(hash));
                    }
                    self.core.statuses.borrow_mut().insert(store_key, done);
                    self.core.changed.borrow_mut().remove(&store_key);
                    self.data_hash_did_change(store_key, None, status_only);
                    committed.push(store_key);
                }
                Err(error) => {
                    tracing::debug!(store_key, %error, "data source rejected commit");
                    self.core
                        .statuses
                        .borrow_mut()
                        .insert(store_key, Status::ERROR);
                    self.data_hash_did_change(store_key, None, true);
                }
            }
        }
        tracing::debug!(committed = committed.len(), "commit_records finished");
        Ok(committed)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("nested", &self.is_nested())
            .field("entries", &self.core.data_hashes.borrow().len())
            .finish()
    }
}

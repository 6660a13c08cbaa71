//! Record materialization.
//!
//! A [`Record`] is the observable face of one StoreKey inside one store.
//! Its backing [`ObservableObject`] carries a delegate that reads and
//! writes the data hash, plus one cacheable computed property per declared
//! attribute (coercing on read, writing through on write). Store-side
//! changes funnel back in through
//! [`store_did_change_properties`](Record::store_did_change_properties),
//! so observers registered through the KVO layer see data-hash updates as
//! ordinary property changes.

use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use hub_kvo::{ComputedProperty, ObservableObject, PropValue, PropertyDelegate};

use crate::attribute::RecordType;
use crate::status::Status;
use crate::store::{Store, StoreCore, StoreKey};

/// A materialized record. Clones share the backing object.
#[derive(Clone)]
pub struct Record {
    object: ObservableObject,
    store: Weak<StoreCore>,
    store_key: StoreKey,
    record_type: Rc<RecordType>,
    id: String,
}

/// Routes reads and writes of undeclared keys through the data hash.
struct RecordDelegate {
    store: Weak<StoreCore>,
    store_key: StoreKey,
}

impl PropertyDelegate for RecordDelegate {
    fn unknown_property(&self, _object: &ObservableObject, key: &str) -> Option<PropValue> {
        let store = Store::from_weak(&self.store)?;
        if key == "status" {
            let bits = store.read_status(self.store_key).bits();
            return Some(PropValue::Json(Value::from(bits)));
        }
        let hash = store.read_data_hash(self.store_key)?;
        hash.get(key).cloned().map(PropValue::Json)
    }

    fn set_unknown_property(&self, object: &ObservableObject, key: &str, value: PropValue) -> bool {
        let Some(store) = Store::from_weak(&self.store) else {
            return true;
        };
        if key == "status" {
            return true;
        }
        let raw = value.into_json().unwrap_or(Value::Null);
        let written = store
            .with_editable_data_hash(self.store_key, |hash| {
                hash.insert(key.to_owned(), raw);
            })
            .is_some();
        if written {
            store.record_did_change(self.store_key, Some(key), object);
        }
        true
    }
}

impl Record {
    /// Builds the observable object for `store_key` and wires the declared
    /// attributes as cacheable computed properties.
    pub(crate) fn materialize(
        store: &Store,
        store_key: StoreKey,
        record_type: Rc<RecordType>,
        id: String,
    ) -> Record {
        let object = ObservableObject::new(store.context());
        object.set_delegate(Rc::new(RecordDelegate {
            store: store.weak_core(),
            store_key,
        }));

        for attribute in record_type.attributes() {
            let attribute = attribute.clone();
            let weak = store.weak_core();
            let key = attribute.key().to_owned();
            object.define_property(
                &key,
                ComputedProperty::new(move |origin, key, value| {
                    let Some(store) = Store::from_weak(&weak) else {
                        return Some(PropValue::null());
                    };
                    match value {
                        None => {
                            let hash = store.read_data_hash(store_key);
                            let raw = hash.as_ref().and_then(|h| h.get(attribute.storage_key()));
                            Some(PropValue::Json(attribute.to_type(raw)))
                        }
                        Some(value) => {
                            let raw =
                                attribute.from_type(value.as_json().unwrap_or(&Value::Null));
                            let canonical = attribute.to_type(Some(&raw));
                            let written = store
                                .with_editable_data_hash(store_key, |hash| {
                                    hash.insert(attribute.storage_key().to_owned(), raw);
                                })
                                .is_some();
                            if written {
                                store.record_did_change(store_key, Some(key), origin);
                            }
                            Some(PropValue::Json(canonical))
                        }
                    }
                })
                .cacheable(),
            );
        }

        Record {
            object,
            store: store.weak_core(),
            store_key,
            record_type,
            id,
        }
    }

    /// The backing observable object; observers register here.
    pub fn object(&self) -> &ObservableObject {
        &self.object
    }

    /// The owning store, while it is alive. Records do not keep their store
    /// alive.
    pub fn store(&self) -> Option<Store> {
        Store::from_weak(&self.store)
    }

    pub fn store_key(&self) -> StoreKey {
        self.store_key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record_type(&self) -> &Rc<RecordType> {
        &self.record_type
    }

    pub fn status(&self) -> Status {
        match self.store() {
            Some(store) => store.read_status(self.store_key),
            None => Status::EMPTY,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.status().is_destroyed()
    }

    pub fn is_dirty(&self) -> bool {
        self.status().is_dirty()
    }

    /// Reads one attribute through the coercion layer.
    pub fn read_attribute(&self, key: &str) -> Value {
        self.object.get(key).into_json().unwrap_or(Value::Null)
    }

    /// Writes one attribute through the data hash, dirtying the record.
    pub fn write_attribute(&self, key: &str, value: Value) -> &Self {
        self.object.set(key, PropValue::Json(value));
        self
    }

    /// A snapshot of the raw attribute hash.
    pub fn attributes(&self) -> Map<String, Value> {
        self.store()
            .and_then(|store| store.read_data_hash(self.store_key))
            .map(|hash| (*hash).clone())
            .unwrap_or_default()
    }

    /// Destroys the record in its store; reports the resulting status.
    pub fn destroy(&self) -> Status {
        match self.store() {
            Some(store) => store.destroy_store_key(self.store_key),
            None => Status::EMPTY,
        }
    }

    /// Store-side change notification: one begin/end bracket so a combined
    /// observer on several record properties fires exactly once per change.
    pub(crate) fn store_did_change_properties(&self, key: Option<&str>, status_only: bool) {
        let object = &self.object;
        object.begin_property_changes();
        if !status_only {
            match key {
                Some(key) => {
                    object.notify_property_change(key);
                }
                None => {
                    object.all_properties_did_change();
                }
            }
        }
        object.notify_property_change("status");
        object.end_property_changes();
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.record_type.name())
            .field("id", &self.id)
            .field("store_key", &self.store_key)
            .field("status", &self.status())
            .finish()
    }
}

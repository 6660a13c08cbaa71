//! Data sources: the commit-side boundary of a store.
//!
//! The store drives a [`DataSource`] synchronously during
//! `commit_records`. A source may hand back a replacement hash (for
//! server-assigned fields) or `None` to keep the committed hash as-is;
//! an `Err` parks the record in `ERROR` status.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::{Store, StoreKey};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("record already exists in source: {0}")]
    AlreadyExists(String),
    #[error("record not found in source: {0}")]
    NotFound(String),
    #[error("source rejected the record: {0}")]
    Rejected(String),
}

/// Outcome of one commit operation: an optional replacement hash.
pub type SourceResult = Result<Option<Map<String, Value>>, SourceError>;

/// The three commit operations a store can drive.
pub trait DataSource {
    fn create_record(&self, store: &Store, store_key: StoreKey) -> SourceResult;
    fn update_record(&self, store: &Store, store_key: StoreKey) -> SourceResult;
    fn destroy_record(&self, store: &Store, store_key: StoreKey) -> SourceResult;
}

/// An in-memory data source keyed by `(type, id)`; the usual backing for
/// tests and demos.
#[derive(Default)]
pub struct FixtureSource {
    fixtures: RefCell<HashMap<(String, String), Map<String, Value>>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_fixture(
        &self,
        type_name: impl Into<String>,
        id: impl Into<String>,
        hash: Map<String, Value>,
    ) -> &Self {
        self.fixtures
            .borrow_mut()
            .insert((type_name.into(), id.into()), hash);
        self
    }

    pub fn fixture(&self, type_name: &str, id: &str) -> Option<Map<String, Value>> {
        self.fixtures
            .borrow()
            .get(&(type_name.to_owned(), id.to_owned()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.fixtures.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.borrow().is_empty()
    }

    fn slot_for(store: &Store, store_key: StoreKey) -> Result<(String, String), SourceError> {
        let type_name = store
            .record_type_for(store_key)
            .map(|t| t.name().to_owned())
            .ok_or_else(|| SourceError::Rejected(format!("unknown store key {store_key}")))?;
        let id = store
            .id_for(store_key)
            .ok_or_else(|| SourceError::Rejected(format!("unknown store key {store_key}")))?;
        Ok((type_name, id))
    }
}

impl DataSource for FixtureSource {
    fn create_record(&self, store: &Store, store_key: StoreKey) -> SourceResult {
        let slot = Self::slot_for(store, store_key)?;
        let hash = store
            .read_data_hash(store_key)
            .ok_or_else(|| SourceError::Rejected(format!("no hash for store key {store_key}")))?;
        let mut fixtures = self.fixtures.borrow_mut();
        if fixtures.contains_key(&slot) {
            return Err(SourceError::AlreadyExists(format!("{}/{}", slot.0, slot.1)));
        }
        fixtures.insert(slot, (*hash).clone());
        Ok(None)
    }

    fn update_record(&self, store: &Store, store_key: StoreKey) -> SourceResult {
        let slot = Self::slot_for(store, store_key)?;
        let hash = store
            .read_data_hash(store_key)
            .ok_or_else(|| SourceError::Rejected(format!("no hash for store key {store_key}")))?;
        let mut fixtures = self.fixtures.borrow_mut();
        if !fixtures.contains_key(&slot) {
            return Err(SourceError::NotFound(format!("{}/{}", slot.0, slot.1)));
        }
        fixtures.insert(slot, (*hash).clone());
        Ok(None)
    }

    fn destroy_record(&self, store: &Store, store_key: StoreKey) -> SourceResult {
        let slot = Self::slot_for(store, store_key)?;
        match self.fixtures.borrow_mut().remove(&slot) {
            Some(_) => Ok(None),
            None => Err(SourceError::NotFound(format!("{}/{}", slot.0, slot.1))),
        }
    }
}

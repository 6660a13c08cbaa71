//! Versioned copy-on-write record store for hub-rs.
//!
//! A [`Store`] keeps one data hash, status and revision per StoreKey — a
//! process-unique integer naming one logical record across every editing
//! context. Nested editing contexts created with
//! [`Store::create_editing_context`] shadow the parent sparsely: a key the
//! context never touched is `INHERITED` and reads through, a key it read is
//! `LOCKED` onto a shared reference, and a key it edited is `EDITABLE` with
//! a private copy. Writes in a parent reach exactly the children still
//! inheriting that key.
//!
//! Records materialized out of the store are observable objects from
//! [`hub_kvo`]; attribute reads and writes flow through the data hash and
//! change notifications funnel back into key-value observation.

pub mod attribute;
pub mod record;
pub mod source;
pub mod status;
pub mod store;

pub use attribute::{AttrKind, RecordAttribute, RecordType};
pub use record::Record;
pub use source::{DataSource, FixtureSource, SourceError};
pub use status::Status;
pub use store::{DataHash, EditState, Store, StoreError, StoreKey};

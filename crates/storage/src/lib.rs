//! Storage layer for Attendance Master
//!
//! This crate provides a small transactional record store with typed
//! collections, a durable sled engine, an in-memory engine, and JSON
//! backup snapshots.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod engine;
pub mod error;
pub mod kv;
pub mod memory;
pub mod opener;
pub mod records;
pub mod schema;
pub mod store;
pub mod transaction;

pub use backup::{backup_file_name, read_backup, write_backup, ImportReport, Snapshot};
pub use engine::{StorageEngine, WriteOp};
pub use error::{Result, StoreError};
pub use kv::{SledEngine, StoreConfig};
pub use memory::MemoryEngine;
pub use opener::{StoreOpener, StoreState};
pub use records::{
    AttendeeEntry, Collection, IndexDefinition, Key, MasterName, Meeting, StoredRecord, ZoomEntry,
    DATE_FORMAT,
};
pub use store::RecordStore;
pub use transaction::{CommitReceipt, ReadView, Transaction, TxMode};

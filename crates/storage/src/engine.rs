//! Storage engine seam
//!
//! The record store front end (locks, transactions, typed records) talks to
//! its storage medium only through [`StorageEngine`]. Engines see rows as JSON
//! objects and use the collection metadata to locate primary and index keys.

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::records::{Collection, IndexDefinition, Key};
use crate::schema::{SchemaState, StoreDefinition};

/// First id handed out by an auto-increment collection
pub const FIRST_ID: u64 = 1;

/// One write inside a transaction batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or fully replace a row
    Put {
        /// Target collection
        collection: Collection,
        /// Row as a JSON object
        row: Value,
    },
    /// Remove one row by primary key
    Delete {
        /// Target collection
        collection: Collection,
        /// Primary key
        key: Key,
    },
    /// Remove every row whose index field equals `value`
    DeleteWhere {
        /// Target collection
        collection: Collection,
        /// Index to match on
        index: &'static IndexDefinition,
        /// Index value
        value: Key,
    },
}

impl WriteOp {
    /// Collection the operation writes to
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Put { collection, .. }
            | WriteOp::Delete { collection, .. }
            | WriteOp::DeleteWhere { collection, .. } => *collection,
        }
    }
}

/// Storage medium behind a record store
///
/// `apply` must be atomic: either every operation of the batch is durable or
/// none is. Callers serialize conflicting batches, so engines do not need
/// their own isolation beyond that.
#[cfg_attr(test, mockall::automock)]
pub trait StorageEngine: Send + Sync {
    /// Read the recorded schema
    fn schema_state(&self) -> Result<SchemaState>;

    /// Create (or re-create) a collection and its indexes, recording its checksum
    fn create_object_store(&self, definition: &StoreDefinition) -> Result<()>;

    /// Record the schema version
    fn record_schema_version(&self, version: u32) -> Result<()>;

    /// Point lookup by primary key
    fn get(&self, collection: Collection, key: &Key) -> Result<Option<Value>>;

    /// Every row of a collection
    fn scan(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Rows whose index field equals `value`
    fn scan_index(
        &self,
        collection: Collection,
        index: &IndexDefinition,
        value: &Key,
    ) -> Result<Vec<Value>>;

    /// Apply a batch atomically, returning the key written by each `Put` in order
    fn apply(&self, ops: &[WriteOp]) -> Result<Vec<Key>>;

    /// Flush pending writes to durable storage
    fn flush(&self) -> Result<()>;
}

/// Primary key of a row, `None` when the key field is absent or null
pub(crate) fn primary_key(collection: Collection, row: &Value) -> Result<Option<Key>> {
    let object = row.as_object().ok_or_else(|| {
        StoreError::InvalidRecord(format!("{collection} rows must be JSON objects"))
    })?;

    match object.get(collection.key_path()) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Key::from_value(value).map(Some).ok_or_else(|| {
            StoreError::InvalidRecord(format!(
                "{collection}.{} must be a string or unsigned integer",
                collection.key_path()
            ))
        }),
    }
}

/// Index key of a row, `None` if the row has no usable value
pub(crate) fn index_key(index: &IndexDefinition, row: &Value) -> Option<Key> {
    row.get(index.key_path).and_then(Key::from_value)
}

/// Work out the key a `Put` writes, assigning one from `next_id` when the
/// collection auto-increments and the row has none.
///
/// Explicit integer keys push `next_id` past them so generated ids never
/// collide with imported ones.
pub(crate) fn resolve_put(
    collection: Collection,
    row: &Value,
    next_id: &mut u64,
) -> Result<(Key, Value)> {
    let mut row = row.clone();

    let key = match primary_key(collection, &row)? {
        Some(Key::Int(id)) if collection.auto_increment() => {
            *next_id = (*next_id).max(id.saturating_add(1));
            Key::Int(id)
        }
        Some(Key::Text(_)) if collection.auto_increment() => {
            return Err(StoreError::InvalidRecord(format!(
                "{collection}.{} must be an integer",
                collection.key_path()
            )));
        }
        Some(key) => key,
        None if collection.auto_increment() => {
            let key = Key::Int(*next_id);
            *next_id = next_id.saturating_add(1);
            if let Some(object) = row.as_object_mut() {
                object.insert(collection.key_path().to_string(), key.to_value());
            }
            key
        }
        None => {
            return Err(StoreError::InvalidRecord(format!(
                "{collection} row is missing its {} key",
                collection.key_path()
            )));
        }
    };

    Ok((key, row))
}

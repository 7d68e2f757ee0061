//! Scoped transactions
//!
//! A [`Transaction`] is a batch of writes queued against a fixed set of
//! collections. Nothing touches the engine until the batch is committed
//! through the record store, which applies it atomically while holding the
//! write locks of the whole scope. Reads go through a [`ReadView`] that holds
//! the read locks of its scope for as long as it lives.

use serde_json::Value;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::{StorageEngine, WriteOp};
use crate::error::{Result, StoreError};
use crate::records::{AttendeeEntry, Collection, Key, MasterName, StoredRecord, ZoomEntry};

/// Transaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Reads only; may run alongside other readers
    ReadOnly,
    /// Reads and writes; exclusive per collection
    ReadWrite,
}

/// A batch of writes scoped to a set of collections
#[derive(Debug, Clone)]
pub struct Transaction {
    scope: Vec<Collection>,
    mode: TxMode,
    ops: Vec<WriteOp>,
}

impl Transaction {
    /// Create an empty transaction over `scope`
    pub fn new(scope: &[Collection], mode: TxMode) -> Self {
        Self {
            scope: normalize_scope(scope),
            mode,
            ops: Vec::new(),
        }
    }

    /// Collections the transaction may touch, in lock order
    pub fn scope(&self) -> &[Collection] {
        &self.scope
    }

    /// Transaction mode
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Queued operations, in issue order
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn check_write(&self, collection: Collection) -> Result<()> {
        if !self.scope.contains(&collection) {
            return Err(StoreError::OutOfScope(collection));
        }
        if self.mode == TxMode::ReadOnly {
            return Err(StoreError::ReadOnlyTransaction(collection));
        }
        Ok(())
    }

    /// Queue an upsert of `record`
    pub fn put<T: StoredRecord>(&mut self, record: &T) -> Result<()> {
        self.check_write(T::COLLECTION)?;
        record.validate()?;
        let row = serde_json::to_value(record)?;
        self.ops.push(WriteOp::Put {
            collection: T::COLLECTION,
            row,
        });
        Ok(())
    }

    /// Queue a delete by primary key
    pub fn delete<T: StoredRecord>(&mut self, key: impl Into<Key>) -> Result<()> {
        self.check_write(T::COLLECTION)?;
        self.ops.push(WriteOp::Delete {
            collection: T::COLLECTION,
            key: key.into(),
        });
        Ok(())
    }

    /// Queue a delete of every row whose `index` value equals `value`
    pub fn delete_where<T: StoredRecord>(&mut self, index: &str, value: impl Into<Key>) -> Result<()> {
        self.check_write(T::COLLECTION)?;
        let index = T::COLLECTION.index(index)?;
        self.ops.push(WriteOp::DeleteWhere {
            collection: T::COLLECTION,
            index,
            value: value.into(),
        });
        Ok(())
    }

    /// Queue the replacement of a day's remote attendees.
    ///
    /// Every existing entry for `date` is deleted, the new entries are
    /// inserted without ids, and each non-blank name is upserted into the
    /// master list. Needs `zoom_entries` and `master_names` in scope.
    pub fn replace_day_entries(&mut self, date: &str, entries: &[AttendeeEntry]) -> Result<()> {
        crate::records::validate_date(date)?;
        self.check_write(Collection::MasterNames)?;
        self.delete_where::<ZoomEntry>("date", date)?;

        for entry in entries {
            self.put(&ZoomEntry::new(date, entry.name.clone(), entry.connections))?;
        }
        for entry in entries {
            let name = entry.name.trim();
            if !name.is_empty() {
                self.put(&MasterName::new(name))?;
            }
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Vec<Collection>, TxMode, Vec<WriteOp>) {
        (self.scope, self.mode, self.ops)
    }
}

/// Keys written by a committed transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    keys: Vec<Key>,
}

impl CommitReceipt {
    pub(crate) fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Key written by each `put`, in issue order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Integer keys only (ids assigned to auto-increment rows)
    pub fn ids(&self) -> Vec<u64> {
        self.keys.iter().filter_map(Key::as_int).collect()
    }
}

fn normalize_scope(scope: &[Collection]) -> Vec<Collection> {
    let mut scope = scope.to_vec();
    scope.sort();
    scope.dedup();
    scope
}

/// One lock per collection
pub(crate) struct CollectionLocks {
    locks: [RwLock<()>; 3],
}

/// Guards held for the duration of a transaction
pub(crate) struct LockSet<'a> {
    _shared: Vec<RwLockReadGuard<'a, ()>>,
    _exclusive: Vec<RwLockWriteGuard<'a, ()>>,
}

impl CollectionLocks {
    pub(crate) fn new() -> Self {
        Self {
            locks: [RwLock::new(()), RwLock::new(()), RwLock::new(())],
        }
    }

    /// Lock `scope` in collection order so that overlapping transactions
    /// cannot deadlock
    pub(crate) async fn acquire(&self, scope: &[Collection], mode: TxMode) -> LockSet<'_> {
        let mut shared = Vec::new();
        let mut exclusive = Vec::new();

        for collection in normalize_scope(scope) {
            let lock = &self.locks[collection.position()];
            match mode {
                TxMode::ReadOnly => shared.push(lock.read().await),
                TxMode::ReadWrite => exclusive.push(lock.write().await),
            }
        }

        LockSet {
            _shared: shared,
            _exclusive: exclusive,
        }
    }
}

/// Consistent read access to a set of collections
pub struct ReadView<'a> {
    engine: &'a dyn StorageEngine,
    scope: Vec<Collection>,
    _locks: LockSet<'a>,
}

impl<'a> ReadView<'a> {
    pub(crate) fn new(engine: &'a dyn StorageEngine, scope: Vec<Collection>, locks: LockSet<'a>) -> Self {
        Self {
            engine,
            scope,
            _locks: locks,
        }
    }

    fn check_scope(&self, collection: Collection) -> Result<()> {
        if self.scope.contains(&collection) {
            Ok(())
        } else {
            Err(StoreError::OutOfScope(collection))
        }
    }

    /// Point lookup by primary key
    pub fn get<T: StoredRecord>(&self, key: impl Into<Key>) -> Result<Option<T>> {
        self.check_scope(T::COLLECTION)?;
        self.engine
            .get(T::COLLECTION, &key.into())?
            .map(decode)
            .transpose()
    }

    /// Every row of the collection, in no particular order
    pub fn get_all<T: StoredRecord>(&self) -> Result<Vec<T>> {
        self.check_scope(T::COLLECTION)?;
        self.engine
            .scan(T::COLLECTION)?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Rows whose `index` value equals `value`
    pub fn get_all_by_index<T: StoredRecord>(&self, index: &str, value: impl Into<Key>) -> Result<Vec<T>> {
        self.check_scope(T::COLLECTION)?;
        let index = T::COLLECTION.index(index)?;
        self.engine
            .scan_index(T::COLLECTION, index, &value.into())?
            .into_iter()
            .map(decode)
            .collect()
    }
}

fn decode<T: StoredRecord>(row: Value) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

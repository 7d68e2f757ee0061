//! In-memory storage engine for tests and ephemeral sessions
//!
//! Batches are applied to a copy of the tables which is swapped in only when
//! every operation succeeded, so an abort never leaves a partial batch behind.
//! The engine can also be told to fail, which is how the abort and
//! storage-denied paths of the record store are exercised.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::engine::{index_key, resolve_put, StorageEngine, WriteOp, FIRST_ID};
use crate::error::{Result, StoreError};
use crate::records::{Collection, IndexDefinition, Key};
use crate::schema::{SchemaState, StoreDefinition};

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<Collection, BTreeMap<Key, Value>>,
    next_ids: BTreeMap<Collection, u64>,
    stores: BTreeMap<Collection, String>,
    version: u32,
}

impl Tables {
    fn put(&mut self, collection: Collection, row: &Value) -> Result<Key> {
        let next_id = self.next_ids.entry(collection).or_insert(FIRST_ID);
        let (key, row) = resolve_put(collection, row, next_id)?;
        self.rows
            .entry(collection)
            .or_default()
            .insert(key.clone(), row);
        Ok(key)
    }

    fn delete(&mut self, collection: Collection, key: &Key) {
        if let Some(rows) = self.rows.get_mut(&collection) {
            rows.remove(key);
        }
    }

    fn delete_where(&mut self, collection: Collection, index: &IndexDefinition, value: &Key) {
        if let Some(rows) = self.rows.get_mut(&collection) {
            rows.retain(|_, row| index_key(index, row).as_ref() != Some(value));
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AbortPlan {
    skip_commits: usize,
    after_ops: usize,
}

#[derive(Debug, Default)]
struct Faults {
    deny_storage: bool,
    abort: Option<AbortPlan>,
}

impl Faults {
    /// Take the abort point for the commit about to run, if it is the doomed one
    fn next_abort(&mut self) -> Option<usize> {
        match self.abort.as_mut() {
            Some(plan) if plan.skip_commits > 0 => {
                plan.skip_commits -= 1;
                None
            }
            Some(_) => self.abort.take().map(|plan| plan.after_ops),
            None => None,
        }
    }
}

/// Engine keeping every collection in memory
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: RwLock<Tables>,
    faults: Mutex<Faults>,
}

impl MemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a host that refuses persistent storage
    pub fn deny_storage(&self) {
        self.faults.lock().deny_storage = true;
    }

    /// Abort the next committed batch after `ops` of its operations have run.
    ///
    /// The abort fires even if the batch is shorter than `ops`.
    pub fn abort_after(&self, ops: usize) {
        self.abort_commit(0, ops);
    }

    /// Let `skip_commits` batches succeed, then abort the following one after
    /// `after_ops` of its operations.
    pub fn abort_commit(&self, skip_commits: usize, after_ops: usize) {
        self.faults.lock().abort = Some(AbortPlan {
            skip_commits,
            after_ops,
        });
    }

    fn check_available(&self) -> Result<()> {
        if self.faults.lock().deny_storage {
            return Err(StoreError::StorageUnavailable(
                "persistent storage denied by host".to_string(),
            ));
        }
        Ok(())
    }
}

impl StorageEngine for MemoryEngine {
    fn schema_state(&self) -> Result<SchemaState> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(SchemaState {
            version: tables.version,
            stores: tables.stores.clone(),
        })
    }

    fn create_object_store(&self, definition: &StoreDefinition) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write();
        tables.rows.entry(definition.collection).or_default();
        tables
            .stores
            .insert(definition.collection, definition.checksum.clone());
        Ok(())
    }

    fn record_schema_version(&self, version: u32) -> Result<()> {
        self.tables.write().version = version;
        Ok(())
    }

    fn get(&self, collection: Collection, key: &Key) -> Result<Option<Value>> {
        Ok(self
            .tables
            .read()
            .rows
            .get(&collection)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn scan(&self, collection: Collection) -> Result<Vec<Value>> {
        Ok(self
            .tables
            .read()
            .rows
            .get(&collection)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn scan_index(
        &self,
        collection: Collection,
        index: &IndexDefinition,
        value: &Key,
    ) -> Result<Vec<Value>> {
        Ok(self
            .tables
            .read()
            .rows
            .get(&collection)
            .map(|rows| {
                rows.values()
                    .filter(|row| index_key(index, row).as_ref() == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<Vec<Key>> {
        let abort_after = self.faults.lock().next_abort();
        let mut tables = self.tables.write();
        let mut draft = tables.clone();
        let mut written = Vec::new();

        for (applied, op) in ops.iter().enumerate() {
            if abort_after == Some(applied) {
                break;
            }
            match op {
                WriteOp::Put { collection, row } => written.push(draft.put(*collection, row)?),
                WriteOp::Delete { collection, key } => draft.delete(*collection, key),
                WriteOp::DeleteWhere { collection, index, value } => {
                    draft.delete_where(*collection, index, value)
                }
            }
        }

        if let Some(after) = abort_after {
            return Err(StoreError::TransactionAborted(format!(
                "aborted after {} of {} operations",
                after.min(ops.len()),
                ops.len()
            )));
        }

        *tables = draft;
        Ok(written)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

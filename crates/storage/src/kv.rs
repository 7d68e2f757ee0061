//! Durable storage engine on top of sled
//!
//! Layout: one tree per collection keyed by the encoded primary key, one tree
//! per secondary index mapping an index value to the list of primary keys that
//! carry it, and a `__meta` tree with schema bookkeeping and id generators.
//! Every batch runs as a single sled multi-tree transaction.

use serde_json::Value;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::collections::BTreeMap;

use crate::engine::{index_key, primary_key, resolve_put, StorageEngine, WriteOp, FIRST_ID};
use crate::error::{Result, StoreError};
use crate::records::{Collection, IndexDefinition, Key};
use crate::schema::{SchemaState, StoreDefinition};

const META_TREE: &str = "__meta";
const SCHEMA_VERSION_KEY: &str = "schema_version";
const STORE_PREFIX: &str = "store:";
const NEXT_ID_PREFIX: &str = "next_id:";

/// Slot of the meta tree inside the transaction view
const META_SLOT: usize = 0;

type TxResult<T> = ConflictableTransactionResult<T, StoreError>;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database path
    pub path: String,
    /// Cache capacity in bytes
    pub cache_capacity: u64,
    /// Enable compression
    pub use_compression: bool,
    /// Flush interval in milliseconds (None for flushing only on demand)
    pub flush_every_ms: Option<u64>,
    /// Delete the database when the engine is dropped
    pub temporary: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "attendance_master.db".to_string(),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            use_compression: true,
            flush_every_ms: Some(500),
            temporary: false,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with a custom path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Default::default() }
    }

    /// Set cache capacity in bytes
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable compression
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    /// Set flush interval in milliseconds
    pub fn flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    /// Make the database temporary
    pub fn temporary(mut self, enabled: bool) -> Self {
        self.temporary = enabled;
        self
    }
}

/// sled-backed engine
pub struct SledEngine {
    db: Db,
    /// Meta tree first, then collections, then index trees
    trees: Vec<Tree>,
    index_slots: BTreeMap<(Collection, &'static str), usize>,
}

impl SledEngine {
    /// Open (or create) the database described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .use_compression(config.use_compression)
            .flush_every_ms(config.flush_every_ms)
            .temporary(config.temporary)
            .open()
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        tracing::info!(path = %config.path, "Opened sled database");
        Self::from_db(db)
    }

    /// Create a temporary engine that disappears when dropped (for testing)
    pub fn in_memory() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let mut trees = vec![db.open_tree(META_TREE)?];
        for collection in Collection::ALL {
            trees.push(db.open_tree(collection.name())?);
        }

        let mut index_slots = BTreeMap::new();
        for collection in Collection::ALL {
            for index in collection.indexes() {
                index_slots.insert((collection, index.name), trees.len());
                trees.push(db.open_tree(index_tree_name(collection, index))?);
            }
        }

        Ok(Self { db, trees, index_slots })
    }

    fn rows_slot(collection: Collection) -> usize {
        collection.position() + 1
    }

    fn rows(&self, collection: Collection) -> &Tree {
        &self.trees[Self::rows_slot(collection)]
    }

    fn meta(&self) -> &Tree {
        &self.trees[META_SLOT]
    }

    fn index_slot(&self, collection: Collection, index: &str) -> Result<usize> {
        self.index_slots
            .iter()
            .find(|((c, name), _)| *c == collection && *name == index)
            .map(|(_, slot)| *slot)
            .ok_or_else(|| StoreError::UnknownIndex {
                collection,
                index: index.to_string(),
            })
    }

    fn decode_row(bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Rebuild an index tree from the rows currently stored
    fn rebuild_index(&self, collection: Collection, index: &IndexDefinition) -> Result<()> {
        let tree = &self.trees[self.index_slot(collection, index.name)?];
        tree.clear()?;

        let mut entries: BTreeMap<Key, Vec<Key>> = BTreeMap::new();
        for item in self.rows(collection).iter() {
            let (_, bytes) = item?;
            let row = Self::decode_row(&bytes)?;
            if let (Some(pk), Some(ik)) = (primary_key(collection, &row)?, index_key(index, &row)) {
                entries.entry(ik).or_default().push(pk);
            }
        }

        for (ik, pks) in entries {
            tree.insert(ik.encode(), serde_json::to_vec(&pks)?)?;
        }
        Ok(())
    }

    fn index_slots_for(&self, collection: Collection) -> Vec<(usize, &'static IndexDefinition)> {
        collection
            .indexes()
            .iter()
            .filter_map(|index| {
                self.index_slots
                    .get(&(collection, index.name))
                    .map(|slot| (*slot, index))
            })
            .collect()
    }

    fn tx_put(&self, views: &[TransactionalTree], collection: Collection, row: &Value) -> TxResult<Key> {
        let meta = &views[META_SLOT];
        let counter = format!("{NEXT_ID_PREFIX}{}", collection.name());
        let mut next_id = match meta.get(counter.as_bytes())? {
            Some(bytes) => decode_u64(&counter, &bytes).or_else(abort)?,
            None => FIRST_ID,
        };

        let (key, row) = resolve_put(collection, row, &mut next_id).or_else(abort)?;
        if collection.auto_increment() {
            meta.insert(counter.as_bytes(), &next_id.to_be_bytes()[..])?;
        }

        let rows = &views[Self::rows_slot(collection)];
        let encoded = key.encode();
        let previous = rows.get(&encoded)?;

        for (slot, index) in self.index_slots_for(collection) {
            if let Some(bytes) = &previous {
                let old = Self::decode_row(bytes).or_else(abort)?;
                if let Some(old_value) = index_key(index, &old) {
                    tx_unlink(&views[slot], &old_value, &key)?;
                }
            }
            if let Some(new_value) = index_key(index, &row) {
                tx_link(&views[slot], &new_value, &key)?;
            }
        }

        let bytes = serde_json::to_vec(&row).map_err(StoreError::from).or_else(abort)?;
        rows.insert(encoded, bytes)?;
        Ok(key)
    }

    fn tx_delete(&self, views: &[TransactionalTree], collection: Collection, key: &Key) -> TxResult<()> {
        let rows = &views[Self::rows_slot(collection)];
        let Some(bytes) = rows.remove(key.encode())? else {
            return Ok(());
        };

        let old = Self::decode_row(&bytes).or_else(abort)?;
        for (slot, index) in self.index_slots_for(collection) {
            if let Some(value) = index_key(index, &old) {
                tx_unlink(&views[slot], &value, key)?;
            }
        }
        Ok(())
    }

    fn tx_delete_where(
        &self,
        views: &[TransactionalTree],
        collection: Collection,
        index: &IndexDefinition,
        value: &Key,
    ) -> TxResult<()> {
        let slot = self.index_slot(collection, index.name).or_else(abort)?;
        let keys = tx_index_keys(&views[slot], value)?;
        for key in &keys {
            self.tx_delete(views, collection, key)?;
        }
        Ok(())
    }
}

impl StorageEngine for SledEngine {
    fn schema_state(&self) -> Result<SchemaState> {
        let version = match self.meta().get(SCHEMA_VERSION_KEY)? {
            Some(bytes) => {
                let version = decode_u64(SCHEMA_VERSION_KEY, &bytes)?;
                u32::try_from(version).map_err(|_| {
                    StoreError::InvalidRecord(format!("{SCHEMA_VERSION_KEY} {version} out of range"))
                })?
            }
            None => 0,
        };

        let mut stores = BTreeMap::new();
        for collection in Collection::ALL {
            let key = format!("{STORE_PREFIX}{}", collection.name());
            if let Some(bytes) = self.meta().get(key.as_bytes())? {
                stores.insert(collection, String::from_utf8_lossy(&bytes).into_owned());
            }
        }

        Ok(SchemaState { version, stores })
    }

    fn create_object_store(&self, definition: &StoreDefinition) -> Result<()> {
        let collection = definition.collection;
        self.db.open_tree(collection.name())?;
        for index in &definition.indexes {
            self.db.open_tree(index_tree_name(collection, index))?;
            self.rebuild_index(collection, index)?;
        }

        let key = format!("{STORE_PREFIX}{}", collection.name());
        self.meta()
            .insert(key.as_bytes(), definition.checksum.as_bytes())?;
        Ok(())
    }

    fn record_schema_version(&self, version: u32) -> Result<()> {
        self.meta()
            .insert(SCHEMA_VERSION_KEY, &u64::from(version).to_be_bytes()[..])?;
        self.meta().flush()?;
        Ok(())
    }

    fn get(&self, collection: Collection, key: &Key) -> Result<Option<Value>> {
        match self.rows(collection).get(key.encode())? {
            Some(bytes) => Ok(Some(Self::decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, collection: Collection) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for item in self.rows(collection).iter() {
            let (_, bytes) = item?;
            rows.push(Self::decode_row(&bytes)?);
        }
        Ok(rows)
    }

    fn scan_index(
        &self,
        collection: Collection,
        index: &IndexDefinition,
        value: &Key,
    ) -> Result<Vec<Value>> {
        let tree = &self.trees[self.index_slot(collection, index.name)?];
        let keys: Vec<Key> = match tree.get(value.encode())? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => return Ok(Vec::new()),
        };

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.get(collection, &key)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<Vec<Key>> {
        let result: std::result::Result<Vec<Key>, TransactionError<StoreError>> =
            self.trees.as_slice().transaction(|views| {
                let mut written = Vec::new();
                for op in ops {
                    match op {
                        WriteOp::Put { collection, row } => {
                            written.push(self.tx_put(views, *collection, row)?);
                        }
                        WriteOp::Delete { collection, key } => {
                            self.tx_delete(views, *collection, key)?;
                        }
                        WriteOp::DeleteWhere { collection, index, value } => {
                            self.tx_delete_where(views, *collection, index, value)?;
                        }
                    }
                }
                Ok(written)
            });

        match result {
            Ok(keys) => Ok(keys),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StoreError::Database(e)),
        }
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn index_tree_name(collection: Collection, index: &IndexDefinition) -> String {
    format!("{}.by_{}", collection.name(), index.name)
}

/// Decode a big-endian counter from the meta tree
fn decode_u64(key: &str, bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidRecord(format!("corrupt meta value for {key}")))?;
    Ok(u64::from_be_bytes(array))
}

fn abort<T>(err: StoreError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn tx_index_keys(tree: &TransactionalTree, value: &Key) -> TxResult<Vec<Key>> {
    match tree.get(value.encode())? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map_err(StoreError::from)
            .or_else(abort),
        None => Ok(Vec::new()),
    }
}

fn tx_link(tree: &TransactionalTree, value: &Key, key: &Key) -> TxResult<()> {
    let mut keys = tx_index_keys(tree, value)?;
    if !keys.contains(key) {
        keys.push(key.clone());
    }
    let bytes = serde_json::to_vec(&keys).map_err(StoreError::from).or_else(abort)?;
    tree.insert(value.encode(), bytes)?;
    Ok(())
}

fn tx_unlink(tree: &TransactionalTree, value: &Key, key: &Key) -> TxResult<()> {
    let mut keys = tx_index_keys(tree, value)?;
    keys.retain(|k| k != key);
    if keys.is_empty() {
        tree.remove(value.encode())?;
    } else {
        let bytes = serde_json::to_vec(&keys).map_err(StoreError::from).or_else(abort)?;
        tree.insert(value.encode(), bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{definitions, upgrade, SCHEMA_VERSION};
    use serde_json::json;
    use tempfile::TempDir;

    fn engine() -> SledEngine {
        let engine = SledEngine::in_memory().unwrap();
        upgrade(&engine).unwrap();
        engine
    }

    fn zoom(date: &str, name: &str, connections: u32) -> WriteOp {
        WriteOp::Put {
            collection: Collection::ZoomEntries,
            row: json!({"date": date, "name": name, "connections": connections}),
        }
    }

    fn date_index() -> &'static IndexDefinition {
        Collection::ZoomEntries.index("date").unwrap()
    }

    #[test]
    fn test_fresh_engine_schema() {
        let engine = SledEngine::in_memory().unwrap();
        let state = engine.schema_state().unwrap();
        assert_eq!(state.version, 0);
        assert!(state.stores.is_empty());

        upgrade(&engine).unwrap();
        let state = engine.schema_state().unwrap();
        assert_eq!(state.version, SCHEMA_VERSION);
        assert_eq!(state.stores.len(), definitions().len());
    }

    #[test]
    fn test_put_and_get() {
        let engine = engine();
        let keys = engine
            .apply(&[WriteOp::Put {
                collection: Collection::Meetings,
                row: json!({"date": "2024-03-10", "presencial": 5, "total": 8}),
            }])
            .unwrap();
        assert_eq!(keys, vec![Key::from("2024-03-10")]);

        let row = engine
            .get(Collection::Meetings, &Key::from("2024-03-10"))
            .unwrap();
        assert_eq!(row, Some(json!({"date": "2024-03-10", "presencial": 5, "total": 8})));
        assert_eq!(engine.get(Collection::Meetings, &Key::from("2024-03-11")).unwrap(), None);
    }

    #[test]
    fn test_auto_increment_and_index() {
        let engine = engine();
        let keys = engine
            .apply(&[
                zoom("2024-03-10", "Ana", 2),
                zoom("2024-03-10", "Bo", 1),
                zoom("2024-03-11", "Cy", 1),
            ])
            .unwrap();
        assert_eq!(keys, vec![Key::Int(1), Key::Int(2), Key::Int(3)]);

        let rows = engine
            .scan_index(Collection::ZoomEntries, date_index(), &Key::from("2024-03-10"))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["date"] == json!("2024-03-10")));
    }

    #[test]
    fn test_delete_where_clears_index() {
        let engine = engine();
        engine
            .apply(&[zoom("2024-03-10", "Ana", 2), zoom("2024-03-11", "Bo", 1)])
            .unwrap();

        engine
            .apply(&[WriteOp::DeleteWhere {
                collection: Collection::ZoomEntries,
                index: date_index(),
                value: Key::from("2024-03-10"),
            }])
            .unwrap();

        let day = engine
            .scan_index(Collection::ZoomEntries, date_index(), &Key::from("2024-03-10"))
            .unwrap();
        assert!(day.is_empty());
        assert_eq!(engine.scan(Collection::ZoomEntries).unwrap().len(), 1);
    }

    #[test]
    fn test_replacing_row_moves_index_entry() {
        let engine = engine();
        engine.apply(&[zoom("2024-03-10", "Ana", 2)]).unwrap();
        engine
            .apply(&[WriteOp::Put {
                collection: Collection::ZoomEntries,
                row: json!({"id": 1, "date": "2024-03-12", "name": "Ana", "connections": 2}),
            }])
            .unwrap();

        let old_day = engine
            .scan_index(Collection::ZoomEntries, date_index(), &Key::from("2024-03-10"))
            .unwrap();
        let new_day = engine
            .scan_index(Collection::ZoomEntries, date_index(), &Key::from("2024-03-12"))
            .unwrap();
        assert!(old_day.is_empty());
        assert_eq!(new_day.len(), 1);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let engine = engine();
        engine.apply(&[zoom("2024-03-10", "Ana", 2)]).unwrap();

        let result = engine.apply(&[
            WriteOp::DeleteWhere {
                collection: Collection::ZoomEntries,
                index: date_index(),
                value: Key::from("2024-03-10"),
            },
            zoom("2024-03-10", "Bo", 1),
            WriteOp::Put {
                collection: Collection::Meetings,
                row: json!({"presencial": 1}),
            },
        ]);
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));

        let day = engine
            .scan_index(Collection::ZoomEntries, date_index(), &Key::from("2024-03-10"))
            .unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0]["name"], json!("Ana"));
    }

    #[test]
    fn test_corrupt_schema_version_is_reported() {
        let engine = engine();
        engine.meta().insert(SCHEMA_VERSION_KEY, &b"v1"[..]).unwrap();
        assert!(matches!(
            engine.schema_state(),
            Err(StoreError::InvalidRecord(_))
        ));

        engine
            .meta()
            .insert(SCHEMA_VERSION_KEY, &u64::MAX.to_be_bytes()[..])
            .unwrap();
        assert!(matches!(
            engine.schema_state(),
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_corrupt_id_counter_aborts_batch() {
        let engine = engine();
        engine.apply(&[zoom("2024-03-10", "Ana", 2)]).unwrap();
        let counter = format!("{NEXT_ID_PREFIX}{}", Collection::ZoomEntries.name());
        engine.meta().insert(counter.as_bytes(), &[1u8, 2, 3][..]).unwrap();

        let result = engine.apply(&[zoom("2024-03-10", "Bo", 1)]);
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
        assert_eq!(engine.scan(Collection::ZoomEntries).unwrap().len(), 1);
    }

    #[test]
    fn test_explicit_ids_advance_generator() {
        let engine = engine();
        engine
            .apply(&[WriteOp::Put {
                collection: Collection::ZoomEntries,
                row: json!({"id": 10, "date": "2024-01-01", "name": "X", "connections": 2}),
            }])
            .unwrap();

        let keys = engine.apply(&[zoom("2024-01-02", "Y", 1)]).unwrap();
        assert_eq!(keys, vec![Key::Int(11)]);
    }

    #[test]
    fn test_data_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("attendance.db");
        let config = StoreConfig::new(path.to_string_lossy()).flush_every_ms(None);

        {
            let engine = SledEngine::open(&config).unwrap();
            upgrade(&engine).unwrap();
            engine.apply(&[zoom("2024-03-10", "Ana", 2)]).unwrap();
            engine.flush().unwrap();
        }

        let engine = SledEngine::open(&config).unwrap();
        let report = upgrade(&engine).unwrap();
        assert!(report.is_noop());

        let day = engine
            .scan_index(Collection::ZoomEntries, date_index(), &Key::from("2024-03-10"))
            .unwrap();
        assert_eq!(day.len(), 1);

        let keys = engine.apply(&[zoom("2024-03-10", "Bo", 1)]).unwrap();
        assert_eq!(keys, vec![Key::Int(2)]);
    }

    #[test]
    fn test_recreating_store_rebuilds_index() {
        let engine = engine();
        engine.apply(&[zoom("2024-03-10", "Ana", 2)]).unwrap();

        let tree = &engine.trees[engine.index_slot(Collection::ZoomEntries, "date").unwrap()];
        tree.clear().unwrap();

        engine
            .create_object_store(&StoreDefinition::for_collection(Collection::ZoomEntries))
            .unwrap();

        let day = engine
            .scan_index(Collection::ZoomEntries, date_index(), &Key::from("2024-03-10"))
            .unwrap();
        assert_eq!(day.len(), 1);
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("test.db")
            .cache_capacity(32 * 1024 * 1024)
            .use_compression(false)
            .flush_every_ms(Some(1000))
            .temporary(true);

        assert_eq!(config.path, "test.db");
        assert_eq!(config.cache_capacity, 32 * 1024 * 1024);
        assert!(!config.use_compression);
        assert_eq!(config.flush_every_ms, Some(1000));
        assert!(config.temporary);
    }
}

//! Schema bookkeeping and additive upgrades
//!
//! Each collection has a [`StoreDefinition`] whose md5 checksum is recorded by
//! the engine when the collection is created. On open, [`upgrade`] compares the
//! recorded checksums and schema version against this build and re-runs only
//! the creation steps that are missing or have drifted. Nothing is ever
//! dropped or rewritten.

use std::collections::BTreeMap;

use crate::engine::StorageEngine;
use crate::error::{Result, StoreError};
use crate::records::{Collection, IndexDefinition};

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 1;

/// Everything needed to create one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDefinition {
    /// The collection
    pub collection: Collection,
    /// Primary key field
    pub key_path: &'static str,
    /// Whether the engine assigns missing keys
    pub auto_increment: bool,
    /// Secondary indexes
    pub indexes: Vec<IndexDefinition>,
    /// Checksum for drift detection
    pub checksum: String,
}

impl StoreDefinition {
    /// Build the definition of a collection
    pub fn for_collection(collection: Collection) -> Self {
        let mut definition = Self {
            collection,
            key_path: collection.key_path(),
            auto_increment: collection.auto_increment(),
            indexes: collection.indexes().to_vec(),
            checksum: String::new(),
        };
        definition.checksum = definition.compute_checksum();
        definition
    }

    /// md5 of the canonical form, e.g. `zoom_entries|id|true|date:date:false`
    pub fn compute_checksum(&self) -> String {
        let indexes: Vec<String> = self
            .indexes
            .iter()
            .map(|index| format!("{}:{}:{}", index.name, index.key_path, index.unique))
            .collect();
        let canonical = format!(
            "{}|{}|{}|{}",
            self.collection.name(),
            self.key_path,
            self.auto_increment,
            indexes.join(",")
        );
        format!("{:x}", md5::compute(canonical))
    }
}

/// Definitions for every collection this build knows about
pub fn definitions() -> Vec<StoreDefinition> {
    Collection::ALL
        .iter()
        .copied()
        .map(StoreDefinition::for_collection)
        .collect()
}

/// Schema as recorded by an engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaState {
    /// Recorded schema version, 0 for a fresh engine
    pub version: u32,
    /// Checksum recorded for each created collection
    pub stores: BTreeMap<Collection, String>,
}

/// Outcome of [`upgrade`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Version found before the upgrade
    pub from_version: u32,
    /// Version recorded after the upgrade
    pub to_version: u32,
    /// Collections created or re-created
    pub created: Vec<Collection>,
}

impl UpgradeReport {
    /// Whether the upgrade had nothing to do
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.from_version == self.to_version
    }
}

/// Bring the engine's schema up to [`SCHEMA_VERSION`]
pub fn upgrade(engine: &dyn StorageEngine) -> Result<UpgradeReport> {
    let state = engine.schema_state()?;

    if state.version > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: state.version,
            supported: SCHEMA_VERSION,
        });
    }

    let mut created = Vec::new();
    for definition in definitions() {
        match state.stores.get(&definition.collection) {
            Some(checksum) if *checksum == definition.checksum => continue,
            Some(_) => tracing::warn!(
                collection = %definition.collection,
                "Schema drift detected, re-running creation step"
            ),
            None => tracing::info!(collection = %definition.collection, "Creating collection"),
        }
        engine.create_object_store(&definition)?;
        created.push(definition.collection);
    }

    if state.version != SCHEMA_VERSION {
        engine.record_schema_version(SCHEMA_VERSION)?;
        tracing::info!(
            from = state.version,
            to = SCHEMA_VERSION,
            "Schema version recorded"
        );
    }

    Ok(UpgradeReport {
        from_version: state.version,
        to_version: SCHEMA_VERSION,
        created,
    })
}

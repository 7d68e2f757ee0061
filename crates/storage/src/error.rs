//! Error types shared by every layer of the record store.

use thiserror::Error;

use crate::records::Collection;

/// Record store error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// The host refused to provide persistent storage
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A backup document did not have the expected shape
    #[error("Invalid backup format: {0}")]
    InvalidBackupFormat(String),

    /// The engine aborted a transaction; the whole batch was discarded
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// The store handle was closed
    #[error("Store is closed")]
    Closed,

    /// A write was queued on a read-only transaction
    #[error("Transaction is read-only, cannot write to {0}")]
    ReadOnlyTransaction(Collection),

    /// An operation touched a collection outside the transaction scope
    #[error("Collection {0} is not in the transaction scope")]
    OutOfScope(Collection),

    /// The collection has no index with this name
    #[error("Unknown index {index} on {collection}")]
    UnknownIndex {
        /// Collection that was queried
        collection: Collection,
        /// Requested index name
        index: String,
    },

    /// A record failed validation
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The persisted schema was written by a newer version
    #[error("Schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version found on disk
        found: u32,
        /// Highest version this build understands
        supported: u32,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sled database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the caller may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::TransactionAborted(_))
    }
}

/// Result type for record store operations
pub type Result<T> = std::result::Result<T, StoreError>;

//! Store lifecycle
//!
//! [`StoreOpener`] is the single owner of a store's connection. `open` is
//! idempotent and concurrency-safe: callers racing on the first open all await
//! the same initialization and receive the same handle.

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::engine::StorageEngine;
use crate::error::Result;
use crate::kv::{SledEngine, StoreConfig};
use crate::memory::MemoryEngine;
use crate::store::RecordStore;

/// Observable store states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Not opened yet, or closed
    Closed,
    /// Open and accepting operations
    Open,
}

enum Backend {
    Sled(StoreConfig),
    Engine(Arc<dyn StorageEngine>),
}

/// Opens a record store at most once
pub struct StoreOpener {
    backend: Backend,
    store: OnceCell<Arc<RecordStore>>,
}

impl StoreOpener {
    /// Opener for a sled database
    pub fn new(config: StoreConfig) -> Self {
        Self {
            backend: Backend::Sled(config),
            store: OnceCell::new(),
        }
    }

    /// Opener for an existing engine
    pub fn with_engine(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            backend: Backend::Engine(engine),
            store: OnceCell::new(),
        }
    }

    /// Opener for a fresh in-memory engine (for testing)
    pub fn in_memory() -> Self {
        Self::with_engine(Arc::new(MemoryEngine::new()))
    }

    /// Open the store, or return the handle opened earlier
    pub async fn open(&self) -> Result<Arc<RecordStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let engine: Arc<dyn StorageEngine> = match &self.backend {
                    Backend::Sled(config) => Arc::new(SledEngine::open(config)?),
                    Backend::Engine(engine) => Arc::clone(engine),
                };
                let store = RecordStore::open(engine).await?;
                tracing::info!("Record store opened");
                Ok::<_, crate::error::StoreError>(Arc::new(store))
            })
            .await?;

        Ok(Arc::clone(store))
    }

    /// Current state
    pub fn state(&self) -> StoreState {
        match self.store.get() {
            Some(store) if !store.is_closed() => StoreState::Open,
            _ => StoreState::Closed,
        }
    }

    /// Flush and close the store; a later `open` starts a new connection
    pub fn close(&mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            store.close()?;
        }
        Ok(())
    }
}

//! The record store front end
//!
//! [`RecordStore`] owns an engine and one lock per collection. Every public
//! operation is a transaction: single-record helpers open a one-collection
//! transaction, composite operations open one over everything they touch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backup::{ImportReport, Snapshot};
use crate::engine::StorageEngine;
use crate::error::{Result, StoreError};
use crate::memory::MemoryEngine;
use crate::records::{
    validate_date, AttendeeEntry, Collection, Key, MasterName, Meeting, StoredRecord, ZoomEntry,
};
use crate::schema;
use crate::transaction::{CollectionLocks, CommitReceipt, ReadView, Transaction, TxMode};

/// Transactional store over the attendance collections
pub struct RecordStore {
    engine: Arc<dyn StorageEngine>,
    locks: CollectionLocks,
    closed: AtomicBool,
}

impl RecordStore {
    /// Open a store on `engine`, creating or upgrading its schema
    pub async fn open(engine: Arc<dyn StorageEngine>) -> Result<Self> {
        let report = schema::upgrade(engine.as_ref())?;
        if report.is_noop() {
            tracing::debug!(version = report.to_version, "Record store schema up to date");
        } else {
            tracing::info!(
                from = report.from_version,
                to = report.to_version,
                created = ?report.created,
                "Record store schema upgraded"
            );
        }

        Ok(Self {
            engine,
            locks: CollectionLocks::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a store backed by a fresh in-memory engine (for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::open(Arc::new(MemoryEngine::new())).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush and refuse further operations
    pub fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.engine.flush()?;
            tracing::info!("Record store closed");
        }
        Ok(())
    }

    /// Start a transaction over `scope`
    pub fn transaction(&self, scope: &[Collection], mode: TxMode) -> Transaction {
        Transaction::new(scope, mode)
    }

    /// Apply every queued operation of `tx` atomically
    pub async fn commit(&self, tx: Transaction) -> Result<CommitReceipt> {
        self.ensure_open()?;
        let (scope, mode, ops) = tx.into_parts();
        if ops.is_empty() {
            return Ok(CommitReceipt::default());
        }

        let _locks = self.locks.acquire(&scope, mode).await;
        self.ensure_open()?;

        match self.engine.apply(&ops) {
            Ok(keys) => {
                tracing::debug!(ops = ops.len(), scope = ?scope, "Transaction committed");
                Ok(CommitReceipt::new(keys))
            }
            Err(e) => {
                tracing::warn!(error = %e, scope = ?scope, "Transaction failed, batch discarded");
                Err(e)
            }
        }
    }

    /// Open a read-only view over `scope`; it sees no writes until dropped
    pub async fn read(&self, scope: &[Collection]) -> Result<ReadView<'_>> {
        self.ensure_open()?;
        let locks = self.locks.acquire(scope, TxMode::ReadOnly).await;
        Ok(ReadView::new(self.engine.as_ref(), scope.to_vec(), locks))
    }

    /// Point lookup by primary key
    pub async fn get<T: StoredRecord>(&self, key: impl Into<Key>) -> Result<Option<T>> {
        self.read(&[T::COLLECTION]).await?.get(key)
    }

    /// Every row of a collection, in no particular order
    pub async fn get_all<T: StoredRecord>(&self) -> Result<Vec<T>> {
        self.read(&[T::COLLECTION]).await?.get_all()
    }

    /// Rows whose `index` value equals `value`
    pub async fn get_all_by_index<T: StoredRecord>(
        &self,
        index: &str,
        value: impl Into<Key>,
    ) -> Result<Vec<T>> {
        self.read(&[T::COLLECTION]).await?.get_all_by_index(index, value)
    }

    /// Upsert a record, returning its primary key
    pub async fn put<T: StoredRecord>(&self, record: &T) -> Result<Key> {
        let mut tx = self.transaction(&[T::COLLECTION], TxMode::ReadWrite);
        tx.put(record)?;
        let receipt = self.commit(tx).await?;
        receipt
            .keys()
            .first()
            .cloned()
            .ok_or_else(|| StoreError::TransactionAborted("put wrote no key".to_string()))
    }

    /// Delete one record by primary key; missing keys are ignored
    pub async fn delete<T: StoredRecord>(&self, key: impl Into<Key>) -> Result<()> {
        let mut tx = self.transaction(&[T::COLLECTION], TxMode::ReadWrite);
        tx.delete::<T>(key)?;
        self.commit(tx).await.map(|_| ())
    }

    /// Delete every record whose `index` value equals `value`
    pub async fn delete_where<T: StoredRecord>(&self, index: &str, value: impl Into<Key>) -> Result<()> {
        let mut tx = self.transaction(&[T::COLLECTION], TxMode::ReadWrite);
        tx.delete_where::<T>(index, value)?;
        self.commit(tx).await.map(|_| ())
    }

    /// Meeting summary for a day
    pub async fn get_meeting(&self, date: &str) -> Result<Option<Meeting>> {
        self.get(date).await
    }

    /// Every meeting summary
    pub async fn all_meetings(&self) -> Result<Vec<Meeting>> {
        self.get_all().await
    }

    /// Upsert a meeting summary
    pub async fn put_meeting(&self, meeting: &Meeting) -> Result<()> {
        self.put(meeting).await.map(|_| ())
    }

    /// Remote attendees recorded for a day
    pub async fn zoom_entries_for_date(&self, date: &str) -> Result<Vec<ZoomEntry>> {
        self.get_all_by_index("date", date).await
    }

    /// Every remote attendee row
    pub async fn all_zoom_entries(&self) -> Result<Vec<ZoomEntry>> {
        self.get_all().await
    }

    /// Every known name
    pub async fn master_names(&self) -> Result<Vec<MasterName>> {
        self.get_all().await
    }

    /// Upsert a list of names in one transaction, returning how many were written.
    ///
    /// Names are trimmed and blank ones skipped.
    pub async fn put_master_names<I, S>(&self, names: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tx = self.transaction(&[Collection::MasterNames], TxMode::ReadWrite);
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() {
                tx.put(&MasterName::new(name))?;
            }
        }
        let count = tx.len();
        self.commit(tx).await?;
        Ok(count)
    }

    /// Replace every remote attendee of `date` with `entries`, atomically.
    ///
    /// Returns the ids assigned to the new entries, in input order.
    pub async fn replace_day_entries(&self, date: &str, entries: &[AttendeeEntry]) -> Result<Vec<u64>> {
        validate_date(date)?;
        let mut tx = self.transaction(
            &[Collection::ZoomEntries, Collection::MasterNames],
            TxMode::ReadWrite,
        );
        tx.replace_day_entries(date, entries)?;
        let receipt = self.commit(tx).await?;
        Ok(receipt.ids())
    }

    /// Dump every collection from one consistent read
    pub async fn export_all(&self) -> Result<Snapshot> {
        let view = self.read(&Collection::ALL).await?;
        let snapshot = Snapshot {
            meetings: Some(view.get_all()?),
            zoom_entries: Some(view.get_all()?),
            master_names: Some(view.get_all()?),
        };
        drop(view);

        tracing::info!(rows = snapshot.row_count(), "Exported snapshot");
        Ok(snapshot)
    }

    /// Restore a snapshot, one transaction per collection.
    ///
    /// The snapshot is validated up front, so malformed input touches nothing.
    /// A storage failure part-way leaves earlier collections restored.
    pub async fn import_all(&self, snapshot: &Snapshot) -> Result<ImportReport> {
        self.ensure_open()?;
        snapshot.validate()?;

        let mut report = ImportReport::default();
        if let Some(rows) = &snapshot.meetings {
            self.import_collection(Collection::Meetings, rows, &mut report).await?;
        }
        if let Some(rows) = &snapshot.zoom_entries {
            self.import_collection(Collection::ZoomEntries, rows, &mut report).await?;
        }
        if let Some(rows) = &snapshot.master_names {
            self.import_collection(Collection::MasterNames, rows, &mut report).await?;
        }

        tracing::info!(rows = report.total(), "Imported snapshot");
        Ok(report)
    }

    /// Parse a backup document and import it
    pub async fn import_json(&self, json: &str) -> Result<ImportReport> {
        let snapshot = Snapshot::from_json(json)?;
        self.import_all(&snapshot).await
    }

    async fn import_collection<T: StoredRecord>(
        &self,
        collection: Collection,
        rows: &[T],
        report: &mut ImportReport,
    ) -> Result<()> {
        let mut tx = self.transaction(&[collection], TxMode::ReadWrite);
        for row in rows {
            tx.put(row)?;
        }

        if let Err(e) = self.commit(tx).await {
            tracing::warn!(
                collection = %collection,
                restored = report.total(),
                error = %e,
                "Import stopped; earlier collections remain restored"
            );
            return Err(e);
        }

        report.record(collection, rows.len());
        Ok(())
    }
}

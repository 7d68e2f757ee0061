//! Attendance service
//!
//! [`AttendanceService`] is the facade the entry form talks to. Every
//! operation maps onto one or more record store transactions and is bounded
//! by the configured timeout.

use chrono::NaiveDate;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{
    read_backup, write_backup, Collection, ImportReport, Meeting, RecordStore, StoreError, TxMode,
    ZoomEntry,
};

use crate::day::{parse_date, DayRecord, DaySheet};
use crate::error::{AttendanceError, Result};
use crate::roster::{parse_roster, NameSuggester, MAX_SUGGESTIONS};
use crate::stats::Evolution;

/// Default bound on a single operation
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Upper bound on each operation, `None` to wait indefinitely
    pub operation_timeout: Option<Duration>,
    /// Maximum number of name suggestions
    pub suggestion_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
            suggestion_limit: MAX_SUGGESTIONS,
        }
    }
}

impl ServiceConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Never time out
    pub fn without_timeout(mut self) -> Self {
        self.operation_timeout = None;
        self
    }

    /// Set the suggestion limit
    pub fn with_suggestion_limit(mut self, limit: usize) -> Self {
        self.suggestion_limit = limit;
        self
    }
}

/// Daily attendance workflow over a record store
pub struct AttendanceService {
    store: Arc<RecordStore>,
    suggester: NameSuggester,
    config: ServiceConfig,
}

impl AttendanceService {
    /// Create a service with default configuration
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self::with_config(store, ServiceConfig::default())
    }

    /// Create a service with custom configuration
    pub fn with_config(store: Arc<RecordStore>, config: ServiceConfig) -> Self {
        Self {
            suggester: NameSuggester::new(config.suggestion_limit),
            store,
            config,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = storage::Result<T>>,
    {
        match self.config.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => Ok(result?),
                Err(_) => {
                    tracing::warn!(timeout = ?limit, "Attendance operation timed out");
                    Err(AttendanceError::TimedOut(limit))
                }
            },
            None => Ok(operation.await?),
        }
    }

    /// Save a day's sheet.
    ///
    /// The meeting summary (with its total recomputed from the rows), the
    /// replacement of the day's remote entries and the name upserts commit
    /// together or not at all. Returns the ids of the new entries.
    pub async fn save_day(&self, sheet: &DaySheet) -> Result<Vec<u64>> {
        parse_date(sheet.date())?;
        let meeting = sheet.to_meeting()?;

        let mut tx = self.store.transaction(&Collection::ALL, TxMode::ReadWrite);
        tx.put(&meeting)?;
        tx.replace_day_entries(sheet.date(), sheet.rows())?;

        let receipt = self.bounded(self.store.commit(tx)).await?;
        if sheet.rows().iter().any(|row| !row.name.is_empty()) {
            self.suggester.invalidate();
        }

        tracing::info!(
            date = sheet.date(),
            presencial = sheet.presencial(),
            total = meeting.total,
            "Day saved"
        );
        Ok(receipt.ids())
    }

    /// Read a day's summary and remote entries from one consistent view.
    ///
    /// Entries come back in the order they were entered (ascending id).
    pub async fn load_day(&self, date: &str) -> Result<DayRecord> {
        parse_date(date)?;

        let (meeting, mut entries) = self
            .bounded(async {
                let view = self
                    .store
                    .read(&[Collection::Meetings, Collection::ZoomEntries])
                    .await?;
                let meeting = view.get::<Meeting>(date)?;
                let entries = view.get_all_by_index::<ZoomEntry>("date", date)?;
                Ok::<_, StoreError>((meeting, entries))
            })
            .await?;

        entries.sort_by_key(|entry| entry.id);
        Ok(DayRecord { meeting, entries })
    }

    /// Add every name of a roster text to the known names.
    ///
    /// Returns the number of names written.
    pub async fn import_roster(&self, text: &str) -> Result<usize> {
        let names = parse_roster(text);
        if names.is_empty() {
            return Err(AttendanceError::EmptyRoster);
        }

        let written = self.bounded(self.store.put_master_names(&names)).await?;
        self.suggester.invalidate();

        tracing::info!(names = written, "Roster imported");
        Ok(written)
    }

    /// Known names matching `query`, loading the cache on first use
    pub async fn suggest_names(&self, query: &str) -> Result<Vec<String>> {
        if let Some(found) = self.suggester.suggest(query) {
            return Ok(found);
        }

        let names = self.bounded(self.store.master_names()).await?;
        self.suggester.load(names.into_iter().map(|n| n.name));
        Ok(self.suggester.suggest(query).unwrap_or_default())
    }

    /// Attendance series over every saved meeting
    pub async fn evolution(&self) -> Result<Evolution> {
        let meetings = self.bounded(self.store.all_meetings()).await?;
        Ok(Evolution::from_meetings(meetings))
    }

    /// Write a full backup file into `dir`, named after `today`
    pub async fn export_backup(&self, dir: impl AsRef<Path>, today: NaiveDate) -> Result<PathBuf> {
        let dir = dir.as_ref();
        self.bounded(async {
            let snapshot = self.store.export_all().await?;
            write_backup(dir, &snapshot, today).await
        })
        .await
    }

    /// Restore a backup file written by [`export_backup`](Self::export_backup)
    pub async fn import_backup(&self, path: impl AsRef<Path>) -> Result<ImportReport> {
        let path = path.as_ref();
        let result = self
            .bounded(async {
                let snapshot = read_backup(path).await?;
                self.store.import_all(&snapshot).await
            })
            .await;

        // a failed import may still have restored some collections
        self.suggester.invalidate();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{AttendeeEntry, MemoryEngine};
    use tempfile::TempDir;

    async fn service() -> AttendanceService {
        let store = RecordStore::in_memory().await.unwrap();
        AttendanceService::new(Arc::new(store))
    }

    fn sheet() -> DaySheet {
        DaySheet::new("2024-03-10", 5)
            .unwrap()
            .with_row("Ana", 2)
            .with_row("Bo", 1)
    }

    #[tokio::test]
    async fn test_save_and_load_day() {
        let service = service().await;
        let ids = service.save_day(&sheet()).await.unwrap();
        assert_eq!(ids, vec![1, 2]);

        let day = service.load_day("2024-03-10").await.unwrap();
        assert_eq!(day.meeting, Some(Meeting::new("2024-03-10", 5, 8)));
        let names: Vec<_> = day.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Bo"]);
    }

    #[tokio::test]
    async fn test_unnamed_row_is_saved_and_counted() {
        let service = service().await;
        let sheet = DaySheet::new("2024-03-10", 5)
            .unwrap()
            .with_row("", 3)
            .with_row("Ana", 2);
        service.save_day(&sheet).await.unwrap();

        let day = service.load_day("2024-03-10").await.unwrap();
        assert_eq!(day.meeting, Some(Meeting::new("2024-03-10", 5, 10)));
        assert_eq!(day.entries.len(), 2);
        assert_eq!(day.to_sheet("2024-03-10").unwrap(), sheet);

        // blank names never reach the known names
        let names = service.store().master_names().await.unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "Ana");
    }

    #[tokio::test]
    async fn test_overflowing_total_writes_nothing() {
        let service = service().await;
        let sheet = DaySheet::new("2024-03-10", u32::MAX)
            .unwrap()
            .with_row("Ana", 1);

        let err = service.save_day(&sheet).await.unwrap_err();
        assert!(matches!(err, AttendanceError::TotalOverflow(_)));
        assert!(service.load_day("2024-03-10").await.unwrap().is_empty());
        assert!(service.store().master_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_day_keeps_entry_order() {
        let service = service().await;
        let sheet = DaySheet::new("2024-03-10", 0)
            .unwrap()
            .with_row("Zoe", 1)
            .with_row("Ana", 2)
            .with_row("Mia", 1);
        service.save_day(&sheet).await.unwrap();

        let day = service.load_day("2024-03-10").await.unwrap();
        let names: Vec<_> = day.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Zoe", "Ana", "Mia"]);
        assert_eq!(day.to_sheet("2024-03-10").unwrap(), sheet);
    }

    #[tokio::test]
    async fn test_resave_replaces_day() {
        let service = service().await;
        service.save_day(&sheet()).await.unwrap();

        let edited = DaySheet::new("2024-03-10", 6).unwrap().with_row("Cy", 3);
        service.save_day(&edited).await.unwrap();

        let day = service.load_day("2024-03-10").await.unwrap();
        assert_eq!(day.meeting.unwrap().total, 9);
        assert_eq!(day.entries.len(), 1);
        assert_eq!(day.entries[0].name, "Cy");
    }

    #[tokio::test]
    async fn test_load_unknown_day() {
        let service = service().await;
        let day = service.load_day("2024-03-10").await.unwrap();
        assert!(day.is_empty());

        assert!(matches!(
            service.load_day("March 10").await,
            Err(AttendanceError::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn test_aborted_save_changes_nothing() {
        let engine = Arc::new(MemoryEngine::new());
        let store = RecordStore::open(engine.clone()).await.unwrap();
        let service = AttendanceService::new(Arc::new(store));
        service.save_day(&sheet()).await.unwrap();

        engine.abort_after(2);
        let edited = DaySheet::new("2024-03-10", 1).unwrap().with_row("Cy", 1);
        let err = service.save_day(&edited).await.unwrap_err();
        assert!(err.is_retryable());

        let day = service.load_day("2024-03-10").await.unwrap();
        assert_eq!(day.meeting, Some(Meeting::new("2024-03-10", 5, 8)));
        assert_eq!(day.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_suggestions_follow_writes() {
        let service = service().await;
        service.import_roster("Mariana\nAna\n\n").await.unwrap();
        assert_eq!(service.suggest_names("ana").await.unwrap(), vec!["Ana", "Mariana"]);

        service
            .save_day(&DaySheet::new("2024-03-10", 0).unwrap().with_row("Anabel", 1))
            .await
            .unwrap();
        assert_eq!(
            service.suggest_names("ana").await.unwrap(),
            vec!["Ana", "Anabel", "Mariana"]
        );
    }

    #[tokio::test]
    async fn test_empty_roster() {
        let service = service().await;
        assert!(matches!(
            service.import_roster(" \n \n").await,
            Err(AttendanceError::EmptyRoster)
        ));
    }

    #[tokio::test]
    async fn test_suggestion_limit() {
        let store = Arc::new(RecordStore::in_memory().await.unwrap());
        let service =
            AttendanceService::with_config(store, ServiceConfig::new().with_suggestion_limit(2));
        service.import_roster("Ana\nAnabel\nMariana").await.unwrap();
        assert_eq!(service.suggest_names("an").await.unwrap().len(), 2);
        assert_eq!(service.suggest_names("").await.unwrap(), vec!["Ana", "Anabel"]);
    }

    #[tokio::test]
    async fn test_evolution() {
        let service = service().await;
        service.save_day(&sheet()).await.unwrap();
        service
            .save_day(&DaySheet::new("2024-03-03", 4).unwrap())
            .await
            .unwrap();

        let evolution = service.evolution().await.unwrap();
        assert_eq!(evolution.points.len(), 2);
        assert_eq!(evolution.points[0].date, "2024-03-03");
        assert_eq!(evolution.points[1].zoom_only, 3);
        assert_eq!(evolution.average(), Some(6.0));
    }

    #[tokio::test]
    async fn test_operation_times_out() {
        let store = Arc::new(RecordStore::in_memory().await.unwrap());
        let service = AttendanceService::with_config(
            Arc::clone(&store),
            ServiceConfig::new().with_operation_timeout(Duration::from_millis(50)),
        );

        // an open read view blocks writers on the same collection
        let view = store.read(&[Collection::Meetings]).await.unwrap();
        let err = service.save_day(&sheet()).await.unwrap_err();
        assert!(matches!(err, AttendanceError::TimedOut(_)));
        assert!(err.is_retryable());
        drop(view);

        assert!(service.load_day("2024-03-10").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backup_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();

        let service = service().await;
        service.save_day(&sheet()).await.unwrap();
        let path = service.export_backup(temp_dir.path(), today).await.unwrap();
        assert!(path.ends_with("AttendanceMaster_Backup_2024-03-11.json"));

        let restored = service_with_names().await;
        let report = restored.import_backup(&path).await.unwrap();
        assert_eq!(report.restored(Collection::ZoomEntries), Some(2));
        assert_eq!(restored.load_day("2024-03-10").await.unwrap().entries.len(), 2);
        assert_eq!(restored.suggest_names("bo").await.unwrap(), vec!["Bo"]);
    }

    async fn service_with_names() -> AttendanceService {
        let service = service().await;
        service.import_roster("Zed").await.unwrap();
        // warm the cache so the import has to invalidate it
        service.suggest_names("z").await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_import_bad_backup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backup.json");
        tokio::fs::write(&path, "[1, 2, 3]").await.unwrap();

        let service = service().await;
        let err = service.import_backup(&path).await.unwrap_err();
        assert!(matches!(
            err,
            AttendanceError::Store(StoreError::InvalidBackupFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_save_uses_store_entry_shape() {
        let service = service().await;
        service.save_day(&sheet()).await.unwrap();
        let entries = service.store().zoom_entries_for_date("2024-03-10").await.unwrap();
        let rows: Vec<_> = entries
            .iter()
            .map(|e| AttendeeEntry::new(e.name.clone(), e.connections))
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&AttendeeEntry::new("Ana", 2)));
    }
}

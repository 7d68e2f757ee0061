//! Backup snapshots
//!
//! A snapshot is a JSON object with one array per collection. Exports always
//! carry all three keys; imports treat a missing (or null) key as "collection
//! not present" and ignore keys they do not know.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, StoreError};
use crate::records::{Collection, MasterName, Meeting, StoredRecord, ZoomEntry, DATE_FORMAT};

/// File name prefix used for backup downloads
pub const BACKUP_FILE_PREFIX: &str = "AttendanceMaster_Backup_";

/// Point-in-time dump of the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Meeting summaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meetings: Option<Vec<Meeting>>,
    /// Remote attendees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom_entries: Option<Vec<ZoomEntry>>,
    /// Known names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_names: Option<Vec<MasterName>>,
}

impl Snapshot {
    /// Parse a backup document.
    ///
    /// Anything that is not a JSON object of well-formed rows fails with
    /// [`StoreError::InvalidBackupFormat`].
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidBackupFormat(format!("not valid JSON: {e}")))?;

        if !value.is_object() {
            return Err(StoreError::InvalidBackupFormat(
                "top level must be a JSON object".to_string(),
            ));
        }

        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|e| StoreError::InvalidBackupFormat(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every row, reporting the first bad one
    pub fn validate(&self) -> Result<()> {
        validate_rows(Collection::Meetings, self.meetings.as_deref())?;
        validate_rows(Collection::ZoomEntries, self.zoom_entries.as_deref())?;
        validate_rows(Collection::MasterNames, self.master_names.as_deref())?;
        Ok(())
    }

    /// Collections present in the snapshot, in import order
    pub fn collections(&self) -> Vec<Collection> {
        let mut present = Vec::new();
        if self.meetings.is_some() {
            present.push(Collection::Meetings);
        }
        if self.zoom_entries.is_some() {
            present.push(Collection::ZoomEntries);
        }
        if self.master_names.is_some() {
            present.push(Collection::MasterNames);
        }
        present
    }

    /// Total number of rows across all collections
    pub fn row_count(&self) -> usize {
        self.meetings.as_ref().map_or(0, Vec::len)
            + self.zoom_entries.as_ref().map_or(0, Vec::len)
            + self.master_names.as_ref().map_or(0, Vec::len)
    }
}

fn validate_rows<T: StoredRecord>(collection: Collection, rows: Option<&[T]>) -> Result<()> {
    for (position, row) in rows.unwrap_or_default().iter().enumerate() {
        row.validate().map_err(|e| {
            StoreError::InvalidBackupFormat(format!("{collection}[{position}]: {e}"))
        })?;
    }
    Ok(())
}

/// Rows restored per collection by an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    restored: BTreeMap<Collection, usize>,
}

impl ImportReport {
    pub(crate) fn record(&mut self, collection: Collection, rows: usize) {
        self.restored.insert(collection, rows);
    }

    /// Rows restored into `collection`, `None` if it was not imported
    pub fn restored(&self, collection: Collection) -> Option<usize> {
        self.restored.get(&collection).copied()
    }

    /// Total rows restored
    pub fn total(&self) -> usize {
        self.restored.values().sum()
    }
}

/// Backup file name for a given day
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("{BACKUP_FILE_PREFIX}{}.json", date.format(DATE_FORMAT))
}

/// Write a snapshot into `dir`, atomically (temp file + rename)
pub async fn write_backup(dir: impl AsRef<Path>, snapshot: &Snapshot, date: NaiveDate) -> Result<PathBuf> {
    let path = dir.as_ref().join(backup_file_name(date));
    let temp_path = path.with_extension("tmp");
    let contents = snapshot.to_json()?;

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, &path).await?;

    tracing::info!(path = %path.display(), rows = snapshot.row_count(), "Backup written");
    Ok(path)
}

/// Read and parse a backup file
pub async fn read_backup(path: impl AsRef<Path>) -> Result<Snapshot> {
    let contents = fs::read_to_string(path.as_ref()).await?;
    Snapshot::from_json(&contents)
}

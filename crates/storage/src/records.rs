//! Collections, keys and the typed records stored in them
//!
//! Every record type is bound to exactly one [`Collection`] through the
//! [`StoredRecord`] trait. The store itself moves rows around as JSON values,
//! so the collection metadata (key path, auto-increment, indexes) is what the
//! engines use to find keys inside a row.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Result, StoreError};

/// Date format used for every `date` field
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The fixed set of collections managed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// One summary row per meeting day
    Meetings,
    /// Remote attendees, many per day
    ZoomEntries,
    /// Known attendee names used for suggestions
    MasterNames,
}

/// A secondary index over one field of a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index name, as passed to `get_all_by_index`
    pub name: &'static str,
    /// Field the index is built from
    pub key_path: &'static str,
    /// Whether two rows may share a value
    pub unique: bool,
}

const ZOOM_ENTRY_INDEXES: &[IndexDefinition] = &[IndexDefinition {
    name: "date",
    key_path: "date",
    unique: false,
}];

impl Collection {
    /// All collections, in lock acquisition order
    pub const ALL: [Collection; 3] = [
        Collection::Meetings,
        Collection::ZoomEntries,
        Collection::MasterNames,
    ];

    /// Collection name as it appears in backups
    pub fn name(self) -> &'static str {
        match self {
            Collection::Meetings => "meetings",
            Collection::ZoomEntries => "zoom_entries",
            Collection::MasterNames => "master_names",
        }
    }

    /// Field holding the primary key
    pub fn key_path(self) -> &'static str {
        match self {
            Collection::Meetings => "date",
            Collection::ZoomEntries => "id",
            Collection::MasterNames => "name",
        }
    }

    /// Whether the store assigns the primary key when a row omits it
    pub fn auto_increment(self) -> bool {
        matches!(self, Collection::ZoomEntries)
    }

    /// Secondary indexes defined on this collection
    pub fn indexes(self) -> &'static [IndexDefinition] {
        match self {
            Collection::ZoomEntries => ZOOM_ENTRY_INDEXES,
            Collection::Meetings | Collection::MasterNames => &[],
        }
    }

    /// Look up an index by name
    pub fn index(self, name: &str) -> Result<&'static IndexDefinition> {
        self.indexes()
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| StoreError::UnknownIndex {
                collection: self,
                index: name.to_string(),
            })
    }

    pub(crate) fn position(self) -> usize {
        match self {
            Collection::Meetings => 0,
            Collection::ZoomEntries => 1,
            Collection::MasterNames => 2,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary or index key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Integer key (auto-assigned ids)
    Int(u64),
    /// String key (dates, names)
    Text(String),
}

impl Key {
    /// Read a key out of a JSON value; only unsigned integers and strings qualify
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_u64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// JSON form of the key
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(id) => Value::from(*id),
            Key::Text(text) => Value::from(text.as_str()),
        }
    }

    /// Byte encoding used by the sled engine; big-endian keeps ids ordered
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::Int(id) => id.to_be_bytes().to_vec(),
            Key::Text(text) => text.as_bytes().to_vec(),
        }
    }

    /// Integer value, if this is an integer key
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Key::Int(id) => Some(*id),
            Key::Text(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(id) => write!(f, "{id}"),
            Key::Text(text) => f.write_str(text),
        }
    }
}

impl From<u64> for Key {
    fn from(id: u64) -> Self {
        Key::Int(id)
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Key::Text(text.to_string())
    }
}

impl From<String> for Key {
    fn from(text: String) -> Self {
        Key::Text(text)
    }
}

impl From<&String> for Key {
    fn from(text: &String) -> Self {
        Key::Text(text.clone())
    }
}

/// A record type bound to one collection
pub trait StoredRecord: Serialize + DeserializeOwned + Send + Sync {
    /// Collection this record lives in
    const COLLECTION: Collection;

    /// Check field-level constraints before the record is written
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Parse and validate a `YYYY-MM-DD` date string
pub fn validate_date(date: &str) -> Result<NaiveDate> {
    let invalid = || StoreError::InvalidRecord(format!("date must be YYYY-MM-DD, got {date:?}"));
    if date.len() != 10 {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| invalid())
}

/// Daily attendance summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    /// Meeting day, `YYYY-MM-DD`
    pub date: String,
    /// In-person attendees
    pub presencial: u32,
    /// In-person attendees plus all remote connections
    pub total: u32,
}

impl Meeting {
    /// Create a meeting summary
    pub fn new(date: impl Into<String>, presencial: u32, total: u32) -> Self {
        Self { date: date.into(), presencial, total }
    }

    /// Remote connections implied by the summary
    pub fn remote(&self) -> u32 {
        self.total.saturating_sub(self.presencial)
    }
}

impl StoredRecord for Meeting {
    const COLLECTION: Collection = Collection::Meetings;

    fn validate(&self) -> Result<()> {
        validate_date(&self.date).map(|_| ())
    }
}

/// One remote attendee on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomEntry {
    /// Store-assigned id; `None` until the entry is written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Meeting day, `YYYY-MM-DD`
    pub date: String,
    /// Attendee name
    pub name: String,
    /// Number of connections this attendee accounts for
    pub connections: u32,
}

impl ZoomEntry {
    /// Create an entry without an id
    pub fn new(date: impl Into<String>, name: impl Into<String>, connections: u32) -> Self {
        Self {
            id: None,
            date: date.into(),
            name: name.into(),
            connections,
        }
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }
}

impl StoredRecord for ZoomEntry {
    const COLLECTION: Collection = Collection::ZoomEntries;

    fn validate(&self) -> Result<()> {
        validate_date(&self.date)?;
        if self.connections == 0 {
            return Err(StoreError::InvalidRecord(format!(
                "entry {:?} on {} must have at least one connection",
                self.name, self.date
            )));
        }
        Ok(())
    }
}

/// A known attendee name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasterName {
    /// The name; case-sensitive and unique
    pub name: String,
}

impl MasterName {
    /// Create a master name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StoredRecord for MasterName {
    const COLLECTION: Collection = Collection::MasterNames;

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidRecord("master name must not be blank".to_string()));
        }
        Ok(())
    }
}

/// Input row for replacing a day's remote attendees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeEntry {
    /// Attendee name, may be blank
    pub name: String,
    /// Number of connections
    pub connections: u32,
}

impl AttendeeEntry {
    /// Create an attendee entry
    pub fn new(name: impl Into<String>, connections: u32) -> Self {
        Self { name: name.into(), connections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_metadata() {
        assert_eq!(Collection::Meetings.key_path(), "date");
        assert_eq!(Collection::ZoomEntries.key_path(), "id");
        assert_eq!(Collection::MasterNames.key_path(), "name");

        assert!(Collection::ZoomEntries.auto_increment());
        assert!(!Collection::Meetings.auto_increment());

        assert_eq!(Collection::ZoomEntries.index("date").unwrap().key_path, "date");
        assert!(matches!(
            Collection::Meetings.index("date"),
            Err(StoreError::UnknownIndex { .. })
        ));
    }

    #[test]
    fn test_collection_serializes_as_backup_key() {
        let value = serde_json::to_value(Collection::ZoomEntries).unwrap();
        assert_eq!(value, json!("zoom_entries"));
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::from_value(&json!(7)), Some(Key::Int(7)));
        assert_eq!(Key::from_value(&json!("2024-03-10")), Some(Key::from("2024-03-10")));
        assert_eq!(Key::from_value(&json!(-1)), None);
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!({"a": 1})), None);
    }

    #[test]
    fn test_int_keys_encode_in_order() {
        assert!(Key::Int(2).encode() < Key::Int(10).encode());
        assert!(Key::Int(255).encode() < Key::Int(256).encode());
    }

    #[test]
    fn test_validate_date() {
        assert!(validate_date("2024-03-10").is_ok());
        assert!(validate_date("2024-3-10").is_err());
        assert!(validate_date("2024-02-30").is_err());
        assert!(validate_date("10/03/2024").is_err());
        assert!(validate_date("").is_err());
    }

    #[test]
    fn test_zoom_entry_requires_connections() {
        assert!(ZoomEntry::new("2024-03-10", "Ana", 2).validate().is_ok());
        assert!(ZoomEntry::new("2024-03-10", "Ana", 0).validate().is_err());
        assert!(ZoomEntry::new("not-a-date", "Ana", 1).validate().is_err());
    }

    #[test]
    fn test_zoom_entry_omits_missing_id() {
        let value = serde_json::to_value(ZoomEntry::new("2024-03-10", "Ana", 2)).unwrap();
        assert_eq!(value, json!({"date": "2024-03-10", "name": "Ana", "connections": 2}));

        let entry: ZoomEntry =
            serde_json::from_value(json!({"id": 4, "date": "2024-03-10", "name": "Bo", "connections": 1}))
                .unwrap();
        assert_eq!(entry.id, Some(4));
    }

    #[test]
    fn test_master_name_must_not_be_blank() {
        assert!(MasterName::new("Ana").validate().is_ok());
        assert!(MasterName::new("   ").validate().is_err());
    }

    #[test]
    fn test_meeting_remote() {
        assert_eq!(Meeting::new("2024-03-10", 5, 8).remote(), 3);
        assert_eq!(Meeting::new("2024-03-10", 5, 3).remote(), 0);
    }
}

//! A day's attendance sheet
//!
//! The sheet is what the user fills in for one meeting: the in-person count
//! and one row per remote attendee. Totals are always derived from the rows.

use chrono::NaiveDate;
use storage::records::validate_date;
use storage::{AttendeeEntry, Meeting, ZoomEntry};

use crate::error::{AttendanceError, Result};

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(date: &str) -> Result<NaiveDate> {
    validate_date(date).map_err(|_| AttendanceError::InvalidDate(date.to_string()))
}

/// Attendance entered for one day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySheet {
    date: String,
    presencial: u32,
    rows: Vec<AttendeeEntry>,
}

impl DaySheet {
    /// Start an empty sheet for `date`
    pub fn new(date: impl Into<String>, presencial: u32) -> Result<Self> {
        let date = date.into();
        parse_date(&date)?;
        Ok(Self {
            date,
            presencial,
            rows: Vec::new(),
        })
    }

    /// Add a remote attendee row.
    ///
    /// The name is trimmed and may be blank; the connections still count.
    /// Rows without connections are dropped.
    pub fn add_row(&mut self, name: &str, connections: u32) -> &mut Self {
        let name = name.trim();
        if connections > 0 {
            self.rows.push(AttendeeEntry::new(name, connections));
        }
        self
    }

    /// Builder form of [`add_row`](Self::add_row)
    pub fn with_row(mut self, name: &str, connections: u32) -> Self {
        self.add_row(name, connections);
        self
    }

    /// Meeting day
    pub fn date(&self) -> &str {
        &self.date
    }

    /// In-person attendees
    pub fn presencial(&self) -> u32 {
        self.presencial
    }

    /// Remote attendee rows, in entry order
    pub fn rows(&self) -> &[AttendeeEntry] {
        &self.rows
    }

    /// Sum of remote connections, saturating at `u32::MAX`
    pub fn zoom_total(&self) -> u32 {
        self.rows
            .iter()
            .fold(0u32, |sum, row| sum.saturating_add(row.connections))
    }

    /// In-person plus remote, saturating at `u32::MAX`
    pub fn total(&self) -> u32 {
        self.presencial.saturating_add(self.zoom_total())
    }

    /// In-person plus remote, `None` if it does not fit in a `u32`
    pub fn checked_total(&self) -> Option<u32> {
        self.rows
            .iter()
            .try_fold(self.presencial, |sum, row| sum.checked_add(row.connections))
    }

    /// Summary record for the store.
    ///
    /// Fails with [`AttendanceError::TotalOverflow`] when the total cannot be
    /// represented.
    pub fn to_meeting(&self) -> Result<Meeting> {
        let total = self
            .checked_total()
            .ok_or_else(|| AttendanceError::TotalOverflow(self.date.clone()))?;
        Ok(Meeting::new(self.date.clone(), self.presencial, total))
    }
}

/// A day as read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRecord {
    /// Meeting summary, if one was saved
    pub meeting: Option<Meeting>,
    /// Remote attendees in entry order (ascending id)
    pub entries: Vec<ZoomEntry>,
}

impl DayRecord {
    /// Nothing recorded for the day
    pub fn is_empty(&self) -> bool {
        self.meeting.is_none() && self.entries.is_empty()
    }

    /// Rebuild an editable sheet; a missing meeting counts as zero in person
    pub fn to_sheet(&self, date: &str) -> Result<DaySheet> {
        let presencial = self.meeting.as_ref().map_or(0, |m| m.presencial);
        let mut sheet = DaySheet::new(date, presencial)?;
        for entry in &self.entries {
            sheet.add_row(&entry.name, entry.connections);
        }
        Ok(sheet)
    }
}

//! Attendance logic for Attendance Master
//!
//! This crate sits on top of the record store and implements the daily
//! workflow: saving a day's sheet, loading it back, importing a name roster,
//! suggesting names, attendance evolution, and backup files.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod day;
pub mod error;
pub mod logging;
pub mod roster;
pub mod service;
pub mod stats;

pub use day::{DayRecord, DaySheet};
pub use error::{AttendanceError, Result};
pub use roster::{parse_roster, NameSuggester, MAX_SUGGESTIONS};
pub use service::{AttendanceService, ServiceConfig};
pub use stats::{Evolution, EvolutionPoint};

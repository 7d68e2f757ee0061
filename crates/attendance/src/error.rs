//! Error types for attendance operations

use std::time::Duration;
use storage::StoreError;
use thiserror::Error;

/// Errors that can occur in the attendance workflow
#[derive(Debug, Error)]
pub enum AttendanceError {
    /// Record store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Date not in `YYYY-MM-DD` form
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Roster text had no names in it
    #[error("Roster contains no names")]
    EmptyRoster,

    /// A day's total does not fit in the meeting record
    #[error("Attendance total for {0} is too large")]
    TotalOverflow(String),

    /// Operation exceeded the configured timeout
    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),
}

impl AttendanceError {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AttendanceError::Store(e) => e.is_retryable(),
            AttendanceError::TimedOut(_) => true,
            AttendanceError::InvalidDate(_)
            | AttendanceError::EmptyRoster
            | AttendanceError::TotalOverflow(_) => false,
        }
    }
}

/// Result type for attendance operations
pub type Result<T> = std::result::Result<T, AttendanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AttendanceError::TimedOut(Duration::from_secs(1)).is_retryable());
        assert!(AttendanceError::from(StoreError::TransactionAborted("quota".into())).is_retryable());
        assert!(!AttendanceError::from(StoreError::Closed).is_retryable());
        assert!(!AttendanceError::EmptyRoster.is_retryable());
        assert!(!AttendanceError::InvalidDate("10/03/2024".into()).is_retryable());
        assert!(!AttendanceError::TotalOverflow("2024-03-10".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = AttendanceError::InvalidDate("tomorrow".into());
        assert_eq!(err.to_string(), "Invalid date: tomorrow");
    }
}

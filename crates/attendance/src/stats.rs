//! Attendance evolution over time

use serde::{Deserialize, Serialize};
use storage::Meeting;

/// One meeting on the evolution series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionPoint {
    /// Meeting day
    pub date: String,
    /// Total attendance
    pub total: u32,
    /// Remote-only attendance
    pub zoom_only: u32,
}

/// Attendance series sorted by date
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evolution {
    /// Points in date order
    pub points: Vec<EvolutionPoint>,
}

impl Evolution {
    /// Build the series from meeting summaries in any order
    pub fn from_meetings(meetings: impl IntoIterator<Item = Meeting>) -> Self {
        let mut points: Vec<EvolutionPoint> = meetings
            .into_iter()
            .map(|meeting| EvolutionPoint {
                zoom_only: meeting.remote(),
                total: meeting.total,
                date: meeting.date,
            })
            .collect();
        // ISO dates sort lexically
        points.sort_by(|a, b| a.date.cmp(&b.date));
        Self { points }
    }

    /// Highest total (the latest one on ties), `None` with no meetings
    pub fn max(&self) -> Option<&EvolutionPoint> {
        self.points.iter().max_by_key(|p| p.total)
    }

    /// Mean total, `None` with no meetings
    pub fn average(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let sum: u64 = self.points.iter().map(|p| u64::from(p.total)).sum();
        Some(sum as f64 / self.points.len() as f64)
    }

    /// Whether there is nothing to chart
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An optional inclusive date range. Both bounds open means "everything".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (Some(s), Some(e)) => write!(f, "{s} to {e}"),
            (Some(s), None) => write!(f, "{s} onward"),
            (None, Some(e)) => write!(f, "through {e}"),
            (None, None) => write!(f, "all dates"),
        }
    }
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        DateWindow { start, end }
    }

    pub fn unbounded() -> Self {
        DateWindow::default()
    }

    /// Inclusive on both ends; an open bound never excludes.
    pub fn contains(self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }

    /// A window is malformed when both bounds are set and reversed.
    pub fn is_valid(self) -> bool {
        match (self.start, self.end) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        }
    }
}

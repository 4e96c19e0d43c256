use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Debug;

/// A trait for events that can be published on the EventBus.
pub trait Event: Send + Sync + Debug + 'static {
    /// Returns a unique identifier for this event type.
    fn event_type(&self) -> &'static str;
}

/// How far a chunked operation has come.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Progress {
    /// Completed share, from 0.0 to 1.0.
    Fraction(f64),
    /// Work advanced but the total is unknown.
    Indeterminate,
}

impl Progress {
    pub fn fraction(done: u64, total: u64) -> Self {
        if total == 0 {
            return Progress::Fraction(1.0);
        }
        Progress::Fraction((done as f64 / total as f64).min(1.0))
    }

    pub fn as_fraction(&self) -> Option<f64> {
        match self {
            Progress::Fraction(f) => Some(*f),
            Progress::Indeterminate => None,
        }
    }
}

/// Emitted after each chunk copied into a staging table.
#[derive(Debug, Clone, Serialize)]
pub struct StagingProgress {
    pub alias: String,
    pub progress: Progress,
    pub rows: u64,
    pub timestamp: DateTime<Utc>,
}

impl Event for StagingProgress {
    fn event_type(&self) -> &'static str {
        "staging.progress"
    }
}

/// Emitted after each chunk of a join key index build.
#[derive(Debug, Clone, Serialize)]
pub struct IndexProgress {
    pub alias: String,
    pub field: String,
    pub progress: Progress,
    pub timestamp: DateTime<Utc>,
}

impl Event for IndexProgress {
    fn event_type(&self) -> &'static str {
        "index.progress"
    }
}

/// Emitted after each batch written by a join run.
#[derive(Debug, Clone, Serialize)]
pub struct JoinProgress {
    pub run_id: String,
    pub progress: Progress,
    pub rows_read: u64,
    pub rows_written: u64,
    pub elapsed_ms: u64,
    pub remaining_ms: Option<u64>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl Event for JoinProgress {
    fn event_type(&self) -> &'static str {
        "join.progress"
    }
}

/// Emitted once a join run stops, whatever the outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RunFinished {
    pub run_id: String,
    pub state: String,
    pub rows_written: u64,
    pub error_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl Event for RunFinished {
    fn event_type(&self) -> &'static str {
        "run.finished"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(Progress::fraction(250, 1000), Progress::Fraction(0.25));
        assert_eq!(Progress::fraction(5, 4), Progress::Fraction(1.0));
        assert_eq!(Progress::fraction(0, 0), Progress::Fraction(1.0));
        assert_eq!(Progress::Indeterminate.as_fraction(), None);
    }
}

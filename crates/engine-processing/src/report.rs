use serde::Serialize;
use std::{fmt, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    QueryBuilt,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::QueryBuilt => "QueryBuilt",
            RunState::Running => "Running",
            RunState::Completed => "Completed",
            RunState::Aborted => "Aborted",
            RunState::Failed => "Failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field that could not be computed for one output row. The row is still
/// written, with the field left empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// 1-based output row number.
    pub row: u64,
    /// Staging row id of the target row the output row came from.
    pub target_row: u64,
    pub field: String,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}, field '{}': {}", self.row, self.field, self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub state: RunState,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Fan-out rows dropped by restriction.
    pub rows_discarded: u64,
    /// The first row errors, up to the configured limit.
    pub row_errors: Vec<RowError>,
    /// All row errors, reported or not.
    pub error_count: u64,
    pub elapsed: Duration,
    /// Where the replaced output was moved, if it was.
    pub backup: Option<String>,
}

/// Bounded collection of row errors.
#[derive(Debug)]
pub(crate) struct ErrorLog {
    limit: usize,
    kept: Vec<RowError>,
    count: u64,
}

impl ErrorLog {
    pub(crate) fn new(limit: usize) -> Self {
        ErrorLog {
            limit,
            kept: Vec::new(),
            count: 0,
        }
    }

    pub(crate) fn push(&mut self, error: RowError) {
        self.count += 1;
        if self.kept.len() < self.limit {
            self.kept.push(error);
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn into_errors(self) -> Vec<RowError> {
        self.kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_keeps_the_first_errors_and_counts_all() {
        let mut log = ErrorLog::new(2);
        for row in 1..=5 {
            log.push(RowError {
                row,
                target_row: row - 1,
                field: "total".into(),
                message: "Division by zero".into(),
            });
        }
        assert_eq!(log.count(), 5);
        let kept = log.into_errors();
        assert_eq!(kept.iter().map(|e| e.row).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(kept[0].to_string(), "row 1, field 'total': Division by zero");
    }
}

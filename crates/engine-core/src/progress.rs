use chrono::{DateTime, Utc};
use model::events::Progress;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Snapshot of a running operation with a linear time estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub progress: Progress,
    pub done: u64,
    pub elapsed: Duration,
    pub remaining: Option<Duration>,
    pub total_time: Option<Duration>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started: Instant,
    started_at: DateTime<Utc>,
    total: Option<u64>,
}

impl ProgressTracker {
    pub fn start(total: Option<u64>) -> Self {
        ProgressTracker {
            started: Instant::now(),
            started_at: Utc::now(),
            total,
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn report(&self, done: u64) -> ProgressReport {
        self.report_at(done, self.elapsed())
    }

    /// Extrapolates from `elapsed / fraction`. Nothing is estimated while
    /// the total is unknown or nothing has been done yet.
    pub fn report_at(&self, done: u64, elapsed: Duration) -> ProgressReport {
        let progress = match self.total {
            Some(total) => Progress::fraction(done, total),
            None => Progress::Indeterminate,
        };

        let total_time = progress
            .as_fraction()
            .filter(|f| *f > 0.0)
            .map(|f| elapsed.div_f64(f));
        let remaining = total_time.map(|t| t.saturating_sub(elapsed));
        let estimated_completion = remaining
            .and_then(|r| chrono::Duration::from_std(elapsed + r).ok())
            .map(|d| self.started_at + d);

        ProgressReport {
            progress,
            done,
            elapsed,
            remaining,
            total_time,
            estimated_completion,
        }
    }
}

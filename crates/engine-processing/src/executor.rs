use crate::{
    error::ExecutionError,
    query::JoinQuery,
    report::{ErrorLog, RunSummary},
    row::RowEvaluator,
};
use connectors::table::TableSink;
use engine_config::EngineSettings;
use engine_core::{
    event_bus::EventBus,
    join_graph::JoinGraph,
    metrics::Metrics,
    progress::{ProgressReport, ProgressTracker},
    schema::OutputSchema,
    staging::StagingStore,
};
use model::{
    core::identifiers::RunId,
    events::{JoinProgress, RunFinished},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use crate::report::RunState;

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub batch_size: usize,
    /// Collapse fan-out to one output row per target row.
    pub restrict: bool,
    /// The output replaces the target's own file; back it up first.
    pub replace_target: bool,
    pub max_reported_row_errors: usize,
    /// Stop after this many output rows.
    pub limit: Option<u64>,
}

impl ExecuteOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        ExecuteOptions {
            batch_size: settings.execute_batch_size(),
            restrict: false,
            replace_target: false,
            max_reported_row_errors: settings.max_reported_row_errors(),
            limit: None,
        }
    }

    pub fn restricted(mut self, restrict: bool) -> Self {
        self.restrict = restrict;
        self
    }

    pub fn replacing_target(mut self, replace: bool) -> Self {
        self.replace_target = replace;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

/// One join run: `Idle → QueryBuilt → Running → Completed | Aborted | Failed`.
pub struct JoinExecutor {
    run_id: RunId,
    state: RunState,
    options: ExecuteOptions,
    query: Option<Arc<JoinQuery>>,
    events: Option<EventBus>,
    metrics: Metrics,
}

struct RunCounters {
    rows_read: u64,
    rows_written: u64,
    batches: u64,
}

impl JoinExecutor {
    pub fn new(options: ExecuteOptions) -> Self {
        JoinExecutor {
            run_id: RunId::generate(),
            state: RunState::Idle,
            options,
            query: None,
            events: None,
            metrics: Metrics::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn query(&self) -> Option<&JoinQuery> {
        self.query.as_deref()
    }

    pub fn build_query(
        &mut self,
        graph: &JoinGraph,
        schema: &OutputSchema,
        store: &StagingStore,
    ) -> Result<&JoinQuery, ExecutionError> {
        self.expect_state(RunState::Idle, "build the query")?;
        let query = JoinQuery::build(graph, schema, store, self.options.batch_size)?;
        self.state = RunState::QueryBuilt;
        Ok(self.query.insert(Arc::new(query)))
    }

    /// Streams the join into `sink` and closes it, whatever the outcome.
    ///
    /// A sink refusing to replace an existing table leaves the run in
    /// `QueryBuilt`, so it can be retried against a sink opened with
    /// overwrite. Cancellation is checked between batches and ends the run
    /// as `Aborted` with the rows written so far kept.
    pub async fn run(
        &mut self,
        sink: &mut dyn TableSink,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, ExecutionError> {
        self.expect_state(RunState::QueryBuilt, "run")?;
        let query = self
            .query
            .clone()
            .ok_or(ExecutionError::InvalidState {
                state: self.state.to_string(),
                action: "run",
            })?;

        let backup = if self.options.replace_target {
            let backup = sink.backup()?;
            if let Some(path) = &backup {
                info!(output = sink.name(), backup = %path, "Backed up replaced output");
            }
            backup
        } else {
            None
        };
        sink.set_fields(&query.output_fields())?;

        self.state = RunState::Running;
        info!(run_id = %self.run_id, output = sink.name(), restrict = self.options.restrict, "Join run started");

        let mut errors = ErrorLog::new(self.options.max_reported_row_errors);
        let mut counters = RunCounters {
            rows_read: 0,
            rows_written: 0,
            batches: 0,
        };
        let started = std::time::Instant::now();

        let outcome = self
            .stream(&query, sink, cancel, &mut errors, &mut counters)
            .await;
        let closed = sink.close();

        let (state, cursor_discarded) = match (outcome, closed) {
            (Ok((state, discarded)), Ok(())) => (state, discarded),
            (Err(e), _) => return Err(self.fail(e, &counters, &errors).await),
            (Ok(_), Err(e)) => return Err(self.fail(e.into(), &counters, &errors).await),
        };
        self.state = state;

        let summary = RunSummary {
            run_id: self.run_id.to_string(),
            state,
            rows_read: counters.rows_read,
            rows_written: counters.rows_written,
            rows_discarded: cursor_discarded,
            error_count: errors.count(),
            row_errors: errors.into_errors(),
            elapsed: started.elapsed(),
            backup,
        };

        info!(
            run_id = %self.run_id,
            state = %summary.state,
            rows = summary.rows_written,
            errors = summary.error_count,
            elapsed_ms = summary.elapsed.as_millis(),
            "Join run finished"
        );
        self.publish_finished(summary.rows_written, summary.error_count)
            .await;
        Ok(summary)
    }

    async fn stream(
        &mut self,
        query: &Arc<JoinQuery>,
        sink: &mut dyn TableSink,
        cancel: &CancellationToken,
        errors: &mut ErrorLog,
        counters: &mut RunCounters,
    ) -> Result<(RunState, u64), ExecutionError> {
        let (mut cursor, total) = query.cursor(self.options.restrict)?;
        let tracker = ProgressTracker::start(total);
        let mut evaluator = RowEvaluator::new(query.clone(), sink.name());
        let batch_size = self.options.batch_size.max(1);

        loop {
            if cancel.is_cancelled() {
                warn!(run_id = %self.run_id, rows = counters.rows_written, "Join run aborted");
                return Ok((RunState::Aborted, cursor.discarded()));
            }

            let mut batch_rows = 0;
            while batch_rows < batch_size && !self.limit_reached(counters) {
                let Some(row) = cursor.next() else { break };
                let row = row?;
                counters.rows_read += 1;
                batch_rows += 1;

                let evaluated = evaluator.evaluate(&row, counters.rows_written + 1);
                sink.add_record(&evaluated.record)?;
                counters.rows_written += 1;

                self.metrics.increment_row_errors(evaluated.errors.len() as u64);
                for error in evaluated.errors {
                    errors.push(error);
                }
            }

            if batch_rows == 0 {
                return Ok((RunState::Completed, cursor.discarded()));
            }

            counters.batches += 1;
            self.metrics.increment_batches(1);
            self.metrics.increment_read(batch_rows as u64);
            self.metrics.increment_written(batch_rows as u64);

            let report = tracker.report(cursor.consumed());
            debug!(
                run_id = %self.run_id,
                batch_id = %batch_id(&self.run_id, counters.batches),
                rows = batch_rows,
                progress = ?report.progress,
                "Batch written"
            );
            self.publish_progress(&report, counters).await;

            if self.limit_reached(counters) {
                return Ok((RunState::Completed, cursor.discarded()));
            }
            tokio::task::yield_now().await;
        }
    }

    fn limit_reached(&self, counters: &RunCounters) -> bool {
        self.options
            .limit
            .is_some_and(|limit| counters.rows_written >= limit)
    }

    async fn fail(
        &mut self,
        err: ExecutionError,
        counters: &RunCounters,
        errors: &ErrorLog,
    ) -> ExecutionError {
        self.state = RunState::Failed;
        tracing::error!(run_id = %self.run_id, error = %err, rows = counters.rows_written, "Join run failed");
        self.publish_finished(counters.rows_written, errors.count())
            .await;
        err
    }

    async fn publish_progress(&self, report: &ProgressReport, counters: &RunCounters) {
        let Some(events) = &self.events else { return };
        events
            .publish(JoinProgress {
                run_id: self.run_id.to_string(),
                progress: report.progress,
                rows_read: counters.rows_read,
                rows_written: counters.rows_written,
                elapsed_ms: report.elapsed.as_millis() as u64,
                remaining_ms: report.remaining.map(|r| r.as_millis() as u64),
                estimated_completion: report.estimated_completion,
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    async fn publish_finished(&self, rows_written: u64, error_count: u64) {
        let Some(events) = &self.events else { return };
        events
            .publish(RunFinished {
                run_id: self.run_id.to_string(),
                state: self.state.to_string(),
                rows_written,
                error_count,
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    fn expect_state(&self, expected: RunState, action: &'static str) -> Result<(), ExecutionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ExecutionError::InvalidState {
                state: self.state.to_string(),
                action,
            })
        }
    }
}

fn batch_id(run_id: &RunId, batch_no: u64) -> String {
    let mut h = blake3::Hasher::new();
    h.update(run_id.as_str().as_bytes());
    h.update(&batch_no.to_be_bytes());
    h.finalize().to_hex()[..16].to_string()
}

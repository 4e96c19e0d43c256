use crate::error::EngineError;
use connectors::memory::MemorySink;
use engine_core::{join_graph::JoinGraph, schema::OutputSchema, staging::StagingStore};
use engine_processing::{ExecuteOptions, JoinExecutor};
use model::{core::field::Field, records::row::RowData};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// First output rows, for previews.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub fields: Vec<Field>,
    pub rows: Vec<RowData>,
    pub row_errors: u64,
}

/// Runs the join for at most `options.limit` rows into memory, with fan-out
/// restricted so the preview shows one row per target row.
pub async fn compute_sample(
    graph: &JoinGraph,
    schema: &OutputSchema,
    store: &StagingStore,
    options: ExecuteOptions,
    cancel: &CancellationToken,
) -> Result<Sample, EngineError> {
    let mut executor = JoinExecutor::new(options.restricted(true));
    executor.build_query(graph, schema, store)?;

    let mut sink = MemorySink::new("sample");
    let output = sink.output();
    let summary = executor.run(&mut sink, cancel).await?;

    debug!(rows = summary.rows_written, errors = summary.error_count, "Sample refreshed");
    Ok(Sample {
        fields: output.fields(),
        rows: output.rows(),
        row_errors: summary.error_count,
    })
}

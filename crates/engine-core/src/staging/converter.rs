use super::{StagedRow, StagingStore, StagingTable};
use crate::error::StagingError;
use connectors::{
    error::AdapterError,
    table::{RecordIter, TableSource},
};
use model::{
    core::{field::Field, identifiers::Alias, value::Value},
    events::Progress,
};
use std::iter::Peekable;
use tracing::{debug, info, warn};

/// Copies an input table into its staging table one chunk per `next()`.
///
/// Each item is the progress after a chunk: a fraction when the source knows
/// its record count, [`Progress::Indeterminate`] otherwise. The last item is
/// always `Fraction(1.0)`, after which the table is marked complete. Any
/// error ends the sequence and removes the partially staged table.
pub struct StagingConverter {
    store: StagingStore,
    table: StagingTable,
    records: Peekable<RecordIter>,
    total: Option<u64>,
    chunk_size: usize,
    indeterminate_every: usize,
    staged: u64,
    finished: bool,
}

impl StagingConverter {
    pub fn new(
        store: &StagingStore,
        alias: &Alias,
        source: &mut dyn TableSource,
        chunk_size: usize,
    ) -> Result<Self, StagingError> {
        let fields: Vec<Field> = source
            .fields()
            .iter()
            .map(|f| Field::input(alias.as_str(), &f.name, f.attributes.clone()))
            .collect();
        let total = source
            .record_count()
            .map_err(|e| staging_error(alias, e))?;
        let records = source.records().map_err(|e| staging_error(alias, e))?;
        let table = store.create_table(alias, &fields)?;

        info!(alias = %alias, source = source.name(), total = ?total, "Staging started");

        Ok(StagingConverter {
            store: store.clone(),
            table,
            records: records.peekable(),
            total,
            chunk_size: chunk_size.max(1),
            indeterminate_every: 1,
            staged: 0,
            finished: false,
        })
    }

    /// Number of chunks staged between two signals when the total is
    /// unknown.
    pub fn with_indeterminate_every(mut self, chunks: usize) -> Self {
        self.indeterminate_every = chunks.max(1);
        self
    }

    pub fn alias(&self) -> &Alias {
        &self.table.alias
    }

    pub fn rows_staged(&self) -> u64 {
        self.staged
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Drives the conversion to the end, discarding progress. Returns the
    /// number of rows staged.
    pub fn run(mut self) -> Result<u64, StagingError> {
        while let Some(progress) = self.next() {
            progress?;
        }
        debug!(alias = %self.table.alias, rows = self.staged, "Staging drained");
        Ok(self.staged)
    }

    fn stage_chunk(&mut self) -> Result<bool, StagingError> {
        let width = self.table.columns.len();
        let mut rows: Vec<StagedRow> = Vec::with_capacity(self.chunk_size);

        while rows.len() < self.chunk_size {
            match self.records.next() {
                Some(Ok(record)) => rows.push(self.coerce(record, width)),
                Some(Err(e)) => return Err(staging_error(&self.table.alias, e)),
                None => break,
            }
        }

        self.store.insert_rows(&self.table.alias, self.staged, &rows)?;
        self.staged += rows.len() as u64;

        Ok(self.records.peek().is_none())
    }

    fn coerce(&self, mut record: Vec<Value>, width: usize) -> StagedRow {
        record.resize(width, Value::Null);
        record
            .into_iter()
            .zip(&self.table.columns)
            .map(|(value, col)| col.field.data_type().coerce(value))
            .collect()
    }

    fn complete(&mut self) -> Result<(), StagingError> {
        self.table.row_count = self.staged;
        self.table.complete = true;
        self.store.save_table(&self.table)?;
        info!(alias = %self.table.alias, rows = self.staged, "Staging finished");
        Ok(())
    }

    fn step(&mut self) -> Result<Progress, StagingError> {
        let chunks = if self.total.is_some() {
            1
        } else {
            self.indeterminate_every
        };

        for _ in 0..chunks {
            if self.stage_chunk()? {
                self.complete()?;
                self.finished = true;
                return Ok(Progress::Fraction(1.0));
            }
        }

        Ok(match self.total {
            Some(total) => Progress::fraction(self.staged, total),
            None => Progress::Indeterminate,
        })
    }

    fn abort(&mut self, err: &StagingError) {
        let alias = self.table.alias.clone();
        match err {
            StagingError::FileClosed(_) => {
                warn!(alias = %alias, rows = self.staged, "Source closed during staging")
            }
            other => warn!(alias = %alias, error = %other, "Staging failed"),
        }
        if let Err(e) = self.store.drop_table(&alias) {
            warn!(alias = %alias, error = %e, "Failed to drop partial staging table");
        }
    }
}

impl Iterator for StagingConverter {
    type Item = Result<Progress, StagingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.step() {
            Ok(progress) => Some(Ok(progress)),
            Err(e) => {
                self.finished = true;
                self.abort(&e);
                Some(Err(e))
            }
        }
    }
}

fn staging_error(alias: &Alias, err: AdapterError) -> StagingError {
    if err.is_file_closed() {
        StagingError::FileClosed(alias.to_string())
    } else {
        StagingError::Adapter(err)
    }
}

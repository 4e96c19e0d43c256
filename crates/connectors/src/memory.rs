//! In-memory tables, used for previews and for driving the engine without
//! touching the filesystem.

use crate::{
    error::AdapterError,
    table::{CloseHandle, Record, RecordIter, TableSink, TableSource, guard_records},
};
use model::{core::field::Field, records::row::RowData};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct MemoryTable {
    name: String,
    fields: Vec<Field>,
    rows: Option<Vec<Record>>,
    count: Option<u64>,
    handle: CloseHandle,
}

impl MemoryTable {
    pub fn new(name: &str, fields: Vec<Field>, rows: Vec<Record>) -> Self {
        let count = Some(rows.len() as u64);
        MemoryTable {
            name: name.to_string(),
            fields,
            rows: Some(rows),
            count,
            handle: CloseHandle::new(),
        }
    }

    /// Same table, but its record count is reported as unknown.
    pub fn without_count(mut self) -> Self {
        self.count = None;
        self
    }
}

impl TableSource for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn record_count(&mut self) -> Result<Option<u64>, AdapterError> {
        if self.handle.is_closed() {
            return Err(AdapterError::FileClosed(self.name.clone()));
        }
        Ok(self.count)
    }

    fn records(&mut self) -> Result<RecordIter, AdapterError> {
        if self.handle.is_closed() {
            return Err(AdapterError::FileClosed(self.name.clone()));
        }
        let rows = self
            .rows
            .take()
            .ok_or_else(|| AdapterError::Exhausted(self.name.clone()))?;
        Ok(guard_records(
            &self.name,
            rows.into_iter().map(Ok),
            self.handle.clone(),
        ))
    }

    fn close_handle(&self) -> CloseHandle {
        self.handle.clone()
    }
}

#[derive(Debug, Default)]
struct OutputState {
    fields: Vec<Field>,
    rows: Vec<RowData>,
    closed: bool,
}

/// Shared view of what a [`MemorySink`] received; stays readable after the
/// sink itself has been handed to a writer and dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput(Arc<Mutex<OutputState>>);

impl MemoryOutput {
    fn lock(&self) -> MutexGuard<'_, OutputState> {
        // A poisoned buffer still holds every row written before the panic.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fields(&self) -> Vec<Field> {
        self.lock().fields.clone()
    }

    pub fn rows(&self) -> Vec<RowData> {
        self.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

pub struct MemorySink {
    name: String,
    output: MemoryOutput,
    existing: bool,
    overwrite: bool,
    field_name_limit: Option<usize>,
}

impl MemorySink {
    pub fn new(name: &str) -> Self {
        MemorySink {
            name: name.to_string(),
            output: MemoryOutput::default(),
            existing: false,
            overwrite: true,
            field_name_limit: None,
        }
    }

    /// Pretends a table of this name already exists, so declaring fields
    /// needs `overwrite`.
    pub fn existing(mut self, overwrite: bool) -> Self {
        self.existing = true;
        self.overwrite = overwrite;
        self
    }

    pub fn with_field_name_limit(mut self, limit: usize) -> Self {
        self.field_name_limit = Some(limit);
        self
    }

    pub fn output(&self) -> MemoryOutput {
        self.output.clone()
    }
}

impl TableSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        self.existing
    }

    fn field_name_limit(&self) -> Option<usize> {
        self.field_name_limit
    }

    fn backup(&mut self) -> Result<Option<String>, AdapterError> {
        if !self.existing {
            return Ok(None);
        }
        self.existing = false;
        Ok(Some(format!("{}.bak", self.name)))
    }

    fn set_fields(&mut self, fields: &[Field]) -> Result<(), AdapterError> {
        if self.existing && !self.overwrite {
            return Err(AdapterError::TableExists(self.name.clone()));
        }
        let mut state = self.output.lock();
        if state.closed {
            return Err(AdapterError::FileClosed(self.name.clone()));
        }
        state.fields = fields.to_vec();
        state.rows.clear();
        Ok(())
    }

    fn add_record(&mut self, record: &RowData) -> Result<(), AdapterError> {
        let mut state = self.output.lock();
        if state.closed {
            return Err(AdapterError::FileClosed(self.name.clone()));
        }
        state.rows.push(record.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), AdapterError> {
        self.output.lock().closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.output.is_closed()
    }
}

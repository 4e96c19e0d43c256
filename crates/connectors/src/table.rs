//! Contract every table format implements.
//!
//! A table is opened either for reading ([`TableSource`]) or for writing
//! ([`TableSink`]). Read handles hand out their records once, as a lazy
//! sequence; write handles take their field list first, then records.

use crate::error::AdapterError;
use model::{
    core::{field::Field, value::Value},
    records::row::RowData,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Values of one record, positionally matching the source's fields.
pub type Record = Vec<Value>;

pub type RecordIter = Box<dyn Iterator<Item = Result<Record, AdapterError>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write { overwrite: bool },
}

/// Shared closed flag of a read handle.
///
/// Cloned out of the handle so the table can be closed while a record
/// sequence borrowed from it is still being consumed elsewhere.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait TableSource: Send {
    fn name(&self) -> &str;

    /// Ordered input columns.
    fn fields(&self) -> &[Field];

    /// Total number of records, when it can be determined.
    fn record_count(&mut self) -> Result<Option<u64>, AdapterError>;

    /// Lazy, finite record sequence. A second call fails with
    /// [`AdapterError::Exhausted`].
    fn records(&mut self) -> Result<RecordIter, AdapterError>;

    /// Default scalar matching the field's declared type.
    fn blank_value(&self, field: &Field) -> Value {
        field.blank_value()
    }

    fn close_handle(&self) -> CloseHandle;

    fn close(&mut self) {
        self.close_handle().close();
    }

    fn is_closed(&self) -> bool {
        self.close_handle().is_closed()
    }
}

pub trait TableSink: Send {
    fn name(&self) -> &str;

    /// Whether the destination's stored form already exists.
    fn exists(&self) -> bool;

    /// Longest field name the format can store, if limited.
    fn field_name_limit(&self) -> Option<usize> {
        None
    }

    /// Moves the existing stored form aside. Returns where it went, or
    /// `None` when there was nothing to back up.
    fn backup(&mut self) -> Result<Option<String>, AdapterError>;

    /// Declares the output columns. Fails with [`AdapterError::TableExists`]
    /// when the destination exists and the handle was not opened with
    /// overwrite.
    fn set_fields(&mut self, fields: &[Field]) -> Result<(), AdapterError>;

    fn add_record(&mut self, record: &RowData) -> Result<(), AdapterError>;

    fn close(&mut self) -> Result<(), AdapterError>;

    fn is_closed(&self) -> bool;
}

/// Wraps a record sequence so it stops with [`AdapterError::FileClosed`]
/// as soon as the handle is closed.
pub fn guard_records<I>(name: &str, records: I, handle: CloseHandle) -> RecordIter
where
    I: Iterator<Item = Result<Record, AdapterError>> + Send + 'static,
{
    Box::new(GuardedRecords {
        name: name.to_string(),
        inner: records,
        handle,
        done: false,
    })
}

struct GuardedRecords<I> {
    name: String,
    inner: I,
    handle: CloseHandle,
    done: bool,
}

impl<I> Iterator for GuardedRecords<I>
where
    I: Iterator<Item = Result<Record, AdapterError>>,
{
    type Item = Result<Record, AdapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.handle.is_closed() {
            self.done = true;
            return Some(Err(AdapterError::FileClosed(self.name.clone())));
        }
        let next = self.inner.next();
        if next.is_none() {
            self.done = true;
        }
        next
    }
}

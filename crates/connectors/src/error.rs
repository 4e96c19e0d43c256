use crate::file::csv::error::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// No adapter recognises the file extension or content.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A multi-table container was opened without naming a table.
    #[error("'{path}' contains several tables; select one of: {}", tables.join(", "))]
    NeedsTableSelection { path: String, tables: Vec<String> },

    #[error("Table '{table}' not found in '{path}'")]
    TableNotFound { path: String, table: String },

    /// The destination already exists; retry with overwrite to replace it.
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// The handle was closed while records were being read.
    #[error("File closed: {0}")]
    FileClosed(String),

    /// Records of a read handle can only be iterated once.
    #[error("Records of '{0}' were already consumed")]
    Exhausted(String),

    #[error("Operation not allowed in this mode: {0}")]
    InvalidMode(String),

    /// File-related error.
    #[error("File error: {0}")]
    File(#[from] FileError),
}

impl AdapterError {
    pub fn is_file_closed(&self) -> bool {
        matches!(self, AdapterError::FileClosed(_))
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::File(FileError::IoError(err))
    }
}

impl From<csv::Error> for AdapterError {
    fn from(err: csv::Error) -> Self {
        AdapterError::File(FileError::CsvError(err))
    }
}

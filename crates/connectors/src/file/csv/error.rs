use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    /// The path does not name an existing file.
    #[error("No such file: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Malformed delimited text; the message carries the record position.
    #[error("Malformed delimited text: {0}")]
    CsvError(#[from] csv::Error),
}

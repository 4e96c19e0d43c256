use connectors::error::AdapterError;
use engine_core::error::StagingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No target table selected")]
    NoTarget,

    /// An alias in the join tree has no complete staging table yet.
    #[error("'{0}' is not staged yet")]
    MissingStaging(String),

    /// The destination already exists; retry with overwrite to replace it.
    #[error("Output '{0}' already exists")]
    TableExists(String),

    #[error("Adapter error: {0}")]
    Adapter(AdapterError),

    #[error("Staging error: {0}")]
    Staging(StagingError),

    #[error("Cannot {action} while the run is {state}")]
    InvalidState { state: String, action: &'static str },
}

impl ExecutionError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ExecutionError::MissingStaging(_))
    }
}

impl From<AdapterError> for ExecutionError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::TableExists(name) => ExecutionError::TableExists(name),
            other => ExecutionError::Adapter(other),
        }
    }
}

impl From<StagingError> for ExecutionError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::MissingTable(alias) => ExecutionError::MissingStaging(alias),
            other => ExecutionError::Staging(other),
        }
    }
}

use connectors::error::AdapterError;
use engine_config::ConfigError;
use engine_core::error::{JoinConfigError, SchemaError, StagingError};
use engine_processing::ExecutionError;
use thiserror::Error;

/// Top-level errors of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    #[error("'{alias}' has no field '{field}'")]
    UnknownField { alias: String, field: String },

    /// No output was configured before a join was requested.
    #[error("No output configured")]
    NoOutput,

    #[error("Cancelled")]
    Cancelled,

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Join configuration error: {0}")]
    JoinConfig(#[from] JoinConfigError),

    #[error("Output schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Whether the failure clears up once pending staging work has run.
    pub fn is_not_ready(&self) -> bool {
        match self {
            EngineError::Staging(e) => e.is_not_ready(),
            EngineError::Execution(e) => e.is_not_ready(),
            _ => false,
        }
    }

    pub fn is_file_closed(&self) -> bool {
        match self {
            EngineError::Staging(StagingError::FileClosed(_)) => true,
            EngineError::Staging(StagingError::Adapter(e)) | EngineError::Adapter(e) => {
                e.is_file_closed()
            }
            _ => false,
        }
    }
}

/// Outcome of a queued task that did not complete.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A staging table the task reads is not there yet; run it later.
    #[error("Waiting on staging: {0}")]
    NotReady(String),

    #[error("Input closed: {0}")]
    FileClosed(String),

    #[error(transparent)]
    Engine(EngineError),
}

impl TaskError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, TaskError::NotReady(_))
    }
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        if err.is_not_ready() {
            TaskError::NotReady(err.to_string())
        } else if err.is_file_closed() {
            TaskError::FileClosed(err.to_string())
        } else {
            TaskError::Engine(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_errors_are_classified() {
        let missing: EngineError = StagingError::MissingTable("b".into()).into();
        assert!(TaskError::from(missing).is_not_ready());

        let closed: EngineError = StagingError::FileClosed("b".into()).into();
        assert!(matches!(TaskError::from(closed), TaskError::FileClosed(_)));

        let not_staged: EngineError = ExecutionError::MissingStaging("b".into()).into();
        assert!(TaskError::from(not_staged).is_not_ready());

        assert!(matches!(
            TaskError::from(EngineError::NoOutput),
            TaskError::Engine(EngineError::NoOutput)
        ));
    }
}

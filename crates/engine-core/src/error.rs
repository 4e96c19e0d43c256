use connectors::error::AdapterError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagingError {
    /// The input was closed while its records were being staged.
    #[error("File closed while staging '{0}'")]
    FileClosed(String),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Staging store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to encode staged data: {0}")]
    Codec(#[from] bincode::Error),

    /// No complete staging table exists for the alias yet.
    #[error("No staging table for '{0}'")]
    MissingTable(String),

    #[error("Field '{field}' is not staged for '{alias}'")]
    UnknownField { alias: String, field: String },
}

impl StagingError {
    /// Whether the failure clears up once pending work has run.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, StagingError::MissingTable(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinConfigError {
    #[error("Alias '{0}' is already part of the join tree; reopen the source under a new alias")]
    AliasInUse(String),

    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    #[error("'{0}' is not part of the join tree")]
    ParentNotInTree(String),

    #[error("'{0}' cannot be joined to itself")]
    SelfJoin(String),

    #[error("No target table selected")]
    NoTarget,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Field index {index} out of range (schema has {len} fields)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Field names cannot be empty")]
    EmptyName,

    #[error("Field name length limit must be at least 1")]
    ZeroNameLimit,
}

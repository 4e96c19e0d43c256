use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown column type: {0}")]
    UnknownType(String),

    #[error("Cannot convert '{value}' to {target}")]
    Conversion { value: String, target: String },
}

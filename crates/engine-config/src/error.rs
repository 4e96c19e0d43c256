use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Failed to access options file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed options document: {0}")]
    Json(#[from] serde_json::Error),

    /// The options document is valid JSON but not an object.
    #[error("Options document must be a JSON object")]
    NotAnObject,

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

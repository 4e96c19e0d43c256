use connectors::error::AdapterError;
use engine_config::ConfigError;
use engine_runtime::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read the job file: {0}")]
    JobFileRead(#[from] std::io::Error),

    #[error("Failed to parse the job file: {0}")]
    JobParse(#[from] serde_json::Error),

    #[error("Invalid job: {0}")]
    Job(String),

    #[error("Failed to run the job: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to open the table: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Options error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(serde_json::Error),

    #[error("Queued work failed: {0}")]
    Tasks(String),

    #[error("Output '{0}' already exists; rerun with --overwrite to replace it")]
    OutputExists(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

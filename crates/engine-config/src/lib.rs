pub mod error;
pub mod options;
pub mod settings;

pub use error::ConfigError;
pub use options::Options;
pub use settings::{EngineSettings, EngineSettingsBuilder};

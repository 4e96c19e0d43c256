pub mod error;
pub mod metadata;
pub mod settings;
pub mod sink;
pub mod source;
pub mod types;

//! Persisted user options: a flat JSON object read at startup and written
//! back whole on save.

use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub const DEFAULT_OUTPUT_DIR: &str = "default_output_dir";
pub const FIELD_LENGTH_PADDING: &str = "field_length_padding";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    values: Map<String, Value>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config dir>/fieldjoin/options.json`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("fieldjoin").join("options.json"))
    }

    /// Reads the document at `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No options file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&text)? {
            Value::Object(values) => Ok(Options { values }),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.values)?;
        fs::write(path, text)?;
        info!(path = %path.display(), "Saved options");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Stores text typed by a user. Known keys are validated; other keys
    /// keep the JSON literal the text spells, or the text itself.
    pub fn set_from_text(&mut self, key: &str, text: &str) -> Result<(), ConfigError> {
        let value = match key {
            FIELD_LENGTH_PADDING => {
                let padding: u64 = text.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("expected a non-negative integer, got '{text}'"),
                })?;
                Value::from(padding)
            }
            DEFAULT_OUTPUT_DIR => Value::String(text.to_string()),
            _ => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        };
        self.set(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn default_output_dir(&self) -> Option<PathBuf> {
        self.values
            .get(DEFAULT_OUTPUT_DIR)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// Extra width added to autodetected text field lengths.
    pub fn field_length_padding(&self) -> usize {
        self.values
            .get(FIELD_LENGTH_PADDING)
            .and_then(Value::as_u64)
            .and_then(|p| usize::try_from(p).ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options::load(&dir.path().join("options.json")).unwrap();
        assert_eq!(options.field_length_padding(), 0);
        assert!(options.default_output_dir().is_none());
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("options.json");

        let mut options = Options::new();
        options.set_from_text(FIELD_LENGTH_PADDING, "4").unwrap();
        options.set_from_text(DEFAULT_OUTPUT_DIR, "/data/out").unwrap();
        options.set("window_state", json!({ "width": 800 }));
        options.save(&path).unwrap();

        let loaded = Options::load(&path).unwrap();
        assert_eq!(loaded, options);
        assert_eq!(loaded.field_length_padding(), 4);
        assert_eq!(loaded.default_output_dir(), Some(PathBuf::from("/data/out")));
        assert_eq!(loaded.get("window_state"), Some(&json!({ "width": 800 })));
    }

    #[test]
    fn rejects_bad_known_values() {
        let mut options = Options::new();
        assert!(matches!(
            options.set_from_text(FIELD_LENGTH_PADDING, "-1"),
            Err(ConfigError::InvalidValue { .. })
        ));
        options.set_from_text("recent", "[1, 2]").unwrap();
        assert_eq!(options.get("recent"), Some(&json!([1, 2])));
        options.set_from_text("label", "plain text").unwrap();
        assert_eq!(options.get("label"), Some(&json!("plain text")));
    }

    #[test]
    fn non_object_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(Options::load(&path), Err(ConfigError::NotAnObject)));
    }
}

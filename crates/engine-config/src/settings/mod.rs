use serde::{Deserialize, Serialize};

pub const MIN_CHUNK_SIZE: usize = 250;
pub const MAX_CHUNK_SIZE: usize = 1000;

/// Tuning of the chunked operations. Chunk sizes always fall within
/// [`MIN_CHUNK_SIZE`]..=[`MAX_CHUNK_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSettings {
    staging_chunk_size: usize,
    execute_batch_size: usize,
    sample_size: usize,
    max_reported_row_errors: usize,
    indeterminate_every: usize,
}

/// Optional overrides, as read from a job file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettingsBuilder {
    pub staging_chunk_size: Option<usize>,
    pub execute_batch_size: Option<usize>,
    pub sample_size: Option<usize>,
    pub max_reported_row_errors: Option<usize>,
    pub indeterminate_every: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_builder(EngineSettingsBuilder::default())
    }
}

impl EngineSettings {
    pub fn from_builder(builder: EngineSettingsBuilder) -> Self {
        Self {
            staging_chunk_size: clamp_chunk(builder.staging_chunk_size.unwrap_or(500)),
            execute_batch_size: clamp_chunk(builder.execute_batch_size.unwrap_or(500)),
            sample_size: builder.sample_size.unwrap_or(25).max(1),
            max_reported_row_errors: builder.max_reported_row_errors.unwrap_or(100),
            indeterminate_every: builder.indeterminate_every.unwrap_or(1).max(1),
        }
    }

    pub fn staging_chunk_size(&self) -> usize {
        self.staging_chunk_size
    }

    pub fn execute_batch_size(&self) -> usize {
        self.execute_batch_size
    }

    /// Rows computed for a preview.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Row errors kept in a run summary; later ones are only counted.
    pub fn max_reported_row_errors(&self) -> usize {
        self.max_reported_row_errors
    }

    /// Chunks staged per signal when a source cannot count its records.
    pub fn indeterminate_every(&self) -> usize {
        self.indeterminate_every
    }
}

fn clamp_chunk(size: usize) -> usize {
    size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.staging_chunk_size(), 500);
        assert_eq!(settings.execute_batch_size(), 500);
        assert_eq!(settings.sample_size(), 25);
        assert_eq!(settings.max_reported_row_errors(), 100);
        assert_eq!(settings.indeterminate_every(), 1);
    }

    #[test]
    fn chunk_sizes_are_clamped() {
        let builder: EngineSettingsBuilder =
            serde_json::from_str(r#"{ "staging_chunk_size": 10, "execute_batch_size": 5000 }"#)
                .unwrap();
        let settings = EngineSettings::from_builder(builder);
        assert_eq!(settings.staging_chunk_size(), MIN_CHUNK_SIZE);
        assert_eq!(settings.execute_batch_size(), MAX_CHUNK_SIZE);
    }

    #[test]
    fn unknown_settings_are_rejected() {
        assert!(serde_json::from_str::<EngineSettingsBuilder>(r#"{ "chunk": 1 }"#).is_err());
    }
}

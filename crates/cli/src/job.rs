//! Job files: a JSON description of the inputs, join tree, output fields
//! and destination of one join run.

use crate::error::CliError;
use connectors::adapter::TableLocation;
use engine_config::{EngineSettings, EngineSettingsBuilder};
use engine_core::schema::OutputField;
use engine_runtime::{Engine, OutputTarget, Task};
use model::core::{
    data_type::DataType,
    field::{Field, FieldAttributes},
    identifiers::Alias,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub sources: Vec<SourceSpec>,
    pub target: String,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    /// Replaces the generated output schema when present.
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,
    /// Appended after the generated or listed fields.
    #[serde(default)]
    pub computed: Vec<FieldSpec>,
    pub output: OutputSpec,
    #[serde(default)]
    pub auto_field_lengths: bool,
    #[serde(default)]
    pub settings: EngineSettingsBuilder,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub name: String,
    /// A file, or `directory::table`.
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSpec {
    pub child: String,
    pub child_field: String,
    pub parent: String,
    pub parent_field: String,
    #[serde(default)]
    pub inner: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    /// Expression, e.g. `!parcels.id!` or `"#" + !owners.name!`.
    pub value: String,
    #[serde(default, rename = "type")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub length: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub path: String,
    #[serde(default = "default_restrict")]
    pub restrict: bool,
    #[serde(default)]
    pub overwrite: bool,
}

fn default_restrict() -> bool {
    true
}

impl JobSpec {
    pub async fn load(path: &str) -> Result<Self, CliError> {
        let source = tokio::fs::read_to_string(path).await?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self, CliError> {
        let job: JobSpec = serde_json::from_str(source)?;
        if job.sources.is_empty() {
            return Err(CliError::Job("no sources listed".to_string()));
        }
        Ok(job)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings::from_builder(self.settings.clone())
    }

    /// Opens the inputs, builds the join tree and output schema, and sets
    /// the output. Relative input paths resolve against `base`; a relative
    /// output path resolves against the `default_output_dir` option when it
    /// is set.
    pub fn apply(&self, engine: &mut Engine, base: &Path, overwrite: bool) -> Result<(), CliError> {
        for source in &self.sources {
            let location = resolve(base, &source.path);
            let alias = engine.open_source_as(&source.name, &location)?;
            if alias.as_str() != source.name {
                return Err(CliError::Job(format!(
                    "source name '{}' is used twice",
                    source.name
                )));
            }
        }

        engine.set_target(&Alias::new(self.target.as_str()))?;
        for join in &self.joins {
            engine.add_join(
                &Alias::new(join.child.as_str()),
                &join.child_field,
                &Alias::new(join.parent.as_str()),
                &join.parent_field,
                join.inner,
            )?;
        }

        if let Some(fields) = &self.fields {
            engine.schema_mut().clear();
            for spec in fields {
                engine.schema_mut().add_field(spec.output_field()?);
            }
        }
        for spec in &self.computed {
            engine.schema_mut().add_field(spec.output_field()?);
        }

        let output_base = engine
            .options()
            .default_output_dir()
            .unwrap_or_else(|| base.to_path_buf());
        engine.set_output(OutputTarget {
            location: resolve(&output_base, &self.output.path),
            overwrite: overwrite || self.output.overwrite,
            restrict: self.output.restrict,
        });
        Ok(())
    }

    /// Tasks to drain before the run.
    pub fn tasks(&self, engine: &Engine) -> Vec<Task> {
        let mut tasks = engine.pending_tasks();
        if self.auto_field_lengths {
            tasks.push(Task::AutoAdjustFieldLengths);
        }
        tasks
    }
}

impl FieldSpec {
    fn output_field(&self) -> Result<OutputField, CliError> {
        let data_type = match &self.data_type {
            Some(name) => DataType::from_name(name)
                .map_err(|e| CliError::Job(format!("field '{}': {e}", self.name)))?,
            None => DataType::String,
        };
        let mut attributes = FieldAttributes::typed(data_type);
        if let Some(length) = self.length {
            attributes.set_length(length);
        }
        let field = Field::new(&self.name, attributes).with_value(self.value.as_str());
        Ok(OutputField::new(field, None))
    }
}

fn resolve(base: &Path, location: &str) -> TableLocation {
    let mut location = TableLocation::parse(location);
    if location.path.is_relative() {
        location.path = base.join(&location.path);
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::Options;
    use std::fs;

    const JOB: &str = r#"{
        "sources": [
            { "name": "parcels", "path": "parcels.csv" },
            { "name": "owners", "path": "owners.csv" }
        ],
        "target": "parcels",
        "joins": [
            { "child": "owners", "child_field": "parcel_id", "parent": "parcels", "parent_field": "id" }
        ],
        "computed": [
            { "name": "label", "value": "!parcels.id! + \"/\" + !owners.name!" }
        ],
        "output": { "path": "out.csv" },
        "settings": { "staging_chunk_size": 250 }
    }"#;

    fn write_inputs(dir: &Path) {
        fs::write(dir.join("parcels.csv"), "id,area\n1,10.5\n2,20\n").unwrap();
        fs::write(dir.join("owners.csv"), "owner_id,parcel_id,name\n100,1,Ada\n200,2,Bo\n")
            .unwrap();
    }

    #[test]
    fn parses_with_defaults() {
        let job = JobSpec::parse(JOB).unwrap();
        assert_eq!(job.sources.len(), 2);
        assert!(job.output.restrict);
        assert!(!job.output.overwrite);
        assert!(!job.joins[0].inner);
        assert_eq!(job.engine_settings().staging_chunk_size(), 250);
    }

    #[test]
    fn rejects_unknown_keys_and_empty_sources() {
        assert!(matches!(
            JobSpec::parse(r#"{"sources": [], "target": "a", "output": {"path": "o.csv"}}"#),
            Err(CliError::Job(_))
        ));
        assert!(matches!(
            JobSpec::parse(r#"{"sources": [], "target": "a", "output": {"path": "o.csv"}, "x": 1}"#),
            Err(CliError::JobParse(_))
        ));
    }

    #[test]
    fn applies_sources_joins_and_computed_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let job = JobSpec::parse(JOB).unwrap();
        let mut engine = Engine::temporary(job.engine_settings(), Options::new()).unwrap();

        job.apply(&mut engine, dir.path(), false).unwrap();

        assert_eq!(
            engine.schema().names(),
            vec!["id", "area", "owner_id", "parcel_id", "name", "label"]
        );
        let output = engine.output().unwrap();
        assert_eq!(output.location.path, dir.path().join("out.csv"));
        assert!(output.restrict);
        assert_eq!(job.tasks(&engine).len(), 3);
    }

    #[test]
    fn listed_fields_replace_the_schema() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let mut job = JobSpec::parse(JOB).unwrap();
        job.fields = Some(vec![FieldSpec {
            name: "parcel".into(),
            value: "!parcels.id!".into(),
            data_type: Some("integer".into()),
            length: None,
        }]);
        let mut engine = Engine::temporary(job.engine_settings(), Options::new()).unwrap();

        job.apply(&mut engine, dir.path(), true).unwrap();

        assert_eq!(engine.schema().names(), vec!["parcel", "label"]);
        assert_eq!(engine.schema().get(0).unwrap().data_type(), DataType::Int);
        assert!(engine.output().unwrap().overwrite);
    }

    #[test]
    fn output_resolves_against_default_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let job = JobSpec::parse(JOB).unwrap();
        let mut options = Options::new();
        options
            .set_from_text("default_output_dir", &out_dir.path().display().to_string())
            .unwrap();
        let mut engine = Engine::temporary(job.engine_settings(), options).unwrap();

        job.apply(&mut engine, dir.path(), false).unwrap();

        assert_eq!(
            engine.output().unwrap().location.path,
            out_dir.path().join("out.csv")
        );
    }

    #[test]
    fn duplicate_source_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_inputs(dir.path());
        let job = JobSpec::parse(
            r#"{
                "sources": [
                    { "name": "p", "path": "parcels.csv" },
                    { "name": "p", "path": "owners.csv" }
                ],
                "target": "p",
                "output": { "path": "out.csv" }
            }"#,
        )
        .unwrap();
        let mut engine = Engine::temporary(job.engine_settings(), Options::new()).unwrap();
        assert!(matches!(
            job.apply(&mut engine, dir.path(), false),
            Err(CliError::Job(_))
        ));
    }
}

//! The engine: open inputs, their join tree, the output schema and the
//! staging store behind them, with one method per user action.

use crate::{
    error::{EngineError, TaskError},
    field_length::{FieldLength, detect_field_lengths},
    queue::{Task, TaskRunner},
    sample::{Sample, compute_sample},
};
use async_trait::async_trait;
use connectors::{
    adapter::{Adapter, TableLocation},
    table::{CloseHandle, OpenMode, TableSink, TableSource},
};
use engine_config::{EngineSettings, Options};
use engine_core::{
    event_bus::EventBus,
    join_graph::JoinGraph,
    metrics::Metrics,
    schema::{OutputField, OutputSchema},
    staging::{IndexBuilder, StagingConverter, StagingStore},
};
use engine_processing::{ExecuteOptions, JoinExecutor, RunSummary};
use indexmap::IndexMap;
use model::{
    core::{field::Field, identifiers::Alias},
    events::{IndexProgress, StagingProgress},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Staging store location under the home directory.
pub const STAGING_DIR: &str = ".fieldjoin/staging";

struct OpenSource {
    source: Box<dyn TableSource>,
    location: Option<TableLocation>,
    fields: Vec<Field>,
    /// The handle's records were read; staging again needs a fresh handle.
    consumed: bool,
}

/// Where a join run writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub location: TableLocation,
    pub overwrite: bool,
    pub restrict: bool,
}

pub struct Engine {
    store: StagingStore,
    graph: JoinGraph,
    schema: OutputSchema,
    sources: IndexMap<Alias, OpenSource>,
    settings: EngineSettings,
    options: Options,
    events: EventBus,
    metrics: Metrics,
    output: Option<OutputTarget>,
    sample: Option<Sample>,
    last_run: Option<RunSummary>,
}

impl Engine {
    /// Engine over the staging store in the home directory. The store is
    /// scratch space and starts empty.
    pub fn open(settings: EngineSettings, options: Options) -> Result<Self, EngineError> {
        let home_dir = dirs::home_dir().ok_or_else(|| {
            EngineError::Initialization("Could not determine home directory".to_string())
        })?;
        let store = StagingStore::open(home_dir.join(STAGING_DIR))?;
        Ok(Self::with_store(store, settings, options))
    }

    pub fn temporary(settings: EngineSettings, options: Options) -> Result<Self, EngineError> {
        Ok(Self::with_store(StagingStore::temporary()?, settings, options))
    }

    pub fn with_store(store: StagingStore, settings: EngineSettings, options: Options) -> Self {
        Engine {
            store,
            graph: JoinGraph::new(),
            schema: OutputSchema::new(),
            sources: IndexMap::new(),
            settings,
            options,
            events: EventBus::new(),
            metrics: Metrics::new(),
            output: None,
            sample: None,
            last_run: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &StagingStore {
        &self.store
    }

    pub fn graph(&self) -> &JoinGraph {
        &self.graph
    }

    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut OutputSchema {
        &mut self.schema
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn sample(&self) -> Option<&Sample> {
        self.sample.as_ref()
    }

    pub fn last_run(&self) -> Option<&RunSummary> {
        self.last_run.as_ref()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &Alias> {
        self.sources.keys()
    }

    pub fn source_fields(&self, alias: &Alias) -> Result<&[Field], EngineError> {
        Ok(&self.source(alias)?.fields)
    }

    pub fn source_location(&self, alias: &Alias) -> Option<&TableLocation> {
        self.sources.get(alias).and_then(|s| s.location.as_ref())
    }

    /// Closing the returned handle stops any conversion reading the input.
    pub fn close_handle(&self, alias: &Alias) -> Option<CloseHandle> {
        self.sources.get(alias).map(|s| s.source.close_handle())
    }

    fn source(&self, alias: &Alias) -> Result<&OpenSource, EngineError> {
        self.sources
            .get(alias)
            .ok_or_else(|| EngineError::UnknownAlias(alias.to_string()))
    }

    /// Opens an input table under a fresh alias derived from its name.
    pub fn open_source(&mut self, location: &TableLocation) -> Result<Alias, EngineError> {
        let source = Adapter::open_source(location)?;
        let name = location.table.clone().unwrap_or_else(|| {
            location
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.name().to_string())
        });
        self.register(&name, source, Some(location.clone()))
    }

    /// Opens an input table under `name`, or a numbered variant of it when
    /// `name` is taken.
    pub fn open_source_as(
        &mut self,
        name: &str,
        location: &TableLocation,
    ) -> Result<Alias, EngineError> {
        let source = Adapter::open_source(location)?;
        self.register(name, source, Some(location.clone()))
    }

    /// Adds an already opened input table under a fresh alias.
    pub fn add_source(
        &mut self,
        name: &str,
        source: Box<dyn TableSource>,
    ) -> Result<Alias, EngineError> {
        self.register(name, source, None)
    }

    fn register(
        &mut self,
        name: &str,
        source: Box<dyn TableSource>,
        location: Option<TableLocation>,
    ) -> Result<Alias, EngineError> {
        let alias = self.graph.unique_alias(name);
        self.graph.register_alias(&alias)?;
        let fields = source.fields().to_vec();
        info!(alias = %alias, source = source.name(), fields = fields.len(), "Input opened");

        self.sources.insert(
            alias.clone(),
            OpenSource {
                source,
                location,
                fields,
                consumed: false,
            },
        );
        Ok(alias)
    }

    /// Closes an input. It leaves the join tree with everything joined
    /// beneath it, their output fields go, and its staging table is
    /// dropped. Returns the aliases removed from the tree.
    pub fn close_source(&mut self, alias: &Alias) -> Result<Vec<Alias>, EngineError> {
        let Some(mut entry) = self.sources.shift_remove(alias) else {
            return Err(EngineError::UnknownAlias(alias.to_string()));
        };
        entry.source.close();

        let removed = self.graph.unregister_alias(alias);
        for gone in &removed {
            self.schema.remove_source(gone);
        }
        self.store.drop_table(alias)?;
        self.sample = None;

        info!(alias = %alias, removed = removed.len(), "Input closed");
        Ok(removed)
    }

    /// Makes `alias` the join target. A new target drops every join and
    /// resets the output schema to the target's fields.
    pub fn set_target(&mut self, alias: &Alias) -> Result<(), EngineError> {
        self.source(alias)?;
        if self.graph.target() == Some(alias) {
            return Ok(());
        }
        self.graph.set_target(alias)?;
        self.populate_output_schema();
        self.sample = None;
        Ok(())
    }

    /// Joins `child` beneath `parent` and appends the child's fields to the
    /// output schema.
    pub fn add_join(
        &mut self,
        child: &Alias,
        child_field: &str,
        parent: &Alias,
        parent_field: &str,
        inner: bool,
    ) -> Result<(), EngineError> {
        self.check_field(child, child_field)?;
        self.check_field(parent, parent_field)?;
        self.graph
            .add_join(child, child_field, parent, parent_field, inner)?;

        let fields = self.source(child)?.fields.clone();
        for field in &fields {
            self.schema.add_field(OutputField::from_input(child, field));
        }
        self.sample = None;
        Ok(())
    }

    /// Removes `child` and its subtree from the join tree together with
    /// their output fields.
    pub fn remove_join(&mut self, child: &Alias) -> Vec<Alias> {
        let removed = self.graph.remove_alias(child);
        for gone in &removed {
            self.schema.remove_source(gone);
        }
        if !removed.is_empty() {
            self.sample = None;
        }
        removed
    }

    fn check_field(&self, alias: &Alias, field: &str) -> Result<(), EngineError> {
        let source = self.source(alias)?;
        if source.fields.iter().any(|f| f.name.eq_ignore_ascii_case(field)) {
            Ok(())
        } else {
            Err(EngineError::UnknownField {
                alias: alias.to_string(),
                field: field.to_string(),
            })
        }
    }

    /// Rebuilds the output schema from the fields of every alias in the
    /// join tree, target first.
    pub fn populate_output_schema(&mut self) {
        self.schema.clear();
        for alias in self.graph.joined_aliases_depth_first(None) {
            if let Some(source) = self.sources.get(&alias) {
                for field in &source.fields {
                    self.schema.add_field(OutputField::from_input(&alias, field));
                }
            }
        }
        debug!(fields = self.schema.len(), "Output schema populated");
    }

    /// Work a join run needs first: staging for every alias in the tree
    /// that has none, and the key index of every join.
    pub fn pending_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .graph
            .joined_aliases_depth_first(None)
            .into_iter()
            .filter(|alias| !self.store.is_staged(alias))
            .map(|alias| Task::ConvertToStaging { alias })
            .collect();
        tasks.extend(self.graph.joins().into_iter().map(|join| Task::BuildIndex {
            alias: join.child.clone(),
            field: join.child_field.clone(),
        }));
        tasks
    }

    /// Copies an input into its staging table, publishing progress after
    /// every chunk. Already staged inputs are left alone.
    pub async fn convert_to_staging(
        &mut self,
        alias: &Alias,
        cancel: &CancellationToken,
    ) -> Result<u64, EngineError> {
        if self.store.is_staged(alias) {
            debug!(alias = %alias, "Already staged");
            return self.store.row_count(alias).map_err(EngineError::from);
        }

        let chunk_size = self.settings.staging_chunk_size();
        let every = self.settings.indeterminate_every();
        let entry = self
            .sources
            .get_mut(alias)
            .ok_or_else(|| EngineError::UnknownAlias(alias.to_string()))?;
        if entry.consumed
            && let Some(location) = &entry.location
        {
            debug!(alias = %alias, location = %location, "Reopening consumed input");
            entry.source = Adapter::open_source(location)?;
        }
        entry.consumed = true;

        let mut converter =
            StagingConverter::new(&self.store, alias, entry.source.as_mut(), chunk_size)?
                .with_indeterminate_every(every);

        while let Some(progress) = converter.next() {
            let progress = progress?;
            self.events
                .publish(StagingProgress {
                    alias: alias.to_string(),
                    progress,
                    rows: converter.rows_staged(),
                    timestamp: chrono::Utc::now(),
                })
                .await;

            if cancel.is_cancelled() && progress.as_fraction() != Some(1.0) {
                drop(converter);
                self.store.drop_table(alias)?;
                warn!(alias = %alias, "Staging cancelled");
                return Err(EngineError::Cancelled);
            }
            tokio::task::yield_now().await;
        }

        let rows = converter.rows_staged();
        self.metrics.increment_staged(rows);
        Ok(rows)
    }

    /// Builds the key index on `alias.field`; a built index is kept.
    pub async fn build_index(
        &mut self,
        alias: &Alias,
        field: &str,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut builder =
            IndexBuilder::new(&self.store, alias, field, self.settings.staging_chunk_size())?;
        if builder.is_noop() {
            return Ok(());
        }

        while let Some(progress) = builder.next() {
            let progress = progress?;
            self.events
                .publish(IndexProgress {
                    alias: alias.to_string(),
                    field: field.to_string(),
                    progress,
                    timestamp: chrono::Utc::now(),
                })
                .await;
            if cancel.is_cancelled() && progress.as_fraction() != Some(1.0) {
                return Err(EngineError::Cancelled);
            }
            tokio::task::yield_now().await;
        }

        self.metrics
            .increment_index_entries(self.store.row_count(alias)?);
        Ok(())
    }

    /// Recomputes the preview rows. Without a target there is no sample.
    pub async fn refresh_sample(&mut self, cancel: &CancellationToken) -> Result<(), EngineError> {
        if self.graph.target().is_none() {
            self.sample = None;
            return Ok(());
        }
        let options = self
            .execute_options()
            .with_limit(self.settings.sample_size() as u64);
        let sample = compute_sample(&self.graph, &self.schema, &self.store, options, cancel).await?;
        self.sample = Some(sample);
        Ok(())
    }

    /// Sets the length of text fields copied from one input column to the
    /// longest staged value plus the configured padding.
    pub async fn auto_adjust_field_lengths(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<FieldLength>, EngineError> {
        let lengths = detect_field_lengths(
            &self.store,
            &self.schema,
            self.options.field_length_padding(),
            self.settings.staging_chunk_size(),
            cancel,
        )
        .await?;

        for length in &lengths {
            if let Some(field) = self.schema.get_mut(length.index) {
                field.field.attributes.set_length(length.length);
            }
        }
        Ok(lengths)
    }

    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions::from_settings(&self.settings)
    }

    pub fn set_output(&mut self, output: OutputTarget) {
        self.output = Some(output);
    }

    pub fn output(&self) -> Option<&OutputTarget> {
        self.output.as_ref()
    }

    /// Writes the join into `sink`. The output schema's names are fitted to
    /// the sink's name length limit first.
    pub async fn run_join(
        &mut self,
        sink: &mut dyn TableSink,
        options: ExecuteOptions,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        if self.schema.name_limit() != sink.field_name_limit() {
            self.schema.set_name_limit(sink.field_name_limit())?;
        }

        let mut executor = JoinExecutor::new(options)
            .with_events(self.events.clone())
            .with_metrics(self.metrics.clone());
        executor.build_query(&self.graph, &self.schema, &self.store)?;
        let summary = executor.run(sink, cancel).await?;

        self.last_run = Some(summary.clone());
        Ok(summary)
    }

    /// Runs the join into the configured output. Writing over the target's
    /// own input backs that input up first.
    pub async fn execute_output(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let output = self.output.clone().ok_or(EngineError::NoOutput)?;
        let replace_target = self
            .graph
            .target()
            .and_then(|target| self.source_location(target))
            .is_some_and(|location| *location == output.location);

        let mut sink = Adapter::open_sink(
            &output.location,
            OpenMode::Write {
                overwrite: output.overwrite,
            },
        )?;
        let options = self
            .execute_options()
            .restricted(output.restrict)
            .replacing_target(replace_target);

        info!(output = %output.location, replace_target, "Executing join");
        self.run_join(sink.as_mut(), options, cancel).await
    }
}

#[async_trait]
impl TaskRunner for Engine {
    async fn run_task(&mut self, task: &Task, cancel: &CancellationToken) -> Result<(), TaskError> {
        match task {
            Task::ConvertToStaging { alias } => {
                self.convert_to_staging(alias, cancel).await?;
            }
            Task::BuildIndex { alias, field } => self.build_index(alias, field, cancel).await?,
            Task::RefreshSample => self.refresh_sample(cancel).await?,
            Task::AutoAdjustFieldLengths => {
                self.auto_adjust_field_lengths(cancel).await?;
            }
            Task::ExecuteJoinWhenIdle => {}
        }
        Ok(())
    }

    async fn execute_join(&mut self, cancel: &CancellationToken) -> Result<(), TaskError> {
        self.execute_output(cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BackgroundTaskQueue;
    use connectors::memory::{MemorySink, MemoryTable};
    use engine_core::error::JoinConfigError;
    use engine_processing::RunState;
    use model::core::{
        data_type::DataType,
        field::FieldAttributes,
        value::Value,
    };
    use std::fs;

    fn field(name: &str, data_type: DataType) -> Field {
        Field::new(name, FieldAttributes::typed(data_type))
    }

    fn parcels() -> Box<dyn TableSource> {
        Box::new(MemoryTable::new(
            "parcels",
            vec![field("id", DataType::Long), field("area", DataType::Double)],
            (1..=3)
                .map(|i| vec![Value::Int(i), Value::Float(i as f64 * 10.0)])
                .collect(),
        ))
    }

    fn owners() -> Box<dyn TableSource> {
        Box::new(MemoryTable::new(
            "owners",
            vec![
                field("id", DataType::Long),
                field("parcel", DataType::Long),
                field("name", DataType::String),
            ],
            vec![
                vec![Value::Int(7), Value::Int(1), Value::String("Ada".into())],
                vec![Value::Int(8), Value::Int(2), Value::String("Bo".into())],
                vec![Value::Int(9), Value::Int(2), Value::String("Cy".into())],
            ],
        ))
    }

    fn engine() -> (Engine, Alias, Alias) {
        let mut engine = Engine::temporary(EngineSettings::default(), Options::new()).unwrap();
        let p = engine.add_source("p", parcels()).unwrap();
        let o = engine.add_source("o", owners()).unwrap();
        engine.set_target(&p).unwrap();
        engine.add_join(&o, "parcel", &p, "id", false).unwrap();
        (engine, p, o)
    }

    #[test]
    fn joins_extend_the_output_schema() {
        let (engine, _, _) = engine();
        assert_eq!(engine.schema().names(), vec!["id", "area", "id1", "parcel", "name"]);
        assert_eq!(engine.schema().get(2).unwrap().expression(), "!o.id!");
    }

    #[test]
    fn join_configuration_is_checked() {
        let (mut engine, p, o) = engine();
        assert!(matches!(
            engine.add_join(&o, "parcel", &p, "id", false),
            Err(EngineError::JoinConfig(JoinConfigError::AliasInUse(_)))
        ));
        assert!(matches!(
            engine.add_join(&o, "missing", &p, "id", false),
            Err(EngineError::UnknownField { .. })
        ));

        let again = engine.add_source("o", owners()).unwrap();
        assert_eq!(again.as_str(), "o_2");
        engine.add_join(&again, "parcel", &o, "parcel", true).unwrap();
        assert_eq!(engine.graph().len(), 3);
    }

    #[test]
    fn closing_an_input_cascades() {
        let (mut engine, p, o) = engine();
        let again = engine.add_source("o", owners()).unwrap();
        engine.add_join(&again, "id", &o, "id", false).unwrap();

        let removed = engine.close_source(&o).unwrap();
        assert_eq!(removed, vec![o.clone(), again.clone()]);
        assert_eq!(engine.schema().names(), vec!["id", "area"]);
        assert_eq!(engine.graph().target(), Some(&p));
        assert!(engine.aliases().all(|a| a != &o));
        assert!(engine.close_source(&o).is_err());
    }

    #[test]
    fn new_target_resets_joins_and_schema() {
        let (mut engine, _, o) = engine();
        engine.set_target(&o).unwrap();
        assert_eq!(engine.graph().len(), 1);
        assert_eq!(engine.schema().names(), vec!["id", "parcel", "name"]);
    }

    #[tokio::test]
    async fn queued_work_then_join_into_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("joined.csv");
        let (mut engine, _, _) = engine();
        engine.set_output(OutputTarget {
            location: TableLocation::file(&out),
            overwrite: false,
            restrict: true,
        });

        let queue = BackgroundTaskQueue::new();
        // the sample needs staging that is queued after it
        queue.enqueue(Task::RefreshSample).await;
        queue.enqueue_all(engine.pending_tasks()).await;
        queue.enqueue(Task::AutoAdjustFieldLengths).await;
        queue.enqueue(Task::ExecuteJoinWhenIdle).await;

        let report = queue.drain(&mut engine, &CancellationToken::new()).await;
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert!(report.requeued >= 1);
        assert!(report.join_executed);

        let sample = engine.sample().unwrap();
        assert_eq!(sample.rows.len(), 3);
        assert_eq!(engine.schema().get_by_name("name").unwrap().field.attributes.length(), Some(3));

        let summary = engine.last_run().unwrap();
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.rows_discarded, 1);

        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(written.lines().count(), 4);
        assert!(written.lines().nth(2).unwrap().contains("Bo"));
    }

    #[tokio::test]
    async fn replacing_the_target_file_backs_it_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lots.csv");
        fs::write(&path, "id,size\n1,5\n2,7\n").unwrap();

        let mut engine = Engine::temporary(EngineSettings::default(), Options::new()).unwrap();
        let lots = engine.open_source(&TableLocation::file(&path)).unwrap();
        assert_eq!(lots.as_str(), "lots");
        engine.set_target(&lots).unwrap();
        engine.schema_mut().add_new_field();
        let index = engine.schema().position("NewField").unwrap();
        engine.schema_mut().set_value(index, "!lots.size! * 2").unwrap();
        engine.set_output(OutputTarget {
            location: TableLocation::file(&path),
            overwrite: false,
            restrict: false,
        });

        let cancel = CancellationToken::new();
        engine.convert_to_staging(&lots, &cancel).await.unwrap();
        let summary = engine.execute_output(&cancel).await.unwrap();

        assert_eq!(summary.rows_written, 2);
        let backup = summary.backup.clone().unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "id,size\n1,5\n2,7\n");
        let replaced = fs::read_to_string(&path).unwrap();
        assert!(replaced.starts_with("id,size,NewField"));
        assert!(replaced.contains("2,7,14"));
    }

    #[tokio::test]
    async fn closed_input_fails_conversion() {
        let (mut engine, p, _) = engine();
        engine.close_handle(&p).unwrap().close();

        let err = engine
            .convert_to_staging(&p, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_file_closed());
        assert!(!engine.store().is_staged(&p));
    }

    #[tokio::test]
    async fn run_join_reports_missing_staging() {
        let (mut engine, _, _) = engine();
        let mut sink = MemorySink::new("out");
        let options = engine.execute_options();
        let err = engine
            .run_join(&mut sink, options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_ready());
    }
}

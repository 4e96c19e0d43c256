#[cfg(test)]
mod tests {
    use crate::utils::{drain, numbered_csv, open, parcels_and_owners, read_table, settings};
    use connectors::adapter::TableLocation;
    use engine_config::{EngineSettings, Options};
    use engine_runtime::{BackgroundTaskQueue, Engine, OutputTarget, Task};
    use model::events::StagingProgress;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    // Scenario: "convert everything, then run" queued as one operation, with a
    // sample request queued before the conversions it depends on.
    // Expected Outcome: the sample is requeued until staging exists, and the join
    // runs once the queue is empty.
    #[traced_test]
    #[tokio::test]
    async fn queue_converts_then_runs_the_join() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), false);
        let out = dir.path().join("joined.csv");
        engine.set_output(OutputTarget {
            location: TableLocation::file(&out),
            overwrite: false,
            restrict: true,
        });

        let queue = BackgroundTaskQueue::new();
        queue.enqueue(Task::RefreshSample).await;
        queue.enqueue_all(engine.pending_tasks()).await;
        queue.set_run_when_idle(true).await;
        let report = queue.drain(&mut engine, &CancellationToken::new()).await;

        assert!(report.failed.is_empty(), "{:?}", report.failed);
        assert_eq!(report.requeued, 1);
        assert!(report.join_executed);
        assert!(logs_contain("Task requeued"));

        assert_eq!(engine.sample().unwrap().rows.len(), 3);
        assert_eq!(read_table(&out).unwrap().1.len(), 3);
    }

    // Scenario: an input is closed while it is being staged, with another
    // conversion queued behind it.
    // Expected Outcome: that conversion stops and leaves no staging table; the
    // queue carries on with the next task.
    #[traced_test]
    #[tokio::test]
    async fn closing_an_input_mid_conversion() {
        let dir = tempdir().unwrap();
        let big = numbered_csv(dir.path(), "big.csv", 1000);
        let small = numbered_csv(dir.path(), "small.csv", 10);
        let mut engine = Engine::temporary(settings(250), Options::new()).unwrap();
        let big = open(&mut engine, &big);
        let small = open(&mut engine, &small);

        let handle = engine.close_handle(&big).unwrap();
        let (_sub, mut progress) = engine.events().channel::<StagingProgress>(16).await;
        let closer = tokio::spawn(async move {
            if progress.recv().await.is_some() {
                handle.close();
            }
        });

        let report = drain(
            &mut engine,
            vec![
                Task::ConvertToStaging { alias: big.clone() },
                Task::ConvertToStaging {
                    alias: small.clone(),
                },
            ],
        )
        .await;
        closer.await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, Task::ConvertToStaging { alias: big.clone() });
        assert!(!engine.store().is_staged(&big));
        assert_eq!(engine.store().row_count(&small).unwrap(), 10);
        assert!(logs_contain("input closed"));
    }

    // Scenario: a staged input is staged again after its table was dropped.
    // Expected Outcome: the consumed handle is replaced by a fresh one.
    #[tokio::test]
    async fn restaging_reopens_the_input() {
        let dir = tempdir().unwrap();
        let path = numbered_csv(dir.path(), "numbers.csv", 300);
        let mut engine = Engine::temporary(settings(250), Options::new()).unwrap();
        let alias = open(&mut engine, &path);
        let cancel = CancellationToken::new();

        assert_eq!(engine.convert_to_staging(&alias, &cancel).await.unwrap(), 300);
        engine.store().drop_table(&alias).unwrap();
        assert_eq!(engine.convert_to_staging(&alias, &cancel).await.unwrap(), 300);
    }

    // Scenario: text fields copied from single columns, with padding configured.
    // Expected Outcome: lengths are the longest staged value plus the padding;
    // computed fields keep their length.
    #[tokio::test]
    async fn field_lengths_use_configured_padding() {
        let dir = tempdir().unwrap();
        let mut options = Options::new();
        options.set_from_text("field_length_padding", "4").unwrap();
        let mut engine = Engine::temporary(EngineSettings::default(), options).unwrap();

        let path = numbered_csv(dir.path(), "numbers.csv", 12);
        let alias = open(&mut engine, &path);
        engine.set_target(&alias).unwrap();
        let computed = engine.schema_mut().add_new_field();
        engine
            .schema_mut()
            .set_value(computed, "upper(!numbers.label!)")
            .unwrap();

        let report = drain(
            &mut engine,
            vec![
                Task::AutoAdjustFieldLengths,
                Task::ConvertToStaging {
                    alias: alias.clone(),
                },
            ],
        )
        .await;
        assert_eq!(report.requeued, 1);

        let schema = engine.schema();
        let label = schema.get_by_name("label").unwrap();
        assert_eq!(label.field.attributes.length(), Some("row 12".len() + 4));
        assert_eq!(schema.get(computed).unwrap().field.attributes.length(), None);
    }

    // Scenario: closing a joined input.
    // Expected Outcome: it leaves the join tree and the output schema, and its
    // staging table is dropped.
    #[tokio::test]
    async fn closing_a_joined_input() {
        let dir = tempdir().unwrap();
        let (mut engine, p, o) = parcels_and_owners(dir.path(), false);
        crate::utils::prepare(&mut engine).await;
        assert!(engine.store().is_staged(&o));

        let removed = engine.close_source(&o).unwrap();
        assert_eq!(removed, vec![o.clone()]);
        assert!(!engine.store().is_staged(&o));
        assert_eq!(engine.schema().names(), vec!["id", "area", "zone"]);
        assert_eq!(engine.graph().joined_aliases_depth_first(None), vec![p]);
    }
}

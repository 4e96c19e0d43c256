#[cfg(test)]
mod tests {
    use crate::utils::{
        PARCELS_CSV, ZONES_CSV, column, engine, numbered_csv, open, parcels_and_owners, prepare,
        read_table, settings, write_csv,
    };
    use connectors::{
        adapter::{Adapter, TableLocation},
        error::AdapterError,
        memory::MemorySink,
    };
    use engine_config::Options;
    use engine_core::staging::{IndexBuilder, JoinIndex};
    use engine_processing::{ExecutionError, RunState};
    use engine_runtime::{Engine, EngineError, OutputTarget};
    use model::{
        core::value::Value,
        events::{JoinProgress, StagingProgress},
    };
    use std::collections::HashSet;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    fn output(path: &std::path::Path, overwrite: bool, restrict: bool) -> OutputTarget {
        OutputTarget {
            location: TableLocation::file(path),
            overwrite,
            restrict,
        }
    }

    // Scenario: three parcels, parcel 2 matched by three owners, restriction on.
    // Expected Outcome: exactly one row per parcel, parcel 2 carrying its first owner,
    // parcel 3 carrying blank owner values.
    #[traced_test]
    #[tokio::test]
    async fn restricted_fan_out_writes_one_row_per_target_row() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), false);
        assert!(prepare(&mut engine).await.failed.is_empty());

        let out = dir.path().join("out.csv");
        engine.set_output(output(&out, false, true));
        let summary = engine.execute_output(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.rows_discarded, 2);

        let (header, rows) = read_table(&out).unwrap();
        assert_eq!(header, vec!["id", "area", "zone", "owner_id", "parcel_id", "name"]);
        assert_eq!(column(&rows, 0), vec!["1", "2", "3"]);
        assert_eq!(column(&rows, 5), vec!["Ada", "Bo", ""]);
        assert_eq!(column(&rows, 3), vec!["100", "200", "0"]);
        assert!(logs_contain("Join run finished"));
    }

    // Scenario: same join without restriction.
    // Expected Outcome: every combination is written, in target order.
    #[tokio::test]
    async fn unrestricted_fan_out_writes_every_match() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), false);
        prepare(&mut engine).await;

        let out = dir.path().join("out.csv");
        engine.set_output(output(&out, false, false));
        let summary = engine.execute_output(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.rows_written, 5);

        let (_, rows) = read_table(&out).unwrap();
        assert_eq!(column(&rows, 0), vec!["1", "2", "2", "2", "3"]);
        assert_eq!(column(&rows, 5), vec!["Ada", "Bo", "Cy", "Di", ""]);
    }

    // Scenario: inner join, parcel 3 has no owner.
    // Expected Outcome: parcel 3 is dropped.
    #[tokio::test]
    async fn inner_join_drops_unmatched_rows() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), true);
        prepare(&mut engine).await;

        let mut sink = MemorySink::new("out");
        let rows = sink.output();
        let options = engine.execute_options().restricted(true);
        engine
            .run_join(&mut sink, options, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<Value> = rows.rows().iter().map(|r| r.get_value("id")).collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2)]);
    }

    // Scenario: `!a.x! + !b.y!` over a row where b matched and one where it did not.
    // Expected Outcome: 2 + 3 = 5, and 2 + blank(b.y) = 2.
    #[tokio::test]
    async fn expression_uses_blank_for_missing_match() {
        let dir = tempdir().unwrap();
        let a = write_csv(dir.path(), "a.csv", "k,x\n1,2\n2,2\n");
        let b = write_csv(dir.path(), "b.csv", "k,y\n1,3\n");

        let mut engine = engine();
        let a = open(&mut engine, &a);
        let b = open(&mut engine, &b);
        engine.set_target(&a).unwrap();
        engine.add_join(&b, "k", &a, "k", false).unwrap();
        let index = engine.schema_mut().add_new_field();
        engine
            .schema_mut()
            .set_value(index, "!a.x! + !b.y!")
            .unwrap();
        prepare(&mut engine).await;

        let mut sink = MemorySink::new("out");
        let rows = sink.output();
        let options = engine.execute_options();
        engine
            .run_join(&mut sink, options, &CancellationToken::new())
            .await
            .unwrap();

        let sums: Vec<Value> = rows.rows().iter().map(|r| r.get_value("NewField")).collect();
        assert_eq!(sums, vec![Value::String("5".into()), Value::String("2".into())]);
    }

    // Scenario: staging 1,000 records with a chunk size of 250.
    // Expected Outcome: exactly four progress signals, the last at 1.0.
    #[tokio::test]
    async fn staging_reports_one_signal_per_chunk() {
        let dir = tempdir().unwrap();
        let path = numbered_csv(dir.path(), "numbers.csv", 1000);
        let mut engine = Engine::temporary(settings(250), Options::new()).unwrap();
        let alias = open(&mut engine, &path);

        let (_sub, mut progress) = engine.events().channel::<StagingProgress>(16).await;
        let rows = engine
            .convert_to_staging(&alias, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rows, 1000);

        let mut fractions = Vec::new();
        while let Ok(event) = progress.try_recv() {
            fractions.push(event.progress.as_fraction().unwrap());
        }
        assert_eq!(fractions, vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(engine.metrics().snapshot().rows_staged, 1000);
    }

    // Scenario: the run is cancelled after its first batch.
    // Expected Outcome: the run ends Aborted without an error, the partial output is
    // closed and readable, and a fresh run over the same configuration completes.
    #[traced_test]
    #[tokio::test]
    async fn cancelled_run_keeps_partial_output() {
        let dir = tempdir().unwrap();
        let path = numbered_csv(dir.path(), "numbers.csv", 2000);
        let mut engine = Engine::temporary(settings(250), Options::new()).unwrap();
        let alias = open(&mut engine, &path);
        engine.set_target(&alias).unwrap();
        prepare(&mut engine).await;

        let cancel = CancellationToken::new();
        let (_sub, mut progress) = engine.events().channel::<JoinProgress>(16).await;
        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            if progress.recv().await.is_some() {
                trigger.cancel();
            }
        });

        let out = dir.path().join("out.csv");
        engine.set_output(output(&out, false, false));
        let summary = engine.execute_output(&cancel).await.unwrap();
        watcher.await.unwrap();

        assert_eq!(summary.state, RunState::Aborted);
        assert!(summary.rows_written < 2000);
        let (_, partial) = read_table(&out).unwrap();
        assert_eq!(partial.len() as u64, summary.rows_written);
        assert!(logs_contain("Join run aborted"));

        engine.set_output(output(&out, true, false));
        let again = engine.execute_output(&CancellationToken::new()).await.unwrap();
        assert_eq!(again.state, RunState::Completed);
        assert_eq!(read_table(&out).unwrap().1.len(), 2000);
    }

    // Scenario: the key index of a join is built twice.
    // Expected Outcome: the second build is a no-op and the index is unchanged.
    #[tokio::test]
    async fn index_build_is_idempotent() {
        let dir = tempdir().unwrap();
        let (mut engine, _, o) = parcels_and_owners(dir.path(), false);
        prepare(&mut engine).await;

        let before = JoinIndex::open(engine.store(), &o, "parcel_id").unwrap().len();
        engine
            .build_index(&o, "parcel_id", &CancellationToken::new())
            .await
            .unwrap();
        let builder = IndexBuilder::new(engine.store(), &o, "parcel_id", 250).unwrap();
        assert!(builder.is_noop());
        assert_eq!(
            JoinIndex::open(engine.store(), &o, "parcel_id").unwrap().len(),
            before
        );
        assert_eq!(before, 4);
    }

    // Scenario: the output file exists and overwrite was not given.
    // Expected Outcome: the run is refused, then succeeds when retried with overwrite.
    #[tokio::test]
    async fn existing_output_needs_overwrite() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), false);
        prepare(&mut engine).await;
        let out = write_csv(dir.path(), "out.csv", "old\n1\n");

        engine.set_output(output(&out, false, true));
        let err = engine
            .execute_output(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution(ExecutionError::TableExists(_))
        ));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "old\n1\n");

        engine.set_output(output(&out, true, true));
        let summary = engine.execute_output(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.rows_written, 3);
    }

    // Scenario: a directory of delimited files opened without naming a table.
    // Expected Outcome: the candidate tables are listed; naming one opens it.
    #[test]
    fn container_needs_table_selection() {
        let dir = tempdir().unwrap();
        write_csv(dir.path(), "parcels.csv", PARCELS_CSV);
        write_csv(dir.path(), "zones.csv", ZONES_CSV);
        let location = TableLocation::file(dir.path());

        match Adapter::open_source(&location) {
            Err(AdapterError::NeedsTableSelection { tables, .. }) => {
                assert_eq!(tables, vec!["parcels", "zones"]);
            }
            other => panic!("expected table selection, got {:?}", other.map(|s| s.name().to_string())),
        }

        let mut engine = engine();
        let alias = engine.open_source(&location.with_table("zones")).unwrap();
        assert_eq!(alias.as_str(), "zones");
        assert_eq!(engine.source_fields(&alias).unwrap().len(), 2);
    }

    // Scenario: joins two levels deep (contacts under owners) next to a lookup
    // joined on a text key.
    // Expected Outcome: every level resolves through its own parent row.
    #[tokio::test]
    async fn nested_joins_follow_their_parent() {
        let dir = tempdir().unwrap();
        let (mut engine, p, o) = parcels_and_owners(dir.path(), false);
        let zones = write_csv(dir.path(), "zones.csv", ZONES_CSV);
        let contacts = write_csv(dir.path(), "contacts.csv", "owner,phone\n200,555-0100\n");
        let z = open(&mut engine, &zones);
        let c = open(&mut engine, &contacts);
        engine.add_join(&z, "code", &p, "zone", false).unwrap();
        engine.add_join(&c, "owner", &o, "owner_id", false).unwrap();
        assert!(prepare(&mut engine).await.failed.is_empty());

        let mut sink = MemorySink::new("out");
        let rows = sink.output();
        let options = engine.execute_options().restricted(true);
        engine
            .run_join(&mut sink, options, &CancellationToken::new())
            .await
            .unwrap();

        let rows = rows.rows();
        let text = |field: &str| -> Vec<String> {
            rows.iter().map(|r| r.get_value(field).as_text()).collect()
        };
        assert_eq!(text("label"), vec!["Residential", "Commercial", "Residential"]);
        assert_eq!(text("phone"), vec!["", "555-0100", ""]);
    }

    // Scenario: a field divides by zero on one row.
    // Expected Outcome: that cell is empty, the error is reported, the run completes.
    #[tokio::test]
    async fn row_errors_do_not_abort_the_run() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), false);
        let index = engine.schema_mut().add_new_field();
        engine
            .schema_mut()
            .set_value(index, "!parcels.area! / (!parcels.id! - 2)")
            .unwrap();
        prepare(&mut engine).await;

        let out = dir.path().join("out.csv");
        engine.set_output(output(&out, false, true));
        let summary = engine.execute_output(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.row_errors[0].row, 2);
        assert_eq!(summary.row_errors[0].field, "NewField");

        let (_, rows) = read_table(&out).unwrap();
        assert_eq!(column(&rows, 6), vec!["-10.5", "", "30.25"]);
    }

    // Scenario: adding joined fields and renaming onto taken names.
    // Expected Outcome: names stay pairwise distinct ignoring case.
    #[test]
    fn output_names_stay_distinct() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), false);
        let renamed = engine.schema_mut().rename(1, "ID").unwrap();
        assert_eq!(renamed, "ID1");
        engine.schema_mut().rename(2, "Name").unwrap();
        engine.schema_mut().add_new_field();
        engine.schema_mut().add_new_field();

        let names = engine.schema().names();
        let distinct: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        assert_eq!(distinct.len(), names.len());
        assert!(names.contains(&"NewField1"));
    }

    // Scenario: the output format limits field names to four characters.
    // Expected Outcome: names are truncated and stay distinct.
    #[tokio::test]
    async fn names_fit_the_output_limit() {
        let dir = tempdir().unwrap();
        let (mut engine, _, _) = parcels_and_owners(dir.path(), false);
        prepare(&mut engine).await;

        let mut sink = MemorySink::new("out").with_field_name_limit(4);
        let written = sink.output();
        let options = engine.execute_options().restricted(true);
        engine
            .run_join(&mut sink, options, &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<String> = written.fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["id", "area", "zone", "owne", "parc", "name"]);
    }
}

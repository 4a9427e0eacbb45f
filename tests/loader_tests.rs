use std::{
    cell::Cell,
    sync::{Arc, Mutex},
};

use labelgraph::{
    BatchLoader, EdgeBatch, EdgeLabel, EdgeRecord, GraphExecutor, GraphTransaction, LabelGraphError, LoadPhase,
    LoaderConfig, LoaderState, MigrationOptions, PropertyDefinition, PropertyType, RowSet, SchemaDefinition,
    SchemaVersion, SqlValue, SqliteExecutor, VertexBatch, VertexLabel, VertexRecord, VertexRef, install_schema,
    list_staging_tables,
};
use serde_json::json;

fn social() -> SchemaDefinition {
    SchemaDefinition::new(SchemaVersion::new(1, 0, 0))
        .with_vertex(
            "Person",
            VertexLabel::new()
                .property("name", PropertyDefinition::new(PropertyType::String).required())
                .property("age", PropertyDefinition::new(PropertyType::Integer).with_min(0.0)),
        )
        .with_vertex(
            "Company",
            VertexLabel::new().property("name", PropertyDefinition::new(PropertyType::String).required()),
        )
        .with_edge(
            "KNOWS",
            EdgeLabel::new("Person", "Person")
                .property("since", PropertyDefinition::new(PropertyType::Date)),
        )
        .with_edge("WORKS_AT", EdgeLabel::new("Person", "Company"))
}

fn installed() -> SqliteExecutor {
    let mut executor = SqliteExecutor::open_in_memory().unwrap();
    install_schema(&mut executor, &social(), &MigrationOptions::apply()).unwrap();
    executor
}

fn people(names: &[&str]) -> VertexBatch<'static> {
    let records = names.iter().map(|name| VertexRecord::new().with("name", *name)).collect();
    VertexBatch::from_records("Person", records)
}

fn knows(pairs: &[(usize, usize)]) -> EdgeBatch<'static> {
    let records = pairs
        .iter()
        .map(|(from, to)| EdgeRecord::new(VertexRef::staged("Person", *from), VertexRef::staged("Person", *to)))
        .collect();
    EdgeBatch::from_records("KNOWS", records)
}

fn count(executor: &SqliteExecutor, sql: &str) -> i64 {
    executor.connection().query_row(sql, [], |row| row.get(0)).unwrap()
}

fn edge_pairs(executor: &SqliteExecutor, table: &str) -> Vec<(i64, i64)> {
    let mut stmt = executor
        .connection()
        .prepare(&format!("SELECT _from, _to FROM {table} ORDER BY _id"))
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn vertices_and_edges_commit_together() {
    let mut executor = installed();
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let report = loader
        .load(&social(), &[people(&["ada", "bob", "cy"])], &[knows(&[(0, 1), (1, 2)])])
        .unwrap();
    assert_eq!(loader.state(), LoaderState::Done);
    assert_eq!(report.vertices["Person"].staged, 3);
    assert_eq!(report.vertices["Person"].committed, 3);
    assert_eq!(report.edges["KNOWS"].staged, 2);
    assert_eq!(report.edges["KNOWS"].committed, 2);
    assert_eq!(report.committed_vertices(), 3);

    let names: Vec<(i64, String)> = {
        let mut stmt = executor.connection().prepare("SELECT _id, name FROM v_Person ORDER BY _id").unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    };
    assert_eq!(names, vec![(1, "ada".into()), (2, "bob".into()), (3, "cy".into())]);
    assert_eq!(edge_pairs(&executor, "e_KNOWS"), vec![(1, 2), (2, 3)]);
    assert!(list_staging_tables(&mut executor).unwrap().is_empty());
}

#[test]
fn staged_ids_follow_existing_rows_and_existing_refs_resolve() {
    let mut executor = installed();
    executor
        .connection()
        .execute_batch("INSERT INTO v_Person (_id, name) VALUES (10, 'old'); INSERT INTO v_Company (_id, name) VALUES (4, 'acme');")
        .unwrap();
    let works_at = EdgeBatch::from_records(
        "WORKS_AT",
        vec![
            EdgeRecord::new(VertexRef::staged("Person", 1), VertexRef::existing("Company", 4)),
            EdgeRecord::new(VertexRef::existing("Person", 10), VertexRef::existing("Company", 4)),
        ],
    );
    let friends = EdgeBatch::from_records(
        "KNOWS",
        vec![EdgeRecord::new(VertexRef::existing("Person", 10), VertexRef::staged("Person", 0)).with("since", "2020-01-02")],
    );
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    loader
        .load(&social(), &[people(&["ada", "bob"])], &[works_at, friends])
        .unwrap();

    assert_eq!(count(&executor, "SELECT MAX(_id) FROM v_Person"), 12);
    assert_eq!(edge_pairs(&executor, "e_WORKS_AT"), vec![(12, 4), (10, 4)]);
    assert_eq!(edge_pairs(&executor, "e_KNOWS"), vec![(10, 11)]);
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM e_KNOWS WHERE since = '2020-01-02'"), 1);
}

#[test]
fn unresolvable_staged_index_rejects_the_whole_load() {
    let mut executor = installed();
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader
        .load(&social(), &[people(&["ada", "bob", "cy"])], &[knows(&[(0, 1), (1, 5)])])
        .unwrap_err();
    assert_eq!(loader.state(), LoaderState::Failed);
    assert_eq!(err.load_phase(), Some(LoadPhase::Edges));
    assert_eq!(err.load_index(), Some(1));
    assert!(err.to_string().contains("KNOWS[1].to"), "{err}");

    assert_eq!(count(&executor, "SELECT COUNT(*) FROM v_Person"), 0);
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM e_KNOWS"), 0);
    assert!(list_staging_tables(&mut executor).unwrap().is_empty());
}

#[test]
fn invalid_records_fail_validation_with_their_path() {
    let mut executor = installed();
    let batch = VertexBatch::from_records(
        "Person",
        vec![
            VertexRecord::new().with("name", "ada"),
            VertexRecord::new().with("age", -3),
        ],
    );
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader.load(&social(), &[batch], &[]).unwrap_err();
    assert_eq!(err.load_phase(), Some(LoadPhase::Validation));
    assert_eq!(err.load_index(), Some(1));
    match &err {
        LabelGraphError::Load { issues, label, .. } => {
            assert_eq!(label.as_deref(), Some("Person"));
            let paths: Vec<&str> = issues.iter().map(|issue| issue.path.as_str()).collect();
            assert_eq!(paths, vec!["Person[1].age", "Person[1].name"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM v_Person"), 0);
}

#[test]
fn type_mismatches_are_reported_per_property() {
    let mut executor = installed();
    let batch = VertexBatch::from_records("Person", vec![VertexRecord::new().with("name", "ada").with("age", "abc")]);
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader.load(&social(), &[batch], &[]).unwrap_err();
    assert!(err.to_string().contains("Person[0].age: type mismatch"), "{err}");
}

#[test]
fn unknown_labels_fail_validation() {
    let mut executor = installed();
    let robots = VertexBatch::from_records("Robot", vec![VertexRecord::new()]);
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader.load(&social(), &[robots], &[]).unwrap_err();
    assert_eq!(err.load_phase(), Some(LoadPhase::Validation));
    assert!(err.to_string().contains("unknown vertex label"), "{err}");
}

#[test]
fn missing_existing_vertices_and_wrong_endpoint_labels_are_rejected() {
    let mut executor = installed();
    let dangling = EdgeBatch::from_records(
        "KNOWS",
        vec![EdgeRecord::new(VertexRef::staged("Person", 0), VertexRef::existing("Person", 99))],
    );
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader.load(&social(), &[people(&["ada"])], &[dangling]).unwrap_err();
    assert_eq!(err.load_phase(), Some(LoadPhase::Edges));
    assert!(err.to_string().contains("Person #99 does not exist"), "{err}");

    let crossed = EdgeBatch::from_records(
        "WORKS_AT",
        vec![EdgeRecord::new(VertexRef::staged("Person", 0), VertexRef::staged("Person", 0))],
    );
    let err = loader.load(&social(), &[people(&["ada"])], &[crossed]).unwrap_err();
    assert_eq!(err.load_index(), Some(0));
    assert!(err.to_string().contains("does not match declared Company"), "{err}");
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM v_Person"), 0);
}

#[test]
fn small_batches_and_streaming_sources_load_everything() {
    let mut executor = installed();
    let batch = VertexBatch::streaming("Person", || {
        (0..1_000).map(|n| VertexRecord::new().with("name", format!("p{n}")).with("age", n % 90))
    });
    let chain = EdgeBatch::streaming("KNOWS", || {
        (0..999).map(|n| EdgeRecord::new(VertexRef::staged("Person", n), VertexRef::staged("Person", n + 1)))
    });
    let config = LoaderConfig {
        batch_size: 7,
        ..LoaderConfig::default()
    };
    let mut loader = BatchLoader::new(&mut executor, config);
    let report = loader.load(&social(), &[batch], &[chain]).unwrap();
    assert_eq!(report.committed_vertices(), 1_000);
    assert_eq!(report.committed_edges(), 999);
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM e_KNOWS WHERE _to = _from + 1"), 999);
}

#[test]
fn sources_that_change_between_passes_are_rejected() {
    let mut executor = installed();
    let opened = Cell::new(0);
    let batch = VertexBatch::streaming("Person", || {
        opened.set(opened.get() + 1);
        let len = if opened.get() == 1 { 2 } else { 3 };
        (0..len).map(|n| VertexRecord::new().with("name", format!("p{n}")))
    });
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader.load(&social(), &[batch], &[]).unwrap_err();
    assert_eq!(err.load_phase(), Some(LoadPhase::Vertices));
    assert!(err.to_string().contains("more than the 2 records validated"), "{err}");
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM v_Person"), 0);
}

#[test]
fn edge_sources_that_shrink_between_passes_are_rejected() {
    let mut executor = installed();
    let opened = Cell::new(0);
    let edges = EdgeBatch::streaming("KNOWS", || {
        opened.set(opened.get() + 1);
        let len = if opened.get() == 1 { 2 } else { 1 };
        (0..len).map(|n| EdgeRecord::new(VertexRef::staged("Person", n), VertexRef::staged("Person", n + 1)))
    });
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader
        .load(&social(), &[people(&["ada", "bob", "cy"])], &[edges])
        .unwrap_err();
    assert_eq!(err.load_phase(), Some(LoadPhase::Edges));
    assert!(err.to_string().contains("yielded 1 records for staging but 2"), "{err}");
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM e_KNOWS"), 0);
    assert_eq!(count(&executor, "SELECT COUNT(*) FROM v_Person"), 0);
    assert!(list_staging_tables(&mut executor).unwrap().is_empty());
}

#[test]
fn progress_reports_each_phase() {
    let mut executor = installed();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let config = LoaderConfig {
        progress_interval: 2,
        ..LoaderConfig::default()
    }
    .with_progress(move |progress| {
        sink.lock()
            .unwrap()
            .push((progress.phase, progress.label.clone(), progress.current, progress.total));
    });
    let mut loader = BatchLoader::new(&mut executor, config);
    loader
        .load(&social(), &[people(&["ada", "bob", "cy"])], &[knows(&[(0, 1)])])
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&(LoaderState::StagingVertices, "Person".into(), 2, 3)));
    assert!(seen.contains(&(LoaderState::StagingVertices, "Person".into(), 3, 3)));
    assert!(seen.contains(&(LoaderState::StagingEdges, "KNOWS".into(), 1, 1)));
    assert!(seen.contains(&(LoaderState::Committing, "Person".into(), 3, 3)));
    assert!(seen.contains(&(LoaderState::Committing, "KNOWS".into(), 1, 1)));
}

#[test]
fn json_records_load_through_serde() {
    let mut executor = installed();
    let records: Vec<EdgeRecord> = serde_json::from_value(json!([
        {"from": {"kind": "staged", "label": "Person", "index": 0}, "to": {"kind": "staged", "label": "Person", "index": 1}, "properties": {"since": "2021-05-06"}}
    ]))
    .unwrap();
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    loader
        .load(&social(), &[people(&["ada", "bob"])], &[EdgeBatch::from_records("KNOWS", records)])
        .unwrap();
    assert_eq!(edge_pairs(&executor, "e_KNOWS"), vec![(1, 2)]);
}

/// Fails every statement containing `fail_on`, as a cancellation when `cancel` is set.
struct FailingExecutor {
    inner: SqliteExecutor,
    fail_on: String,
    cancel: bool,
}

struct FailingTransaction<'a> {
    inner: Box<dyn GraphTransaction + 'a>,
    fail_on: &'a str,
    cancel: bool,
}

impl GraphExecutor for FailingExecutor {
    fn begin(&mut self) -> Result<Box<dyn GraphTransaction + '_>, LabelGraphError> {
        let inner = self.inner.begin()?;
        Ok(Box::new(FailingTransaction {
            inner,
            fail_on: &self.fail_on,
            cancel: self.cancel,
        }))
    }
}

impl GraphTransaction for FailingTransaction<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, LabelGraphError> {
        if sql.contains(self.fail_on) {
            if self.cancel {
                return Err(LabelGraphError::cancelled(sql));
            }
            return Err(LabelGraphError::execution(sql, "injected failure"));
        }
        self.inner.execute(sql, params)
    }

    fn commit(self: Box<Self>) -> Result<(), LabelGraphError> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<(), LabelGraphError> {
        self.inner.rollback()
    }
}

#[test]
fn backend_failure_during_move_rolls_back_and_cleans_up() {
    let mut executor = FailingExecutor {
        inner: installed(),
        fail_on: "INSERT INTO \"e_KNOWS\"".into(),
        cancel: false,
    };
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader
        .load(&social(), &[people(&["ada", "bob"])], &[knows(&[(0, 1)])])
        .unwrap_err();
    assert_eq!(err.load_phase(), Some(LoadPhase::Transaction));
    assert!(err.to_string().contains("injected failure"), "{err}");

    assert_eq!(count(&executor.inner, "SELECT COUNT(*) FROM v_Person"), 0);
    assert!(list_staging_tables(&mut executor.inner).unwrap().is_empty());

    executor.fail_on = "no statement contains this".into();
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    loader
        .load(&social(), &[people(&["ada", "bob"])], &[knows(&[(0, 1)])])
        .unwrap();
    assert_eq!(count(&executor.inner, "SELECT COUNT(*) FROM v_Person"), 2);
}

#[test]
fn failed_cleanup_reports_both_errors() {
    let mut executor = FailingExecutor {
        inner: installed(),
        fail_on: "DROP TABLE IF EXISTS \"stg_".into(),
        cancel: false,
    };
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader.load(&social(), &[people(&["ada"])], &[]).unwrap_err();
    assert_eq!(err.load_phase(), Some(LoadPhase::Cleanup));
    let source = std::error::Error::source(&err).expect("original error");
    assert!(source.to_string().contains("transaction phase"), "{source}");
    assert_eq!(count(&executor.inner, "SELECT COUNT(*) FROM v_Person"), 0);
}

#[test]
fn cancellation_mid_staging_still_cleans_up() {
    let mut executor = FailingExecutor {
        inner: installed(),
        fail_on: "INSERT INTO \"stg_".into(),
        cancel: true,
    };
    let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
    let err = loader.load(&social(), &[people(&["ada", "bob"])], &[]).unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(err.load_phase(), Some(LoadPhase::Vertices));
    assert!(list_staging_tables(&mut executor.inner).unwrap().is_empty());
    assert_eq!(count(&executor.inner, "SELECT COUNT(*) FROM v_Person"), 0);
}

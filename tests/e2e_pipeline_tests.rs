use rusqlite::Connection;
use std::path::Path;
use tempfile::tempdir;

use fuzzy_row_matcher::algos::{Algorithm, AlgorithmKind};
use fuzzy_row_matcher::config::{Aggregation, SourceDescriptor, TargetDescriptor};
use fuzzy_row_matcher::{run, Config, Error, MatchSettings};

/// Source table:
///   id | name  | city
///    1 | abc   | Reno
///    2 | abd   | Reno
///    3 | xyz   | Elko
///    4 | abc   | Ely     <- same name as row 1
fn create_source(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, city TEXT);
         INSERT INTO people VALUES (1, 'abc', 'Reno');
         INSERT INTO people VALUES (2, 'abd', 'Reno');
         INSERT INTO people VALUES (3, 'xyz', 'Elko');
         INSERT INTO people VALUES (4, 'abc', 'Ely');",
    )
    .unwrap();
}

fn settings(source: SourceDescriptor) -> MatchSettings {
    MatchSettings {
        source: Some(source),
        algorithms: vec![Algorithm::LevenshteinDistance { threshold: 1 }],
        ..Default::default()
    }
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn test_levenshtein_run_without_target() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("source.db");
    create_source(&db);

    let source = SourceDescriptor::new(&db, "SELECT name FROM people WHERE id <= 3");
    let config = Config::from_settings(settings(source)).unwrap();
    let report = run(&config).unwrap();

    assert_eq!(report.row_count, 3);
    assert_eq!(report.comparison_count, 3);
    assert_eq!(report.match_count, 1);
    assert_eq!(report.duplicate_count, 0);
    assert!(report.target_timestamp.is_none());
    assert!(report.algorithms.contains_key(&AlgorithmKind::LevenshteinDistance));
}

#[test]
fn test_run_persists_snapshots_and_scores() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("source.db");
    let target = dir.path().join("target.db");
    create_source(&db);

    let source = SourceDescriptor::new(&db, "people").with_hash_columns(["name"]);
    let config = Config::from_settings(MatchSettings {
        target: Some(TargetDescriptor::new(&target)),
        commit_size: Some(2),
        ..settings(source)
    })
    .unwrap();
    let report = run(&config).unwrap();

    // Pairs: abc/abd, abc/xyz, abc/abc, abd/xyz, abd/abc, xyz/abc
    assert_eq!(report.row_count, 4);
    assert_eq!(report.comparison_count, 6);
    // abc/abd, abc/abc, abd/abc
    assert_eq!(report.match_count, 3);

    let ts = report.target_timestamp.expect("target timestamp");
    let conn = Connection::open(&target).unwrap();
    // Rows 1 and 4 share a content hash, so one snapshot covers both
    assert_eq!(count(&conn, &format!("SELECT COUNT(*) FROM json_data_{}", ts)), 3);
    assert_eq!(count(&conn, &format!("SELECT COUNT(*) FROM scores_{}", ts)), 3);
    assert_eq!(
        count(
            &conn,
            &format!("SELECT COUNT(*) FROM scores_{} WHERE levenshtein_distance IS NULL", ts)
        ),
        0
    );
    assert_eq!(
        count(
            &conn,
            &format!("SELECT COUNT(*) FROM scores_{} WHERE jaro_distance IS NOT NULL", ts)
        ),
        0
    );

    let json: String = conn
        .query_row(
            &format!(
                "SELECT left_json_data FROM final_scores_{} WHERE levenshtein_distance = 0",
                ts
            ),
            [],
            |row| row.get(0),
        )
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["name"], "abc");
    assert_eq!(value["id"], 1);
}

#[test]
fn test_duplicates_skipped_on_hash_columns() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("source.db");
    create_source(&db);

    let source = SourceDescriptor::new(&db, "people").with_hash_columns(["name"]);
    let config = Config::from_settings(MatchSettings {
        ignore_dupes: Some(true),
        aggregation: Some(Aggregation::All),
        ..settings(source)
    })
    .unwrap();
    let report = run(&config).unwrap();

    assert_eq!(report.duplicate_count, 1);
    assert_eq!(report.comparison_count, 5);
    // abc/abd and abd/abc
    assert_eq!(report.match_count, 2);
}

#[test]
fn test_unsupported_target_vendor() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("source.db");
    let target = dir.path().join("target.db");
    create_source(&db);

    let config = Config::from_settings(MatchSettings {
        target: Some(TargetDescriptor::new(&target).with_vendor("postgres")),
        ..settings(SourceDescriptor::new(&db, "people"))
    })
    .unwrap();

    let result = run(&config);
    assert!(matches!(result, Err(Error::UnsupportedSource(v)) if v == "postgres"));
    assert!(!target.exists());
}

#[test]
fn test_missing_source_database() {
    let dir = tempdir().unwrap();
    let config = Config::from_settings(settings(SourceDescriptor::new(
        dir.path().join("missing.db"),
        "people",
    )))
    .unwrap();
    assert!(matches!(run(&config), Err(Error::Source(_))));
}

#[test]
fn test_report_written_as_json() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("source.db");
    let report_path = dir.path().join("report.json");
    create_source(&db);

    let config = Config::from_settings(settings(SourceDescriptor::new(&db, "people"))).unwrap();
    let report = run(&config).unwrap();
    report.write_to_file(&report_path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["row_count"], 4);
    assert!(json["algorithms"]["LevenshteinDistance"]["median"].is_number());
}

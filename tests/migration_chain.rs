//! Revision chain behaviour against SQLite using the shipped revisions

use cellarguard::migration::{MigrationError, Migrator, SchemaShape};
use cellarguard::model::registry;
use cellarguard::{CellarExecutor, SqliteExecutor};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn shipped() -> Migrator {
    Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).unwrap()
}

fn write_revision(dir: &Path, id: &str, parent: Option<&str>, minute: u32, up: &str, down: &str) -> PathBuf {
    let path = dir.join(format!("{id}_step_{minute}.sql"));
    let content = format!(
        "-- revision: {id}\n-- down_revision: {}\n-- branch_labels: None\n-- depends_on: None\n\
         -- message: step {minute}\n-- created: 2024-05-01 08:{minute:02}:00\n\n\
         -- +upgrade\n{up}\n\n-- +downgrade\n{down}\n",
        parent.unwrap_or("None")
    );
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_full_chain_records_last_revision() {
    let migrator = shipped();
    let db = SqliteExecutor::open_in_memory().unwrap();

    let applied = migrator.upgrade(&db, "head").unwrap();
    let last = migrator.chain().revisions().last().unwrap().id.clone();

    assert_eq!(applied.len(), migrator.chain().revisions().len());
    assert_eq!(applied.last(), Some(&last));
    assert_eq!(migrator.current(&db).unwrap(), vec![last]);
    assert!(migrator.status(&db).unwrap().is_up_to_date());
}

#[test]
fn test_shipped_revisions_match_the_model() {
    let changes = shipped().check(registry()).unwrap();
    let rendered: Vec<String> = changes.iter().map(|c| c.to_string()).collect();
    assert!(rendered.is_empty(), "unexpected drift: {rendered:?}");
}

#[test]
fn test_failed_revision_keeps_previous_version() {
    let dir = TempDir::new().unwrap();
    write_revision(
        dir.path(),
        "aaaaaaaaaaaa",
        None,
        1,
        "CREATE TABLE suppliers (id UUID NOT NULL PRIMARY KEY, name VARCHAR(200) NOT NULL);",
        "DROP TABLE suppliers;",
    );
    write_revision(
        dir.path(),
        "bbbbbbbbbbbb",
        Some("aaaaaaaaaaaa"),
        2,
        "ALTER TABLE suppliers ADD COLUMN country VARCHAR(100);",
        "ALTER TABLE suppliers DROP COLUMN country;",
    );
    write_revision(
        dir.path(),
        "cccccccccccc",
        Some("bbbbbbbbbbbb"),
        3,
        "CREATE TABLE wines (id UUID NOT NULL PRIMARY KEY);\nALTER TABLE no_such_table ADD COLUMN x INTEGER;",
        "DROP TABLE wines;",
    );
    let migrator = Migrator::new(dir.path()).unwrap();
    let db = SqliteExecutor::open_in_memory().unwrap();

    match migrator.upgrade(&db, "head") {
        Err(MigrationError::ApplyFailed {
            revision,
            statement,
            last_good,
            ..
        }) => {
            assert_eq!(revision, "cccccccccccc");
            assert!(statement.contains("no_such_table"));
            assert_eq!(last_good.as_deref(), Some("bbbbbbbbbbbb"));
        }
        other => panic!("expected ApplyFailed, got {other:?}"),
    }

    assert_eq!(migrator.current(&db).unwrap(), vec!["bbbbbbbbbbbb".to_string()]);
    let tables = db.list_tables().unwrap();
    assert!(tables.contains(&"suppliers".to_string()));
    assert!(!tables.contains(&"wines".to_string()), "partial revision was not rolled back");
}

#[test]
fn test_upgrade_then_downgrade_restores_columns() {
    let migrator = shipped();
    let db = SqliteExecutor::open_in_memory().unwrap();
    let revisions: Vec<String> = migrator.chain().revisions().iter().map(|r| r.id.clone()).collect();

    for (i, id) in revisions.iter().enumerate() {
        let before = SchemaShape::introspect(&db).unwrap();
        migrator.upgrade(&db, id).unwrap();
        assert_ne!(SchemaShape::introspect(&db).unwrap(), before, "{id} changed nothing");

        migrator.downgrade(&db, "-1").unwrap();
        assert_eq!(SchemaShape::introspect(&db).unwrap(), before, "{id} did not round-trip");
        let expected: Vec<String> = revisions[..i].last().cloned().into_iter().collect();
        assert_eq!(migrator.current(&db).unwrap(), expected);

        migrator.upgrade(&db, id).unwrap();
    }
}

#[test]
fn test_fiken_sync_status_revision_adds_one_column() {
    let migrator = shipped();
    let db = SqliteExecutor::open_in_memory().unwrap();
    migrator.upgrade(&db, "3c4d5e6f7081").unwrap();
    assert!(!db.list_columns("wine_batches").unwrap().contains(&"fiken_sync_status".to_string()));

    migrator.upgrade(&db, "+1").unwrap();
    assert!(db.list_columns("wine_batches").unwrap().contains(&"fiken_sync_status".to_string()));

    migrator.downgrade(&db, "base").unwrap();
    assert!(migrator.current(&db).unwrap().is_empty());
    let user_tables: Vec<String> = db
        .list_tables()
        .unwrap()
        .into_iter()
        .filter(|t| !t.starts_with("cellar_"))
        .collect();
    assert!(user_tables.is_empty(), "left behind: {user_tables:?}");
}

#[test]
fn test_history_is_newest_first() {
    let migrator = shipped();
    let ids: Vec<&str> = migrator.history().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["4d5e6f708192", "3c4d5e6f7081", "2b3c4d5e6f70", "1a2b3c4d5e6f"]
    );
}

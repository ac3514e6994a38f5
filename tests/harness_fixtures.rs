//! Migration test harness runs against the shipped revisions

use cellarguard::harness::{self, fixtures, CheckFailure, HarnessOptions, KeepDatabase};
use cellarguard::migration::Migrator;
use cellarguard::model::catalog::WineInventory;
use cellarguard::model::{insert_sql, registry, Lifecycle, TableDef};
use cellarguard::{CellarExecutor, Dialect, Ore, SqliteExecutor};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

fn repo_migrations() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

fn inventory(batch_id: Uuid, cost: i64, selling: i64) -> WineInventory {
    WineInventory {
        id: Uuid::new_v4(),
        wine_id: None,
        batch_id,
        quantity_available: 12,
        quantity_reserved: 0,
        quantity_sold: 0,
        cost_per_bottle: Ore::signed(cost),
        selling_price: Ore::signed(selling),
        minimum_stock_level: 2,
        location: Some("Oslo lager".to_string()),
        lifecycle: Lifecycle::Active,
    }
}

#[test]
fn test_harness_passes_on_shipped_revisions() {
    let report = harness::run(&HarnessOptions::new(repo_migrations())).unwrap();

    assert!(report.passed(), "{:?}", report.failures);
    assert_eq!(report.heads, vec!["4d5e6f708192".to_string()]);
    assert_eq!(report.applied.len(), 4);
    assert_eq!(report.row_summary(), "wine_batches: 4 rows, customers: 3 rows");
    assert!(report.kept_database.is_none());

    let batches = report.tables.iter().find(|t| t.name == "wine_batches").unwrap();
    assert_eq!(batches.rows, 4);
    assert!(batches.columns.contains(&"landed_cost_per_bottle_ore".to_string()));
    let stock = report.tables.iter().find(|t| t.name == "wine_inventory").unwrap();
    assert_eq!(stock.rows, 4, "margin checks ran against an empty inventory");
    assert!(harness::describe(&report).contains("wine_batches"));
}

#[test]
fn test_keep_always_leaves_the_database() {
    let options = HarnessOptions {
        migrations_dir: repo_migrations(),
        keep_database: KeepDatabase::Always,
    };
    let report = harness::run(&options).unwrap();

    let kept = report.kept_database.clone().expect("database path");
    assert!(kept.is_file());
    assert!(kept.ends_with("test_migration.db"));

    let db = SqliteExecutor::open(&kept).unwrap();
    assert_eq!(db.count_rows("customers").unwrap(), 3);
    drop(db);
    fs::remove_dir_all(kept.parent().unwrap()).unwrap();
}

#[test]
fn test_chain_behind_the_model_reports_missing_column() {
    let temp = TempDir::new().unwrap();
    let migrations = temp.path().join("migrations");
    fs::create_dir(&migrations).unwrap();
    let old_model: Vec<TableDef> = registry()
        .iter()
        .cloned()
        .map(|mut table| {
            table.columns.retain(|c| c.name != "fiken_sync_status");
            table
        })
        .collect();
    Migrator::new(&migrations)
        .unwrap()
        .generate("initial schema", true, &old_model)
        .unwrap()
        .unwrap();

    let migrator = Migrator::new(&migrations).unwrap();
    let db = SqliteExecutor::open_in_memory().unwrap();
    let report = harness::verify(&db, &migrator, registry(), &fixtures::standard()).unwrap();

    assert!(!report.passed());
    assert_eq!(
        report.failures,
        vec![CheckFailure::MissingColumn {
            table: "wine_batches".to_string(),
            column: "fiken_sync_status".to_string(),
        }]
    );
    assert!(report.row_counts.is_empty(), "fixtures must not load into a broken schema");
}

#[test]
fn test_inventory_margin_is_generated_exactly() {
    let migrator = Migrator::new(repo_migrations()).unwrap();
    let db = SqliteExecutor::open_in_memory().unwrap();
    let fixtures = fixtures::standard();
    let report = harness::verify(&db, &migrator, registry(), &fixtures).unwrap();
    assert!(report.passed(), "{:?}", report.failures);

    let batch_id = fixtures.batches[0].id;
    let stock = inventory(batch_id, 48_550, 89_900);
    db.execute(&insert_sql(&stock, Dialect::Sqlite).unwrap()).unwrap();

    let row = db
        .query_opt(&format!(
            "SELECT margin_per_bottle_ore, margin_basis_points FROM wine_inventory WHERE id = '{}'",
            stock.id
        ))
        .unwrap()
        .unwrap();
    assert_eq!(row.get_i64("margin_per_bottle_ore").unwrap(), 41_350);
    assert_eq!(row.get_i64("margin_basis_points").unwrap(), 4_599);

    let negative = inventory(batch_id, -1, 10_000);
    assert!(db.execute(&insert_sql(&negative, Dialect::Sqlite).unwrap()).is_err());
}

#[test]
fn test_inventory_requires_an_existing_batch() {
    let migrator = Migrator::new(repo_migrations()).unwrap();
    let db = SqliteExecutor::open_in_memory().unwrap();
    migrator.upgrade(&db, "head").unwrap();

    let orphan = inventory(Uuid::new_v4(), 100, 200);
    assert!(db.execute(&insert_sql(&orphan, Dialect::Sqlite).unwrap()).is_err());
}

//! Local migration test harness.
//!
//! Applies the whole revision chain to a fresh SQLite database, checks the
//! result against the model registry, loads the fixture set and verifies row
//! counts and the monetary invariants directly in the database.

pub mod fixtures;

use crate::executor::{CellarExecutor, DbError};
use crate::migration::{MigrationError, Migrator};
use crate::model::catalog::WineInventory;
use crate::model::{registry, ModelError, Record, TableDef};
use crate::money;
use crate::sqlite::SqliteExecutor;
use fixtures::Fixtures;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("harness I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("fixture rows for {table} were rejected: {message}")]
    Fixture { table: String, message: String },
}

/// When to keep the scratch database after a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeepDatabase {
    Never,
    #[default]
    OnFailure,
    Always,
}

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub migrations_dir: PathBuf,
    pub keep_database: KeepDatabase,
}

impl HarnessOptions {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            keep_database: KeepDatabase::default(),
        }
    }
}

/// One failed assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    MissingTable { table: String },
    MissingColumn { table: String, column: String },
    VersionMismatch { expected: Vec<String>, recorded: Vec<String> },
    FixtureLoad { table: String, message: String },
    RowCount { table: String, expected: i64, actual: i64 },
    Invariant { table: String, message: String },
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::MissingTable { table } => write!(f, "{table}: table missing after migration"),
            CheckFailure::MissingColumn { table, column } => {
                write!(f, "{table}: column {column} missing after migration")
            }
            CheckFailure::VersionMismatch { expected, recorded } => write!(
                f,
                "version table records [{}], expected [{}]",
                recorded.join(", "),
                expected.join(", ")
            ),
            CheckFailure::FixtureLoad { table, message } => {
                write!(f, "{table}: fixture load failed: {message}")
            }
            CheckFailure::RowCount { table, expected, actual } => {
                write!(f, "{table}: expected {expected} rows, found {actual}")
            }
            CheckFailure::Invariant { table, message } => write!(f, "{table}: {message}"),
        }
    }
}

/// Shape and size of one table after the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessReport {
    pub applied: Vec<String>,
    pub heads: Vec<String>,
    /// Fixture tables and their row counts, in load order
    pub row_counts: Vec<(String, i64)>,
    pub tables: Vec<TableSummary>,
    pub failures: Vec<CheckFailure>,
    /// Scratch database left on disk for inspection
    pub kept_database: Option<PathBuf>,
}

impl HarnessReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// `wine_batches: 4 rows, customers: 3 rows`
    pub fn row_summary(&self) -> String {
        self.row_counts
            .iter()
            .map(|(table, rows)| format!("{table}: {rows} rows"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Run the harness in a scratch directory
pub fn run(options: &HarnessOptions) -> Result<HarnessReport, HarnessError> {
    let migrator = Migrator::new(&options.migrations_dir)?;
    let dir = tempfile::Builder::new()
        .prefix("cellarguard_harness_")
        .tempdir()?;
    let db_path = dir.path().join("test_migration.db");
    log::info!("Created test database: {}", db_path.display());

    let mut report = {
        let db = SqliteExecutor::open(&db_path)?;
        verify(&db, &migrator, registry(), &fixtures::standard())?
    };

    let keep = match options.keep_database {
        KeepDatabase::Always => true,
        KeepDatabase::OnFailure => !report.passed(),
        KeepDatabase::Never => false,
    };
    if keep {
        let kept = dir.keep();
        report.kept_database = Some(kept.join("test_migration.db"));
        log::info!("Kept test database in {}", kept.display());
    } else {
        dir.close()?;
        log::debug!("Cleaned up test environment");
    }
    Ok(report)
}

/// Migrate `executor` to all heads and check it against `tables` and `fixtures`.
///
/// Assertion failures are collected in the report; errors are reserved for
/// problems that stop the run (unreadable revisions, a failed revision).
pub fn verify(
    executor: &dyn CellarExecutor,
    migrator: &Migrator,
    tables: &[TableDef],
    fixtures: &Fixtures,
) -> Result<HarnessReport, HarnessError> {
    let mut report = HarnessReport {
        applied: migrator.upgrade(executor, "heads")?,
        ..Default::default()
    };
    log::info!("Applied {} revision(s)", report.applied.len());

    let expected_heads: Vec<String> = migrator.chain().heads().iter().map(|r| r.id.clone()).collect();
    report.heads = migrator.current(executor)?;
    if report.heads != expected_heads {
        report.failures.push(CheckFailure::VersionMismatch {
            expected: expected_heads,
            recorded: report.heads.clone(),
        });
    }

    check_tables(executor, tables, &mut report)?;
    if !report.passed() {
        return Ok(report);
    }

    match fixtures::load(executor, fixtures) {
        Ok(()) => {}
        Err(HarnessError::Fixture { table, message }) => {
            report.failures.push(CheckFailure::FixtureLoad { table, message });
            return Ok(report);
        }
        Err(other) => return Err(other),
    }

    for (table, expected) in fixtures.expected_counts() {
        let actual = executor.count_rows(table)?;
        report.row_counts.push((table.to_string(), actual));
        if actual != expected {
            report.failures.push(CheckFailure::RowCount {
                table: table.to_string(),
                expected,
                actual,
            });
        }
    }

    check_money(executor, tables, &mut report)?;
    check_batch_costs(executor, fixtures, &mut report)?;
    check_inventory_margins(executor, fixtures, &mut report)?;
    summarize(executor, &mut report)?;

    if report.passed() {
        log::info!("All migration tests passed: {}", report.row_summary());
    } else {
        for failure in &report.failures {
            log::error!("{}", failure);
        }
    }
    Ok(report)
}

fn check_tables(
    executor: &dyn CellarExecutor,
    tables: &[TableDef],
    report: &mut HarnessReport,
) -> Result<(), HarnessError> {
    let present = executor.list_tables()?;
    for table in tables {
        if !present.contains(&table.name) {
            report.failures.push(CheckFailure::MissingTable {
                table: table.name.clone(),
            });
            continue;
        }
        let columns = executor.list_columns(&table.name)?;
        for column in &table.columns {
            if !columns.contains(&column.name) {
                report.failures.push(CheckFailure::MissingColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Every amount column is non-negative and every inventory margin is exact
fn check_money(
    executor: &dyn CellarExecutor,
    tables: &[TableDef],
    report: &mut HarnessReport,
) -> Result<(), HarnessError> {
    for table in tables {
        for column in table.columns.iter().filter(|c| c.money.is_some()) {
            // margins may legitimately be negative
            if column.is_generated() && column.name.starts_with("margin") {
                continue;
            }
            let negative = count(
                executor,
                &format!("SELECT COUNT(*) AS n FROM {} WHERE {} < 0", table.name, column.name),
            )?;
            if negative > 0 {
                report.failures.push(CheckFailure::Invariant {
                    table: table.name.clone(),
                    message: format!("{negative} row(s) with negative {}", column.name),
                });
            }
        }
    }

    if tables.iter().any(|t| t.name == "wine_inventory") {
        let drift = count(
            executor,
            "SELECT COUNT(*) AS n FROM wine_inventory \
             WHERE margin_per_bottle_ore <> selling_price_ore - cost_per_bottle_ore",
        )?;
        if drift > 0 {
            report.failures.push(CheckFailure::Invariant {
                table: "wine_inventory".to_string(),
                message: format!("{drift} row(s) where margin differs from selling price minus cost"),
            });
        }
    }
    Ok(())
}

/// Generated landed costs agree with the in-process computation
fn check_batch_costs(
    executor: &dyn CellarExecutor,
    fixtures: &Fixtures,
    report: &mut HarnessReport,
) -> Result<(), HarnessError> {
    for batch in &fixtures.batches {
        let row = executor.query_opt(&format!(
            "SELECT total_cost_ore, landed_cost_per_bottle_ore FROM wine_batches WHERE batch_number = '{}'",
            crate::executor::escape_literal(&batch.batch_number)
        ))?;
        let Some(row) = row else { continue };
        let stored = (row.get_i64("total_cost_ore")?, row.get_i64("landed_cost_per_bottle_ore")?);
        let computed = (batch.total_cost().minor(), batch.landed_cost_per_bottle().minor());
        if stored != computed {
            report.failures.push(CheckFailure::Invariant {
                table: "wine_batches".to_string(),
                message: format!(
                    "{}: database landed cost {:?} differs from computed {:?}",
                    batch.batch_number, stored, computed
                ),
            });
        }
    }
    Ok(())
}

/// Every fixture stock row loaded and carries the margins computed in process
fn check_inventory_margins(
    executor: &dyn CellarExecutor,
    fixtures: &Fixtures,
    report: &mut HarnessReport,
) -> Result<(), HarnessError> {
    let stocked = executor.count_rows(WineInventory::TABLE)?;
    let expected = fixtures.inventory.len() as i64;
    if stocked != expected {
        report.failures.push(CheckFailure::RowCount {
            table: WineInventory::TABLE.to_string(),
            expected,
            actual: stocked,
        });
    }
    for stock in &fixtures.inventory {
        let row = executor.query_opt(&format!(
            "SELECT margin_per_bottle_ore, margin_basis_points FROM wine_inventory WHERE id = '{}'",
            stock.id
        ))?;
        let Some(row) = row else { continue };
        let stored = (row.get_i64("margin_per_bottle_ore")?, row.get_i64("margin_basis_points")?);
        let computed = (
            money::margin_per_bottle(stock.cost_per_bottle, stock.selling_price).minor(),
            money::margin_basis_points(stock.cost_per_bottle, stock.selling_price),
        );
        if stored != computed {
            report.failures.push(CheckFailure::Invariant {
                table: WineInventory::TABLE.to_string(),
                message: format!(
                    "{}: database margin {:?} differs from computed {:?}",
                    stock.id, stored, computed
                ),
            });
        }
    }
    Ok(())
}

fn summarize(executor: &dyn CellarExecutor, report: &mut HarnessReport) -> Result<(), HarnessError> {
    for name in executor.list_tables()? {
        report.tables.push(TableSummary {
            columns: executor.list_columns(&name)?,
            rows: executor.count_rows(&name)?,
            name,
        });
    }
    Ok(())
}

fn count(executor: &dyn CellarExecutor, sql: &str) -> Result<i64, DbError> {
    match executor.query_opt(sql)? {
        Some(row) => row.get_i64("n"),
        None => Ok(0),
    }
}

/// Human-readable schema and row-count listing for inspection mode
pub fn describe(report: &HarnessReport) -> String {
    let mut out = String::new();
    for table in &report.tables {
        out.push_str(&format!("{} ({} rows)\n", table.name, table.rows));
        for column in &table.columns {
            out.push_str(&format!("    {column}\n"));
        }
    }
    out
}

/// Whether `path` is inside a migrations directory the harness would replay
pub fn is_revision_file(path: &Path, migrations_dir: &Path) -> bool {
    path.starts_with(migrations_dir) && path.extension().map_or(false, |e| e == "sql")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages_name_the_element() {
        let missing = CheckFailure::MissingColumn {
            table: "wine_batches".into(),
            column: "fiken_sync_status".into(),
        };
        assert_eq!(
            missing.to_string(),
            "wine_batches: column fiken_sync_status missing after migration"
        );
        let rows = CheckFailure::RowCount {
            table: "customers".into(),
            expected: 3,
            actual: 2,
        };
        assert_eq!(rows.to_string(), "customers: expected 3 rows, found 2");
    }

    #[test]
    fn test_row_summary() {
        let report = HarnessReport {
            row_counts: vec![("wine_batches".into(), 4), ("customers".into(), 3)],
            ..Default::default()
        };
        assert_eq!(report.row_summary(), "wine_batches: 4 rows, customers: 3 rows");
        assert!(report.passed());
    }

    #[test]
    fn test_is_revision_file() {
        let dir = Path::new("migrations");
        assert!(is_revision_file(Path::new("migrations/3b9a8c7d6e5f_init.sql"), dir));
        assert!(!is_revision_file(Path::new("src/model/catalog.rs"), dir));
    }
}

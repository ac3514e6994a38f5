//! Revision bookkeeping tables
//!
//! `cellar_version` holds one row per current head (a single row on a linear
//! chain). `cellar_revision_log` records every applied or reverted revision
//! with its file checksum. Both are written inside the revision's
//! transaction, so they never disagree with the schema.

use super::record::RevisionRecord;
use super::revision::Direction;
use super::MigrationError;
use crate::executor::{CellarExecutor, DbError};
use chrono::Utc;
use sea_query::{ColumnDef, Expr, Order, Query, Table, TableCreateStatement};

pub const VERSION_TABLE: &str = "cellar_version";
pub const LOG_TABLE: &str = "cellar_revision_log";

pub fn create_version_table() -> TableCreateStatement {
    Table::create()
        .table(VERSION_TABLE)
        .if_not_exists()
        .col(
            ColumnDef::new("version_num")
                .string_len(32)
                .not_null()
                .primary_key(),
        )
        .to_owned()
}

pub fn create_log_table() -> TableCreateStatement {
    Table::create()
        .table(LOG_TABLE)
        .if_not_exists()
        .col(
            ColumnDef::new("id")
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new("revision").string_len(32).not_null())
        .col(ColumnDef::new("direction").string_len(10).not_null())
        .col(ColumnDef::new("checksum").string_len(64).not_null())
        .col(ColumnDef::new("applied_at").string_len(40).not_null())
        .col(ColumnDef::new("execution_time_ms").big_integer())
        .to_owned()
}

/// Create both tables if they do not exist
pub fn initialize_state_tables(executor: &dyn CellarExecutor) -> Result<(), DbError> {
    let dialect = executor.dialect();
    executor.execute(&dialect.render_table(&create_version_table()))?;
    executor.execute(&dialect.render_table(&create_log_table()))?;
    Ok(())
}

/// Current heads recorded in the version table
pub fn current_heads(executor: &dyn CellarExecutor) -> Result<Vec<String>, DbError> {
    let stmt = Query::select()
        .column("version_num")
        .from(VERSION_TABLE)
        .order_by("version_num", Order::Asc)
        .to_owned();
    executor
        .query(&executor.dialect().render_query(&stmt))?
        .iter()
        .map(|row| row.get_string("version_num"))
        .collect()
}

/// Replace the recorded heads
pub fn write_heads(executor: &dyn CellarExecutor, heads: &[String]) -> Result<(), DbError> {
    let dialect = executor.dialect();
    executor.execute(&dialect.render_query(&Query::delete().from_table(VERSION_TABLE).to_owned()))?;
    for head in heads {
        let mut stmt = Query::insert();
        stmt.into_table(VERSION_TABLE).columns(["version_num"]);
        stmt.values([head.as_str().into()])
            .map_err(|e| DbError::Other(e.to_string()))?;
        executor.execute(&dialect.render_query(&stmt))?;
    }
    Ok(())
}

/// Append a log entry
pub fn log_revision(
    executor: &dyn CellarExecutor,
    revision: &str,
    direction: Direction,
    checksum: &str,
    execution_time_ms: i64,
) -> Result<(), DbError> {
    let mut stmt = Query::insert();
    stmt.into_table(LOG_TABLE).columns([
        "revision",
        "direction",
        "checksum",
        "applied_at",
        "execution_time_ms",
    ]);
    stmt.values([
        revision.into(),
        direction.as_str().into(),
        checksum.into(),
        Utc::now().to_rfc3339().into(),
        execution_time_ms.into(),
    ])
    .map_err(|e| DbError::Other(e.to_string()))?;
    executor.execute(&executor.dialect().render_query(&stmt))?;
    Ok(())
}

/// Every log entry, oldest first
pub fn read_log(executor: &dyn CellarExecutor) -> Result<Vec<RevisionRecord>, MigrationError> {
    let stmt = Query::select()
        .columns([
            "revision",
            "direction",
            "checksum",
            "applied_at",
            "execution_time_ms",
        ])
        .from(LOG_TABLE)
        .order_by("id", Order::Asc)
        .to_owned();
    executor
        .query(&executor.dialect().render_query(&stmt))?
        .iter()
        .map(RevisionRecord::from_row)
        .collect()
}

/// Checksum recorded by the most recent upgrade of `revision`
pub fn applied_checksum(
    executor: &dyn CellarExecutor,
    revision: &str,
) -> Result<Option<String>, DbError> {
    let stmt = Query::select()
        .column("checksum")
        .from(LOG_TABLE)
        .and_where(Expr::col("revision").eq(revision))
        .and_where(Expr::col("direction").eq(Direction::Upgrade.as_str()))
        .order_by("id", Order::Desc)
        .limit(1)
        .to_owned();
    match executor.query_opt(&executor.dialect().render_query(&stmt))? {
        Some(row) => row.get_string("checksum").map(Some),
        None => Ok(None),
    }
}

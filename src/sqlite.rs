//! SQLite executor backed by `rusqlite`.
//!
//! Used by the local test harness, by drift detection (which replays the
//! revision chain into a scratch database) and by local development.

use crate::executor::{CellarExecutor, DbError, Dialect, Row, Value};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a statement waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteExecutor {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteExecutor {
    /// Open (or create) a database file with foreign keys enforced
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        log::debug!("opened SQLite database at {}", path.display());
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self { conn, path: None })
    }

    fn configure(conn: &Connection) -> Result<(), DbError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    /// Database file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn statement_error(sql: &str, err: rusqlite::Error) -> DbError {
        DbError::Statement {
            statement: sql.trim().to_string(),
            message: err.to_string(),
        }
    }
}

impl CellarExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str) -> Result<u64, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("sqlite.execute").entered();

        self.conn
            .execute_batch(sql)
            .map_err(|e| Self::statement_error(sql, e))?;
        Ok(self.conn.changes() as u64)
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("sqlite.query").entered();

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Self::statement_error(sql, e))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let mut rows = stmt.query([]).map_err(|e| Self::statement_error(sql, e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                let value = match row.get_ref(idx)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(i) => Value::Integer(i),
                    ValueRef::Real(r) => Value::Real(r),
                    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => Value::Text(format!("<{} bytes>", b.len())),
                };
                values.push(value);
            }
            out.push(Row {
                columns: columns.clone(),
                values,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::with_transaction;

    #[test]
    fn test_execute_and_query() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap();
        assert_eq!(db.execute("INSERT INTO t (name) VALUES ('a')").unwrap(), 1);
        let rows = db.query("SELECT id, name FROM t").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_string("name").unwrap(), "a");
        assert_eq!(db.count_rows("t").unwrap(), 1);
    }

    #[test]
    fn test_failed_statement_carries_sql() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        let err = db.execute("INSERT INTO missing VALUES (1)").unwrap_err();
        match err {
            DbError::Statement { statement, .. } => assert!(statement.contains("missing")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        let result: Result<(), DbError> = with_transaction(&db, |tx| {
            tx.execute("INSERT INTO t (id) VALUES (1)")?;
            tx.execute("INSERT INTO nope VALUES (1)")?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(db.count_rows("t").unwrap(), 0);
    }

    #[test]
    fn test_introspection_includes_generated_columns() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute(
            "CREATE TABLE inv (a BIGINT NOT NULL, b BIGINT NOT NULL, \
             m BIGINT GENERATED ALWAYS AS (a - b) STORED)",
        )
        .unwrap();
        assert_eq!(db.list_tables().unwrap(), vec!["inv".to_string()]);
        assert_eq!(db.list_columns("inv").unwrap(), vec!["a", "b", "m"]);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute("CREATE TABLE p (id INTEGER PRIMARY KEY)").unwrap();
        db.execute("CREATE TABLE c (id INTEGER PRIMARY KEY, p_id INTEGER NOT NULL REFERENCES p(id))")
            .unwrap();
        assert!(db.execute("INSERT INTO c (id, p_id) VALUES (1, 99)").is_err());
    }
}

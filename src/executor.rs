//! `CellarExecutor` - database execution seam shared by the migrator, the harness
//! and the invocation wrapper.
//!
//! Every statement that reaches an executor is fully rendered SQL. Bookkeeping
//! statements are built with `sea-query` and rendered for the executor's
//! [`Dialect`], revision bodies arrive as plain statements from the splitter.

use sea_query::{PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder, TableCreateStatement};
use std::fmt;
use std::str::FromStr;

/// SQL dialect understood by an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Name used in revision section markers (`-- +upgrade sqlite`)
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }

    /// Both dialects, in the order revision files list their sections
    pub fn all() -> [Dialect; 2] {
        [Dialect::Sqlite, Dialect::Postgres]
    }

    /// Render a `sea-query` statement with values inlined
    pub fn render_query<S: QueryStatementWriter>(&self, stmt: &S) -> String {
        match self {
            Dialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
            Dialect::Postgres => stmt.to_string(PostgresQueryBuilder),
        }
    }

    pub fn render_table(&self, stmt: &TableCreateStatement) -> String {
        match self {
            Dialect::Sqlite => stmt.build(SqliteQueryBuilder),
            Dialect::Postgres => stmt.build(PostgresQueryBuilder),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(DbError::Other(format!("unknown SQL dialect '{other}'"))),
        }
    }
}

/// Executor error type
#[derive(Debug)]
pub enum DbError {
    /// Error raised by SQLite
    Sqlite(rusqlite::Error),
    /// `PostgreSQL` error from `may_postgres`
    Postgres(may_postgres::Error),
    /// Statement failed, carrying the statement text
    Statement { statement: String, message: String },
    /// Row decoding error
    Decode(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            DbError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
            DbError::Statement { statement, message } => {
                write!(f, "Statement failed: {message}\n  statement: {statement}")
            }
            DbError::Decode(s) => write!(f, "Decode error: {s}"),
            DbError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Sqlite(err)
    }
}

impl From<may_postgres::Error> for DbError {
    fn from(err: may_postgres::Error) -> Self {
        DbError::Postgres(err)
    }
}

/// A single column value read back from either dialect
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view. SQLite stores booleans as integers and Postgres simple
    /// reads can surface numbers as text, so both are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Text(s) => match s.as_str() {
                "t" | "true" | "1" => Some(true),
                "f" | "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// A result row with column names
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_i64(&self, column: &str) -> Result<i64, DbError> {
        self.get(column)
            .and_then(Value::as_i64)
            .ok_or_else(|| DbError::Decode(format!("column '{column}' is not an integer")))
    }

    pub fn get_string(&self, column: &str) -> Result<String, DbError> {
        match self.get(column) {
            Some(Value::Text(s)) => Ok(s.clone()),
            Some(Value::Integer(i)) => Ok(i.to_string()),
            Some(other) => Err(DbError::Decode(format!(
                "column '{column}' is not text: {other:?}"
            ))),
            None => Err(DbError::Decode(format!("column '{column}' not in row"))),
        }
    }

    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>, DbError> {
        match self.get(column) {
            Some(Value::Null) => Ok(None),
            _ => self.get_string(column).map(Some),
        }
    }
}

/// Trait for executing database operations
///
/// Implementations run one statement per call. Multi-statement scripts are
/// split by the caller so a failing statement can be reported verbatim.
pub trait CellarExecutor {
    /// The dialect statements must be rendered in
    fn dialect(&self) -> Dialect;

    /// Execute a single statement and return the number of rows affected
    fn execute(&self, sql: &str) -> Result<u64, DbError>;

    /// Execute a query and return all rows
    fn query(&self, sql: &str) -> Result<Vec<Row>, DbError>;

    /// Execute a query expected to return at most one row
    fn query_opt(&self, sql: &str) -> Result<Option<Row>, DbError> {
        let mut rows = self.query(sql)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(DbError::Other(format!("expected at most one row, got {n}"))),
        }
    }

    /// Names of user tables, sorted
    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let sql = match self.dialect() {
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Dialect::Postgres => {
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name"
            }
        };
        self.query(sql)?
            .iter()
            .map(|row| row.get_string("name"))
            .collect()
    }

    /// Column names of a table in declaration order, generated columns included
    fn list_columns(&self, table: &str) -> Result<Vec<String>, DbError> {
        let sql = match self.dialect() {
            Dialect::Sqlite => format!(
                "SELECT name FROM pragma_table_xinfo('{}') ORDER BY cid",
                escape_literal(table)
            ),
            Dialect::Postgres => format!(
                "SELECT column_name AS name FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = '{}' \
                 ORDER BY ordinal_position",
                escape_literal(table)
            ),
        };
        self.query(&sql)?
            .iter()
            .map(|row| row.get_string("name"))
            .collect()
    }

    /// Count rows of a table
    fn count_rows(&self, table: &str) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote_ident(table));
        match self.query_opt(&sql)? {
            Some(row) => row.get_i64("n"),
            None => Ok(0),
        }
    }
}

/// Run `f` inside a transaction on `executor`.
///
/// Commits when `f` returns `Ok`, rolls back otherwise. A rollback failure is
/// logged and the original error is returned.
pub fn with_transaction<T, E, F>(executor: &dyn CellarExecutor, f: F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnOnce(&dyn CellarExecutor) -> Result<T, E>,
{
    executor.execute("BEGIN")?;
    match f(executor) {
        Ok(value) => {
            executor.execute("COMMIT")?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = executor.execute("ROLLBACK") {
                log::error!("rollback failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

/// Escape a string for use inside a single-quoted SQL literal
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Double-quote an identifier (valid in both dialects)
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("mysql".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(Value::Text("42".into()).as_i64(), Some(42));
        assert_eq!(Value::Integer(1).as_bool(), Some(true));
        assert_eq!(Value::Text("f".into()).as_bool(), Some(false));
        assert!(Value::Null.as_i64().is_none());
    }

    #[test]
    fn test_row_lookup() {
        let row = Row {
            columns: vec!["version_num".into(), "n".into()],
            values: vec![Value::Text("abc123".into()), Value::Integer(3)],
        };
        assert_eq!(row.get_string("version_num").unwrap(), "abc123");
        assert_eq!(row.get_i64("n").unwrap(), 3);
        assert!(row.get_i64("missing").is_err());
    }

    #[test]
    fn test_quoting() {
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
        assert_eq!(quote_ident("wine_batches"), "\"wine_batches\"");
    }

    #[test]
    fn test_db_error_display() {
        let err = DbError::Statement {
            statement: "ALTER TABLE x".into(),
            message: "boom".into(),
        };
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("ALTER TABLE x"));
    }
}

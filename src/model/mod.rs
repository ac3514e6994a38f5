//! Schema model layer for the wine-import CRM.
//!
//! Each entity declares its table shape once ([`TableDef`]) and a typed record
//! struct implementing [`Record`]. The table definitions feed migration
//! autogeneration and drift detection; records feed fixture loading.
//!
//! Generated columns (margins, landed cost, order totals, ROI) are database
//! expressions. Records never carry them and [`insert_statement`] refuses to
//! write them; each entity offers an in-process mirror computed with the same
//! integer arithmetic in [`crate::money`].

use sea_query::{InsertStatement, Query};
use thiserror::Error;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Stored values, for CHECK constraints
            pub fn values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::model::ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::model::ModelError::InvalidValue {
                        column: stringify!($name).to_string(),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod catalog;
pub mod column;
pub mod lifecycle;
pub mod registry;
pub mod sales;
pub mod table;
pub mod tasting;

pub use column::{ColumnDef, ColumnType, ForeignKey, OnDelete};
pub use lifecycle::Lifecycle;
pub use registry::{registry, table};
pub use table::{IndexDef, TableDef};

use crate::executor::Dialect;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown column '{table}.{column}'")]
    UnknownColumn { table: String, column: String },
    #[error("column '{table}.{column}' is generated by the database and cannot be written")]
    ReadOnlyColumn { table: String, column: String },
    #[error("invalid value '{value}' for {column}")]
    InvalidValue { column: String, value: String },
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i32, available: i32 },
    #[error("failed to build statement: {0}")]
    Build(String),
}

/// A typed row that can be persisted into its registered table
pub trait Record {
    const TABLE: &'static str;

    /// Writable column values. Generated columns must not appear here.
    fn values(&self) -> Vec<(&'static str, sea_query::Value)>;
}

/// Build an `INSERT` for `record`, validating every column against the registry
pub fn insert_statement<R: Record>(record: &R) -> Result<InsertStatement, ModelError> {
    let table = registry::table(R::TABLE).ok_or_else(|| ModelError::UnknownTable(R::TABLE.to_string()))?;

    let values = record.values();
    let mut columns = Vec::with_capacity(values.len());
    let mut exprs = Vec::with_capacity(values.len());
    for (name, value) in values {
        let column = table.column(name).ok_or_else(|| ModelError::UnknownColumn {
            table: table.name.clone(),
            column: name.to_string(),
        })?;
        if column.is_generated() {
            return Err(ModelError::ReadOnlyColumn {
                table: table.name.clone(),
                column: name.to_string(),
            });
        }
        columns.push(name);
        exprs.push(value.into());
    }

    let mut stmt = Query::insert();
    stmt.into_table(R::TABLE).columns(columns);
    stmt.values(exprs).map_err(|e| ModelError::Build(e.to_string()))?;
    Ok(stmt.to_owned())
}

/// Rendered `INSERT` for `record`
pub fn insert_sql<R: Record>(record: &R, dialect: Dialect) -> Result<String, ModelError> {
    Ok(dialect.render_query(&insert_statement(record)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bogus;

    impl Record for Bogus {
        const TABLE: &'static str = "wine_inventory";

        fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
            vec![("margin_per_bottle_ore", 100i64.into())]
        }
    }

    struct Unknown;

    impl Record for Unknown {
        const TABLE: &'static str = "cellar_doors";

        fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
            Vec::new()
        }
    }

    #[test]
    fn test_generated_columns_are_read_only() {
        let err = insert_statement(&Bogus).unwrap_err();
        assert_eq!(
            err,
            ModelError::ReadOnlyColumn {
                table: "wine_inventory".into(),
                column: "margin_per_bottle_ore".into()
            }
        );
    }

    #[test]
    fn test_unknown_table_rejected() {
        assert!(matches!(
            insert_statement(&Unknown),
            Err(ModelError::UnknownTable(_))
        ));
    }
}

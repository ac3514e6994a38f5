//! Table metadata and `CREATE TABLE` rendering.

use super::column::{ColumnDef, ColumnType};
use super::lifecycle::Lifecycle;
use crate::executor::{escape_literal, Dialect};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn create_sql(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            self.columns.join(", ")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP INDEX IF EXISTS {}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    /// An entity table: `id`, the given columns, then the lifecycle and audit columns
    pub fn entity(name: &str, comment: &str, columns: Vec<ColumnDef>) -> Self {
        let mut all = Vec::with_capacity(columns.len() + 4);
        all.push(ColumnDef::id());
        all.extend(columns);
        all.push(Lifecycle::column());
        all.push(
            ColumnDef::new("created_at", ColumnType::Timestamp)
                .not_null()
                .default("CURRENT_TIMESTAMP"),
        );
        all.push(
            ColumnDef::new("updated_at", ColumnType::Timestamp)
                .not_null()
                .default("CURRENT_TIMESTAMP"),
        );
        Self {
            name: name.to_string(),
            comment: Some(comment.to_string()),
            columns: all,
            indexes: Vec::new(),
        }
    }

    pub fn index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(IndexDef {
            name: format!("idx_{}_{}", self.name, columns.join("_")),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn generated_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_generated())
    }

    /// Tables this table references, excluding itself
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self
            .columns
            .iter()
            .filter_map(|c| c.references.as_ref())
            .map(|fk| fk.table.clone())
            .filter(|t| t != &self.name)
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// `CREATE TABLE`, its indexes and (Postgres only) comments
    pub fn create_sql(&self, dialect: Dialect) -> Vec<String> {
        let mut sql = String::new();
        // writing to a String cannot fail
        let _ = writeln!(sql, "CREATE TABLE {} (", self.name);
        let body = self
            .columns
            .iter()
            .map(|c| format!("    {}", c.sql(dialect)))
            .collect::<Vec<_>>()
            .join(",\n");
        let _ = writeln!(sql, "{body}");
        sql.push(')');

        let mut statements = vec![sql];
        statements.extend(self.indexes.iter().map(|i| i.create_sql(&self.name)));

        if dialect == Dialect::Postgres {
            if let Some(comment) = &self.comment {
                statements.push(format!(
                    "COMMENT ON TABLE {} IS '{}'",
                    self.name,
                    escape_literal(comment)
                ));
            }
            statements.extend(self.columns.iter().filter_map(|c| {
                c.comment.as_ref().map(|text| {
                    format!(
                        "COMMENT ON COLUMN {}.{} IS '{}'",
                        self.name,
                        c.name,
                        escape_literal(text)
                    )
                })
            }));
        }
        statements
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::column::OnDelete;

    fn sample() -> TableDef {
        TableDef::entity(
            "wine_batch_costs",
            "Itemized batch costs",
            vec![
                ColumnDef::new("batch_id", ColumnType::Uuid)
                    .not_null()
                    .references("wine_batches", OnDelete::Cascade),
                ColumnDef::ore("amount_minor"),
            ],
        )
        .index(&["batch_id"])
    }

    #[test]
    fn test_entity_columns() {
        let table = sample();
        let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "batch_id", "amount_minor", "lifecycle", "created_at", "updated_at"]
        );
        assert_eq!(table.dependencies(), vec!["wine_batches".to_string()]);
    }

    #[test]
    fn test_create_sql_sqlite_has_no_comments() {
        let stmts = sample().create_sql(Dialect::Sqlite);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE wine_batch_costs ("));
        assert_eq!(
            stmts[1],
            "CREATE INDEX idx_wine_batch_costs_batch_id ON wine_batch_costs (batch_id)"
        );
    }

    #[test]
    fn test_create_sql_postgres_comments() {
        let stmts = sample().create_sql(Dialect::Postgres);
        assert!(stmts
            .iter()
            .any(|s| s == "COMMENT ON TABLE wine_batch_costs IS 'Itemized batch costs'"));
        assert!(stmts
            .iter()
            .any(|s| s.starts_with("COMMENT ON COLUMN wine_batch_costs.lifecycle")));
    }
}

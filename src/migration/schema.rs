//! Schema shapes, database introspection and model-versus-database diffing.
//!
//! A [`SchemaShape`] is the comparable part of a schema: tables, column
//! names, normalized types, nullability, whether a column is generated, and
//! explicitly created indexes. Shapes come from the declared model
//! ([`SchemaShape::from_tables`]) or from a live database
//! ([`SchemaShape::introspect`]). Defaults, CHECK constraints and generated
//! expressions are not compared.

use super::state_table::{LOG_TABLE, VERSION_TABLE};
use super::ordering::{topological_sort, Node};
use crate::executor::{escape_literal, CellarExecutor, DbError, Dialect, Row};
use crate::model::{ColumnDef, IndexDef, TableDef};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnShape {
    pub name: String,
    /// Normalized type, e.g. `VARCHAR(20)`
    pub sql_type: String,
    pub nullable: bool,
    pub generated: bool,
}

impl ColumnShape {
    pub fn from_def(column: &ColumnDef) -> Self {
        Self {
            name: column.name.clone(),
            sql_type: normalize_type(&column.column_type.sql()),
            nullable: column.nullable,
            generated: column.is_generated(),
        }
    }

    /// Definition usable in `CREATE TABLE`/`ADD COLUMN`, without constraints
    fn plain_sql(&self, not_null: bool) -> String {
        if not_null && !self.nullable {
            format!("{} {} NOT NULL", self.name, self.sql_type)
        } else {
            format!("{} {}", self.name, self.sql_type)
        }
    }

    fn summary(&self) -> String {
        format!(
            "{}{}{}",
            self.sql_type,
            if self.nullable { " NULL" } else { " NOT NULL" },
            if self.generated { " GENERATED" } else { "" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexShape {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexShape {
    fn create_sql(&self) -> String {
        IndexDef {
            name: self.name.clone(),
            columns: self.columns.clone(),
            unique: self.unique,
        }
        .create_sql(&self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
    pub name: String,
    pub columns: Vec<ColumnShape>,
    pub indexes: Vec<IndexShape>,
    /// Tables referenced by foreign keys
    pub references: Vec<String>,
}

impl TableShape {
    pub fn from_def(table: &TableDef) -> Self {
        Self {
            name: table.name.clone(),
            columns: table.columns.iter().map(ColumnShape::from_def).collect(),
            indexes: table
                .indexes
                .iter()
                .map(|i| IndexShape {
                    name: i.name.clone(),
                    table: table.name.clone(),
                    columns: i.columns.clone(),
                    unique: i.unique,
                })
                .collect(),
            references: table.dependencies(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnShape> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaShape {
    pub tables: BTreeMap<String, TableShape>,
}

impl SchemaShape {
    pub fn from_tables(tables: &[TableDef]) -> Self {
        Self {
            tables: tables
                .iter()
                .map(|t| (t.name.clone(), TableShape::from_def(t)))
                .collect(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableShape> {
        self.tables.get(name)
    }

    /// Read the shape of every user table, skipping the bookkeeping tables
    pub fn introspect(executor: &dyn CellarExecutor) -> Result<Self, DbError> {
        let mut tables = BTreeMap::new();
        for name in executor.list_tables()? {
            if name == VERSION_TABLE || name == LOG_TABLE {
                continue;
            }
            let shape = match executor.dialect() {
                Dialect::Sqlite => introspect_sqlite_table(executor, &name)?,
                Dialect::Postgres => introspect_postgres_table(executor, &name)?,
            };
            tables.insert(name, shape);
        }
        Ok(Self { tables })
    }
}

/// Uppercase with whitespace removed. SQLite reports generated columns with
/// `GENERATED ALWAYS` appended to the declared type; that suffix is dropped.
pub fn normalize_type(sql_type: &str) -> String {
    let compact: String = sql_type
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    compact
        .strip_suffix("GENERATEDALWAYS")
        .map(str::to_string)
        .unwrap_or(compact)
}

fn introspect_sqlite_table(executor: &dyn CellarExecutor, table: &str) -> Result<TableShape, DbError> {
    let lit = escape_literal(table);
    let columns = executor
        .query(&format!(
            "SELECT name, type, \"notnull\" AS not_null, hidden FROM pragma_table_xinfo('{lit}') ORDER BY cid"
        ))?
        .iter()
        .map(|row| {
            Ok(ColumnShape {
                name: row.get_string("name")?,
                sql_type: normalize_type(&row.get_string("type")?),
                nullable: row.get_i64("not_null")? == 0,
                // 2 = virtual, 3 = stored
                generated: row.get_i64("hidden")? >= 2,
            })
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    let mut indexes = Vec::new();
    for row in executor.query(&format!(
        "SELECT name, \"unique\" AS is_unique FROM pragma_index_list('{lit}') WHERE origin = 'c' ORDER BY name"
    ))? {
        let name = row.get_string("name")?;
        let index_columns = executor
            .query(&format!(
                "SELECT name FROM pragma_index_info('{}') ORDER BY seqno",
                escape_literal(&name)
            ))?
            .iter()
            .map(|r| r.get_string("name"))
            .collect::<Result<Vec<_>, DbError>>()?;
        indexes.push(IndexShape {
            name,
            table: table.to_string(),
            columns: index_columns,
            unique: row.get_i64("is_unique")? != 0,
        });
    }

    let mut references = executor
        .query(&format!(
            "SELECT DISTINCT \"table\" AS parent FROM pragma_foreign_key_list('{lit}')"
        ))?
        .iter()
        .map(|r| r.get_string("parent"))
        .collect::<Result<Vec<_>, DbError>>()?;
    references.retain(|t| t != table);
    references.sort();

    Ok(TableShape {
        name: table.to_string(),
        columns,
        indexes,
        references,
    })
}

fn introspect_postgres_table(executor: &dyn CellarExecutor, table: &str) -> Result<TableShape, DbError> {
    let lit = escape_literal(table);
    let columns = executor
        .query(&format!(
            "SELECT column_name::text AS name, data_type::text AS data_type, \
             character_maximum_length::int AS char_len, numeric_precision::int AS num_precision, \
             numeric_scale::int AS num_scale, is_nullable::text AS is_nullable, \
             is_generated::text AS is_generated \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = '{lit}' \
             ORDER BY ordinal_position"
        ))?
        .iter()
        .map(|row| {
            Ok(ColumnShape {
                name: row.get_string("name")?,
                sql_type: postgres_type(row)?,
                nullable: row.get_string("is_nullable")? == "YES",
                generated: row.get_string("is_generated")? == "ALWAYS",
            })
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    let mut indexes: Vec<IndexShape> = Vec::new();
    for row in executor.query(&format!(
        "SELECT i.relname::text AS name, ix.indisunique AS is_unique, a.attname::text AS column_name \
         FROM pg_class t \
         JOIN pg_namespace n ON n.oid = t.relnamespace \
         JOIN pg_index ix ON ix.indrelid = t.oid \
         JOIN pg_class i ON i.oid = ix.indexrelid \
         JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
         WHERE n.nspname = current_schema() AND t.relname = '{lit}' AND NOT ix.indisprimary \
         AND NOT EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid) \
         ORDER BY i.relname, array_position(ix.indkey::int2[], a.attnum)"
    ))? {
        let name = row.get_string("name")?;
        let column = row.get_string("column_name")?;
        match indexes.last_mut() {
            Some(last) if last.name == name => last.columns.push(column),
            _ => indexes.push(IndexShape {
                name,
                table: table.to_string(),
                columns: vec![column],
                unique: row.get("is_unique").and_then(|v| v.as_bool()).unwrap_or(false),
            }),
        }
    }

    let mut references = executor
        .query(&format!(
            "SELECT DISTINCT ccu.table_name::text AS parent \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema() \
             AND tc.table_name = '{lit}'"
        ))?
        .iter()
        .map(|r| r.get_string("parent"))
        .collect::<Result<Vec<_>, DbError>>()?;
    references.retain(|t| t != table);
    references.sort();

    Ok(TableShape {
        name: table.to_string(),
        columns,
        indexes,
        references,
    })
}

fn postgres_type(row: &Row) -> Result<String, DbError> {
    let data_type = row.get_string("data_type")?;
    let int = |col: &str| row.get(col).and_then(|v| v.as_i64());
    let name = match data_type.as_str() {
        "character varying" => match int("char_len") {
            Some(n) => format!("VARCHAR({n})"),
            None => "VARCHAR".to_string(),
        },
        "character" => format!("CHAR({})", int("char_len").unwrap_or(1)),
        "numeric" => match (int("num_precision"), int("num_scale")) {
            (Some(p), Some(s)) => format!("DECIMAL({p},{s})"),
            _ => "DECIMAL".to_string(),
        },
        "timestamp with time zone" => "TIMESTAMPTZ".to_string(),
        "timestamp without time zone" => "TIMESTAMP".to_string(),
        other => other.to_string(),
    };
    Ok(normalize_type(&name))
}

/// One difference between the migrated schema and the declared model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    CreateTable(TableDef),
    DropTable(TableShape),
    AddColumn { table: String, column: ColumnDef },
    DropColumn { table: String, column: ColumnShape },
    AlterColumn { table: String, from: ColumnShape, to: ColumnDef },
    CreateIndex { table: String, index: IndexDef },
    DropIndex(IndexShape),
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable(t) => write!(f, "add table {}", t.name),
            SchemaChange::DropTable(t) => write!(f, "remove table {}", t.name),
            SchemaChange::AddColumn { table, column } => {
                write!(f, "add column {}.{}", table, column.name)
            }
            SchemaChange::DropColumn { table, column } => {
                write!(f, "remove column {}.{}", table, column.name)
            }
            SchemaChange::AlterColumn { table, from, to } => write!(
                f,
                "alter column {}.{} ({} -> {})",
                table,
                to.name,
                from.summary(),
                ColumnShape::from_def(to).summary()
            ),
            SchemaChange::CreateIndex { table, index } => {
                write!(f, "add index {} on {}", index.name, table)
            }
            SchemaChange::DropIndex(index) => {
                write!(f, "remove index {} on {}", index.name, index.table)
            }
        }
    }
}

/// Changes that turn `current` into the declared `target` tables.
///
/// Creations come first with referenced tables before referencing ones;
/// removals come last with referencing tables before referenced ones.
pub fn diff(current: &SchemaShape, target: &[TableDef]) -> Vec<SchemaChange> {
    let mut creates = Vec::new();
    let mut alters = Vec::new();
    let mut drops = Vec::new();

    let new_tables: Vec<&TableDef> = target
        .iter()
        .filter(|t| current.table(&t.name).is_none())
        .collect();
    let nodes: Vec<Node> = new_tables
        .iter()
        .map(|t| Node::new(t.name.clone(), t.dependencies()))
        .collect();
    // a cycle keeps declaration order; the database reports the broken reference
    let order = topological_sort(&nodes)
        .unwrap_or_else(|_| new_tables.iter().map(|t| t.name.clone()).collect());
    for name in order {
        if let Some(table) = new_tables.iter().find(|t| t.name == name) {
            creates.push(SchemaChange::CreateTable((*table).clone()));
        }
    }

    for table in target {
        let Some(shape) = current.table(&table.name) else {
            continue;
        };
        for column in &table.columns {
            match shape.column(&column.name) {
                None => alters.push(SchemaChange::AddColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                }),
                Some(existing) if *existing != ColumnShape::from_def(column) => {
                    alters.push(SchemaChange::AlterColumn {
                        table: table.name.clone(),
                        from: existing.clone(),
                        to: column.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        for index in &table.indexes {
            let wanted = IndexShape {
                name: index.name.clone(),
                table: table.name.clone(),
                columns: index.columns.clone(),
                unique: index.unique,
            };
            match shape.indexes.iter().find(|i| i.name == index.name) {
                Some(existing) if *existing == wanted => {}
                Some(existing) => {
                    drops.push(SchemaChange::DropIndex(existing.clone()));
                    alters.push(SchemaChange::CreateIndex {
                        table: table.name.clone(),
                        index: index.clone(),
                    });
                }
                None => alters.push(SchemaChange::CreateIndex {
                    table: table.name.clone(),
                    index: index.clone(),
                }),
            }
        }
        for index in &shape.indexes {
            if !table.indexes.iter().any(|i| i.name == index.name) {
                drops.push(SchemaChange::DropIndex(index.clone()));
            }
        }
        for column in &shape.columns {
            if table.column(&column.name).is_none() {
                drops.push(SchemaChange::DropColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                });
            }
        }
    }

    let removed: Vec<&TableShape> = current
        .tables
        .values()
        .filter(|t| !target.iter().any(|d| d.name == t.name))
        .collect();
    let nodes: Vec<Node> = removed
        .iter()
        .map(|t| Node::new(t.name.clone(), t.references.clone()))
        .collect();
    let mut order = topological_sort(&nodes)
        .unwrap_or_else(|_| removed.iter().map(|t| t.name.clone()).collect());
    order.reverse();
    for name in order {
        if let Some(table) = removed.iter().find(|t| t.name == name) {
            drops.push(SchemaChange::DropTable((*table).clone()));
        }
    }

    creates.into_iter().chain(alters).chain(drops).collect()
}

/// Upgrade and downgrade statements for a set of changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedChanges {
    pub upgrade: Vec<String>,
    pub downgrade: Vec<String>,
    /// Steps that need a human to review the generated revision
    pub warnings: Vec<String>,
}

pub fn render_changes(changes: &[SchemaChange], dialect: Dialect) -> RenderedChanges {
    let mut out = RenderedChanges::default();
    let mut downgrade_groups = Vec::with_capacity(changes.len());

    for change in changes {
        let (up, down) = render_change(change, dialect, &mut out.warnings);
        out.upgrade.extend(up);
        downgrade_groups.push(down);
    }
    out.downgrade = downgrade_groups.into_iter().rev().flatten().collect();
    out
}

fn render_change(
    change: &SchemaChange,
    dialect: Dialect,
    warnings: &mut Vec<String>,
) -> (Vec<String>, Vec<String>) {
    match change {
        SchemaChange::CreateTable(table) => (table.create_sql(dialect), vec![table.drop_sql()]),
        SchemaChange::DropTable(shape) => {
            if shape.columns.iter().any(|c| c.generated) {
                warnings.push(format!(
                    "downgrade recreates generated columns of {} as plain columns",
                    shape.name
                ));
            }
            warnings.push(format!(
                "downgrade recreates {} without defaults or constraints; review it",
                shape.name
            ));
            let body = shape
                .columns
                .iter()
                .map(|c| format!("    {}", c.plain_sql(!c.generated)))
                .collect::<Vec<_>>()
                .join(",\n");
            let mut down = vec![format!("CREATE TABLE {} (\n{}\n)", shape.name, body)];
            down.extend(shape.indexes.iter().map(IndexShape::create_sql));
            (vec![format!("DROP TABLE {}", shape.name)], down)
        }
        SchemaChange::AddColumn { table, column } => {
            if dialect == Dialect::Sqlite {
                if !column.nullable && column.default.is_none() && !column.is_generated() {
                    warnings.push(format!(
                        "SQLite cannot add NOT NULL column {}.{} without a default",
                        table, column.name
                    ));
                }
                if column.unique || column.primary_key {
                    warnings.push(format!(
                        "SQLite cannot add UNIQUE or PRIMARY KEY column {}.{}",
                        table, column.name
                    ));
                }
            }
            (
                vec![format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    table,
                    column.add_column_sql(dialect)
                )],
                vec![format!("ALTER TABLE {} DROP COLUMN {}", table, column.name)],
            )
        }
        SchemaChange::DropColumn { table, column } => {
            warnings.push(format!(
                "downgrade re-adds {}.{} without its default or constraints",
                table, column.name
            ));
            (
                vec![format!("ALTER TABLE {} DROP COLUMN {}", table, column.name)],
                vec![format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    table,
                    column.plain_sql(false)
                )],
            )
        }
        SchemaChange::AlterColumn { table, from, to } => {
            render_alter_column(table, from, to, dialect, warnings)
        }
        SchemaChange::CreateIndex { table, index } => {
            (vec![index.create_sql(table)], vec![index.drop_sql()])
        }
        SchemaChange::DropIndex(index) => (
            vec![format!("DROP INDEX IF EXISTS {}", index.name)],
            vec![index.create_sql()],
        ),
    }
}

fn render_alter_column(
    table: &str,
    from: &ColumnShape,
    to: &ColumnDef,
    dialect: Dialect,
    warnings: &mut Vec<String>,
) -> (Vec<String>, Vec<String>) {
    let target = ColumnShape::from_def(to);

    // generated-ness cannot be altered in place in either dialect
    if from.generated || target.generated {
        if !from.generated {
            warnings.push(format!(
                "{}.{} becomes generated; its stored values are dropped",
                table, to.name
            ));
        }
        let up = vec![
            format!("ALTER TABLE {} DROP COLUMN {}", table, to.name),
            format!("ALTER TABLE {} ADD COLUMN {}", table, to.add_column_sql(dialect)),
        ];
        let down = vec![
            format!("ALTER TABLE {} DROP COLUMN {}", table, to.name),
            format!("ALTER TABLE {} ADD COLUMN {}", table, from.plain_sql(false)),
        ];
        return (up, down);
    }

    match dialect {
        Dialect::Sqlite => {
            warnings.push(format!(
                "SQLite cannot alter column {}.{}; rebuild the table by hand",
                table, to.name
            ));
            (Vec::new(), Vec::new())
        }
        Dialect::Postgres => {
            let mut up = Vec::new();
            let mut down = Vec::new();
            if from.sql_type != target.sql_type {
                up.push(format!(
                    "ALTER TABLE {t} ALTER COLUMN {c} TYPE {ty} USING {c}::{ty}",
                    t = table,
                    c = to.name,
                    ty = target.sql_type
                ));
                down.push(format!(
                    "ALTER TABLE {t} ALTER COLUMN {c} TYPE {ty} USING {c}::{ty}",
                    t = table,
                    c = to.name,
                    ty = from.sql_type
                ));
            }
            if from.nullable != target.nullable {
                let (set, unset) = if target.nullable {
                    ("DROP NOT NULL", "SET NOT NULL")
                } else {
                    ("SET NOT NULL", "DROP NOT NULL")
                };
                up.push(format!("ALTER TABLE {} ALTER COLUMN {} {}", table, to.name, set));
                down.push(format!("ALTER TABLE {} ALTER COLUMN {} {}", table, to.name, unset));
            }
            down.reverse();
            (up, down)
        }
    }
}

//! Column metadata and its DDL rendering.

use crate::executor::Dialect;
use crate::money::Currency;

/// Storage type of a column. Type names are valid in both dialects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Varchar(u32),
    Text,
    Integer,
    BigInt,
    Boolean,
    Date,
    Timestamp,
    Json,
    Decimal(u8, u8),
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMPTZ".to_string(),
            ColumnType::Json => "JSONB".to_string(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
        }
    }
}

/// Referential action on parent delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    NoAction,
    Cascade,
    SetNull,
}

/// Foreign key to another table's `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// SQL default expression, rendered verbatim
    pub default: Option<String>,
    pub check: Option<String>,
    pub references: Option<ForeignKey>,
    /// Stored generated expression. Generated columns are never written.
    pub generated: Option<String>,
    /// Set on amounts held in minor units
    pub money: Option<Currency>,
    pub comment: Option<String>,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            check: None,
            references: None,
            generated: None,
            money: None,
            comment: None,
        }
    }

    /// UUID primary key
    pub fn id() -> Self {
        let mut col = Self::new("id", ColumnType::Uuid).not_null();
        col.primary_key = true;
        col.comment("Primary key using UUID")
    }

    /// Non-negative amount in NOK øre, defaulting to zero
    pub fn ore(name: &str) -> Self {
        Self::minor_units(name, Currency::Nok)
    }

    /// Non-negative amount in EUR cents, defaulting to zero
    pub fn cents(name: &str) -> Self {
        Self::minor_units(name, Currency::Eur)
    }

    fn minor_units(name: &str, currency: Currency) -> Self {
        let mut col = Self::new(name, ColumnType::BigInt)
            .not_null()
            .default("0")
            .check(&format!("{name} >= 0"));
        col.money = Some(currency);
        col
    }

    /// Text column restricted to `variants`
    pub fn one_of(name: &str, variants: &[&str]) -> Self {
        let list = variants
            .iter()
            .map(|v| format!("'{v}'"))
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(name, ColumnType::Varchar(20))
            .not_null()
            .check(&format!("{name} IN ({list})"))
    }

    /// Read-only column computed by the database
    pub fn generated(name: &str, column_type: ColumnType, expression: &str) -> Self {
        let mut col = Self::new(name, column_type);
        col.generated = Some(expression.to_string());
        col
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, expr: &str) -> Self {
        self.default = Some(expr.to_string());
        self
    }

    pub fn check(mut self, expr: &str) -> Self {
        self.check = Some(expr.to_string());
        self
    }

    pub fn references(mut self, table: &str, on_delete: OnDelete) -> Self {
        self.references = Some(ForeignKey {
            table: table.to_string(),
            on_delete,
        });
        self
    }

    /// Marks a signed minor-unit amount such as a margin
    pub fn money(mut self, currency: Currency) -> Self {
        self.money = Some(currency);
        self
    }

    pub fn comment(mut self, text: &str) -> Self {
        self.comment = Some(text.to_string());
        self
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }

    /// Column definition as it appears in `CREATE TABLE`
    pub fn sql(&self, dialect: Dialect) -> String {
        self.render(dialect, false)
    }

    /// Column definition for `ALTER TABLE ... ADD COLUMN`.
    ///
    /// SQLite cannot add stored generated columns, so they are added as virtual.
    pub fn add_column_sql(&self, dialect: Dialect) -> String {
        self.render(dialect, true)
    }

    fn render(&self, dialect: Dialect, for_alter: bool) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.sql());

        if let Some(expr) = &self.generated {
            let storage = if for_alter && dialect == Dialect::Sqlite {
                "VIRTUAL"
            } else {
                "STORED"
            };
            sql.push_str(&format!(" GENERATED ALWAYS AS ({expr}) {storage}"));
            return sql;
        }

        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        match (&self.default, self.primary_key && self.column_type == ColumnType::Uuid) {
            (Some(default), _) => sql.push_str(&format!(" DEFAULT {default}")),
            (None, true) => sql.push_str(match dialect {
                Dialect::Postgres => " DEFAULT gen_random_uuid()",
                Dialect::Sqlite => " DEFAULT (lower(hex(randomblob(16))))",
            }),
            (None, false) => {}
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK ({check})"));
        }
        if let Some(fk) = &self.references {
            sql.push_str(&format!(" REFERENCES {}(id)", fk.table));
            match fk.on_delete {
                OnDelete::NoAction => {}
                OnDelete::Cascade => sql.push_str(" ON DELETE CASCADE"),
                OnDelete::SetNull => sql.push_str(" ON DELETE SET NULL"),
            }
        }
        sql
    }
}

//! Soft-delete lifecycle shared by every entity.
//!
//! Rows are deactivated instead of deleted. The state is stored as text so new
//! states only widen the column's CHECK list.

use super::column::{ColumnDef, ColumnType};
use super::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Active,
    Inactive,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 2] = [Lifecycle::Active, Lifecycle::Inactive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Inactive => "inactive",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    /// The `lifecycle` column carried by every table
    pub fn column() -> ColumnDef {
        let states = Self::ALL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        ColumnDef::new("lifecycle", ColumnType::Varchar(16))
            .not_null()
            .default("'active'")
            .check(&format!("lifecycle IN ({states})"))
            .comment("Soft-delete state; rows are deactivated, never deleted")
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Lifecycle::Active),
            "inactive" => Ok(Lifecycle::Inactive),
            other => Err(ModelError::InvalidValue {
                column: "lifecycle".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Dialect;

    #[test]
    fn test_round_trip_and_default() {
        assert_eq!("inactive".parse::<Lifecycle>().unwrap(), Lifecycle::Inactive);
        assert!("archived".parse::<Lifecycle>().is_err());
        assert!(Lifecycle::default().is_active());
    }

    #[test]
    fn test_column_lists_every_state() {
        assert_eq!(
            Lifecycle::column().sql(Dialect::Sqlite),
            "lifecycle VARCHAR(16) NOT NULL DEFAULT 'active' CHECK (lifecycle IN ('active', 'inactive'))"
        );
    }
}

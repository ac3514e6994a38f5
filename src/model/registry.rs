//! The collected table metadata, in foreign-key dependency order.

use super::catalog::{
    suppliers_table, wine_batch_costs_table, wine_batches_table, wine_inventory_table, wines_table,
};
use super::sales::{customers_table, order_items_table, orders_table};
use super::tasting::{
    tasting_attendees_table, tasting_costs_table, tasting_outcomes_table, tasting_wines_table,
    wine_tastings_table,
};
use super::table::TableDef;
use once_cell::sync::Lazy;

static REGISTRY: Lazy<Vec<TableDef>> = Lazy::new(|| {
    vec![
        suppliers_table(),
        wines_table(),
        wine_batches_table(),
        wine_batch_costs_table(),
        wine_inventory_table(),
        customers_table(),
        orders_table(),
        order_items_table(),
        wine_tastings_table(),
        tasting_attendees_table(),
        tasting_wines_table(),
        tasting_costs_table(),
        tasting_outcomes_table(),
    ]
});

/// Every declared table; parents precede children
pub fn registry() -> &'static [TableDef] {
    &REGISTRY
}

pub fn table(name: &str) -> Option<&'static TableDef> {
    REGISTRY.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parents_precede_children() {
        let mut seen = HashSet::new();
        for table in registry() {
            for dep in table.dependencies() {
                assert!(seen.contains(&dep), "{} references {} before it is declared", table.name, dep);
            }
            seen.insert(table.name.clone());
        }
    }

    #[test]
    fn test_every_entity_has_lifecycle_and_audit_columns() {
        for table in registry() {
            for column in ["id", "lifecycle", "created_at", "updated_at"] {
                assert!(table.column(column).is_some(), "{}.{column}", table.name);
            }
        }
    }

    #[test]
    fn test_money_columns_are_integers() {
        for table in registry() {
            for column in table.columns.iter().filter(|c| c.money.is_some()) {
                assert_eq!(column.column_type, crate::model::ColumnType::BigInt, "{}", column.name);
            }
        }
    }

    #[test]
    fn test_lookup() {
        assert!(table("wine_batches").unwrap().column("fiken_sync_status").is_some());
        assert!(table("cellar_doors").is_none());
    }
}

//! Suppliers, wines, import batches, batch costs and inventory.

use super::column::{ColumnDef, ColumnType, OnDelete};
use super::lifecycle::Lifecycle;
use super::table::TableDef;
use super::{ModelError, Record};
use crate::money::{self, Cents, Currency, ExchangeRate, LandedCost, Ore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

text_enum!(
    /// Where an import batch is in the supply chain
    BatchStatus {
        Ordered => "ORDERED",
        InTransit => "IN_TRANSIT",
        Customs => "CUSTOMS",
        Available => "AVAILABLE",
        SoldOut => "SOLD_OUT",
    }
);

text_enum!(
    CostType {
        WinePurchase => "WINE_PURCHASE",
        Transport => "TRANSPORT",
        Customs => "CUSTOMS",
        FreightForwarding => "FREIGHT_FORWARDING",
        Insurance => "INSURANCE",
        Other => "OTHER",
    }
);

/// Landed total in øre, as a SQL expression over the batch columns
const BATCH_TOTAL_EXPR: &str = "(wine_cost_eur_cents * eur_exchange_rate_micros) / 1000000 \
     + transport_cost_ore + customs_fee_ore + freight_forwarding_ore";

pub fn suppliers_table() -> TableDef {
    TableDef::entity(
        "suppliers",
        "Wine producers and distributors we import from",
        vec![
            ColumnDef::new("name", ColumnType::Varchar(200)).not_null(),
            ColumnDef::new("country", ColumnType::Varchar(100)).not_null(),
            ColumnDef::new("contact_person", ColumnType::Varchar(200)),
            ColumnDef::new("email", ColumnType::Varchar(320)),
            ColumnDef::new("phone", ColumnType::Varchar(20)),
            ColumnDef::new("payment_terms_days", ColumnType::Integer)
                .not_null()
                .default("30"),
            ColumnDef::new("currency", ColumnType::Varchar(3))
                .not_null()
                .default("'EUR'")
                .check("currency IN ('NOK', 'EUR')"),
            ColumnDef::new("tax_id", ColumnType::Varchar(50)),
        ],
    )
    .index(&["name"])
}

pub fn wines_table() -> TableDef {
    TableDef::entity(
        "wines",
        "Wine catalog",
        vec![
            ColumnDef::new("name", ColumnType::Varchar(200)).not_null(),
            ColumnDef::new("producer", ColumnType::Varchar(200)).not_null(),
            ColumnDef::new("region", ColumnType::Varchar(100)),
            ColumnDef::new("country", ColumnType::Varchar(100)).not_null(),
            ColumnDef::new("vintage", ColumnType::Integer),
            ColumnDef::new("grape_varieties", ColumnType::Json)
                .comment("List of grape varieties"),
            ColumnDef::new("alcohol_content", ColumnType::Decimal(4, 2))
                .comment("Alcohol by volume in percent"),
            ColumnDef::new("bottle_size_ml", ColumnType::Integer)
                .not_null()
                .default("750"),
            ColumnDef::new("product_category", ColumnType::Varchar(50))
                .not_null()
                .default("'wine'"),
            ColumnDef::new("tasting_notes", ColumnType::Text),
            ColumnDef::new("food_pairing", ColumnType::Text),
            ColumnDef::new("organic", ColumnType::Boolean)
                .not_null()
                .default("FALSE"),
            ColumnDef::new("biodynamic", ColumnType::Boolean)
                .not_null()
                .default("FALSE"),
            ColumnDef::new("fiken_product_id", ColumnType::BigInt)
                .comment("Product id in the accounting system"),
        ],
    )
    .index(&["producer"])
}

pub fn wine_batches_table() -> TableDef {
    TableDef::entity(
        "wine_batches",
        "Import batches with landed cost in NOK øre",
        vec![
            ColumnDef::new("batch_number", ColumnType::Varchar(50))
                .not_null()
                .unique()
                .comment("Unique batch identifier (e.g. FONT-BAR-2024-001)"),
            ColumnDef::new("wine_name", ColumnType::Varchar(200)).not_null(),
            ColumnDef::new("producer", ColumnType::Varchar(200)).not_null(),
            ColumnDef::new("supplier_id", ColumnType::Uuid)
                .references("suppliers", OnDelete::NoAction),
            ColumnDef::new("wine_id", ColumnType::Uuid).references("wines", OnDelete::NoAction),
            ColumnDef::new("import_date", ColumnType::Date),
            ColumnDef::new("total_bottles", ColumnType::Integer)
                .not_null()
                .check("total_bottles >= 0"),
            ColumnDef::new("eur_exchange_rate_micros", ColumnType::BigInt)
                .not_null()
                .default("0")
                .check("eur_exchange_rate_micros >= 0")
                .comment("NOK per EUR scaled by 1000000"),
            ColumnDef::cents("wine_cost_eur_cents"),
            ColumnDef::ore("transport_cost_ore"),
            ColumnDef::ore("customs_fee_ore"),
            ColumnDef::ore("freight_forwarding_ore"),
            ColumnDef::generated("total_cost_ore", ColumnType::BigInt, BATCH_TOTAL_EXPR)
                .money(Currency::Nok),
            ColumnDef::generated(
                "landed_cost_per_bottle_ore",
                ColumnType::BigInt,
                &format!(
                    "CASE WHEN total_bottles > 0 THEN ({BATCH_TOTAL_EXPR}) / total_bottles ELSE 0 END"
                ),
            )
            .money(Currency::Nok),
            ColumnDef::new("target_price_ore", ColumnType::BigInt)
                .check("target_price_ore >= 0")
                .money(Currency::Nok)
                .comment("Target selling price per bottle"),
            ColumnDef::one_of("status", &BatchStatus::values()).default("'ORDERED'"),
            ColumnDef::new("fiken_sync_status", ColumnType::Varchar(20))
                .not_null()
                .default("'pending'")
                .comment("Accounting sync state"),
        ],
    )
    .index(&["status"])
}

pub fn wine_batch_costs_table() -> TableDef {
    TableDef::entity(
        "wine_batch_costs",
        "Itemized costs allocated to a batch",
        vec![
            ColumnDef::new("batch_id", ColumnType::Uuid)
                .not_null()
                .references("wine_batches", OnDelete::Cascade),
            ColumnDef::one_of("cost_type", &CostType::values()),
            ColumnDef::new("amount_minor", ColumnType::BigInt)
                .not_null()
                .check("amount_minor >= 0")
                .comment("Amount in minor units of currency"),
            ColumnDef::new("currency", ColumnType::Varchar(3))
                .not_null()
                .default("'NOK'")
                .check("currency IN ('NOK', 'EUR')"),
            ColumnDef::new("fiken_account_code", ColumnType::Varchar(20)),
            ColumnDef::new("payment_date", ColumnType::Date),
            ColumnDef::new("allocation_method", ColumnType::Varchar(20))
                .not_null()
                .default("'per_bottle'"),
            ColumnDef::new("invoice_reference", ColumnType::Varchar(100)),
        ],
    )
    .index(&["batch_id"])
}

pub fn wine_inventory_table() -> TableDef {
    TableDef::entity(
        "wine_inventory",
        "Stock per batch with generated margins",
        vec![
            ColumnDef::new("wine_id", ColumnType::Uuid).references("wines", OnDelete::NoAction),
            ColumnDef::new("batch_id", ColumnType::Uuid)
                .not_null()
                .references("wine_batches", OnDelete::Cascade),
            ColumnDef::new("quantity_available", ColumnType::Integer)
                .not_null()
                .default("0")
                .check("quantity_available >= 0"),
            ColumnDef::new("quantity_reserved", ColumnType::Integer)
                .not_null()
                .default("0")
                .check("quantity_reserved >= 0"),
            ColumnDef::new("quantity_sold", ColumnType::Integer)
                .not_null()
                .default("0")
                .check("quantity_sold >= 0"),
            ColumnDef::ore("cost_per_bottle_ore"),
            ColumnDef::ore("selling_price_ore"),
            ColumnDef::generated(
                "margin_per_bottle_ore",
                ColumnType::BigInt,
                "selling_price_ore - cost_per_bottle_ore",
            )
            .money(Currency::Nok),
            ColumnDef::generated(
                "margin_basis_points",
                ColumnType::BigInt,
                "CASE WHEN selling_price_ore > 0 \
                 THEN ((selling_price_ore - cost_per_bottle_ore) * 10000) / selling_price_ore \
                 ELSE 0 END",
            ),
            ColumnDef::new("minimum_stock_level", ColumnType::Integer)
                .not_null()
                .default("0"),
            ColumnDef::new("location", ColumnType::Varchar(100)),
        ],
    )
    .index(&["batch_id"])
}

#[derive(Debug, Clone, PartialEq)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub payment_terms_days: i32,
    pub currency: Currency,
    pub tax_id: Option<String>,
    pub lifecycle: Lifecycle,
}

impl Supplier {
    pub fn new(name: &str, country: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            country: country.to_string(),
            contact_person: None,
            email: None,
            phone: None,
            payment_terms_days: 30,
            currency: Currency::Eur,
            tax_id: None,
            lifecycle: Lifecycle::Active,
        }
    }
}

impl Record for Supplier {
    const TABLE: &'static str = "suppliers";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("country", self.country.clone().into()),
            ("contact_person", self.contact_person.clone().into()),
            ("email", self.email.clone().into()),
            ("phone", self.phone.clone().into()),
            ("payment_terms_days", self.payment_terms_days.into()),
            ("currency", self.currency.code().into()),
            ("tax_id", self.tax_id.clone().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Wine {
    pub id: Uuid,
    pub name: String,
    pub producer: String,
    pub region: Option<String>,
    pub country: String,
    pub vintage: Option<i32>,
    pub grape_varieties: Vec<String>,
    pub alcohol_content: Option<Decimal>,
    pub bottle_size_ml: i32,
    pub product_category: String,
    pub tasting_notes: Option<String>,
    pub food_pairing: Option<String>,
    pub organic: bool,
    pub biodynamic: bool,
    pub fiken_product_id: Option<i64>,
    pub lifecycle: Lifecycle,
}

impl Wine {
    pub fn new(name: &str, producer: &str, country: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            producer: producer.to_string(),
            region: None,
            country: country.to_string(),
            vintage: None,
            grape_varieties: Vec::new(),
            alcohol_content: None,
            bottle_size_ml: 750,
            product_category: "wine".to_string(),
            tasting_notes: None,
            food_pairing: None,
            organic: false,
            biodynamic: false,
            fiken_product_id: None,
            lifecycle: Lifecycle::Active,
        }
    }
}

impl Record for Wine {
    const TABLE: &'static str = "wines";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("producer", self.producer.clone().into()),
            ("region", self.region.clone().into()),
            ("country", self.country.clone().into()),
            ("vintage", self.vintage.into()),
            ("grape_varieties", serde_json::json!(self.grape_varieties).into()),
            ("alcohol_content", self.alcohol_content.into()),
            ("bottle_size_ml", self.bottle_size_ml.into()),
            ("product_category", self.product_category.clone().into()),
            ("tasting_notes", self.tasting_notes.clone().into()),
            ("food_pairing", self.food_pairing.clone().into()),
            ("organic", self.organic.into()),
            ("biodynamic", self.biodynamic.into()),
            ("fiken_product_id", self.fiken_product_id.into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WineBatch {
    pub id: Uuid,
    pub batch_number: String,
    pub wine_name: String,
    pub producer: String,
    pub supplier_id: Option<Uuid>,
    pub wine_id: Option<Uuid>,
    pub import_date: Option<NaiveDate>,
    pub total_bottles: i32,
    pub eur_exchange_rate: ExchangeRate,
    pub wine_cost: Cents,
    pub transport_cost: Ore,
    pub customs_fee: Ore,
    pub freight_forwarding: Ore,
    pub target_price: Option<Ore>,
    pub status: BatchStatus,
    pub fiken_sync_status: String,
    pub lifecycle: Lifecycle,
}

impl WineBatch {
    pub fn landed_cost(&self) -> LandedCost {
        LandedCost {
            wine_cost: self.wine_cost,
            rate: self.eur_exchange_rate,
            transport: self.transport_cost,
            customs: self.customs_fee,
            freight_forwarding: self.freight_forwarding,
        }
    }

    /// Mirror of the generated `total_cost_ore` column
    pub fn total_cost(&self) -> Ore {
        self.landed_cost().total()
    }

    /// Mirror of the generated `landed_cost_per_bottle_ore` column
    pub fn landed_cost_per_bottle(&self) -> Ore {
        self.landed_cost().per_bottle(i64::from(self.total_bottles))
    }
}

impl Record for WineBatch {
    const TABLE: &'static str = "wine_batches";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("batch_number", self.batch_number.clone().into()),
            ("wine_name", self.wine_name.clone().into()),
            ("producer", self.producer.clone().into()),
            ("supplier_id", self.supplier_id.into()),
            ("wine_id", self.wine_id.into()),
            ("import_date", self.import_date.into()),
            ("total_bottles", self.total_bottles.into()),
            ("eur_exchange_rate_micros", self.eur_exchange_rate.micros().into()),
            ("wine_cost_eur_cents", self.wine_cost.minor().into()),
            ("transport_cost_ore", self.transport_cost.minor().into()),
            ("customs_fee_ore", self.customs_fee.minor().into()),
            ("freight_forwarding_ore", self.freight_forwarding.minor().into()),
            ("target_price_ore", self.target_price.map(|p| p.minor()).into()),
            ("status", self.status.as_str().into()),
            ("fiken_sync_status", self.fiken_sync_status.clone().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WineBatchCost {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub cost_type: CostType,
    pub amount_minor: i64,
    pub currency: Currency,
    pub fiken_account_code: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub allocation_method: String,
    pub invoice_reference: Option<String>,
    pub lifecycle: Lifecycle,
}

impl Record for WineBatchCost {
    const TABLE: &'static str = "wine_batch_costs";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("batch_id", self.batch_id.into()),
            ("cost_type", self.cost_type.as_str().into()),
            ("amount_minor", self.amount_minor.into()),
            ("currency", self.currency.code().into()),
            ("fiken_account_code", self.fiken_account_code.clone().into()),
            ("payment_date", self.payment_date.into()),
            ("allocation_method", self.allocation_method.clone().into()),
            ("invoice_reference", self.invoice_reference.clone().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WineInventory {
    pub id: Uuid,
    pub wine_id: Option<Uuid>,
    pub batch_id: Uuid,
    pub quantity_available: i32,
    pub quantity_reserved: i32,
    pub quantity_sold: i32,
    pub cost_per_bottle: Ore,
    pub selling_price: Ore,
    pub minimum_stock_level: i32,
    pub location: Option<String>,
    pub lifecycle: Lifecycle,
}

impl WineInventory {
    /// Bottles that can still be reserved
    pub fn free_stock(&self) -> i32 {
        self.quantity_available - self.quantity_reserved
    }

    pub fn is_low_stock(&self) -> bool {
        self.free_stock() <= self.minimum_stock_level
    }

    pub fn reserve(&mut self, quantity: i32) -> Result<(), ModelError> {
        if quantity <= 0 || quantity > self.free_stock() {
            return Err(ModelError::InsufficientStock {
                requested: quantity,
                available: self.free_stock(),
            });
        }
        self.quantity_reserved += quantity;
        Ok(())
    }

    /// Release a reservation; releasing more than is reserved clears it
    pub fn release(&mut self, quantity: i32) {
        self.quantity_reserved = (self.quantity_reserved - quantity.max(0)).max(0);
    }

    /// Sell reserved bottles first, then free stock
    pub fn sell(&mut self, quantity: i32) -> Result<(), ModelError> {
        if quantity <= 0 || quantity > self.quantity_available {
            return Err(ModelError::InsufficientStock {
                requested: quantity,
                available: self.quantity_available,
            });
        }
        let from_reserved = quantity.min(self.quantity_reserved);
        self.quantity_reserved -= from_reserved;
        self.quantity_available -= quantity;
        self.quantity_sold += quantity;
        Ok(())
    }

    /// Mirror of the generated `margin_per_bottle_ore` column
    pub fn margin_per_bottle(&self) -> Ore {
        money::margin_per_bottle(self.cost_per_bottle, self.selling_price)
    }

    /// Mirror of the generated `margin_basis_points` column
    pub fn margin_basis_points(&self) -> i64 {
        money::margin_basis_points(self.cost_per_bottle, self.selling_price)
    }

    pub fn margin_percentage(&self) -> Decimal {
        money::margin_percentage(self.cost_per_bottle, self.selling_price)
    }
}

impl Record for WineInventory {
    const TABLE: &'static str = "wine_inventory";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("wine_id", self.wine_id.into()),
            ("batch_id", self.batch_id.into()),
            ("quantity_available", self.quantity_available.into()),
            ("quantity_reserved", self.quantity_reserved.into()),
            ("quantity_sold", self.quantity_sold.into()),
            ("cost_per_bottle_ore", self.cost_per_bottle.minor().into()),
            ("selling_price_ore", self.selling_price.minor().into()),
            ("minimum_stock_level", self.minimum_stock_level.into()),
            ("location", self.location.clone().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Dialect;
    use crate::model::insert_sql;

    fn inventory() -> WineInventory {
        WineInventory {
            id: Uuid::new_v4(),
            wine_id: None,
            batch_id: Uuid::new_v4(),
            quantity_available: 12,
            quantity_reserved: 0,
            quantity_sold: 0,
            cost_per_bottle: Ore::new(48550).unwrap(),
            selling_price: Ore::new(64900).unwrap(),
            minimum_stock_level: 3,
            location: None,
            lifecycle: Lifecycle::Active,
        }
    }

    #[test]
    fn test_reserve_release_sell() {
        let mut inv = inventory();
        inv.reserve(5).unwrap();
        assert_eq!(inv.free_stock(), 7);
        assert!(inv.reserve(8).is_err());
        inv.release(2);
        assert_eq!(inv.quantity_reserved, 3);
        inv.sell(4).unwrap();
        assert_eq!(inv.quantity_reserved, 0);
        assert_eq!(inv.quantity_available, 8);
        assert_eq!(inv.quantity_sold, 4);
        assert!(inv.sell(9).is_err());
    }

    #[test]
    fn test_low_stock() {
        let mut inv = inventory();
        assert!(!inv.is_low_stock());
        inv.reserve(9).unwrap();
        assert!(inv.is_low_stock());
    }

    #[test]
    fn test_margin_mirrors() {
        let inv = inventory();
        assert_eq!(inv.margin_per_bottle().minor(), 16350);
        assert_eq!(inv.margin_basis_points(), 2519);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("SOLD_OUT".parse::<BatchStatus>().unwrap(), BatchStatus::SoldOut);
        assert!("sold out".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn test_inventory_insert_skips_generated() {
        let sql = insert_sql(&inventory(), Dialect::Sqlite).unwrap();
        assert!(sql.starts_with("INSERT INTO \"wine_inventory\""));
        assert!(!sql.contains("margin_per_bottle_ore"));
    }
}

//! Customers, orders and order lines.

use super::column::{ColumnDef, ColumnType, OnDelete};
use super::lifecycle::Lifecycle;
use super::table::TableDef;
use super::{ModelError, Record};
use crate::money::{Currency, Ore};
use chrono::NaiveDate;
use uuid::Uuid;

/// Lifetime revenue at or above this is a high-value customer (100,000.00 NOK)
pub const HIGH_VALUE_REVENUE: Ore = Ore::signed(10_000_000);

text_enum!(
    OrderStatus {
        Draft => "DRAFT",
        Confirmed => "CONFIRMED",
        Picked => "PICKED",
        Delivered => "DELIVERED",
        Invoiced => "INVOICED",
        Cancelled => "CANCELLED",
    }
);

text_enum!(
    PaymentStatus {
        Pending => "PENDING",
        Paid => "PAID",
        Overdue => "OVERDUE",
        Refunded => "REFUNDED",
    }
);

pub fn customers_table() -> TableDef {
    TableDef::entity(
        "customers",
        "Restaurant and retail customers",
        vec![
            ColumnDef::new("company_name", ColumnType::Varchar(200)).not_null(),
            ColumnDef::new("organization_number", ColumnType::Varchar(9))
                .not_null()
                .unique()
                .check("length(organization_number) = 9")
                .comment("Norwegian organization number"),
            ColumnDef::new("contact_person", ColumnType::Varchar(200)),
            ColumnDef::new("email", ColumnType::Varchar(320)),
            ColumnDef::new("phone", ColumnType::Varchar(20)),
            ColumnDef::new("address_line1", ColumnType::Varchar(200)),
            ColumnDef::new("address_line2", ColumnType::Varchar(200)),
            ColumnDef::new("postal_code", ColumnType::Varchar(10)),
            ColumnDef::new("city", ColumnType::Varchar(100)),
            ColumnDef::new("country", ColumnType::Varchar(100))
                .not_null()
                .default("'Norway'"),
            ColumnDef::new("fiken_customer_id", ColumnType::BigInt).unique(),
            ColumnDef::ore("credit_limit_ore"),
            ColumnDef::new("payment_terms_days", ColumnType::Integer)
                .not_null()
                .default("30"),
            ColumnDef::new("total_orders", ColumnType::Integer)
                .not_null()
                .default("0"),
            ColumnDef::ore("total_revenue_ore"),
            ColumnDef::ore("average_order_value_ore"),
            ColumnDef::new("last_order_date", ColumnType::Date),
        ],
    )
    .index(&["company_name"])
    .index(&["city"])
}

pub fn orders_table() -> TableDef {
    TableDef::entity(
        "orders",
        "Customer orders; total is generated",
        vec![
            ColumnDef::new("order_number", ColumnType::Varchar(50))
                .not_null()
                .unique(),
            ColumnDef::new("customer_id", ColumnType::Uuid)
                .not_null()
                .references("customers", OnDelete::NoAction),
            ColumnDef::one_of("status", &OrderStatus::values()).default("'DRAFT'"),
            ColumnDef::one_of("payment_status", &PaymentStatus::values()).default("'PENDING'"),
            ColumnDef::new("order_date", ColumnType::Date)
                .not_null()
                .default("CURRENT_DATE"),
            ColumnDef::new("delivery_date", ColumnType::Date),
            ColumnDef::new("delivery_address", ColumnType::Varchar(255)),
            ColumnDef::ore("subtotal_ore"),
            ColumnDef::ore("delivery_fee_ore"),
            ColumnDef::ore("discount_ore"),
            ColumnDef::ore("vat_ore"),
            ColumnDef::generated(
                "total_ore",
                ColumnType::BigInt,
                "subtotal_ore + delivery_fee_ore - discount_ore + vat_ore",
            )
            .money(Currency::Nok),
            ColumnDef::new("fiken_invoice_id", ColumnType::BigInt),
        ],
    )
    .index(&["customer_id"])
}

pub fn order_items_table() -> TableDef {
    TableDef::entity(
        "order_items",
        "Order lines with generated unit margin",
        vec![
            ColumnDef::new("order_id", ColumnType::Uuid)
                .not_null()
                .references("orders", OnDelete::Cascade),
            ColumnDef::new("wine_batch_id", ColumnType::Uuid)
                .not_null()
                .references("wine_batches", OnDelete::NoAction),
            ColumnDef::new("quantity", ColumnType::Integer)
                .not_null()
                .check("quantity > 0"),
            ColumnDef::ore("unit_price_ore"),
            ColumnDef::ore("unit_cost_ore"),
            ColumnDef::ore("total_price_ore"),
            ColumnDef::ore("discount_ore"),
            ColumnDef::generated(
                "margin_per_unit_ore",
                ColumnType::BigInt,
                "unit_price_ore - unit_cost_ore",
            )
            .money(Currency::Nok),
            ColumnDef::new("wine_name_snapshot", ColumnType::Varchar(200)),
        ],
    )
    .index(&["order_id"])
}

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub company_name: String,
    pub organization_number: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: String,
    pub fiken_customer_id: Option<i64>,
    pub credit_limit: Ore,
    pub payment_terms_days: i32,
    pub total_orders: i32,
    pub total_revenue: Ore,
    pub average_order_value: Ore,
    pub last_order_date: Option<NaiveDate>,
    pub lifecycle: Lifecycle,
}

impl Customer {
    /// A new customer; the organization number must be nine digits
    pub fn new(company_name: &str, organization_number: &str) -> Result<Self, ModelError> {
        validate_organization_number(organization_number)?;
        Ok(Self {
            id: Uuid::new_v4(),
            company_name: company_name.to_string(),
            organization_number: organization_number.to_string(),
            contact_person: None,
            email: None,
            phone: None,
            address_line1: None,
            address_line2: None,
            postal_code: None,
            city: None,
            country: "Norway".to_string(),
            fiken_customer_id: None,
            credit_limit: Ore::ZERO,
            payment_terms_days: 30,
            total_orders: 0,
            total_revenue: Ore::ZERO,
            average_order_value: Ore::ZERO,
            last_order_date: None,
            lifecycle: Lifecycle::Active,
        })
    }

    pub fn display_name(&self) -> String {
        match &self.city {
            Some(city) => format!("{} ({})", self.company_name, city),
            None => self.company_name.clone(),
        }
    }

    pub fn is_high_value(&self) -> bool {
        self.total_revenue >= HIGH_VALUE_REVENUE
    }

    /// Fold a completed order into the running totals
    pub fn update_sales_stats(&mut self, order_total: Ore, order_date: NaiveDate) {
        self.total_orders += 1;
        self.total_revenue = self.total_revenue + order_total;
        self.average_order_value =
            Ore::signed(self.total_revenue.minor() / i64::from(self.total_orders));
        if self.last_order_date.map_or(true, |d| d < order_date) {
            self.last_order_date = Some(order_date);
        }
    }
}

pub fn validate_organization_number(number: &str) -> Result<(), ModelError> {
    if number.len() == 9 && number.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ModelError::InvalidValue {
            column: "organization_number".to_string(),
            value: number.to_string(),
        })
    }
}

impl Record for Customer {
    const TABLE: &'static str = "customers";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("company_name", self.company_name.clone().into()),
            ("organization_number", self.organization_number.clone().into()),
            ("contact_person", self.contact_person.clone().into()),
            ("email", self.email.clone().into()),
            ("phone", self.phone.clone().into()),
            ("address_line1", self.address_line1.clone().into()),
            ("address_line2", self.address_line2.clone().into()),
            ("postal_code", self.postal_code.clone().into()),
            ("city", self.city.clone().into()),
            ("country", self.country.clone().into()),
            ("fiken_customer_id", self.fiken_customer_id.into()),
            ("credit_limit_ore", self.credit_limit.minor().into()),
            ("payment_terms_days", self.payment_terms_days.into()),
            ("total_orders", self.total_orders.into()),
            ("total_revenue_ore", self.total_revenue.minor().into()),
            ("average_order_value_ore", self.average_order_value.minor().into()),
            ("last_order_date", self.last_order_date.into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_address: Option<String>,
    pub subtotal: Ore,
    pub delivery_fee: Ore,
    pub discount: Ore,
    pub vat: Ore,
    pub fiken_invoice_id: Option<i64>,
    pub lifecycle: Lifecycle,
}

impl Order {
    /// Mirror of the generated `total_ore` column
    pub fn total(&self) -> Ore {
        self.subtotal + self.delivery_fee - self.discount + self.vat
    }
}

impl Record for Order {
    const TABLE: &'static str = "orders";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("order_number", self.order_number.clone().into()),
            ("customer_id", self.customer_id.into()),
            ("status", self.status.as_str().into()),
            ("payment_status", self.payment_status.as_str().into()),
            ("order_date", self.order_date.into()),
            ("delivery_date", self.delivery_date.into()),
            ("delivery_address", self.delivery_address.clone().into()),
            ("subtotal_ore", self.subtotal.minor().into()),
            ("delivery_fee_ore", self.delivery_fee.minor().into()),
            ("discount_ore", self.discount.minor().into()),
            ("vat_ore", self.vat.minor().into()),
            ("fiken_invoice_id", self.fiken_invoice_id.into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub wine_batch_id: Uuid,
    pub quantity: i32,
    pub unit_price: Ore,
    pub unit_cost: Ore,
    pub total_price: Ore,
    pub discount: Ore,
    pub wine_name_snapshot: Option<String>,
    pub lifecycle: Lifecycle,
}

impl OrderItem {
    /// Mirror of the generated `margin_per_unit_ore` column
    pub fn margin_per_unit(&self) -> Ore {
        self.unit_price - self.unit_cost
    }
}

impl Record for OrderItem {
    const TABLE: &'static str = "order_items";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("order_id", self.order_id.into()),
            ("wine_batch_id", self.wine_batch_id.into()),
            ("quantity", self.quantity.into()),
            ("unit_price_ore", self.unit_price.minor().into()),
            ("unit_cost_ore", self.unit_cost.minor().into()),
            ("total_price_ore", self.total_price.minor().into()),
            ("discount_ore", self.discount.minor().into()),
            ("wine_name_snapshot", self.wine_name_snapshot.clone().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_number() {
        assert!(Customer::new("Maaemo Restaurant AS", "123456789").is_ok());
        assert!(Customer::new("Short AS", "12345").is_err());
        assert!(Customer::new("Letters AS", "12345678X").is_err());
    }

    #[test]
    fn test_sales_stats_and_high_value() {
        let mut customer = Customer::new("Maaemo Restaurant AS", "123456789").unwrap();
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let earlier = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        customer.update_sales_stats(Ore::new(6_000_000).unwrap(), first);
        assert!(!customer.is_high_value());
        customer.update_sales_stats(Ore::new(4_000_001).unwrap(), earlier);

        assert_eq!(customer.total_orders, 2);
        assert_eq!(customer.total_revenue.minor(), 10_000_001);
        assert_eq!(customer.average_order_value.minor(), 5_000_000);
        assert_eq!(customer.last_order_date, Some(first));
        assert!(customer.is_high_value());
    }

    #[test]
    fn test_display_name() {
        let mut customer = Customer::new("Theatercaféen AS", "987654321").unwrap();
        assert_eq!(customer.display_name(), "Theatercaféen AS");
        customer.city = Some("Oslo".into());
        assert_eq!(customer.display_name(), "Theatercaféen AS (Oslo)");
    }

    #[test]
    fn test_order_total_mirror() {
        let order = Order {
            id: Uuid::new_v4(),
            order_number: "ORD-2024-0001".into(),
            customer_id: Uuid::new_v4(),
            status: OrderStatus::Draft,
            payment_status: PaymentStatus::Pending,
            order_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            delivery_date: None,
            delivery_address: None,
            subtotal: Ore::new(100_000).unwrap(),
            delivery_fee: Ore::new(5_000).unwrap(),
            discount: Ore::new(10_000).unwrap(),
            vat: Ore::new(23_750).unwrap(),
            fiken_invoice_id: None,
            lifecycle: Lifecycle::Active,
        };
        assert_eq!(order.total().minor(), 118_750);
    }
}

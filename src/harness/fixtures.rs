//! Fixed sample data: Norwegian import batches and restaurant customers.
//!
//! Ids are deterministic so a kept harness database can be compared across
//! runs.

use super::HarnessError;
use crate::executor::{with_transaction, CellarExecutor};
use crate::model::catalog::{BatchStatus, WineBatch, WineInventory};
use crate::model::sales::Customer;
use crate::model::{insert_sql, Lifecycle, Record};
use crate::money::{Cents, ExchangeRate, Ore};
use chrono::NaiveDate;
use uuid::Uuid;

/// NOK per EUR used for every fixture batch
const FIXTURE_RATE_MICROS: i64 = 11_500_000;

#[derive(Debug, Clone)]
pub struct Fixtures {
    pub batches: Vec<WineBatch>,
    /// One stock row per batch, priced at the batch's target price
    pub inventory: Vec<WineInventory>,
    pub customers: Vec<Customer>,
}

impl Fixtures {
    /// Row count each fixture table must hold after loading, in load order
    pub fn expected_counts(&self) -> Vec<(&'static str, i64)> {
        vec![
            (WineBatch::TABLE, self.batches.len() as i64),
            (Customer::TABLE, self.customers.len() as i64),
        ]
    }
}

#[allow(clippy::too_many_arguments)]
fn batch(
    seq: u128,
    batch_number: &str,
    wine_name: &str,
    producer: &str,
    bottles: i32,
    wine_cost_cents: i64,
    transport: i64,
    customs: i64,
    freight: i64,
    target: i64,
    status: BatchStatus,
    import_date: NaiveDate,
) -> WineBatch {
    WineBatch {
        id: Uuid::from_u128(0xba7c_0000_0000_4000_8000_0000_0000_0000 + seq),
        batch_number: batch_number.to_string(),
        wine_name: wine_name.to_string(),
        producer: producer.to_string(),
        supplier_id: None,
        wine_id: None,
        import_date: Some(import_date),
        total_bottles: bottles,
        eur_exchange_rate: ExchangeRate::from_micros(FIXTURE_RATE_MICROS).unwrap_or_default(),
        wine_cost: Cents::signed(wine_cost_cents),
        transport_cost: Ore::signed(transport),
        customs_fee: Ore::signed(customs),
        freight_forwarding: Ore::signed(freight),
        target_price: Some(Ore::signed(target)),
        status,
        fiken_sync_status: "pending".to_string(),
        lifecycle: Lifecycle::Active,
    }
}

#[allow(clippy::too_many_arguments)]
fn customer(
    seq: u128,
    company: &str,
    organization_number: &str,
    contact: &str,
    email: &str,
    address: &str,
    postal_code: &str,
    payment_terms_days: i32,
    credit_limit: i64,
) -> Customer {
    Customer {
        id: Uuid::from_u128(0xc057_0000_0000_4000_8000_0000_0000_0000 + seq),
        company_name: company.to_string(),
        organization_number: organization_number.to_string(),
        contact_person: Some(contact.to_string()),
        email: Some(email.to_string()),
        phone: None,
        address_line1: Some(address.to_string()),
        address_line2: None,
        postal_code: Some(postal_code.to_string()),
        city: Some("Oslo".to_string()),
        country: "Norway".to_string(),
        fiken_customer_id: None,
        credit_limit: Ore::signed(credit_limit),
        payment_terms_days,
        total_orders: 0,
        total_revenue: Ore::ZERO,
        average_order_value: Ore::ZERO,
        last_order_date: None,
        lifecycle: Lifecycle::Active,
    }
}

/// Stock for a batch at its landed cost; sold-out batches have everything sold
fn stock(seq: u128, batch: &WineBatch, location: &str) -> WineInventory {
    let sold_out = batch.status == BatchStatus::SoldOut;
    WineInventory {
        id: Uuid::from_u128(0x570c_0000_0000_4000_8000_0000_0000_0000 + seq),
        wine_id: None,
        batch_id: batch.id,
        quantity_available: if sold_out { 0 } else { batch.total_bottles },
        quantity_reserved: 0,
        quantity_sold: if sold_out { batch.total_bottles } else { 0 },
        cost_per_bottle: batch.landed_cost_per_bottle(),
        selling_price: batch.target_price.unwrap_or(Ore::ZERO),
        minimum_stock_level: 6,
        location: Some(location.to_string()),
        lifecycle: Lifecycle::Active,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Four batches with their stock and three customers
pub fn standard() -> Fixtures {
    let batches = vec![
        // 40000 EUR cents at 11.50 = 460000 øre; landed 582600 øre, 48550 per bottle
        batch(
            1,
            "FONT-BAR-2024-001",
            "Barolo DOCG",
            "Fontanafredda",
            12,
            40_000,
            80_000,
            30_000,
            12_600,
            64_900,
            BatchStatus::Available,
            date(2024, 9, 2),
        ),
        batch(
            2,
            "BROL-CC-2024-002",
            "Chianti Classico DOCG",
            "Castello di Brolio",
            24,
            40_000,
            70_000,
            40_000,
            18_000,
            32_900,
            BatchStatus::Available,
            date(2024, 9, 12),
        ),
        batch(
            3,
            "FEVRE-CHB-2024-003",
            "Chablis Premier Cru",
            "Domaine William Fèvre",
            6,
            16_000,
            25_000,
            15_000,
            7_000,
            52_500,
            BatchStatus::Ordered,
            date(2024, 9, 17),
        ),
        batch(
            4,
            "VEGA-RDD-2024-004",
            "Ribera del Duero Crianza",
            "Vega Sicilia",
            18,
            40_000,
            75_000,
            35_000,
            15_000,
            45_000,
            BatchStatus::SoldOut,
            date(2024, 8, 18),
        ),
    ];

    let customers = vec![
        customer(
            1,
            "Maaemo Restaurant AS",
            "123456789",
            "Esben Holmboe Bang",
            "wine@maaemo.no",
            "Schweigaards gate 15B",
            "0191",
            30,
            10_000_000,
        ),
        customer(
            2,
            "Theatercaféen AS",
            "987654321",
            "Lars Hansen",
            "wine@theatercafeen.no",
            "Stortingsgata 24-26",
            "0117",
            14,
            5_000_000,
        ),
        customer(
            3,
            "Vinmonopolet Avdeling Frogner",
            "456789123",
            "Kari Nordström",
            "frogner@vinmonopolet.no",
            "Bygdøy Allé 60",
            "0265",
            7,
            0,
        ),
    ];

    let locations = ["Oslo lager", "Oslo lager", "Bergen lager", "Oslo lager"];
    let inventory = batches
        .iter()
        .zip(locations)
        .enumerate()
        .map(|(i, (batch, location))| stock(i as u128 + 1, batch, location))
        .collect();

    Fixtures {
        batches,
        inventory,
        customers,
    }
}

fn insert_all<R: Record>(executor: &dyn CellarExecutor, records: &[R]) -> Result<(), HarnessError> {
    for record in records {
        let sql = insert_sql(record, executor.dialect())?;
        executor.execute(&sql).map_err(|e| HarnessError::Fixture {
            table: R::TABLE.to_string(),
            message: e.to_string(),
        })?;
    }
    log::info!("Loaded {} {} fixture(s)", records.len(), R::TABLE);
    Ok(())
}

/// Insert every fixture in one transaction
pub fn load(executor: &dyn CellarExecutor, fixtures: &Fixtures) -> Result<(), HarnessError> {
    with_transaction(executor, |tx| {
        insert_all(tx, &fixtures.batches)?;
        insert_all(tx, &fixtures.inventory)?;
        insert_all(tx, &fixtures.customers)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_fixture_costs() {
        let fixtures = standard();
        let totals: Vec<i64> = fixtures.batches.iter().map(|b| b.total_cost().minor()).collect();
        assert_eq!(totals, vec![582_600, 588_000, 231_000, 585_000]);
        let per_bottle: Vec<i64> = fixtures
            .batches
            .iter()
            .map(|b| b.landed_cost_per_bottle().minor())
            .collect();
        assert_eq!(per_bottle, vec![48_550, 24_500, 38_500, 32_500]);
    }

    #[test]
    fn test_every_batch_is_stocked() {
        let fixtures = standard();
        assert_eq!(fixtures.inventory.len(), fixtures.batches.len());
        for (stock, batch) in fixtures.inventory.iter().zip(&fixtures.batches) {
            assert_eq!(stock.batch_id, batch.id);
            assert_eq!(stock.cost_per_bottle, batch.landed_cost_per_bottle());
        }
        let sold_out = &fixtures.inventory[3];
        assert_eq!((sold_out.quantity_available, sold_out.quantity_sold), (0, 18));
    }

    #[test]
    fn test_fixture_customers_are_valid() {
        for customer in standard().customers {
            assert!(crate::model::sales::validate_organization_number(&customer.organization_number).is_ok());
        }
        assert_eq!(
            standard().expected_counts(),
            vec![("wine_batches", 4), ("customers", 3)]
        );
    }
}

//! Wine tasting events with attendees, poured wines, costs and outcomes.

use super::column::{ColumnDef, ColumnType, OnDelete};
use super::lifecycle::Lifecycle;
use super::table::TableDef;
use super::Record;
use crate::money::{self, Currency, Ore};
use chrono::NaiveDate;
use uuid::Uuid;

text_enum!(
    VenueType {
        RentedVenue => "RENTED_VENUE",
        CustomerLocation => "CUSTOMER_LOCATION",
        OwnPremises => "OWN_PREMISES",
    }
);

text_enum!(
    EventType {
        Promotional => "PROMOTIONAL",
        Corporate => "CORPORATE",
        Private => "PRIVATE",
        Trade => "TRADE",
    }
);

text_enum!(
    EventStatus {
        Planned => "PLANNED",
        Confirmed => "CONFIRMED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
);

text_enum!(
    AttendeeType {
        ExistingCustomer => "EXISTING_CUSTOMER",
        Prospect => "PROSPECT",
        Industry => "INDUSTRY",
        Press => "PRESS",
    }
);

text_enum!(
    RsvpStatus {
        Invited => "INVITED",
        Confirmed => "CONFIRMED",
        Attended => "ATTENDED",
        NoShow => "NO_SHOW",
    }
);

text_enum!(
    /// Where a poured bottle came from
    WineSource {
        ImportedStock => "IMPORTED_STOCK",
        BroughtExternal => "BROUGHT_EXTERNAL",
        PurchasedForEvent => "PURCHASED_FOR_EVENT",
    }
);

text_enum!(
    OutcomeType {
        ImmediateOrder => "IMMEDIATE_ORDER",
        FollowUpMeeting => "FOLLOW_UP_MEETING",
        NewsletterSignup => "NEWSLETTER_SIGNUP",
        Referral => "REFERRAL",
    }
);

pub fn wine_tastings_table() -> TableDef {
    TableDef::entity(
        "wine_tastings",
        "Tasting events with cost and ROI tracking",
        vec![
            ColumnDef::new("event_name", ColumnType::Varchar(255)).not_null(),
            ColumnDef::new("event_date", ColumnType::Date).not_null(),
            ColumnDef::one_of("venue_type", &VenueType::values()),
            ColumnDef::new("venue_name", ColumnType::Varchar(255)),
            ColumnDef::ore("venue_cost_ore"),
            ColumnDef::new("max_attendees", ColumnType::Integer),
            ColumnDef::new("actual_attendees", ColumnType::Integer)
                .not_null()
                .default("0"),
            ColumnDef::one_of("event_type", &EventType::values()),
            ColumnDef::one_of("event_status", &EventStatus::values()).default("'PLANNED'"),
            ColumnDef::ore("total_event_cost_ore"),
            ColumnDef::ore("estimated_revenue_impact_ore"),
            ColumnDef::ore("actual_revenue_impact_ore"),
            ColumnDef::generated(
                "roi_basis_points",
                ColumnType::BigInt,
                "CASE WHEN total_event_cost_ore > 0 \
                 THEN ((actual_revenue_impact_ore - total_event_cost_ore) * 10000) / total_event_cost_ore \
                 ELSE 0 END",
            ),
            ColumnDef::new("notes", ColumnType::Text),
        ],
    )
    .index(&["event_date"])
}

pub fn tasting_attendees_table() -> TableDef {
    TableDef::entity(
        "tasting_attendees",
        "Invited and attending guests",
        vec![
            ColumnDef::new("tasting_id", ColumnType::Uuid)
                .not_null()
                .references("wine_tastings", OnDelete::Cascade),
            ColumnDef::new("customer_id", ColumnType::Uuid)
                .references("customers", OnDelete::NoAction),
            ColumnDef::new("attendee_name", ColumnType::Varchar(255)).not_null(),
            ColumnDef::new("attendee_email", ColumnType::Varchar(255)),
            ColumnDef::one_of("attendee_type", &AttendeeType::values()),
            ColumnDef::one_of("rsvp_status", &RsvpStatus::values()).default("'INVITED'"),
            ColumnDef::new("follow_up_required", ColumnType::Boolean)
                .not_null()
                .default("FALSE"),
            ColumnDef::ore("potential_order_value_ore"),
        ],
    )
    .index(&["tasting_id"])
}

pub fn tasting_wines_table() -> TableDef {
    TableDef::entity(
        "tasting_wines",
        "Wines poured at a tasting",
        vec![
            ColumnDef::new("tasting_id", ColumnType::Uuid)
                .not_null()
                .references("wine_tastings", OnDelete::Cascade),
            ColumnDef::new("wine_id", ColumnType::Uuid).references("wines", OnDelete::NoAction),
            ColumnDef::new("wine_name", ColumnType::Varchar(255)),
            ColumnDef::new("bottles_used", ColumnType::Integer)
                .not_null()
                .default("1"),
            ColumnDef::one_of("wine_source", &WineSource::values()),
            ColumnDef::ore("cost_per_bottle_ore"),
            ColumnDef::generated(
                "total_cost_ore",
                ColumnType::BigInt,
                "bottles_used * cost_per_bottle_ore",
            )
            .money(Currency::Nok),
            ColumnDef::new("tasting_order", ColumnType::Integer),
            ColumnDef::new("follow_up_orders", ColumnType::Integer)
                .not_null()
                .default("0"),
        ],
    )
    .index(&["tasting_id"])
}

pub fn tasting_costs_table() -> TableDef {
    TableDef::entity(
        "tasting_costs",
        "Itemized tasting costs",
        vec![
            ColumnDef::new("tasting_id", ColumnType::Uuid)
                .not_null()
                .references("wine_tastings", OnDelete::Cascade),
            ColumnDef::new("cost_category", ColumnType::Varchar(50)).not_null(),
            ColumnDef::new("cost_description", ColumnType::Varchar(255)).not_null(),
            ColumnDef::ore("amount_ore"),
            ColumnDef::new("cost_date", ColumnType::Date).not_null(),
            ColumnDef::new("invoice_reference", ColumnType::Varchar(100)),
            ColumnDef::new("fiken_transaction_id", ColumnType::BigInt),
            ColumnDef::new("cost_type", ColumnType::Varchar(20))
                .not_null()
                .default("'fixed'")
                .check("cost_type IN ('fixed', 'variable_per_person')"),
        ],
    )
    .index(&["tasting_id"])
}

pub fn tasting_outcomes_table() -> TableDef {
    TableDef::entity(
        "tasting_outcomes",
        "Business outcomes attributed to a tasting",
        vec![
            ColumnDef::new("tasting_id", ColumnType::Uuid)
                .not_null()
                .references("wine_tastings", OnDelete::Cascade),
            ColumnDef::new("customer_id", ColumnType::Uuid)
                .references("customers", OnDelete::NoAction),
            ColumnDef::one_of("outcome_type", &OutcomeType::values()),
            ColumnDef::ore("outcome_value_ore"),
            ColumnDef::new("outcome_date", ColumnType::Date).not_null(),
            ColumnDef::new("notes", ColumnType::Text),
        ],
    )
    .index(&["tasting_id"])
}

#[derive(Debug, Clone, PartialEq)]
pub struct WineTasting {
    pub id: Uuid,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub venue_type: VenueType,
    pub venue_name: Option<String>,
    pub venue_cost: Ore,
    pub max_attendees: Option<i32>,
    pub actual_attendees: i32,
    pub event_type: EventType,
    pub event_status: EventStatus,
    pub total_event_cost: Ore,
    pub estimated_revenue_impact: Ore,
    pub actual_revenue_impact: Ore,
    pub notes: Option<String>,
    pub lifecycle: Lifecycle,
}

impl WineTasting {
    /// Mirror of the generated `roi_basis_points` column
    pub fn roi_basis_points(&self) -> i64 {
        money::roi_basis_points(self.total_event_cost, self.actual_revenue_impact)
    }

    /// Event cost per attendee (0 with no attendees)
    pub fn cost_per_attendee(&self) -> Ore {
        if self.actual_attendees > 0 {
            Ore::signed(self.total_event_cost.minor() / i64::from(self.actual_attendees))
        } else {
            Ore::ZERO
        }
    }

    /// Sum the itemized costs into `total_event_cost`; per-person costs scale with attendance
    pub fn recalculate_cost(&mut self, costs: &[TastingCost], wines: &[TastingWine]) {
        let attendees = i64::from(self.actual_attendees.max(0));
        let itemized: i64 = costs
            .iter()
            .map(|c| match c.cost_type {
                TastingCostType::Fixed => c.amount.minor(),
                TastingCostType::VariablePerPerson => c.amount.minor() * attendees,
            })
            .sum();
        let poured: i64 = wines.iter().map(|w| w.total_cost().minor()).sum();
        self.total_event_cost = Ore::signed(self.venue_cost.minor() + itemized + poured);
    }
}

impl Record for WineTasting {
    const TABLE: &'static str = "wine_tastings";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("event_name", self.event_name.clone().into()),
            ("event_date", self.event_date.into()),
            ("venue_type", self.venue_type.as_str().into()),
            ("venue_name", self.venue_name.clone().into()),
            ("venue_cost_ore", self.venue_cost.minor().into()),
            ("max_attendees", self.max_attendees.into()),
            ("actual_attendees", self.actual_attendees.into()),
            ("event_type", self.event_type.as_str().into()),
            ("event_status", self.event_status.as_str().into()),
            ("total_event_cost_ore", self.total_event_cost.minor().into()),
            (
                "estimated_revenue_impact_ore",
                self.estimated_revenue_impact.minor().into(),
            ),
            ("actual_revenue_impact_ore", self.actual_revenue_impact.minor().into()),
            ("notes", self.notes.clone().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TastingAttendee {
    pub id: Uuid,
    pub tasting_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub attendee_name: String,
    pub attendee_email: Option<String>,
    pub attendee_type: AttendeeType,
    pub rsvp_status: RsvpStatus,
    pub follow_up_required: bool,
    pub potential_order_value: Ore,
    pub lifecycle: Lifecycle,
}

impl Record for TastingAttendee {
    const TABLE: &'static str = "tasting_attendees";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("tasting_id", self.tasting_id.into()),
            ("customer_id", self.customer_id.into()),
            ("attendee_name", self.attendee_name.clone().into()),
            ("attendee_email", self.attendee_email.clone().into()),
            ("attendee_type", self.attendee_type.as_str().into()),
            ("rsvp_status", self.rsvp_status.as_str().into()),
            ("follow_up_required", self.follow_up_required.into()),
            ("potential_order_value_ore", self.potential_order_value.minor().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TastingWine {
    pub id: Uuid,
    pub tasting_id: Uuid,
    pub wine_id: Option<Uuid>,
    pub wine_name: Option<String>,
    pub bottles_used: i32,
    pub wine_source: WineSource,
    pub cost_per_bottle: Ore,
    pub tasting_order: Option<i32>,
    pub follow_up_orders: i32,
    pub lifecycle: Lifecycle,
}

impl TastingWine {
    /// Mirror of the generated `total_cost_ore` column
    pub fn total_cost(&self) -> Ore {
        Ore::signed(i64::from(self.bottles_used) * self.cost_per_bottle.minor())
    }
}

impl Record for TastingWine {
    const TABLE: &'static str = "tasting_wines";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("tasting_id", self.tasting_id.into()),
            ("wine_id", self.wine_id.into()),
            ("wine_name", self.wine_name.clone().into()),
            ("bottles_used", self.bottles_used.into()),
            ("wine_source", self.wine_source.as_str().into()),
            ("cost_per_bottle_ore", self.cost_per_bottle.minor().into()),
            ("tasting_order", self.tasting_order.into()),
            ("follow_up_orders", self.follow_up_orders.into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

text_enum!(
    TastingCostType {
        Fixed => "fixed",
        VariablePerPerson => "variable_per_person",
    }
);

#[derive(Debug, Clone, PartialEq)]
pub struct TastingCost {
    pub id: Uuid,
    pub tasting_id: Uuid,
    pub cost_category: String,
    pub cost_description: String,
    pub amount: Ore,
    pub cost_date: NaiveDate,
    pub invoice_reference: Option<String>,
    pub fiken_transaction_id: Option<i64>,
    pub cost_type: TastingCostType,
    pub lifecycle: Lifecycle,
}

impl Record for TastingCost {
    const TABLE: &'static str = "tasting_costs";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("tasting_id", self.tasting_id.into()),
            ("cost_category", self.cost_category.clone().into()),
            ("cost_description", self.cost_description.clone().into()),
            ("amount_ore", self.amount.minor().into()),
            ("cost_date", self.cost_date.into()),
            ("invoice_reference", self.invoice_reference.clone().into()),
            ("fiken_transaction_id", self.fiken_transaction_id.into()),
            ("cost_type", self.cost_type.as_str().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TastingOutcome {
    pub id: Uuid,
    pub tasting_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub outcome_type: OutcomeType,
    pub outcome_value: Ore,
    pub outcome_date: NaiveDate,
    pub notes: Option<String>,
    pub lifecycle: Lifecycle,
}

impl Record for TastingOutcome {
    const TABLE: &'static str = "tasting_outcomes";

    fn values(&self) -> Vec<(&'static str, sea_query::Value)> {
        vec![
            ("id", self.id.into()),
            ("tasting_id", self.tasting_id.into()),
            ("customer_id", self.customer_id.into()),
            ("outcome_type", self.outcome_type.as_str().into()),
            ("outcome_value_ore", self.outcome_value.minor().into()),
            ("outcome_date", self.outcome_date.into()),
            ("notes", self.notes.clone().into()),
            ("lifecycle", self.lifecycle.as_str().into()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasting() -> WineTasting {
        WineTasting {
            id: Uuid::new_v4(),
            event_name: "Piemonte evening".into(),
            event_date: NaiveDate::from_ymd_opt(2024, 5, 14).unwrap(),
            venue_type: VenueType::RentedVenue,
            venue_name: Some("Vinbaren".into()),
            venue_cost: Ore::new(300_000).unwrap(),
            max_attendees: Some(20),
            actual_attendees: 10,
            event_type: EventType::Promotional,
            event_status: EventStatus::Completed,
            total_event_cost: Ore::ZERO,
            estimated_revenue_impact: Ore::ZERO,
            actual_revenue_impact: Ore::new(1_500_000).unwrap(),
            notes: None,
            lifecycle: Lifecycle::Active,
        }
    }

    #[test]
    fn test_recalculate_cost_and_roi() {
        let mut event = tasting();
        let costs = vec![TastingCost {
            id: Uuid::new_v4(),
            tasting_id: event.id,
            cost_category: "catering".into(),
            cost_description: "Cheese plates".into(),
            amount: Ore::new(15_000).unwrap(),
            cost_date: event.event_date,
            invoice_reference: None,
            fiken_transaction_id: None,
            cost_type: TastingCostType::VariablePerPerson,
            lifecycle: Lifecycle::Active,
        }];
        let wines = vec![TastingWine {
            id: Uuid::new_v4(),
            tasting_id: event.id,
            wine_id: None,
            wine_name: Some("Barolo DOCG".into()),
            bottles_used: 4,
            wine_source: WineSource::ImportedStock,
            cost_per_bottle: Ore::new(48_550).unwrap(),
            tasting_order: Some(1),
            follow_up_orders: 0,
            lifecycle: Lifecycle::Active,
        }];

        event.recalculate_cost(&costs, &wines);
        // 300000 venue + 10 * 15000 catering + 4 * 48550 wine
        assert_eq!(event.total_event_cost.minor(), 644_200);
        assert_eq!(event.cost_per_attendee().minor(), 64_420);
        // (1500000 - 644200) * 10000 / 644200
        assert_eq!(event.roi_basis_points(), 13_284);
    }

    #[test]
    fn test_roi_without_cost_is_zero() {
        assert_eq!(tasting().roi_basis_points(), 0);
    }
}

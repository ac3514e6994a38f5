//! Monetary values in the smallest currency unit.
//!
//! Every persisted amount is an integer number of øre (NOK) or cents (EUR).
//! Decimal conversion happens only at presentation boundaries through
//! `rust_decimal`, never through floating point.
//!
//! The integer helpers (`margin_basis_points`, `landed_cost_per_bottle`, ...)
//! use the same truncating integer arithmetic as the generated column
//! expressions in the schema, so an application value and a database value
//! computed from the same inputs are always identical.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Scale of [`ExchangeRate`] micros
pub const RATE_SCALE: i64 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("monetary amount must not be negative: {0}")]
    Negative(i64),
    #[error("invalid monetary amount '{0}'")]
    Invalid(String),
    #[error("monetary amount out of range: {0}")]
    Overflow(String),
}

/// Currency of a minor-unit amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Nok,
    Eur,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Nok => "NOK",
            Currency::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

macro_rules! minor_unit {
    ($(#[$meta:meta])* $name:ident, $currency:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const ZERO: $name = $name(0);

            /// Non-negative amount in minor units
            pub fn new(minor: i64) -> Result<Self, MoneyError> {
                if minor < 0 {
                    return Err(MoneyError::Negative(minor));
                }
                Ok(Self(minor))
            }

            /// Signed amount, for derived values such as margins
            pub const fn signed(minor: i64) -> Self {
                Self(minor)
            }

            pub const fn minor(&self) -> i64 {
                self.0
            }

            pub fn currency(&self) -> Currency {
                $currency
            }

            /// Convert a major-unit decimal, rounding half away from zero
            pub fn from_major(amount: Decimal) -> Result<Self, MoneyError> {
                let minor = (amount * Decimal::ONE_HUNDRED)
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                    .to_i64()
                    .ok_or_else(|| MoneyError::Overflow(amount.to_string()))?;
                Self::new(minor)
            }

            /// Parse a major-unit string such as `"33.60"`
            pub fn parse_major(s: &str) -> Result<Self, MoneyError> {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',' && *c != ' ').collect();
                let amount = Decimal::from_str(&cleaned)
                    .map_err(|_| MoneyError::Invalid(s.to_string()))?;
                Self::from_major(amount)
            }

            /// Major-unit decimal with two fraction digits
            pub fn to_major(&self) -> Decimal {
                Decimal::new(self.0, 2)
            }

            pub fn checked_add(self, other: Self) -> Option<Self> {
                self.0.checked_add(other.0).map(Self)
            }

            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }

            pub fn checked_mul(self, factor: i64) -> Option<Self> {
                self.0.checked_mul(factor).map(Self)
            }
        }

        /// Saturates at the `i64` bounds; use `checked_add` to detect overflow
        impl Add for $name {
            type Output = $name;
            fn add(self, rhs: $name) -> $name {
                $name(self.0.saturating_add(rhs.0))
            }
        }

        /// Saturates at the `i64` bounds; use `checked_sub` to detect overflow
        impl Sub for $name {
            type Output = $name;
            fn sub(self, rhs: $name) -> $name {
                $name(self.0.saturating_sub(rhs.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", format_minor(self.0), $currency.code())
            }
        }
    };
}

minor_unit!(
    /// Norwegian øre (1/100 NOK)
    Ore,
    Currency::Nok
);

minor_unit!(
    /// Euro cents (1/100 EUR)
    Cents,
    Currency::Eur
);

/// NOK per EUR, stored as an integer scaled by [`RATE_SCALE`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeRate(i64);

impl ExchangeRate {
    pub fn from_micros(micros: i64) -> Result<Self, MoneyError> {
        if micros < 0 {
            return Err(MoneyError::Negative(micros));
        }
        Ok(Self(micros))
    }

    /// Parse a decimal rate such as `"11.4850"`
    pub fn parse(s: &str) -> Result<Self, MoneyError> {
        let rate = Decimal::from_str(s.trim()).map_err(|_| MoneyError::Invalid(s.to_string()))?;
        let micros = (rate * Decimal::from(RATE_SCALE))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or_else(|| MoneyError::Overflow(s.to_string()))?;
        Self::from_micros(micros)
    }

    pub fn micros(&self) -> i64 {
        self.0
    }

    /// Convert cents to øre, truncating like the schema expression
    pub fn convert(&self, cents: Cents) -> Ore {
        Ore::signed(saturate(
            i128::from(cents.minor()) * i128::from(self.0) / i128::from(RATE_SCALE),
        ))
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// `(numerator * 10000) / denominator` without intermediate overflow
fn basis_points(numerator: i128, denominator: i64) -> i64 {
    saturate(numerator * 10_000 / i128::from(denominator))
}

/// Format minor units as `1,234.56` (grouped thousands, two decimals)
pub fn format_minor(minor: i64) -> String {
    let negative = minor < 0;
    let abs = minor.unsigned_abs();
    let whole = (abs / 100).to_string();
    let frac = abs % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{:02}", if negative { "-" } else { "" }, grouped, frac)
}

/// Margin as a percentage of the selling price, two decimals
///
/// Returns zero when either price is zero.
pub fn margin_percentage(cost: Ore, selling_price: Ore) -> Decimal {
    if cost.minor() == 0 || selling_price.minor() == 0 {
        return Decimal::ZERO;
    }
    let margin = Decimal::from(selling_price.minor()) - Decimal::from(cost.minor());
    (margin / Decimal::from(selling_price.minor()) * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Markup as a percentage of the cost, two decimals
///
/// Returns zero when either price is zero.
pub fn markup_percentage(cost: Ore, selling_price: Ore) -> Decimal {
    if cost.minor() == 0 || selling_price.minor() == 0 {
        return Decimal::ZERO;
    }
    let markup = Decimal::from(selling_price.minor()) - Decimal::from(cost.minor());
    (markup / Decimal::from(cost.minor()) * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Per-bottle margin, may be negative
pub fn margin_per_bottle(cost: Ore, selling_price: Ore) -> Ore {
    selling_price - cost
}

/// Margin in basis points of the selling price (0 when the price is 0)
pub fn margin_basis_points(cost: Ore, selling_price: Ore) -> i64 {
    if selling_price.minor() > 0 {
        let margin = i128::from(selling_price.minor()) - i128::from(cost.minor());
        basis_points(margin, selling_price.minor())
    } else {
        0
    }
}

/// Return on investment in basis points of the cost (0 when the cost is 0)
pub fn roi_basis_points(cost: Ore, revenue: Ore) -> i64 {
    if cost.minor() > 0 {
        basis_points(i128::from(revenue.minor()) - i128::from(cost.minor()), cost.minor())
    } else {
        0
    }
}

/// Inputs of a batch's landed cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandedCost {
    pub wine_cost: Cents,
    pub rate: ExchangeRate,
    pub transport: Ore,
    pub customs: Ore,
    pub freight_forwarding: Ore,
}

impl LandedCost {
    /// Total batch cost in øre
    pub fn total(&self) -> Ore {
        self.rate.convert(self.wine_cost) + self.transport + self.customs + self.freight_forwarding
    }

    /// Landed cost of one bottle (0 for an empty batch)
    pub fn per_bottle(&self, bottles: i64) -> Ore {
        if bottles > 0 {
            Ore::signed(self.total().minor() / bottles)
        } else {
            Ore::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_rounds_half_up() {
        assert_eq!(Ore::parse_major("33.60").unwrap().minor(), 3360);
        assert_eq!(Ore::parse_major("0.005").unwrap().minor(), 1);
        assert_eq!(Ore::parse_major("1,234.50").unwrap().minor(), 123450);
        assert_eq!(Cents::parse_major("45.995").unwrap().minor(), 4600);
    }

    #[test]
    fn test_rejects_negative_and_garbage() {
        assert_eq!(Ore::new(-1), Err(MoneyError::Negative(-1)));
        assert!(matches!(Ore::parse_major("abc"), Err(MoneyError::Invalid(_))));
        assert!(Ore::parse_major("-5.00").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Ore::new(336000).unwrap().to_string(), "3,360.00 NOK");
        assert_eq!(Cents::new(5).unwrap().to_string(), "0.05 EUR");
        assert_eq!(format_minor(123456789), "1,234,567.89");
        assert_eq!(format_minor(-4500), "-45.00");
    }

    #[test]
    fn test_to_major() {
        assert_eq!(Ore::new(64900).unwrap().to_major().to_string(), "649.00");
    }

    #[test]
    fn test_margin_and_markup() {
        let cost = Ore::new(48550).unwrap();
        let sell = Ore::new(64900).unwrap();
        assert_eq!(margin_percentage(cost, sell).to_string(), "25.19");
        assert_eq!(markup_percentage(cost, sell).to_string(), "33.68");
        assert_eq!(margin_percentage(Ore::ZERO, sell), Decimal::ZERO);
        assert_eq!(margin_per_bottle(cost, sell).minor(), 16350);
        assert_eq!(margin_basis_points(cost, sell), 2519);
    }

    #[test]
    fn test_roi() {
        let cost = Ore::new(500000).unwrap();
        assert_eq!(roi_basis_points(cost, Ore::new(1250000).unwrap()), 15000);
        assert_eq!(roi_basis_points(Ore::ZERO, Ore::new(10).unwrap()), 0);
    }

    #[test]
    fn test_landed_cost() {
        let landed = LandedCost {
            wine_cost: Cents::new(45000).unwrap(),
            rate: ExchangeRate::parse("11.50").unwrap(),
            transport: Ore::new(40000).unwrap(),
            customs: Ore::new(15100).unwrap(),
            freight_forwarding: Ore::new(10000).unwrap(),
        };
        assert_eq!(landed.total().minor(), 582600);
        assert_eq!(landed.per_bottle(12).minor(), 48550);
        assert_eq!(landed.per_bottle(0), Ore::ZERO);
    }

    #[test]
    fn test_extreme_amounts_do_not_overflow() {
        let max = Ore::signed(i64::MAX);
        let min = Ore::signed(i64::MIN);
        assert_eq!(max.checked_add(Ore::signed(1)), None);
        assert_eq!(min.checked_sub(Ore::signed(1)), None);
        assert_eq!(Ore::signed(5).checked_sub(Ore::signed(7)), Some(Ore::signed(-2)));
        assert_eq!((max + Ore::signed(1)).minor(), i64::MAX);
        assert_eq!(margin_per_bottle(max, min).minor(), i64::MIN);

        assert_eq!(margin_basis_points(Ore::ZERO, max), 10_000);
        assert_eq!(margin_basis_points(min, Ore::signed(1)), i64::MAX);
        assert_eq!(roi_basis_points(Ore::signed(1), max), i64::MAX);
        assert_eq!(
            ExchangeRate::from_micros(i64::MAX).unwrap().convert(Cents::signed(i64::MAX)).minor(),
            i64::MAX
        );
    }

    #[test]
    fn test_exchange_rate() {
        let rate = ExchangeRate::parse("11.4850").unwrap();
        assert_eq!(rate.micros(), 11_485_000);
        assert_eq!(rate.convert(Cents::new(100).unwrap()).minor(), 1148);
    }
}

//! Exact money arithmetic
//!
//! `MoneyAmount` is a fixed-point pair of whole units and minor units
//! (cents). Values are always kept in normal form, `0 <= fraction < 100`,
//! with any carry or borrow folded into `integer`. In normal form the derived
//! lexicographic ordering on `(integer, fraction)` is the numeric ordering.
//!
//! Negative amounts use floor semantics: `-0.50` is `{ integer: -1, fraction: 50 }`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exact monetary amount
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "MoneyParts")]
pub struct MoneyAmount {
    integer: i64,
    fraction: i64,
}

/// Errors from parsing or converting into a `MoneyAmount`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseMoneyError {
    /// Empty input
    #[error("empty amount")]
    Empty,

    /// Not a decimal number
    #[error("invalid amount: {0}")]
    Invalid(String),

    /// More fractional digits than minor units can hold
    #[error("amount has more than two fractional digits: {0}")]
    TooPrecise(String),

    /// Does not fit in 64-bit minor units
    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

impl MoneyAmount {
    /// Minor units per whole unit
    pub const FRACTION_SCALE: i64 = 100;

    /// Zero
    pub const ZERO: MoneyAmount = MoneyAmount {
        integer: 0,
        fraction: 0,
    };

    /// Build from whole and minor units, normalizing the fraction.
    ///
    /// Saturates at the representable bounds instead of wrapping.
    pub fn new(integer: i64, fraction: i64) -> Self {
        let carry = fraction.div_euclid(Self::FRACTION_SCALE);
        Self {
            integer: integer.saturating_add(carry),
            fraction: fraction.rem_euclid(Self::FRACTION_SCALE),
        }
    }

    /// Whole units only
    pub const fn whole(integer: i64) -> Self {
        Self {
            integer,
            fraction: 0,
        }
    }

    /// Build from a total count of minor units
    pub const fn from_minor_units(units: i64) -> Self {
        Self {
            integer: units.div_euclid(Self::FRACTION_SCALE),
            fraction: units.rem_euclid(Self::FRACTION_SCALE),
        }
    }

    /// Total minor units, `None` if it does not fit in an `i64`
    pub fn minor_units(&self) -> Option<i64> {
        self.integer
            .checked_mul(Self::FRACTION_SCALE)?
            .checked_add(self.fraction)
    }

    /// Whole-unit part
    pub const fn integer(&self) -> i64 {
        self.integer
    }

    /// Minor-unit part, always in `0..FRACTION_SCALE`
    pub const fn fraction(&self) -> i64 {
        self.fraction
    }

    /// Strictly greater than zero
    pub fn is_positive(&self) -> bool {
        *self > Self::ZERO
    }

    /// Strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.integer < 0
    }

    /// Componentwise addition with carry, `None` on overflow
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let integer = self.integer.checked_add(rhs.integer)?;
        Self::normalized(integer, self.fraction + rhs.fraction)
    }

    /// Componentwise subtraction with borrow, `None` on overflow
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let integer = self.integer.checked_sub(rhs.integer)?;
        Self::normalized(integer, self.fraction - rhs.fraction)
    }

    fn normalized(integer: i64, fraction: i64) -> Option<Self> {
        Some(Self {
            integer: integer.checked_add(fraction.div_euclid(Self::FRACTION_SCALE))?,
            fraction: fraction.rem_euclid(Self::FRACTION_SCALE),
        })
    }

    fn total_i128(&self) -> i128 {
        self.integer as i128 * Self::FRACTION_SCALE as i128 + self.fraction as i128
    }

    fn from_total_i128(units: i128, original: &str) -> Result<Self, ParseMoneyError> {
        let scale = Self::FRACTION_SCALE as i128;
        let integer = i64::try_from(units.div_euclid(scale))
            .map_err(|_| ParseMoneyError::OutOfRange(original.to_string()))?;
        Ok(Self {
            integer,
            fraction: units.rem_euclid(scale) as i64,
        })
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total_i128();
        let sign = if total < 0 { "-" } else { "" };
        let abs = total.unsigned_abs();
        let scale = Self::FRACTION_SCALE as u128;
        write!(f, "{}{}.{:02}", sign, abs / scale, abs % scale)
    }
}

impl FromStr for MoneyAmount {
    type Err = ParseMoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseMoneyError::Empty);
        }

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, minor) = match digits.split_once('.') {
            Some((whole, minor)) => (whole, minor),
            None => (digits, ""),
        };

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(minor) {
            return Err(ParseMoneyError::Invalid(s.to_string()));
        }
        if minor.len() > 2 {
            return Err(ParseMoneyError::TooPrecise(s.to_string()));
        }

        let whole: i128 = whole
            .parse()
            .map_err(|_| ParseMoneyError::OutOfRange(s.to_string()))?;
        let minor: i128 = match minor.len() {
            0 => 0,
            1 => minor.parse::<i128>().unwrap_or(0) * 10,
            _ => minor.parse::<i128>().unwrap_or(0),
        };

        let total = whole
            .checked_mul(Self::FRACTION_SCALE as i128)
            .and_then(|units| units.checked_add(minor))
            .ok_or_else(|| ParseMoneyError::OutOfRange(s.to_string()))?;

        Self::from_total_i128(if negative { -total } else { total }, s)
    }
}

impl From<MoneyAmount> for Decimal {
    fn from(amount: MoneyAmount) -> Self {
        Decimal::from_i128_with_scale(amount.total_i128(), 2)
    }
}

impl TryFrom<Decimal> for MoneyAmount {
    type Error = ParseMoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        let mut exact = value.normalize();
        if exact.scale() > 2 {
            return Err(ParseMoneyError::TooPrecise(value.to_string()));
        }
        exact.rescale(2);
        Self::from_total_i128(exact.mantissa(), &value.to_string())
    }
}

/// Wire shape; normalized on the way in
#[derive(Deserialize)]
struct MoneyParts {
    integer: i64,
    #[serde(default)]
    fraction: i64,
}

impl TryFrom<MoneyParts> for MoneyAmount {
    type Error = ParseMoneyError;

    fn try_from(parts: MoneyParts) -> Result<Self, Self::Error> {
        Self::normalized(parts.integer, parts.fraction).ok_or_else(|| {
            ParseMoneyError::OutOfRange(format!("{}/{}", parts.integer, parts.fraction))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_fraction() {
        assert_eq!(MoneyAmount::new(1, 150), MoneyAmount::new(2, 50));
        assert_eq!(MoneyAmount::new(0, -50).integer(), -1);
        assert_eq!(MoneyAmount::new(0, -50).fraction(), 50);
    }

    #[test]
    fn test_ordering_is_numeric() {
        let small = MoneyAmount::new(0, 99);
        let large = MoneyAmount::whole(1);
        assert!(small < large);
        assert!(MoneyAmount::new(0, -1) < MoneyAmount::ZERO);
        assert!(MoneyAmount::new(10, 5) > MoneyAmount::new(10, 4));
    }

    #[test]
    fn test_add_carries() {
        let sum = MoneyAmount::new(0, 50)
            .checked_add(MoneyAmount::new(0, 60))
            .unwrap();
        assert_eq!(sum, MoneyAmount::new(1, 10));
    }

    #[test]
    fn test_sub_borrows() {
        let diff = MoneyAmount::whole(1)
            .checked_sub(MoneyAmount::new(0, 1))
            .unwrap();
        assert_eq!(diff, MoneyAmount::new(0, 99));

        let negative = MoneyAmount::new(0, 50)
            .checked_sub(MoneyAmount::new(11, 50))
            .unwrap();
        assert!(negative.is_negative());
        assert_eq!(negative, MoneyAmount::whole(-11));
    }

    #[test]
    fn test_overflow_is_reported() {
        assert!(MoneyAmount::whole(i64::MAX)
            .checked_add(MoneyAmount::whole(1))
            .is_none());
        assert!(MoneyAmount::whole(i64::MAX).minor_units().is_none());
    }

    #[test]
    fn test_minor_units() {
        let amount = MoneyAmount::from_minor_units(12_345);
        assert_eq!(amount, MoneyAmount::new(123, 45));
        assert_eq!(amount.minor_units(), Some(12_345));
        assert_eq!(MoneyAmount::from_minor_units(-5).minor_units(), Some(-5));
    }

    #[test]
    fn test_display() {
        assert_eq!(MoneyAmount::whole(70).to_string(), "70.00");
        assert_eq!(MoneyAmount::new(10, 5).to_string(), "10.05");
        assert_eq!(MoneyAmount::new(0, -50).to_string(), "-0.50");
    }

    #[test]
    fn test_parse() {
        assert_eq!("70".parse::<MoneyAmount>().unwrap(), MoneyAmount::whole(70));
        assert_eq!("70.5".parse::<MoneyAmount>().unwrap(), MoneyAmount::new(70, 50));
        assert_eq!("70.05".parse::<MoneyAmount>().unwrap(), MoneyAmount::new(70, 5));
        assert_eq!("-0.50".parse::<MoneyAmount>().unwrap(), MoneyAmount::new(0, -50));

        assert_eq!("".parse::<MoneyAmount>(), Err(ParseMoneyError::Empty));
        assert!(matches!(
            "1.234".parse::<MoneyAmount>(),
            Err(ParseMoneyError::TooPrecise(_))
        ));
        assert!(matches!(
            "1.2x".parse::<MoneyAmount>(),
            Err(ParseMoneyError::Invalid(_))
        ));
        assert!(matches!(
            ".5".parse::<MoneyAmount>(),
            Err(ParseMoneyError::Invalid(_))
        ));
    }

    #[test]
    fn test_decimal_conversion() {
        let amount = MoneyAmount::new(1000, 1);
        let decimal: Decimal = amount.into();
        assert_eq!(decimal, Decimal::new(100001, 2));
        assert_eq!(MoneyAmount::try_from(decimal).unwrap(), amount);

        assert_eq!(
            MoneyAmount::try_from(Decimal::new(5, 0)).unwrap(),
            MoneyAmount::whole(5)
        );
        assert!(MoneyAmount::try_from(Decimal::new(1001, 3)).is_err());
    }

    #[test]
    fn test_serde_normalizes() {
        let amount: MoneyAmount =
            serde_json::from_str(r#"{"integer": 1, "fraction": 250}"#).unwrap();
        assert_eq!(amount, MoneyAmount::new(3, 50));

        let json = serde_json::to_string(&MoneyAmount::new(70, 0)).unwrap();
        assert_eq!(json, r#"{"integer":70,"fraction":0}"#);
    }
}

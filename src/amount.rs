use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

/// Errors produced when parsing an [`Amount`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("'{0}' is not a decimal number")]
    Malformed(String),
    #[error("'{0}' has more than 4 decimal places")]
    Precision(String),
    #[error("'{0}' is out of range")]
    Overflow(String),
}

impl Amount {
    const SCALE: i64 = 10_000;
    const DECIMALS: usize = 4;

    pub const ZERO: Amount = Amount(0);

    /// Largest amount a single donation may carry, `1000000000.0000`.
    pub const MAX_DONATION: Amount = Amount(1_000_000_000 * Self::SCALE);

    /// Rounds to 4 decimals. Values outside `±MAX_DONATION` are rejected.
    pub fn try_from_float(value: f64) -> Result<Self, AmountError> {
        let scaled = (value * Self::SCALE as f64).round();
        let limit = Self::MAX_DONATION.0 as f64;
        if !scaled.is_finite() || scaled.abs() > limit {
            return Err(AmountError::Overflow(value.to_string()));
        }
        Ok(Amount(scaled as i64))
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole currency units, e.g. `Amount::from_units(100)` is `100.0000`.
    pub fn from_units(units: i64) -> Self {
        Amount(units * Self::SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_abs(self) -> Option<Self> {
        self.0.checked_abs().map(Amount)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Sum of `amounts`, `None` if any partial sum leaves the `i64` range.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Self>) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u64;
        let frac = abs % Self::SCALE as u64;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Exact decimal parsing, no float round trip: `"75.00"`, `"-1.5"`, `"100"`.
    ///
    /// Magnitudes above [`Amount::MAX_DONATION`] are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        let well_formed = !(whole.is_empty() && frac.is_empty())
            && whole.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b.is_ascii_digit());
        if !well_formed {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if frac.len() > Self::DECIMALS {
            return Err(AmountError::Precision(s.to_string()));
        }

        let overflow = || AmountError::Overflow(s.to_string());
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let frac: i64 = format!("{frac:0<width$}", width = Self::DECIMALS)
            .parse()
            .map_err(|_| overflow())?;

        let scaled = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .filter(|&scaled| scaled <= Self::MAX_DONATION.0)
            .ok_or_else(overflow)?;

        Ok(Amount(if negative { -scaled } else { scaled }))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts either a JSON number or a numeric string.
impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Raw::Number(value) => Amount::try_from_float(value).map_err(serde::de::Error::custom),
        }
    }
}

/// Negation is exact for every amount the engine accepts.
impl std::ops::Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_float_rounds_correctly() {
        assert_eq!(Amount::try_from_float(1.23456), Ok(Amount::from_scaled(12346)));
        assert_eq!(Amount::try_from_float(1.23454), Ok(Amount::from_scaled(12345)));
        assert_eq!(Amount::try_from_float(75.0), Ok(Amount::from_units(75)));
    }

    #[test]
    fn from_float_rejects_unrepresentable() {
        for value in [1e300, -1e300, f64::INFINITY, f64::NAN, 1_000_000_000.0001] {
            assert!(
                matches!(Amount::try_from_float(value), Err(AmountError::Overflow(_))),
                "{value}"
            );
        }
        assert_eq!(Amount::try_from_float(1e9), Ok(Amount::MAX_DONATION));
    }

    #[test]
    fn display_formats() {
        assert_eq!(Amount::from_units(100).to_string(), "100.0000");
        assert_eq!(Amount::from_scaled(15_000).to_string(), "1.5000");
        assert_eq!(Amount::from_scaled(-502_500).to_string(), "-50.2500");
        assert_eq!(Amount::from_scaled(-1).to_string(), "-0.0001");
    }

    #[test]
    fn parse_decimal_strings() {
        assert_eq!("75.00".parse::<Amount>(), Ok(Amount::from_units(75)));
        assert_eq!("100".parse::<Amount>(), Ok(Amount::from_units(100)));
        assert_eq!(" 1.5 ".parse::<Amount>(), Ok(Amount::from_scaled(15_000)));
        assert_eq!(".25".parse::<Amount>(), Ok(Amount::from_scaled(2_500)));
        assert_eq!("-50.25".parse::<Amount>(), Ok(Amount::from_scaled(-502_500)));
        assert_eq!("0.0001".parse::<Amount>(), Ok(Amount::from_scaled(1)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("".parse::<Amount>(), Err(AmountError::Empty));
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!("1.2.3".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!(".".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!("1e5".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!(
            "1.00001".parse::<Amount>(),
            Err(AmountError::Precision(_))
        ));
        assert!(matches!(
            "99999999999999999999".parse::<Amount>(),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn parse_bounded_by_max_donation() {
        assert_eq!("1000000000".parse::<Amount>(), Ok(Amount::MAX_DONATION));
        assert_eq!(
            "-1000000000.0000".parse::<Amount>(),
            Ok(-Amount::MAX_DONATION)
        );
        assert!(matches!(
            "1000000000.0001".parse::<Amount>(),
            Err(AmountError::Overflow(_))
        ));
        assert!(matches!(
            "900000000000000".parse::<Amount>(),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn deserialize_number_or_string() {
        let from_text: Amount = serde_json::from_str("\"75.00\"").unwrap();
        let from_float: Amount = serde_json::from_str("75.5").unwrap();
        let from_int: Amount = serde_json::from_str("75").unwrap();

        assert_eq!(from_text, Amount::from_units(75));
        assert_eq!(from_float, Amount::from_scaled(755_000));
        assert_eq!(from_int, Amount::from_units(75));
        assert!(serde_json::from_str::<Amount>("\"seventy\"").is_err());
        assert!(serde_json::from_str::<Amount>("1e300").is_err());
    }

    #[test]
    fn serialize_as_string() {
        let json = serde_json::to_string(&Amount::from_units(3)).unwrap();
        assert_eq!(json, "\"3.0000\"");
    }

    #[test]
    fn arithmetic() {
        let a = Amount::from_scaled(100);
        let b = Amount::from_scaled(30);
        assert_eq!(a.checked_add(b), Some(Amount::from_scaled(130)));
        assert_eq!(a.checked_sub(b), Some(Amount::from_scaled(70)));
        assert_eq!(-a, Amount::from_scaled(-100));
    }

    #[test]
    fn arithmetic_overflow_is_none() {
        let big = Amount::from_scaled(i64::MAX - 1);
        assert_eq!(big.checked_add(Amount::from_scaled(2)), None);
        assert_eq!(
            Amount::from_scaled(i64::MIN + 1).checked_sub(Amount::from_scaled(2)),
            None
        );
        assert_eq!(
            big.checked_add(Amount::from_scaled(1)),
            Some(Amount::from_scaled(i64::MAX))
        );
    }

    #[test]
    fn sum_of_amounts() {
        let total = Amount::checked_sum([1, 2, 3].into_iter().map(Amount::from_units));
        assert_eq!(total, Some(Amount::from_units(6)));
        assert_eq!(Amount::checked_sum([]), Some(Amount::ZERO));
        assert_eq!(
            Amount::checked_sum([Amount::from_scaled(i64::MAX), Amount::from_scaled(1)]),
            None
        );
    }

    #[test]
    fn sign_predicates() {
        assert!(Amount::from_scaled(1).is_positive());
        assert!(!Amount::ZERO.is_positive());
        assert!(Amount::ZERO.is_zero());
        assert!(!Amount::from_scaled(-1).is_positive());
        assert_eq!(Amount::from_scaled(-5).checked_abs(), Some(Amount::from_scaled(5)));
        assert_eq!(Amount::from_scaled(i64::MIN).checked_abs(), None);
    }
}

//! Numeric helpers
//!
//! Raw on-chain amounts, decimal shifting, prices.
//!
//! On-chain quantities are 256-bit unsigned integers, far beyond a 96-bit
//! decimal mantissa, so they are carried as `U256` and written to the store
//! as decimal strings. Normalization by token decimals is an exact string
//! operation; floating-point values are only ever produced as display
//! projections (`*Number` fields) and never fed back into arithmetic.

use alloy_primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::AmountError;

// ── Raw amounts ─────────────────────────────────────────────────────

/// Parse an unsigned decimal integer; no sign, no radix prefix.
fn parse_u256(digits: &str, original: &str) -> Result<U256, AmountError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Invalid(original.to_string()));
    }
    U256::from_str_radix(digits, 10).map_err(|_| AmountError::Invalid(original.to_string()))
}

/// Non-negative on-chain integer amount (uint256).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RawAmount(U256);

impl RawAmount {
    pub const ZERO: RawAmount = RawAmount(U256::ZERO);
    pub const MAX: RawAmount = RawAmount(U256::MAX);

    pub fn new(value: u128) -> Self {
        Self(U256::from(value))
    }

    pub fn from_u256(value: U256) -> Self {
        Self(value)
    }

    pub fn value(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: RawAmount) -> Result<Self, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| AmountError::Overflow {
                left: self.to_string(),
                right: other.to_string(),
            })
    }

    pub fn checked_sub(self, other: RawAmount) -> Result<Self, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or_else(|| AmountError::Underflow {
                balance: self.to_string(),
                delta: format!("-{}", other),
            })
    }

    /// Apply a signed delta, failing if the result would be negative.
    pub fn apply_delta(self, delta: SignedAmount) -> Result<Self, AmountError> {
        if !delta.negative {
            return self.checked_add(RawAmount(delta.magnitude));
        }
        self.0
            .checked_sub(delta.magnitude)
            .map(Self)
            .ok_or_else(|| AmountError::Underflow {
                balance: self.to_string(),
                delta: delta.to_string(),
            })
    }

    /// Human-scale value: the raw integer shifted left by `decimals`.
    pub fn normalized(&self, decimals: u8) -> String {
        shift_digits(false, &self.0.to_string(), "", -(decimals as i32))
    }
}

impl fmt::Display for RawAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RawAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_u256(s.trim(), s).map(Self)
    }
}

impl From<u128> for RawAmount {
    fn from(value: u128) -> Self {
        Self::new(value)
    }
}

impl From<U256> for RawAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl Serialize for RawAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RawAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawVisitor;

        impl<'de> Visitor<'de> for RawVisitor {
            type Value = RawAmount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or decimal integer string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawAmount, E> {
                Ok(RawAmount(U256::from(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawAmount, E> {
                u64::try_from(v)
                    .map(|v| RawAmount(U256::from(v)))
                    .map_err(|_| E::custom(format!("negative amount {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RawAmount, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(RawVisitor)
    }
}

/// Signed delta applied to a balance: sign plus uint256 magnitude.
///
/// Zero is never negative, so equal deltas compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SignedAmount {
    negative: bool,
    magnitude: U256,
}

impl SignedAmount {
    pub fn new(value: i128) -> Self {
        Self::from_parts(value < 0, U256::from(value.unsigned_abs()))
    }

    pub fn from_parts(negative: bool, magnitude: U256) -> Self {
        Self {
            negative: negative && !magnitude.is_zero(),
            magnitude,
        }
    }

    pub fn magnitude(&self) -> RawAmount {
        RawAmount(self.magnitude)
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn negate(self) -> Self {
        Self::from_parts(!self.negative, self.magnitude)
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{}", self.magnitude)
    }
}

impl FromStr for SignedAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        parse_u256(digits, s).map(|magnitude| Self::from_parts(negative, magnitude))
    }
}

impl From<RawAmount> for SignedAmount {
    fn from(raw: RawAmount) -> Self {
        Self::from_parts(false, raw.0)
    }
}

impl Serialize for SignedAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SignedAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SignedVisitor;

        impl<'de> Visitor<'de> for SignedVisitor {
            type Value = SignedAmount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer or decimal integer string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<SignedAmount, E> {
                Ok(SignedAmount::from_parts(false, U256::from(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<SignedAmount, E> {
                Ok(SignedAmount::new(v as i128))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SignedAmount, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SignedVisitor)
    }
}

// ── Decimal shifting ────────────────────────────────────────────────

/// Move the decimal point of `value` by `places` (positive = multiply by 10^places).
///
/// Works on the digit string directly, so the result is exact for any
/// precision. Output is canonical: no leading zeros in the integer part,
/// no trailing zeros in the fraction, no `-0`.
pub fn shift_decimal(value: &str, places: i32) -> Result<String, AmountError> {
    let trimmed = value.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let valid = !(int_part.is_empty() && frac_part.is_empty())
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.bytes().all(|b| b.is_ascii_digit());
    if !valid {
        return Err(AmountError::Invalid(value.to_string()));
    }
    Ok(shift_digits(negative, int_part, frac_part, places))
}

fn shift_digits(negative: bool, int_part: &str, frac_part: &str, places: i32) -> String {
    let digits: String = format!("{}{}", int_part, frac_part);
    let point = int_part.len() as i64 + places as i64;

    let (int_digits, frac_digits) = if point <= 0 {
        let zeros = "0".repeat((-point) as usize);
        (String::from("0"), format!("{}{}", zeros, digits))
    } else if point as usize >= digits.len() {
        let zeros = "0".repeat(point as usize - digits.len());
        (format!("{}{}", digits, zeros), String::new())
    } else {
        let (i, f) = digits.split_at(point as usize);
        (i.to_string(), f.to_string())
    };

    let int_trimmed = int_digits.trim_start_matches('0');
    let int_canonical = if int_trimmed.is_empty() { "0" } else { int_trimmed };
    let frac_canonical = frac_digits.trim_end_matches('0');

    let mut out = String::with_capacity(int_canonical.len() + frac_canonical.len() + 2);
    let is_zero = int_canonical == "0" && frac_canonical.is_empty();
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(int_canonical);
    if !frac_canonical.is_empty() {
        out.push('.');
        out.push_str(frac_canonical);
    }
    out
}

/// Convenience float projection of a decimal string. Not for further arithmetic.
pub fn to_number(decimal: &str) -> f64 {
    decimal.trim().parse::<f64>().unwrap_or(0.0)
}

// ── Prices ──────────────────────────────────────────────────────────

/// `numerator / denominator` over normalized decimal strings.
///
/// Returns `None` when the denominator is zero or either side does not fit
/// a `Decimal`; a missing price is a value, not an error.
pub fn price(numerator: &str, denominator: &str) -> Option<Decimal> {
    let num = Decimal::from_str(numerator.trim()).ok()?;
    let den = Decimal::from_str(denominator.trim()).ok()?;
    if den.is_zero() || den.is_sign_negative() {
        return None;
    }
    num.checked_div(den).map(|p| p.normalize())
}

/// Float projection of [`price`].
pub fn price_number(price: Option<Decimal>) -> Option<f64> {
    price.and_then(|p| p.to_f64())
}

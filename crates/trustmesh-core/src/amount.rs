//! # Asset Amounts
//!
//! `Amount` is a quantity of the custody asset in its smallest unit
//! (a 6-decimal stablecoin's micro-units, for instance). Arithmetic is
//! checked; there is no wrapping or saturating path.
//!
//! Amounts serialize as decimal strings so that values above `u64::MAX`
//! survive JSON round trips and canonicalization without float coercion.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A non-negative quantity of the custody asset in smallest units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(u128);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from smallest units.
    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    /// Convert whole tokens to smallest units for an asset with `decimals`
    /// decimal places. Returns `None` on overflow.
    pub fn from_whole(whole: u128, decimals: u32) -> Option<Self> {
        10u128
            .checked_pow(decimals)
            .and_then(|scale| whole.checked_mul(scale))
            .map(Self)
    }

    /// The value in smallest units.
    pub const fn units(&self) -> u128 {
        self.0
    }

    /// Whether this amount is zero.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Checked multiplication by a scalar.
    pub fn checked_mul(self, rhs: u128) -> Option<Amount> {
        self.0.checked_mul(rhs).map(Self)
    }

    /// Sum an iterator of amounts, returning `None` on overflow.
    pub fn checked_sum(iter: impl IntoIterator<Item = Amount>) -> Option<Amount> {
        iter.into_iter().try_fold(Amount::ZERO, Amount::checked_add)
    }

    /// Parse a decimal integer string.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAmount`] for anything other than
    /// ASCII digits that fit in `u128`.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidAmount(s.to_string()));
        }
        s.parse::<u128>()
            .map(Self)
            .map_err(|_| ValidationError::InvalidAmount(s.to_string()))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Amount {
    fn from(units: u128) -> Self {
        Self(units)
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Self(u128::from(units))
    }
}

impl TryFrom<String> for Amount {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0.to_string()
    }
}

//! Money as an integer count of the smallest currency unit.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A non-negative amount of money.
///
/// Compared by value. All arithmetic is checked: overflow is an
/// `InvariantViolation`, and subtraction below zero is refused.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Build an amount that must be strictly positive (payments, fine amounts).
    pub fn positive(value: u64, field: &str) -> DomainResult<Self> {
        if value == 0 {
            return Err(DomainError::validation(format!("{field} must be positive")));
        }
        Ok(Self(value))
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> DomainResult<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    pub fn checked_sub(self, other: Amount) -> DomainResult<Amount> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or_else(|| DomainError::invariant("amount would become negative"))
    }

    /// Sum an iterator of amounts with overflow checking.
    pub fn sum<I>(amounts: I) -> DomainResult<Amount>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, next| acc.checked_add(next))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Amount> for u64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

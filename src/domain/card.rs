use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Non-negative point balance held by a card.
///
/// Wraps a plain integer to keep balance arithmetic checked: the only way to
/// move a balance is through [`Points::apply`], which refuses to go below
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Points(pub u64);

impl Points {
    pub const ZERO: Self = Self(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Applies a signed delta, returning `None` when the result would be
    /// negative (or overflow).
    pub fn apply(&self, delta: PointsDelta) -> Option<Self> {
        self.0.checked_add_signed(delta.value()).map(Self)
    }
}

/// Validated non-zero signed point adjustment.
///
/// Zero deltas are rejected at construction so a no-op award can never reach
/// the store layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PointsDelta(i64);

impl PointsDelta {
    pub fn new(value: i64) -> Result<Self> {
        if value == 0 {
            Err(Error::InvalidDelta)
        } else {
            Ok(Self(value))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for PointsDelta {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PointsDelta> for i64 {
    fn from(delta: PointsDelta) -> Self {
        delta.0
    }
}

/// A customer's point-balance record for one loyalty program.
///
/// `points` is the single authoritative balance field; the activity log is the
/// only other place point movement is recorded, and the two must always agree.
/// Cards are deactivated on program exit, never deleted, so a later
/// re-enrollment reactivates the card with its balance intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: u64,
    pub customer_id: u64,
    pub program_id: u64,
    pub points: Points,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    pub fn new(id: u64, customer_id: u64, program_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id,
            program_id,
            points: Points::ZERO,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the balance by `delta`, rejecting results below zero.
    pub fn apply_delta(&mut self, delta: PointsDelta, now: DateTime<Utc>) -> Result<Points> {
        let next = self.points.apply(delta).ok_or(Error::BalanceWouldGoNegative {
            card_id: self.id,
            balance: self.points.value(),
            delta: delta.value(),
        })?;
        self.points = next;
        self.updated_at = now;
        Ok(next)
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.updated_at = now;
    }

    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_validation() {
        assert!(PointsDelta::new(50).is_ok());
        assert!(PointsDelta::new(-50).is_ok());
        assert!(matches!(PointsDelta::new(0), Err(Error::InvalidDelta)));
    }

    #[test]
    fn test_points_apply() {
        let balance = Points::new(50);
        assert_eq!(balance.apply(PointsDelta::new(10).unwrap()), Some(Points::new(60)));
        assert_eq!(balance.apply(PointsDelta::new(-50).unwrap()), Some(Points::ZERO));
        assert_eq!(balance.apply(PointsDelta::new(-51).unwrap()), None);
    }

    #[test]
    fn test_card_apply_delta_rejects_negative_balance() {
        let now = Utc::now();
        let mut card = Card::new(4, 4, 9, now);
        card.apply_delta(PointsDelta::new(55).unwrap(), now).unwrap();

        let result = card.apply_delta(PointsDelta::new(-1000).unwrap(), now);
        assert!(matches!(
            result,
            Err(Error::BalanceWouldGoNegative {
                card_id: 4,
                balance: 55,
                delta: -1000
            })
        ));
        // Balance untouched by the rejected delta.
        assert_eq!(card.points, Points::new(55));
    }

    #[test]
    fn test_card_lifecycle_keeps_balance() {
        let now = Utc::now();
        let mut card = Card::new(1, 2, 3, now);
        card.apply_delta(PointsDelta::new(100).unwrap(), now).unwrap();

        card.deactivate(now);
        assert!(!card.is_active);
        card.reactivate(now);
        assert!(card.is_active);
        assert_eq!(card.points, Points::new(100));
    }
}

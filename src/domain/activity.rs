use crate::domain::card::PointsDelta;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where a point movement originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    Manual,
    Purchase,
    Promotion,
    Correction,
    Test,
}

impl ActivitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Purchase => "purchase",
            Self::Promotion => "promotion",
            Self::Correction => "correction",
            Self::Test => "test",
        }
    }

    /// Sources reserved for the internal award endpoint.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Correction | Self::Test)
    }
}

impl fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static GENERATED_REF_SEQ: AtomicU64 = AtomicU64::new(0);

/// Caller- or engine-supplied key making an award applied at most once per
/// card.
///
/// Validated at the edge: non-empty and bounded, so the store layer can use it
/// as a uniqueness key without further checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionRef(String);

impl TransactionRef {
    pub const MAX_LEN: usize = 128;

    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::InvalidInput(
                "transaction reference must not be empty".to_string(),
            ));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(Error::InvalidInput(format!(
                "transaction reference exceeds {} bytes",
                Self::MAX_LEN
            )));
        }
        Ok(Self(raw))
    }

    /// Builds a reference for calls that did not supply one.
    ///
    /// Derived from the card id and call time, plus a process-wide sequence so
    /// two awards in the same microsecond stay distinct. Accidental
    /// resubmission without a caller-supplied key therefore produces a second
    /// audit record rather than being silently deduplicated.
    pub fn generated(card_id: u64, now: DateTime<Utc>) -> Self {
        let seq = GENERATED_REF_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("gen-{card_id}-{}-{seq}", now.timestamp_micros()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TransactionRef {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<TransactionRef> for String {
    fn from(reference: TransactionRef) -> Self {
        reference.0
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One immutable entry in a card's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub card_id: u64,
    pub delta: PointsDelta,
    pub source: ActivitySource,
    pub description: String,
    pub transaction_ref: TransactionRef,
    pub created_at: DateTime<Utc>,
}

/// Payload for the atomic award unit handed to the store.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub card_id: u64,
    pub delta: PointsDelta,
    pub source: ActivitySource,
    pub description: String,
    pub transaction_ref: TransactionRef,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_validation() {
        assert!(TransactionRef::new("tx-1").is_ok());
        assert!(TransactionRef::new("").is_err());
        assert!(TransactionRef::new("   ").is_err());
        assert!(TransactionRef::new("x".repeat(200)).is_err());
    }

    #[test]
    fn test_generated_references_are_distinct() {
        let now = Utc::now();
        let a = TransactionRef::generated(4, now);
        let b = TransactionRef::generated(4, now);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("gen-4-"));
    }

    #[test]
    fn test_source_serde_is_lowercase() {
        let json = serde_json::to_string(&ActivitySource::Promotion).unwrap();
        assert_eq!(json, "\"promotion\"");
        let parsed: ActivitySource = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(parsed, ActivitySource::Manual);
    }

    #[test]
    fn test_privileged_sources() {
        assert!(ActivitySource::Correction.is_privileged());
        assert!(ActivitySource::Test.is_privileged());
        assert!(!ActivitySource::Purchase.is_privileged());
    }
}

use crate::domain::activity::{ActivitySource, NewActivity, TransactionRef};
use crate::domain::card::PointsDelta;
use crate::domain::ports::{AwardOutcome, SharedActivityStore, SharedCardStore};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const STORE_RETRY_ATTEMPTS: u32 = 3;
const STORE_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// An award submission as received from a caller.
#[derive(Debug, Clone, Deserialize)]
pub struct AwardRequest {
    pub card_id: u64,
    pub delta: i64,
    pub source: ActivitySource,
    pub description: String,
    #[serde(default)]
    pub transaction_ref: Option<String>,
}

/// Outcome returned to the caller for both first application and retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwardReceipt {
    pub card_id: u64,
    pub new_balance: u64,
    pub transaction_ref: String,
    /// True when the reference had already been applied and nothing was
    /// written by this call.
    pub duplicate: bool,
}

/// Applies signed point deltas to card balances.
///
/// The engine validates the request, resolves the transaction reference and
/// hands the store one atomic unit; it owns retry policy for transient store
/// failures. It is the only caller of [`ActivityStore::apply_award`], keeping
/// a single write path into every balance.
///
/// [`ActivityStore::apply_award`]: crate::domain::ports::ActivityStore::apply_award
pub struct AwardEngine {
    cards: SharedCardStore,
    activities: SharedActivityStore,
}

impl AwardEngine {
    pub fn new(cards: SharedCardStore, activities: SharedActivityStore) -> Self {
        Self { cards, activities }
    }

    /// Credits or debits a card, recording exactly one audit record per
    /// transaction reference.
    ///
    /// Re-submitting a reference that was already applied is a no-op that
    /// returns the stored result with `duplicate` set; a caller that timed
    /// out can therefore always retry with the same reference.
    pub async fn award(&self, request: AwardRequest) -> Result<AwardReceipt> {
        let delta = PointsDelta::new(request.delta)?;

        let card = self
            .cards
            .card(request.card_id)
            .await?
            .ok_or(Error::CardNotFound(request.card_id))?;
        if !card.is_active {
            return Err(Error::CardInactive(card.id));
        }

        let now = Utc::now();
        let reference = match request.transaction_ref {
            Some(raw) => TransactionRef::new(raw)?,
            None => TransactionRef::generated(request.card_id, now),
        };

        let activity = NewActivity {
            card_id: request.card_id,
            delta,
            source: request.source,
            description: request.description,
            transaction_ref: reference.clone(),
            created_at: now,
        };

        match self.apply_with_retry(activity).await? {
            AwardOutcome::Applied { new_balance, .. } => {
                info!(
                    card_id = request.card_id,
                    delta = request.delta,
                    source = %request.source,
                    reference = %reference,
                    balance = new_balance.value(),
                    "points applied"
                );
                Ok(AwardReceipt {
                    card_id: request.card_id,
                    new_balance: new_balance.value(),
                    transaction_ref: reference.to_string(),
                    duplicate: false,
                })
            }
            AwardOutcome::Duplicate { balance, .. } => {
                debug!(
                    card_id = request.card_id,
                    reference = %reference,
                    "duplicate transaction reference, returning existing result"
                );
                Ok(AwardReceipt {
                    card_id: request.card_id,
                    new_balance: balance.value(),
                    transaction_ref: reference.to_string(),
                    duplicate: true,
                })
            }
        }
    }

    async fn apply_with_retry(&self, activity: NewActivity) -> Result<AwardOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.activities.apply_award(activity.clone()).await {
                Err(Error::Transient(reason)) if attempt < STORE_RETRY_ATTEMPTS => {
                    warn!(attempt, %reason, "transient store failure, retrying award");
                    tokio::time::sleep(STORE_RETRY_BASE_DELAY * attempt).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CardStore;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use std::sync::Arc;

    fn engine() -> (AwardEngine, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        (
            AwardEngine::new(ledger.clone(), ledger.clone()),
            ledger,
        )
    }

    fn request(card_id: u64, delta: i64, reference: Option<&str>) -> AwardRequest {
        AwardRequest {
            card_id,
            delta,
            source: ActivitySource::Manual,
            description: "bonus".to_string(),
            transaction_ref: reference.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_award_unknown_card() {
        let (engine, _ledger) = engine();
        let result = engine.award(request(4, 50, Some("tx-1"))).await;
        assert!(matches!(result, Err(Error::CardNotFound(4))));
    }

    #[tokio::test]
    async fn test_award_zero_delta() {
        let (engine, ledger) = engine();
        let card = ledger
            .create_or_reactivate_card(4, 9, Utc::now())
            .await
            .unwrap();
        let result = engine.award(request(card.id, 0, Some("tx-1"))).await;
        assert!(matches!(result, Err(Error::InvalidDelta)));
    }

    #[tokio::test]
    async fn test_award_inactive_card() {
        let (engine, ledger) = engine();
        let card = ledger
            .create_or_reactivate_card(4, 9, Utc::now())
            .await
            .unwrap();
        ledger.deactivate_card(4, 9, Utc::now()).await.unwrap();

        let result = engine.award(request(card.id, 50, Some("tx-1"))).await;
        assert!(matches!(result, Err(Error::CardInactive(_))));
    }

    #[tokio::test]
    async fn test_generated_reference_does_not_deduplicate() {
        let (engine, ledger) = engine();
        let card = ledger
            .create_or_reactivate_card(4, 9, Utc::now())
            .await
            .unwrap();

        let first = engine.award(request(card.id, 10, None)).await.unwrap();
        let second = engine.award(request(card.id, 10, None)).await.unwrap();

        assert!(!first.duplicate);
        assert!(!second.duplicate);
        assert_ne!(first.transaction_ref, second.transaction_ref);
        assert_eq!(second.new_balance, 20);
    }
}

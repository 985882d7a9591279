mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{award, stack};
use pointsgate::domain::activity::{Activity, NewActivity, TransactionRef};
use pointsgate::domain::ports::{
    ActivityStore, ActivityTotals, AwardOutcome, CardStore, SharedActivityStore,
};
use pointsgate::application::award::AwardEngine;
use pointsgate::error::{Error, Result};
use pointsgate::infrastructure::in_memory::InMemoryLedger;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::test]
async fn test_award_then_identical_retry() {
    let stack = stack();
    let card = stack
        .ledger
        .create_or_reactivate_card(4, 9, Utc::now())
        .await
        .unwrap();

    let receipt = stack
        .engine
        .award(award(card.id, 50, Some("tx-1")))
        .await
        .unwrap();
    assert_eq!(receipt.new_balance, 50);
    assert!(!receipt.duplicate);

    // Re-invoking the identical call changes nothing.
    let retry = stack
        .engine
        .award(award(card.id, 50, Some("tx-1")))
        .await
        .unwrap();
    assert_eq!(retry.new_balance, 50);
    assert!(retry.duplicate);

    let activities = stack.ledger.activities_for_card(card.id).await.unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(
        stack.ledger.card(card.id).await.unwrap().unwrap().points.value(),
        50
    );
}

#[tokio::test]
async fn test_distinct_references_all_apply() {
    let stack = stack();
    let card = stack
        .ledger
        .create_or_reactivate_card(4, 9, Utc::now())
        .await
        .unwrap();

    let deltas: [i64; 5] = [50, -20, 35, -5, 100];
    for (idx, delta) in deltas.iter().enumerate() {
        let reference = format!("tx-{idx}");
        stack
            .engine
            .award(award(card.id, *delta, Some(reference.as_str())))
            .await
            .unwrap();
    }

    // Final balance equals the sum of deltas, one audit record per reference.
    let expected: i64 = deltas.iter().sum();
    let card = stack.ledger.card(card.id).await.unwrap().unwrap();
    assert_eq!(card.points.value() as i64, expected);

    let activities = stack.ledger.activities_for_card(card.id).await.unwrap();
    assert_eq!(activities.len(), deltas.len());
    let logged: i64 = activities.iter().map(|a| a.delta.value()).sum();
    assert_eq!(logged, expected);
}

#[tokio::test]
async fn test_concurrent_awards_with_distinct_references() {
    let stack = stack();
    let card = stack
        .ledger
        .create_or_reactivate_card(4, 9, Utc::now())
        .await
        .unwrap();
    stack
        .engine
        .award(award(card.id, 50, Some("seed")))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        stack.engine.award(award(card.id, 10, Some("tx-a"))),
        stack.engine.award(award(card.id, -5, Some("tx-b"))),
    );
    a.unwrap();
    b.unwrap();

    // Both deltas apply regardless of arrival order.
    let card = stack.ledger.card(card.id).await.unwrap().unwrap();
    assert_eq!(card.points.value(), 55);
    assert_eq!(
        stack.ledger.activities_for_card(card.id).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn test_concurrent_awards_with_same_reference() {
    let stack = stack();
    let card = stack
        .ledger
        .create_or_reactivate_card(4, 9, Utc::now())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        stack.engine.award(award(card.id, 25, Some("tx-dup"))),
        stack.engine.award(award(card.id, 25, Some("tx-dup"))),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    // Exactly one application; the loser observes the winner's result.
    assert_ne!(a.duplicate, b.duplicate);
    assert_eq!(a.new_balance, 25);
    assert_eq!(b.new_balance, 25);
    assert_eq!(
        stack.ledger.activities_for_card(card.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_overdraft_is_rejected_without_audit_row() {
    let stack = stack();
    let card = stack
        .ledger
        .create_or_reactivate_card(4, 9, Utc::now())
        .await
        .unwrap();
    stack
        .engine
        .award(award(card.id, 55, Some("seed")))
        .await
        .unwrap();

    let result = stack.engine.award(award(card.id, -1000, Some("tx-bad"))).await;
    assert!(matches!(result, Err(Error::BalanceWouldGoNegative { .. })));

    let card = stack.ledger.card(card.id).await.unwrap().unwrap();
    assert_eq!(card.points.value(), 55);
    assert_eq!(
        stack.ledger.activities_for_card(card.id).await.unwrap().len(),
        1
    );
}

/// Fails `apply_award` a configured number of times before delegating, to
/// exercise the engine's bounded retry on transient store errors.
struct FlakyActivityStore {
    inner: Arc<InMemoryLedger>,
    failures: AtomicU32,
}

#[async_trait]
impl ActivityStore for FlakyActivityStore {
    async fn apply_award(&self, activity: NewActivity) -> Result<AwardOutcome> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Transient("connection reset".to_string()));
        }
        self.inner.apply_award(activity).await
    }

    async fn activity_by_ref(
        &self,
        card_id: u64,
        reference: &TransactionRef,
    ) -> Result<Option<Activity>> {
        self.inner.activity_by_ref(card_id, reference).await
    }

    async fn activities_for_card(&self, card_id: u64) -> Result<Vec<Activity>> {
        self.inner.activities_for_card(card_id).await
    }

    async fn activity_totals(&self) -> Result<ActivityTotals> {
        self.inner.activity_totals().await
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let ledger = Arc::new(InMemoryLedger::new());
    let card = ledger
        .create_or_reactivate_card(4, 9, Utc::now())
        .await
        .unwrap();

    let flaky: SharedActivityStore = Arc::new(FlakyActivityStore {
        inner: ledger.clone(),
        failures: AtomicU32::new(2),
    });
    let engine = AwardEngine::new(ledger.clone(), flaky);

    let receipt = engine.award(award(card.id, 50, Some("tx-1"))).await.unwrap();
    assert_eq!(receipt.new_balance, 50);
}

#[tokio::test]
async fn test_persistent_transient_failure_surfaces() {
    let ledger = Arc::new(InMemoryLedger::new());
    let card = ledger
        .create_or_reactivate_card(4, 9, Utc::now())
        .await
        .unwrap();

    let flaky: SharedActivityStore = Arc::new(FlakyActivityStore {
        inner: ledger.clone(),
        failures: AtomicU32::new(10),
    });
    let engine = AwardEngine::new(ledger, flaky);

    let result = engine.award(award(card.id, 50, Some("tx-1"))).await;
    assert!(matches!(result, Err(Error::Transient(_))));
}

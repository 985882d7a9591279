use crate::domain::activity::{Activity, NewActivity, TransactionRef};
use crate::domain::card::{Card, Points};
use crate::domain::enrollment::{Enrollment, EnrollmentStatus, NewEnrollment};
use crate::domain::ports::{
    ActivityStore, ActivityTotals, AwardOutcome, CardStore, CardTotals, EnrollmentStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    cards: BTreeMap<u64, Card>,
    activities: BTreeMap<u64, Activity>,
    // Reservation index: (card, reference) -> activity id. Consulted and
    // written under the same write guard as the balance update, which is what
    // makes the award unit atomic here.
    activity_refs: HashMap<(u64, TransactionRef), u64>,
    enrollments: BTreeMap<u64, Enrollment>,
    next_card_id: u64,
    next_activity_id: u64,
    next_enrollment_id: u64,
}

/// A thread-safe in-memory ledger.
///
/// All three store ports are implemented over one `RwLock`ed state so
/// multi-table units (award, card create-or-reactivate) are serialized by the
/// write guard. Ideal for tests and development; durable deployments use the
/// RocksDB adapter.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardStore for InMemoryLedger {
    async fn card(&self, card_id: u64) -> Result<Option<Card>> {
        let state = self.state.read().await;
        Ok(state.cards.get(&card_id).cloned())
    }

    async fn active_card_for(&self, customer_id: u64, program_id: u64) -> Result<Option<Card>> {
        let state = self.state.read().await;
        Ok(state
            .cards
            .values()
            .find(|card| {
                card.customer_id == customer_id
                    && card.program_id == program_id
                    && card.is_active
            })
            .cloned())
    }

    async fn cards_for_program(&self, program_id: u64) -> Result<Vec<Card>> {
        let state = self.state.read().await;
        Ok(state
            .cards
            .values()
            .filter(|card| card.program_id == program_id)
            .cloned()
            .collect())
    }

    async fn create_or_reactivate_card(
        &self,
        customer_id: u64,
        program_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Card> {
        let mut state = self.state.write().await;
        if let Some(card) = state
            .cards
            .values_mut()
            .find(|card| card.customer_id == customer_id && card.program_id == program_id)
        {
            if !card.is_active {
                card.reactivate(now);
            }
            return Ok(card.clone());
        }

        state.next_card_id += 1;
        let card = Card::new(state.next_card_id, customer_id, program_id, now);
        state.cards.insert(card.id, card.clone());
        Ok(card)
    }

    async fn deactivate_card(
        &self,
        customer_id: u64,
        program_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Card>> {
        let mut state = self.state.write().await;
        let card = state.cards.values_mut().find(|card| {
            card.customer_id == customer_id && card.program_id == program_id && card.is_active
        });
        Ok(card.map(|card| {
            card.deactivate(now);
            card.clone()
        }))
    }

    async fn card_totals(&self) -> Result<CardTotals> {
        let state = self.state.read().await;
        let mut totals = CardTotals::default();
        for card in state.cards.values() {
            totals.cards += 1;
            if card.is_active {
                totals.active_cards += 1;
                totals.outstanding_points += card.points.value();
            }
        }
        Ok(totals)
    }
}

#[async_trait]
impl ActivityStore for InMemoryLedger {
    async fn apply_award(&self, activity: NewActivity) -> Result<AwardOutcome> {
        let mut state = self.state.write().await;

        let card = state
            .cards
            .get(&activity.card_id)
            .cloned()
            .ok_or(Error::CardNotFound(activity.card_id))?;

        // Reference check precedes the active check: a retry after a timeout
        // must observe its original result even if the card was deactivated
        // in the meantime.
        let ref_key = (activity.card_id, activity.transaction_ref.clone());
        if let Some(&existing_id) = state.activity_refs.get(&ref_key) {
            return Ok(AwardOutcome::Duplicate {
                activity_id: existing_id,
                balance: card.points,
            });
        }

        if !card.is_active {
            return Err(Error::CardInactive(activity.card_id));
        }

        let new_balance = {
            let card = state
                .cards
                .get_mut(&activity.card_id)
                .ok_or(Error::CardNotFound(activity.card_id))?;
            card.apply_delta(activity.delta, activity.created_at)?
        };

        state.next_activity_id += 1;
        let activity_id = state.next_activity_id;
        let record = Activity {
            id: activity_id,
            card_id: activity.card_id,
            delta: activity.delta,
            source: activity.source,
            description: activity.description,
            transaction_ref: activity.transaction_ref,
            created_at: activity.created_at,
        };
        state.activity_refs.insert(ref_key, activity_id);
        state.activities.insert(activity_id, record);

        Ok(AwardOutcome::Applied {
            activity_id,
            new_balance,
        })
    }

    async fn activity_by_ref(
        &self,
        card_id: u64,
        reference: &TransactionRef,
    ) -> Result<Option<Activity>> {
        let state = self.state.read().await;
        let activity_id = state.activity_refs.get(&(card_id, reference.clone()));
        Ok(activity_id.and_then(|id| state.activities.get(id)).cloned())
    }

    async fn activities_for_card(&self, card_id: u64) -> Result<Vec<Activity>> {
        let state = self.state.read().await;
        Ok(state
            .activities
            .values()
            .filter(|activity| activity.card_id == card_id)
            .cloned()
            .collect())
    }

    async fn activity_totals(&self) -> Result<ActivityTotals> {
        let state = self.state.read().await;
        let mut totals = ActivityTotals::default();
        for activity in state.activities.values() {
            totals.records += 1;
            *totals
                .by_source
                .entry(activity.source.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(totals)
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryLedger {
    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> Result<Enrollment> {
        let mut state = self.state.write().await;
        state.next_enrollment_id += 1;
        let record = Enrollment::new(
            state.next_enrollment_id,
            enrollment.customer_id,
            enrollment.program_id,
        );
        state.enrollments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn enrollment(&self, enrollment_id: u64) -> Result<Option<Enrollment>> {
        let state = self.state.read().await;
        Ok(state.enrollments.get(&enrollment_id).cloned())
    }

    async fn set_enrollment_status(
        &self,
        enrollment_id: u64,
        status: EnrollmentStatus,
        approved_at: Option<DateTime<Utc>>,
    ) -> Result<Enrollment> {
        let mut state = self.state.write().await;
        let enrollment = state
            .enrollments
            .get_mut(&enrollment_id)
            .ok_or(Error::EnrollmentNotFound(enrollment_id))?;
        enrollment.status = status;
        enrollment.approved_at = approved_at;
        Ok(enrollment.clone())
    }

    async fn approved_enrollments(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Enrollment>> {
        let state = self.state.read().await;
        Ok(state
            .enrollments
            .range((Bound::Excluded(after.unwrap_or(0)), Bound::Unbounded))
            .map(|(_, enrollment)| enrollment)
            .filter(|enrollment| enrollment.is_approved())
            .take(limit)
            .cloned()
            .collect())
    }
}

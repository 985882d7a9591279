use crate::domain::activity::{Activity, NewActivity, TransactionRef};
use crate::domain::card::{Card, Points};
use crate::domain::enrollment::{Enrollment, EnrollmentStatus, NewEnrollment};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of the atomic award unit.
///
/// `Duplicate` is not an error: a retry carrying an already-applied
/// transaction reference observes the stored result instead of re-applying
/// the delta.
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    Applied { activity_id: u64, new_balance: Points },
    Duplicate { activity_id: u64, balance: Points },
}

/// Aggregate card counters for analytics, computed by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardTotals {
    pub cards: u64,
    pub active_cards: u64,
    pub outstanding_points: u64,
}

/// Aggregate audit-trail counters for analytics, computed by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityTotals {
    pub records: u64,
    pub by_source: BTreeMap<String, u64>,
}

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn card(&self, card_id: u64) -> Result<Option<Card>>;

    async fn active_card_for(&self, customer_id: u64, program_id: u64) -> Result<Option<Card>>;

    async fn cards_for_program(&self, program_id: u64) -> Result<Vec<Card>>;

    /// Returns the single card for the pair, creating it or reactivating an
    /// inactive one. Uniqueness of the active (customer, program) card is
    /// enforced here, atomically with the lookup.
    async fn create_or_reactivate_card(
        &self,
        customer_id: u64,
        program_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Card>;

    async fn deactivate_card(
        &self,
        customer_id: u64,
        program_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Card>>;

    async fn card_totals(&self) -> Result<CardTotals>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// The single write path into a card balance: balance update, audit
    /// insert and reference reservation commit together or not at all. A
    /// reference already reserved for the card yields
    /// [`AwardOutcome::Duplicate`] with nothing written.
    async fn apply_award(&self, activity: NewActivity) -> Result<AwardOutcome>;

    async fn activity_by_ref(
        &self,
        card_id: u64,
        reference: &TransactionRef,
    ) -> Result<Option<Activity>>;

    async fn activities_for_card(&self, card_id: u64) -> Result<Vec<Activity>>;

    async fn activity_totals(&self) -> Result<ActivityTotals>;
}

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> Result<Enrollment>;

    async fn enrollment(&self, enrollment_id: u64) -> Result<Option<Enrollment>>;

    async fn set_enrollment_status(
        &self,
        enrollment_id: u64,
        status: EnrollmentStatus,
        approved_at: Option<DateTime<Utc>>,
    ) -> Result<Enrollment>;

    /// Page of approved enrollments with ids greater than `after`, ordered by
    /// id. The cursor keeps orphan scans lazy, finite and restartable.
    async fn approved_enrollments(&self, after: Option<u64>, limit: usize)
        -> Result<Vec<Enrollment>>;
}

pub type SharedCardStore = Arc<dyn CardStore>;
pub type SharedActivityStore = Arc<dyn ActivityStore>;
pub type SharedEnrollmentStore = Arc<dyn EnrollmentStore>;

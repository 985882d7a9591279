use crate::domain::activity::{Activity, NewActivity, TransactionRef};
use crate::domain::card::Card;
use crate::domain::enrollment::{Enrollment, EnrollmentStatus, NewEnrollment};
use crate::domain::ports::{
    ActivityStore, ActivityTotals, AwardOutcome, CardStore, CardTotals, EnrollmentStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column family for card states.
pub const CF_CARDS: &str = "cards";
/// Column family for the append-only activity log.
pub const CF_ACTIVITIES: &str = "activities";
/// Column family reserving (card, transaction reference) pairs.
pub const CF_ACTIVITY_REFS: &str = "activity_refs";
/// Column family for program enrollments.
pub const CF_ENROLLMENTS: &str = "enrollments";
/// Column family holding id counters.
pub const CF_META: &str = "meta";

/// A persistent ledger backed by RocksDB.
///
/// Entities are stored as JSON values under big-endian id keys, one column
/// family per table. Multi-key units (award, card create-or-reactivate) are
/// serialized by `write_lock` and committed as a single `WriteBatch`, so a
/// crash can never leave a balance update without its audit record.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_CARDS,
            CF_ACTIVITIES,
            CF_ACTIVITY_REFS,
            CF_ENROLLMENTS,
            CF_META,
        ]
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Internal(format!("column family {name} not found")))
    }

    /// Allocates the next id under `key`. Callers hold `write_lock`.
    fn next_id(&self, key: &str) -> Result<u64> {
        let cf = self.cf(CF_META)?;
        let current = match self.db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Internal(format!("corrupt id counter {key}")))?;
                u64::from_be_bytes(bytes)
            }
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(&cf, key.as_bytes(), next.to_be_bytes())?;
        Ok(next)
    }

    fn get_card(&self, card_id: u64) -> Result<Option<Card>> {
        let cf = self.cf(CF_CARDS)?;
        match self.db.get_cf(&cf, card_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_card(&self, batch: &mut WriteBatch, card: &Card) -> Result<()> {
        let cf = self.cf(CF_CARDS)?;
        batch.put_cf(&cf, card.id.to_be_bytes(), serde_json::to_vec(card)?);
        Ok(())
    }

    fn find_card_for_pair(&self, customer_id: u64, program_id: u64) -> Result<Option<Card>> {
        let cf = self.cf(CF_CARDS)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let card: Card = serde_json::from_slice(&value)?;
            if card.customer_id == customer_id && card.program_id == program_id {
                return Ok(Some(card));
            }
        }
        Ok(None)
    }

    fn ref_key(card_id: u64, reference: &TransactionRef) -> Vec<u8> {
        let mut key = card_id.to_be_bytes().to_vec();
        key.extend_from_slice(reference.as_str().as_bytes());
        key
    }
}

#[async_trait]
impl CardStore for RocksDbLedger {
    async fn card(&self, card_id: u64) -> Result<Option<Card>> {
        self.get_card(card_id)
    }

    async fn active_card_for(&self, customer_id: u64, program_id: u64) -> Result<Option<Card>> {
        let card = self.find_card_for_pair(customer_id, program_id)?;
        Ok(card.filter(|card| card.is_active))
    }

    async fn cards_for_program(&self, program_id: u64) -> Result<Vec<Card>> {
        let cf = self.cf(CF_CARDS)?;
        let mut cards = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let card: Card = serde_json::from_slice(&value)?;
            if card.program_id == program_id {
                cards.push(card);
            }
        }
        Ok(cards)
    }

    async fn create_or_reactivate_card(
        &self,
        customer_id: u64,
        program_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Card> {
        let _guard = self.write_lock.lock().await;

        if let Some(mut card) = self.find_card_for_pair(customer_id, program_id)? {
            if !card.is_active {
                card.reactivate(now);
                let mut batch = WriteBatch::default();
                self.put_card(&mut batch, &card)?;
                self.db.write(batch)?;
            }
            return Ok(card);
        }

        let card = Card::new(self.next_id("next_card_id")?, customer_id, program_id, now);
        let mut batch = WriteBatch::default();
        self.put_card(&mut batch, &card)?;
        self.db.write(batch)?;
        Ok(card)
    }

    async fn deactivate_card(
        &self,
        customer_id: u64,
        program_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Card>> {
        let _guard = self.write_lock.lock().await;

        let Some(mut card) = self.find_card_for_pair(customer_id, program_id)? else {
            return Ok(None);
        };
        if !card.is_active {
            return Ok(None);
        }
        card.deactivate(now);
        let mut batch = WriteBatch::default();
        self.put_card(&mut batch, &card)?;
        self.db.write(batch)?;
        Ok(Some(card))
    }

    async fn card_totals(&self) -> Result<CardTotals> {
        let cf = self.cf(CF_CARDS)?;
        let mut totals = CardTotals::default();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let card: Card = serde_json::from_slice(&value)?;
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
impl ActivityStore for RocksDbLedger {
    async fn apply_award(&self, activity: NewActivity) -> Result<AwardOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut card = self
            .get_card(activity.card_id)?
            .ok_or(Error::CardNotFound(activity.card_id))?;

        // Reference check precedes the active check so a timed-out caller can
        // always retry with the same reference.
        let refs_cf = self.cf(CF_ACTIVITY_REFS)?;
        let ref_key = Self::ref_key(activity.card_id, &activity.transaction_ref);
        if let Some(bytes) = self.db.get_cf(&refs_cf, &ref_key)? {
            let bytes: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::Internal("corrupt activity reference index".to_string()))?;
            return Ok(AwardOutcome::Duplicate {
                activity_id: u64::from_be_bytes(bytes),
                balance: card.points,
            });
        }

        if !card.is_active {
            return Err(Error::CardInactive(activity.card_id));
        }

        let new_balance = card.apply_delta(activity.delta, activity.created_at)?;
        let activity_id = self.next_id("next_activity_id")?;
        let record = Activity {
            id: activity_id,
            card_id: activity.card_id,
            delta: activity.delta,
            source: activity.source,
            description: activity.description,
            transaction_ref: activity.transaction_ref,
            created_at: activity.created_at,
        };

        let activities_cf = self.cf(CF_ACTIVITIES)?;
        let mut batch = WriteBatch::default();
        self.put_card(&mut batch, &card)?;
        batch.put_cf(&activities_cf, activity_id.to_be_bytes(), serde_json::to_vec(&record)?);
        batch.put_cf(&refs_cf, &ref_key, activity_id.to_be_bytes());
        self.db.write(batch)?;

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
        let refs_cf = self.cf(CF_ACTIVITY_REFS)?;
        let Some(bytes) = self.db.get_cf(&refs_cf, Self::ref_key(card_id, reference))? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Internal("corrupt activity reference index".to_string()))?;

        let activities_cf = self.cf(CF_ACTIVITIES)?;
        match self.db.get_cf(&activities_cf, bytes)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn activities_for_card(&self, card_id: u64) -> Result<Vec<Activity>> {
        let cf = self.cf(CF_ACTIVITIES)?;
        let mut activities = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let activity: Activity = serde_json::from_slice(&value)?;
            if activity.card_id == card_id {
                activities.push(activity);
            }
        }
        Ok(activities)
    }

    async fn activity_totals(&self) -> Result<ActivityTotals> {
        let cf = self.cf(CF_ACTIVITIES)?;
        let mut totals = ActivityTotals::default();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let activity: Activity = serde_json::from_slice(&value)?;
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
impl EnrollmentStore for RocksDbLedger {
    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> Result<Enrollment> {
        let _guard = self.write_lock.lock().await;

        let record = Enrollment::new(
            self.next_id("next_enrollment_id")?,
            enrollment.customer_id,
            enrollment.program_id,
        );
        let cf = self.cf(CF_ENROLLMENTS)?;
        self.db
            .put_cf(&cf, record.id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        Ok(record)
    }

    async fn enrollment(&self, enrollment_id: u64) -> Result<Option<Enrollment>> {
        let cf = self.cf(CF_ENROLLMENTS)?;
        match self.db.get_cf(&cf, enrollment_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_enrollment_status(
        &self,
        enrollment_id: u64,
        status: EnrollmentStatus,
        approved_at: Option<DateTime<Utc>>,
    ) -> Result<Enrollment> {
        let _guard = self.write_lock.lock().await;

        let cf = self.cf(CF_ENROLLMENTS)?;
        let mut enrollment: Enrollment = match self.db.get_cf(&cf, enrollment_id.to_be_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => return Err(Error::EnrollmentNotFound(enrollment_id)),
        };
        enrollment.status = status;
        enrollment.approved_at = approved_at;
        self.db.put_cf(
            &cf,
            enrollment_id.to_be_bytes(),
            serde_json::to_vec(&enrollment)?,
        )?;
        Ok(enrollment)
    }

    async fn approved_enrollments(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Enrollment>> {
        let cf = self.cf(CF_ENROLLMENTS)?;
        let start_key = after.map(|id| (id + 1).to_be_bytes());
        let mode = match &start_key {
            Some(key) => IteratorMode::From(key, Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut page = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            if page.len() == limit {
                break;
            }
            let (_key, value) = item?;
            let enrollment: Enrollment = serde_json::from_slice(&value)?;
            if enrollment.is_approved() {
                page.push(enrollment);
            }
        }
        Ok(page)
    }
}

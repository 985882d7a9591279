use crate::domain::enrollment::{Enrollment, EnrollmentStatus, NewEnrollment};
use crate::domain::ports::{SharedCardStore, SharedEnrollmentStore};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

const ORPHAN_SCAN_PAGE: usize = 64;

/// Outcome of a full repair pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairReport {
    pub repaired: u64,
    /// Enrollments whose repair failed after one attempt; surfaced to the
    /// caller rather than retried silently.
    pub failed: Vec<u64>,
}

/// Maintains the enrollment-to-card invariant: every approved enrollment has
/// exactly one active card for its (customer, program) pair.
///
/// All enrollment and card lifecycle writes flow through here. The reconciler
/// never assumes it is the only writer; every operation tolerates a
/// concurrent call for the same enrollment because card uniqueness is
/// enforced atomically in the store.
pub struct Reconciler {
    cards: SharedCardStore,
    enrollments: SharedEnrollmentStore,
}

impl Reconciler {
    pub fn new(cards: SharedCardStore, enrollments: SharedEnrollmentStore) -> Self {
        Self { cards, enrollments }
    }

    /// Records a customer's request to join a program; starts pending.
    pub async fn enroll(&self, customer_id: u64, program_id: u64) -> Result<Enrollment> {
        let enrollment = self
            .enrollments
            .insert_enrollment(NewEnrollment {
                customer_id,
                program_id,
            })
            .await?;
        info!(
            enrollment_id = enrollment.id,
            customer_id, program_id, "enrollment requested"
        );
        Ok(enrollment)
    }

    /// Approves an enrollment and ensures its card exists.
    ///
    /// A crash between the status update and the card creation leaves an
    /// orphan that [`Reconciler::repair`] restores; calling `approve` again
    /// is equally safe.
    pub async fn approve(&self, enrollment_id: u64) -> Result<u64> {
        let enrollment = self
            .enrollments
            .enrollment(enrollment_id)
            .await?
            .ok_or(Error::EnrollmentNotFound(enrollment_id))?;
        if enrollment.status == EnrollmentStatus::Declined {
            return Err(Error::Conflict(format!(
                "enrollment {enrollment_id} was declined"
            )));
        }

        let now = Utc::now();
        let enrollment = self
            .enrollments
            .set_enrollment_status(enrollment_id, EnrollmentStatus::Approved, Some(now))
            .await?;

        let card = self
            .cards
            .create_or_reactivate_card(enrollment.customer_id, enrollment.program_id, now)
            .await?;
        info!(enrollment_id, card_id = card.id, "enrollment approved");
        Ok(card.id)
    }

    /// Declines an enrollment; an active card for the pair is deactivated
    /// (program exit), its balance kept for a later re-enrollment.
    pub async fn decline(&self, enrollment_id: u64) -> Result<Enrollment> {
        let enrollment = self
            .enrollments
            .enrollment(enrollment_id)
            .await?
            .ok_or(Error::EnrollmentNotFound(enrollment_id))?;
        let was_approved = enrollment.is_approved();

        let enrollment = self
            .enrollments
            .set_enrollment_status(enrollment_id, EnrollmentStatus::Declined, None)
            .await?;

        if was_approved {
            self.cards
                .deactivate_card(enrollment.customer_id, enrollment.program_id, Utc::now())
                .await?;
        }
        info!(enrollment_id, "enrollment declined");
        Ok(enrollment)
    }

    /// Approved enrollments currently lacking an active card.
    ///
    /// Walks the store in id-ordered pages so the scan is finite and can be
    /// restarted from any cursor after an interruption.
    pub async fn orphaned_enrollments(&self) -> Result<Vec<u64>> {
        let mut orphans = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .enrollments
                .approved_enrollments(cursor, ORPHAN_SCAN_PAGE)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);

            for enrollment in &page {
                let card = self
                    .cards
                    .active_card_for(enrollment.customer_id, enrollment.program_id)
                    .await?;
                if card.is_none() {
                    orphans.push(enrollment.id);
                }
            }

            if page.len() < ORPHAN_SCAN_PAGE {
                break;
            }
        }
        Ok(orphans)
    }

    /// Restores the card for an approved enrollment.
    ///
    /// Idempotent: an enrollment that already has its card gets the existing
    /// card back, and concurrent callers converge on the same card.
    pub async fn repair(&self, enrollment_id: u64) -> Result<u64> {
        let enrollment = self
            .enrollments
            .enrollment(enrollment_id)
            .await?
            .ok_or(Error::EnrollmentNotFound(enrollment_id))?;
        if !enrollment.is_approved() {
            return Err(Error::InvalidInput(format!(
                "enrollment {enrollment_id} is not approved"
            )));
        }

        let card = self
            .cards
            .create_or_reactivate_card(enrollment.customer_id, enrollment.program_id, Utc::now())
            .await?;
        Ok(card.id)
    }

    /// Scans for orphans and repairs each, reporting what could not be
    /// restored.
    pub async fn repair_all(&self) -> Result<RepairReport> {
        let orphans = self.orphaned_enrollments().await?;
        let mut report = RepairReport::default();
        for enrollment_id in orphans {
            match self.repair(enrollment_id).await {
                Ok(card_id) => {
                    info!(enrollment_id, card_id, "orphaned enrollment repaired");
                    report.repaired += 1;
                }
                Err(err) => {
                    warn!(enrollment_id, error = %err, "orphan repair failed");
                    report.failed.push(enrollment_id);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CardStore;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use std::sync::Arc;

    fn reconciler() -> (Reconciler, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        (Reconciler::new(ledger.clone(), ledger.clone()), ledger)
    }

    #[tokio::test]
    async fn test_approve_declined_enrollment_conflicts() {
        let (reconciler, _ledger) = reconciler();
        let enrollment = reconciler.enroll(4, 9).await.unwrap();
        reconciler.decline(enrollment.id).await.unwrap();

        let result = reconciler.approve(enrollment.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_repair_requires_approval() {
        let (reconciler, _ledger) = reconciler();
        let enrollment = reconciler.enroll(4, 9).await.unwrap();

        let result = reconciler.repair(enrollment.id).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(matches!(
            reconciler.repair(999).await,
            Err(Error::EnrollmentNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_decline_deactivates_card_but_keeps_balance() {
        let (reconciler, ledger) = reconciler();
        let enrollment = reconciler.enroll(4, 9).await.unwrap();
        let card_id = reconciler.approve(enrollment.id).await.unwrap();

        reconciler.decline(enrollment.id).await.unwrap();
        assert!(ledger.active_card_for(4, 9).await.unwrap().is_none());
        let card = ledger.card(card_id).await.unwrap().unwrap();
        assert!(!card.is_active);

        // Re-approval reactivates the same card.
        let restored = reconciler.approve(enrollment.id).await;
        assert!(restored.is_err()); // declined enrollments stay declined

        let enrollment = reconciler.enroll(4, 9).await.unwrap();
        let new_card_id = reconciler.approve(enrollment.id).await.unwrap();
        assert_eq!(new_card_id, card_id);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Pending,
    Approved,
    Declined,
}

/// A customer's request to join a loyalty program.
///
/// Invariant: an approved enrollment has exactly one active card for its
/// (customer, program) pair. The invariant can be transiently violated by a
/// crash between approval and card creation; the reconciler restores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: u64,
    pub customer_id: u64,
    pub program_id: u64,
    pub status: EnrollmentStatus,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(id: u64, customer_id: u64, program_id: u64) -> Self {
        Self {
            id,
            customer_id,
            program_id,
            status: EnrollmentStatus::Pending,
            approved_at: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == EnrollmentStatus::Approved
    }
}

/// Payload for a new enrollment request; always starts pending.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEnrollment {
    pub customer_id: u64,
    pub program_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_enrollment_is_pending() {
        let enrollment = Enrollment::new(9, 4, 9);
        assert_eq!(enrollment.status, EnrollmentStatus::Pending);
        assert!(enrollment.approved_at.is_none());
        assert!(!enrollment.is_approved());
    }

    #[test]
    fn test_status_serde_is_lowercase() {
        let json = serde_json::to_string(&EnrollmentStatus::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
    }
}

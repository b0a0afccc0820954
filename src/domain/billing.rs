use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type BillingId = Uuid;

/// A settlement run: a group of transactions marked as billed together.
/// Captured transactions become immutable (no further cancellation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingBatch {
    pub id: BillingId,
    /// Human-readable, time-based: BIL-YYYYMMDD-HHMM
    pub billing_number: String,
    /// Accounts whose open transactions were captured by this run
    pub account_ids: Vec<AccountId>,
    pub total_cents: Cents,
    pub transaction_count: i64,
    pub created_at: DateTime<Utc>,
}

impl BillingBatch {
    /// Create a batch for the given accounts at the given time.
    /// Totals are filled in by the coordinator once the captured
    /// transactions are known.
    pub fn new(account_ids: Vec<AccountId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            billing_number: billing_number_for(created_at),
            account_ids,
            total_cents: 0,
            transaction_count: 0,
            created_at,
        }
    }
}

/// Billing numbers encode the minute of the run: BIL-20250314-1830.
pub fn billing_number_for(at: DateTime<Utc>) -> String {
    format!("BIL-{}", at.format("%Y%m%d-%H%M"))
}

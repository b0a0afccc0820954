use serde::Serialize;

use crate::domain::{Account, Cents};

/// One row of a SEPA direct-debit run: an account with an open balance
/// and an active mandate, plus the amount to collect.
#[derive(Debug, Clone, Serialize)]
pub struct SepaDebit {
    pub account: Account,
    pub debit_amount_cents: Cents,
}

impl SepaDebit {
    pub fn for_account(account: Account) -> Self {
        let debit_amount_cents = account.balance_cents.abs();
        Self {
            account,
            debit_amount_cents,
        }
    }
}

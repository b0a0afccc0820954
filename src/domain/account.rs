use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular club member with a running tab
    Member,
    /// Visitor without membership - pays the guest price tier
    Guest,
    /// Staff serving at the bar
    Bartender,
    /// Club administration
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Guest => "guest",
            Role::Bartender => "bartender",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "member" => Some(Role::Member),
            "guest" => Some(Role::Guest),
            "bartender" => Some(Role::Bartender),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// The role decides the price tier only: everyone attached to the club
    /// pays the member price, walk-in guests pay the guest price.
    pub fn pays_member_price(&self) -> bool {
        !matches!(self, Role::Guest)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A member/guest/staff record holding a running balance.
/// Balance is negative while the member owes the club money.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role: Role,
    /// Mutated only through sale/cancellation ledger operations,
    /// never by a generic account update.
    pub balance_cents: Cents,
    /// Scanner barcodes; unique across all accounts.
    pub barcodes: Vec<String>,
    pub sepa_active: bool,
    pub iban: Option<String>,
    pub account_holder: Option<String>,
    pub mandate_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            role,
            balance_cents: 0,
            barcodes: Vec::new(),
            sepa_active: false,
            iban: None,
            account_holder: None,
            mandate_reference: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_barcodes(mut self, barcodes: Vec<String>) -> Self {
        self.barcodes = barcodes;
        self
    }

    /// Attach a SEPA direct-debit mandate.
    pub fn with_mandate(
        mut self,
        iban: impl Into<String>,
        account_holder: impl Into<String>,
        mandate_reference: impl Into<String>,
    ) -> Self {
        self.sepa_active = true;
        self.iban = Some(iban.into());
        self.account_holder = Some(account_holder.into());
        self.mandate_reference = Some(mandate_reference.into());
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn owes_money(&self) -> bool {
        self.balance_cents < 0
    }

    /// Eligible for a direct-debit run: active mandate, IBAN on file,
    /// and an open (negative) balance to collect.
    pub fn is_sepa_eligible(&self) -> bool {
        self.sepa_active && self.balance_cents < 0 && self.iban.is_some()
    }
}

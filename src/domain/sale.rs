use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, BillingId, Cents, ProductId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    /// Put it on the tab: balance decreases by the sale total
    BalanceDebit,
    /// Consumption funded by a pre-paid voucher card; balance untouched
    VoucherCard,
    /// Money returned to the member; balance increases
    VoucherRefund,
    /// Flat charge entered by hand, settled like a debit
    ManualBooking,
    /// Anything else, settled like a debit
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BalanceDebit => "balance-debit",
            PaymentMethod::VoucherCard => "voucher-card",
            PaymentMethod::VoucherRefund => "voucher-refund",
            PaymentMethod::ManualBooking => "manual-booking",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "balance-debit" => Some(PaymentMethod::BalanceDebit),
            "voucher-card" => Some(PaymentMethod::VoucherCard),
            "voucher-refund" => Some(PaymentMethod::VoucherRefund),
            "manual-booking" => Some(PaymentMethod::ManualBooking),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of a sale as entered at the till.
/// A missing product id denotes a non-inventory charge (service fee,
/// manual booking) that carries a price but no stock effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItem {
    pub product_id: Option<ProductId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: Cents,
}

impl SaleItem {
    pub fn new(
        product_id: Option<ProductId>,
        description: impl Into<String>,
        quantity: i64,
        unit_price_cents: Cents,
    ) -> Self {
        Self {
            product_id,
            description: description.into(),
            quantity,
            unit_price_cents,
        }
    }

    pub fn line_total_cents(&self) -> Cents {
        self.quantity * self.unit_price_cents
    }
}

/// A recorded sale line. Transactions are soft-deleted via cancellation;
/// once attached to a billing batch they become immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    /// None for non-inventory charges
    pub product_id: Option<ProductId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: Cents,
    pub total_cents: Cents,
    pub payment_method: PaymentMethod,
    pub cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Set when the transaction is captured by a billing batch
    pub billing_id: Option<BillingId>,
    pub is_billed: bool,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a transaction for one sale line.
    pub fn from_item(account_id: AccountId, item: &SaleItem, payment_method: PaymentMethod) -> Self {
        assert!(item.quantity > 0, "Sale quantity must be positive");
        Self {
            id: Uuid::new_v4(),
            account_id,
            product_id: item.product_id,
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
            total_cents: item.line_total_cents(),
            payment_method,
            cancelled: false,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            billing_id: None,
            is_billed: false,
            created_at: Utc::now(),
        }
    }

    /// Stamp the cancellation fields. Preconditions (not billed, not already
    /// cancelled) are checked by the caller.
    pub fn mark_cancelled(
        &mut self,
        reason: impl Into<String>,
        actor: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.cancelled = true;
        self.cancelled_at = Some(at);
        self.cancelled_by = Some(actor.into());
        self.cancellation_reason = Some(reason.into());
    }

    /// Whether the transaction can still be cancelled.
    pub fn is_open(&self) -> bool {
        !self.cancelled && self.billing_id.is_none() && !self.is_billed
    }
}

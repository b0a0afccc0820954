use super::{Cents, PaymentMethod, SaleItem};

/// Signed change a completed sale applies to the buyer's balance.
///
/// This is the single place the payment-method policy lives:
/// - balance-debit, manual-booking, other: the member owes more
/// - voucher-card: funded by a pre-paid card, balance untouched
/// - voucher-refund: money handed back, debt reduced
pub fn balance_effect(method: PaymentMethod, total_cents: Cents) -> Cents {
    match method {
        PaymentMethod::BalanceDebit | PaymentMethod::ManualBooking | PaymentMethod::Other => {
            -total_cents
        }
        PaymentMethod::VoucherCard => 0,
        PaymentMethod::VoucherRefund => total_cents,
    }
}

/// Amount credited back when a sale is cancelled.
///
/// Voucher-card consumption never touched the balance at sale time, so its
/// cancellation must not touch it either. Every other method credits the
/// full transaction total back.
pub fn refund_amount(method: PaymentMethod, total_cents: Cents) -> Cents {
    match method {
        PaymentMethod::VoucherCard => 0,
        _ => total_cents,
    }
}

/// Total of a sale across all line items.
pub fn sale_total(items: &[SaleItem]) -> Cents {
    items.iter().map(|item| item.line_total_cents()).sum()
}

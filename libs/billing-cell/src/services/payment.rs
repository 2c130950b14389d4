use shared_models::error::FieldErrors;

use crate::models::InvoiceStatus;

/// Invoice amounts after a payment has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentApplication {
    pub paid_cents: i64,
    pub balance_cents: i64,
    pub status: InvoiceStatus,
}

/// Applies `amount_cents` to an invoice of `total_cents` with `paid_cents` already received.
pub fn apply_payment(
    total_cents: i64,
    paid_cents: i64,
    amount_cents: i64,
) -> Result<PaymentApplication, FieldErrors> {
    let balance = total_cents - paid_cents;

    if amount_cents <= 0 {
        return Err(FieldErrors::single("amount_cents", "Payment amount must be greater than zero"));
    }
    if amount_cents > balance {
        return Err(FieldErrors::single(
            "amount_cents",
            format!("Payment amount cannot exceed the balance of {} cents", balance),
        ));
    }

    let paid = paid_cents + amount_cents;
    let status = if paid >= total_cents { InvoiceStatus::Paid } else { InvoiceStatus::Pending };

    Ok(PaymentApplication {
        paid_cents: paid,
        balance_cents: total_cents - paid,
        status,
    })
}

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::AppointmentError;
use consultation_cell::ConsultationError;
use patient_cell::PatientError;
use shared_database::DbError;
use shared_models::error::{AppError, FieldErrors};

/// Days between billing and the default due date.
pub const DEFAULT_PAYMENT_TERMS_DAYS: i64 = 14;

// ==============================================================================
// INVOICES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amounts are integer cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub consultation_id: Option<Uuid>,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub balance_cents: i64,
    pub status: InvoiceStatus,
    pub bill_date: DateTime<Utc>,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub item_type: String,
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItemRequest {
    pub item_type: String,
    pub description: String,
    pub quantity: Option<i32>,
    pub unit_price_cents: i64,
}

impl InvoiceItemRequest {
    pub fn quantity(&self) -> i32 {
        self.quantity.unwrap_or(1)
    }

    /// `None` when quantity times unit price does not fit in cents.
    pub fn line_total(&self) -> Option<i64> {
        i64::from(self.quantity()).checked_mul(self.unit_price_cents)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    pub appointment_id: Option<Uuid>,
    pub consultation_id: Option<Uuid>,
    /// Used only when no line items are given.
    pub total_cents: Option<i64>,
    #[serde(default)]
    pub items: Vec<InvoiceItemRequest>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Upper bound for a single invoice, in cents.
pub const MAX_INVOICE_CENTS: i64 = 10_000_000_000;

impl CreateInvoiceRequest {
    /// Invoice total: the sum of the line items, else the explicit total.
    pub fn resolve_total(&self) -> Result<i64, FieldErrors> {
        let mut errors = FieldErrors::new();

        if self.appointment_id.is_none() && self.consultation_id.is_none() {
            errors.add("appointment_id", "An invoice must reference an appointment or a consultation");
        }

        for (index, item) in self.items.iter().enumerate() {
            if item.description.trim().is_empty() || item.item_type.trim().is_empty() {
                errors.add(&format!("items[{}]", index), "Item type and description are required");
            }
            if item.quantity() <= 0 {
                errors.add(&format!("items[{}].quantity", index), "Quantity must be at least 1");
            }
            if item.unit_price_cents < 0 {
                errors.add(&format!("items[{}].unit_price_cents", index), "Unit price cannot be negative");
            }
        }

        let total = if self.items.is_empty() {
            Some(self.total_cents.unwrap_or(0))
        } else {
            let mut sum = Some(0i64);
            for (index, item) in self.items.iter().enumerate() {
                let line = item.line_total();
                if line.is_none() {
                    errors.add(&format!("items[{}].unit_price_cents", index), "Line total is too large");
                }
                sum = sum.zip(line).and_then(|(sum, line)| sum.checked_add(line));
            }
            sum
        };

        let total = match total {
            Some(total) if total > MAX_INVOICE_CENTS => {
                errors.add("total_cents", format!("Invoice total cannot exceed {} cents", MAX_INVOICE_CENTS));
                0
            }
            Some(total) => {
                if total <= 0 {
                    errors.add("total_cents", "Invoice total must be greater than zero");
                }
                total
            }
            None => {
                errors.add("total_cents", "Invoice total is too large");
                0
            }
        };

        errors.into_result().map(|_| total)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceSearchQuery {
    pub status: Option<InvoiceStatus>,
    pub patient_id: Option<Uuid>,
    /// Only invoices with at least one payment recorded.
    pub paid_only: Option<bool>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Invoice not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Invoice is already paid")]
    AlreadyPaid,

    #[error("Invoice was modified by another request")]
    ConcurrentModification,

    #[error(transparent)]
    Access(#[from] AppError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl BillingError {
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        BillingError::Validation(FieldErrors::single(field, message))
    }
}

impl From<DbError> for BillingError {
    fn from(e: DbError) -> Self {
        BillingError::DatabaseError(e.to_string())
    }
}

impl From<PatientError> for BillingError {
    fn from(e: PatientError) -> Self {
        BillingError::Access(AppError::from(e))
    }
}

impl From<AppointmentError> for BillingError {
    fn from(e: AppointmentError) -> Self {
        BillingError::Access(AppError::from(e))
    }
}

impl From<ConsultationError> for BillingError {
    fn from(e: ConsultationError) -> Self {
        BillingError::Access(AppError::from(e))
    }
}

impl From<BillingError> for AppError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::NotFound => AppError::NotFound("Invoice not found".to_string()),
            BillingError::Validation(fields) => AppError::ValidationError(fields),
            BillingError::AlreadyPaid => AppError::Conflict(e.to_string()),
            BillingError::ConcurrentModification => AppError::Conflict(e.to_string()),
            BillingError::Access(inner) => inner,
            BillingError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: Option<i32>, unit_price_cents: i64) -> InvoiceItemRequest {
        InvoiceItemRequest {
            item_type: "service".to_string(),
            description: "Examination".to_string(),
            quantity,
            unit_price_cents,
        }
    }

    #[test]
    fn test_total_is_sum_of_line_items() {
        let request = CreateInvoiceRequest {
            appointment_id: Some(Uuid::new_v4()),
            total_cents: Some(1),
            items: vec![item(Some(2), 1250), item(None, 4000)],
            ..Default::default()
        };
        assert_eq!(request.resolve_total().unwrap(), 6500);
    }

    #[test]
    fn test_explicit_total_without_items() {
        let request = CreateInvoiceRequest {
            consultation_id: Some(Uuid::new_v4()),
            total_cents: Some(4500),
            ..Default::default()
        };
        assert_eq!(request.resolve_total().unwrap(), 4500);
    }

    #[test]
    fn test_zero_total_and_missing_reference_are_rejected() {
        let errors = CreateInvoiceRequest::default().resolve_total().unwrap_err();
        assert!(errors.contains("total_cents"));
        assert!(errors.contains("appointment_id"));
    }

    #[test]
    fn test_overflowing_line_item_is_a_field_error() {
        let request = CreateInvoiceRequest {
            appointment_id: Some(Uuid::new_v4()),
            items: vec![item(Some(2), i64::MAX / 2 + 1), item(Some(1), 100)],
            ..Default::default()
        };
        let errors = request.resolve_total().unwrap_err();
        assert!(errors.contains("items[0].unit_price_cents"));
        assert!(errors.contains("total_cents"));
        assert!(!errors.contains("items[1].unit_price_cents"));
    }

    #[test]
    fn test_line_items_summing_past_the_cap_are_rejected() {
        let request = CreateInvoiceRequest {
            appointment_id: Some(Uuid::new_v4()),
            items: vec![item(Some(1), i64::MAX - 10), item(Some(1), 100)],
            ..Default::default()
        };
        assert!(request.resolve_total().unwrap_err().contains("total_cents"));

        let explicit = CreateInvoiceRequest {
            consultation_id: Some(Uuid::new_v4()),
            total_cents: Some(MAX_INVOICE_CENTS + 1),
            ..Default::default()
        };
        assert!(explicit.resolve_total().unwrap_err().contains("total_cents"));
    }

    #[test]
    fn test_bad_line_item_is_reported_by_index() {
        let request = CreateInvoiceRequest {
            appointment_id: Some(Uuid::new_v4()),
            items: vec![item(Some(1), 1000), item(Some(0), 500)],
            ..Default::default()
        };
        let errors = request.resolve_total().unwrap_err();
        assert!(errors.contains("items[1].quantity"));
        assert!(!errors.contains("items[0].quantity"));
    }
}

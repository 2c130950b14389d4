use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use appointment_cell::{AppointmentError, AppointmentSchedulerService};
use consultation_cell::services::{ConsultationService, ConsultationTreatmentService};
use consultation_cell::ConsultationError;
use patient_cell::RecordScope;
use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    BillingError, CreateInvoiceRequest, Invoice, InvoiceItem, InvoiceItemRequest, InvoiceSearchQuery,
    InvoiceStatus, DEFAULT_PAYMENT_TERMS_DAYS,
};
use crate::services::payment::apply_payment;

const INVOICE_SELECT: &str = "select=*,items:invoice_items(*)";

/// What an invoice is billed against, resolved from the referenced records.
struct BilledRecord {
    patient_id: Uuid,
    appointment_id: Option<Uuid>,
    consultation_id: Option<Uuid>,
}

pub struct InvoiceService {
    supabase: Arc<SupabaseClient>,
    scheduler: AppointmentSchedulerService,
    consultations: ConsultationService,
    treatments: ConsultationTreatmentService,
}

impl InvoiceService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            scheduler: AppointmentSchedulerService::with_client(
                Arc::clone(&supabase),
                config.default_appointment_minutes,
            ),
            consultations: ConsultationService::new(config),
            treatments: ConsultationTreatmentService::new(config),
            supabase,
        }
    }

    /// Creates an invoice. A consultation invoice without items or a total
    /// is itemised from the treatments given in that consultation.
    pub async fn create_invoice(
        &self,
        mut request: CreateInvoiceRequest,
        auth_token: &str,
    ) -> Result<Invoice, BillingError> {
        if request.items.is_empty() && request.total_cents.is_none() {
            if let Some(consultation_id) = request.consultation_id {
                request.items = self.treatment_items(consultation_id, auth_token).await?;
            }
        }
        let total = request.resolve_total().map_err(BillingError::Validation)?;
        let billed = self.resolve_billed_record(&request, auth_token).await?;

        let bill_date = Utc::now();
        let due_date = request.due_date
            .unwrap_or_else(|| bill_date.date_naive() + Duration::days(DEFAULT_PAYMENT_TERMS_DAYS));
        if due_date < bill_date.date_naive() {
            return Err(BillingError::invalid_field("due_date", "Due date cannot be before the bill date"));
        }

        let invoice_data = json!({
            "patient_id": billed.patient_id,
            "appointment_id": billed.appointment_id,
            "consultation_id": billed.consultation_id,
            "total_cents": total,
            "paid_cents": 0,
            "balance_cents": total,
            "status": InvoiceStatus::Pending,
            "bill_date": bill_date.to_rfc3339(),
            "due_date": due_date.format("%Y-%m-%d").to_string(),
            "notes": request.notes,
            "updated_at": bill_date.to_rfc3339(),
        });

        let mut rows: Vec<Invoice> = self.supabase
            .write_returning(Method::POST, "/rest/v1/invoices", auth_token, invoice_data)
            .await?;
        if rows.is_empty() {
            return Err(BillingError::DatabaseError("Failed to create invoice".to_string()));
        }
        let mut invoice = rows.swap_remove(0);

        if !request.items.is_empty() {
            let items: Vec<Value> = request.items.iter().map(|item| json!({
                "invoice_id": invoice.id,
                "item_type": item.item_type.trim(),
                "description": item.description.trim(),
                "quantity": item.quantity(),
                "unit_price_cents": item.unit_price_cents,
                "total_price_cents": item.line_total(),
            })).collect();

            let inserted: Result<Vec<InvoiceItem>, _> = self.supabase
                .write_returning(Method::POST, "/rest/v1/invoice_items", auth_token, Value::Array(items))
                .await;

            match inserted {
                Ok(items) => invoice.items = items,
                Err(e) => {
                    error!("Line items for invoice {} failed, removing invoice: {}", invoice.id, e);
                    let path = format!("/rest/v1/invoices?id=eq.{}", invoice.id);
                    let _: Vec<Invoice> = self.supabase.delete_returning(&path, auth_token).await?;
                    return Err(e.into());
                }
            }
        }

        info!("Invoice {} created for patient {} ({} cents)", invoice.id, invoice.patient_id, total);
        Ok(invoice)
    }

    /// Invoice visible in `scope`, with its line items.
    pub async fn get_invoice(
        &self,
        scope: &RecordScope,
        invoice_id: Uuid,
        auth_token: &str,
    ) -> Result<Invoice, BillingError> {
        let invoice: Invoice = self.supabase
            .fetch_one("invoices", &format!("id=eq.{}&{}", invoice_id, INVOICE_SELECT), auth_token)
            .await?
            .ok_or(BillingError::NotFound)?;

        if !scope.allows_patient(invoice.patient_id) {
            return Err(BillingError::NotFound);
        }
        Ok(invoice)
    }

    pub async fn list_invoices(
        &self,
        scope: &RecordScope,
        query: InvoiceSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Invoice>, BillingError> {
        if scope.is_empty() {
            return Ok(vec![]);
        }

        let mut query_parts = vec![INVOICE_SELECT.to_string()];
        match query.patient_id {
            Some(patient_id) if !scope.allows_patient(patient_id) => return Ok(vec![]),
            Some(patient_id) => query_parts.push(format!("patient_id=eq.{}", patient_id)),
            None => query_parts.extend(scope.patient_filter("patient_id")),
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if query.paid_only.unwrap_or(false) {
            query_parts.push("paid_cents=gt.0".to_string());
        }
        query_parts.push("order=bill_date.desc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset.max(0)));
        }

        let path = format!("/rest/v1/invoices?{}", query_parts.join("&"));
        debug!("Listing invoices: {}", path);
        let invoices: Vec<Invoice> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(invoices)
    }

    /// Applies a payment. The write is guarded by the `paid_cents` that was read,
    /// so two payments racing on the same invoice cannot both land.
    pub async fn record_payment(
        &self,
        scope: &RecordScope,
        invoice_id: Uuid,
        amount_cents: i64,
        auth_token: &str,
    ) -> Result<Invoice, BillingError> {
        let invoice = self.get_invoice(scope, invoice_id, auth_token).await?;

        if invoice.status == InvoiceStatus::Paid {
            warn!("Payment refused for settled invoice {}", invoice_id);
            return Err(BillingError::AlreadyPaid);
        }

        let applied = apply_payment(invoice.total_cents, invoice.paid_cents, amount_cents)
            .map_err(BillingError::Validation)?;

        let path = format!("/rest/v1/invoices?id=eq.{}&paid_cents=eq.{}", invoice_id, invoice.paid_cents);
        let body = json!({
            "paid_cents": applied.paid_cents,
            "balance_cents": applied.balance_cents,
            "status": applied.status,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let mut rows: Vec<Invoice> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, body)
            .await?;

        if rows.is_empty() {
            let still_there: Option<Invoice> = self.supabase
                .fetch_one("invoices", &format!("id=eq.{}", invoice_id), auth_token)
                .await?;
            return Err(match still_there {
                Some(_) => {
                    warn!("Invoice {} changed while a payment was being applied", invoice_id);
                    BillingError::ConcurrentModification
                }
                None => BillingError::NotFound,
            });
        }

        let mut updated = rows.swap_remove(0);
        updated.items = invoice.items;
        info!("Payment of {} cents applied to invoice {} (status {})",
              amount_cents, invoice_id, updated.status);
        Ok(updated)
    }

    /// Patient and references an invoice is billed against. A consultation
    /// brings its appointment along; both references must agree on the patient.
    async fn treatment_items(
        &self,
        consultation_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<InvoiceItemRequest>, BillingError> {
        let treatments = match self.treatments
            .list_for_consultation(&RecordScope::Clinic, consultation_id, auth_token)
            .await
        {
            Ok(treatments) => treatments,
            Err(ConsultationError::NotFound) => {
                return Err(BillingError::invalid_field("consultation_id", "Consultation not found"));
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Itemising {} treatments from consultation {}", treatments.len(), consultation_id);
        Ok(treatments.iter()
            .filter(|t| t.cost_cents > 0)
            .map(|t| InvoiceItemRequest {
                item_type: "treatment".to_string(),
                description: match t.details.as_deref().filter(|d| !d.trim().is_empty()) {
                    Some(details) => format!("{} ({})", t.display_name(), details),
                    None => t.display_name().to_string(),
                },
                quantity: Some(1),
                unit_price_cents: t.cost_cents,
            })
            .collect())
    }

    async fn resolve_billed_record(
        &self,
        request: &CreateInvoiceRequest,
        auth_token: &str,
    ) -> Result<BilledRecord, BillingError> {
        let consultation = match request.consultation_id {
            Some(id) => match self.consultations.get_consultation(&RecordScope::Clinic, id, auth_token).await {
                Ok(consultation) => Some(consultation),
                Err(ConsultationError::NotFound) => {
                    return Err(BillingError::invalid_field("consultation_id", "Consultation not found"));
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let appointment = match request.appointment_id {
            Some(id) => match self.scheduler.get_appointment(&RecordScope::Clinic, id, auth_token).await {
                Ok(appointment) => Some(appointment),
                Err(AppointmentError::NotFound) => {
                    return Err(BillingError::invalid_field("appointment_id", "Appointment not found"));
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        match (appointment, consultation) {
            (Some(appointment), Some(consultation)) => {
                if appointment.patient_id != consultation.patient_id {
                    return Err(BillingError::invalid_field(
                        "consultation_id",
                        "Consultation and appointment belong to different patients",
                    ));
                }
                Ok(BilledRecord {
                    patient_id: appointment.patient_id,
                    appointment_id: Some(appointment.id),
                    consultation_id: Some(consultation.id),
                })
            }
            (Some(appointment), None) => Ok(BilledRecord {
                patient_id: appointment.patient_id,
                appointment_id: Some(appointment.id),
                consultation_id: None,
            }),
            (None, Some(consultation)) => Ok(BilledRecord {
                patient_id: consultation.patient_id,
                appointment_id: Some(consultation.appointment_id),
                consultation_id: Some(consultation.id),
            }),
            (None, None) => Err(BillingError::invalid_field(
                "appointment_id",
                "An invoice must reference an appointment or a consultation",
            )),
        }
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::AppointmentError;
use patient_cell::PatientError;
use shared_database::DbError;
use shared_models::error::{AppError, FieldErrors};

pub const MAX_REFILLS: i32 = 10;
/// Upper bound for a single treatment or diagnostic charge, in cents.
pub const MAX_CHARGE_CENTS: i64 = 1_000_000;

// ==============================================================================
// CONSULTATIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consultation {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub vet_id: Uuid,
    pub patient_id: Uuid,
    pub consultation_date: DateTime<Utc>,
    pub weight_kg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub heart_rate: Option<i32>,
    pub respiration_rate: Option<i32>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub is_follow_up: bool,
    pub follow_up_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConsultationRequest {
    pub appointment_id: Uuid,
    pub consultation_date: Option<DateTime<Utc>>,
    pub weight_kg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub heart_rate: Option<i32>,
    pub respiration_rate: Option<i32>,
    pub diagnosis: String,
    pub notes: Option<String>,
    pub is_follow_up: Option<bool>,
    pub follow_up_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConsultationRequest {
    pub weight_kg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub heart_rate: Option<i32>,
    pub respiration_rate: Option<i32>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub is_follow_up: Option<bool>,
    pub follow_up_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsultationSearchQuery {
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    /// Veterinarians see only their own consultations unless this is set.
    pub all: Option<bool>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

/// Vital signs shared by record and update requests.
pub struct Vitals<'a> {
    pub weight_kg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub heart_rate: Option<i32>,
    pub respiration_rate: Option<i32>,
    pub diagnosis: Option<&'a str>,
}

impl Vitals<'_> {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        if self.weight_kg.is_some_and(|w| !(0.0..=999.0).contains(&w)) {
            errors.add("weight_kg", "Weight must be a positive number");
        }
        if self.temperature_c.is_some_and(|t| !(0.0..=999.0).contains(&t)) {
            errors.add("temperature_c", "Temperature must be a valid number");
        }
        if self.heart_rate.is_some_and(|h| !(0..=500).contains(&h)) {
            errors.add("heart_rate", "Heart rate must be between 0 and 500");
        }
        if self.respiration_rate.is_some_and(|r| !(0..=500).contains(&r)) {
            errors.add("respiration_rate", "Respiration rate must be between 0 and 500");
        }
        if self.diagnosis.is_some_and(|d| d.trim().is_empty()) {
            errors.add("diagnosis", "Diagnosis is required");
        }

        errors.into_result()
    }
}

// ==============================================================================
// PRESCRIPTIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: Option<String>,
    pub refills: i32,
    pub is_dispensed: bool,
    pub prescribed_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: Option<String>,
    pub refills: Option<i32>,
}

impl CreatePrescriptionRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        let required = [
            ("medication_name", &self.medication_name, "Medication name is required"),
            ("dosage", &self.dosage, "Dosage is required"),
            ("frequency", &self.frequency, "Frequency is required"),
            ("duration", &self.duration, "Duration is required"),
        ];
        for (field, value, message) in required {
            if value.trim().is_empty() {
                errors.add(field, message);
            }
        }
        if self.refills.is_some_and(|r| !(0..=MAX_REFILLS).contains(&r)) {
            errors.add("refills", format!("Refills must be between 0 and {}", MAX_REFILLS));
        }
        errors.into_result()
    }
}

// ==============================================================================
// TREATMENTS
// ==============================================================================

/// Catalog entry for a procedure or therapy the clinic offers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treatment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub default_cost_cents: Option<i64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTreatmentRequest {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub default_cost_cents: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTreatmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub default_cost_cents: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreatmentSearchQuery {
    pub category: Option<String>,
    pub include_inactive: Option<bool>,
}

pub fn validate_treatment_fields(name: Option<&str>, default_cost_cents: Option<i64>) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if name.is_some_and(|n| n.trim().is_empty()) {
        errors.add("name", "Treatment name is required");
    }
    if let Some(message) = default_cost_cents.and_then(charge_problem) {
        errors.add("default_cost_cents", message);
    }
    errors.into_result()
}

fn charge_problem(cents: i64) -> Option<String> {
    if cents < 0 {
        Some("Cost cannot be negative".to_string())
    } else if cents > MAX_CHARGE_CENTS {
        Some(format!("Cost cannot exceed {} cents", MAX_CHARGE_CENTS))
    } else {
        None
    }
}

/// Catalog fields embedded alongside a consultation treatment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentSummary {
    pub name: String,
    pub category: Option<String>,
}

/// A treatment given during a consultation, with what it cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationTreatment {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub treatment_id: Uuid,
    pub details: Option<String>,
    pub cost_cents: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<TreatmentSummary>,
}

impl ConsultationTreatment {
    pub fn display_name(&self) -> &str {
        self.treatment.as_ref().map(|t| t.name.as_str()).unwrap_or("Treatment")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTreatmentRequest {
    pub treatment_id: Uuid,
    pub details: Option<String>,
    /// Defaults to the catalog's cost for the treatment.
    pub cost_cents: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConsultationTreatmentRequest {
    pub details: Option<String>,
    pub cost_cents: Option<i64>,
    pub notes: Option<String>,
}

impl UpdateConsultationTreatmentRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        match self.cost_cents.and_then(charge_problem) {
            Some(message) => Err(FieldErrors::single("cost_cents", message)),
            None => Ok(()),
        }
    }
}

/// Cost charged for a treatment: the explicit amount, else the catalog default, else nothing.
pub fn treatment_cost(requested: Option<i64>, treatment: &Treatment) -> Result<i64, FieldErrors> {
    let cost = requested.or(treatment.default_cost_cents).unwrap_or(0);
    match charge_problem(cost) {
        Some(message) => Err(FieldErrors::single("cost_cents", message)),
        None => Ok(cost),
    }
}

// ==============================================================================
// DIAGNOSTIC TESTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Requested,
    InProgress,
    Completed,
    Cancelled,
}

impl DiagnosticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticStatus::Requested => "requested",
            DiagnosticStatus::InProgress => "in_progress",
            DiagnosticStatus::Completed => "completed",
            DiagnosticStatus::Cancelled => "cancelled",
        }
    }

    /// Completed tests may still have their results amended; cancelled ones are closed.
    pub fn can_become(&self, next: DiagnosticStatus) -> bool {
        use DiagnosticStatus::*;
        match (self, next) {
            (Cancelled, _) => false,
            (Completed, Completed) => true,
            (Completed, _) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticTest {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub test_type: Option<String>,
    pub test_name: String,
    pub test_date: NaiveDate,
    pub results: Option<String>,
    pub notes: Option<String>,
    pub status: DiagnosticStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDiagnosticTestRequest {
    pub test_type: Option<String>,
    pub test_name: String,
    pub test_date: Option<NaiveDate>,
    pub results: Option<String>,
    pub notes: Option<String>,
    pub status: Option<DiagnosticStatus>,
}

impl OrderDiagnosticTestRequest {
    /// Status to store: as requested, else Completed when results arrive with the order.
    pub fn initial_status(&self) -> DiagnosticStatus {
        self.status.unwrap_or(if has_text(self.results.as_deref()) {
            DiagnosticStatus::Completed
        } else {
            DiagnosticStatus::Requested
        })
    }

    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.test_name.trim().is_empty() {
            errors.add("test_name", "Test name is required");
        }
        if self.initial_status() == DiagnosticStatus::Completed && !has_text(self.results.as_deref()) {
            errors.add("results", "A completed test needs results");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDiagnosticTestRequest {
    pub test_type: Option<String>,
    pub test_name: Option<String>,
    pub test_date: Option<NaiveDate>,
    pub results: Option<String>,
    pub notes: Option<String>,
    pub status: Option<DiagnosticStatus>,
}

impl UpdateDiagnosticTestRequest {
    pub fn validate(&self, current: &DiagnosticTest) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        if current.status == DiagnosticStatus::Cancelled {
            errors.add("status", "A cancelled test cannot be changed");
            return Err(errors);
        }
        if self.test_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            errors.add("test_name", "Test name is required");
        }

        let status = self.status.unwrap_or(current.status);
        if !current.status.can_become(status) {
            errors.add("status", format!("Cannot move a {} test to {}", current.status.as_str(), status.as_str()));
        }
        let results = self.results.as_deref().or(current.results.as_deref());
        if status == DiagnosticStatus::Completed && !has_text(results) {
            errors.add("results", "A completed test needs results");
        }

        errors.into_result()
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConsultationError {
    #[error("Consultation not found")]
    NotFound,

    #[error("Prescription not found")]
    PrescriptionNotFound,

    #[error("Prescription has already been dispensed")]
    AlreadyDispensed,

    #[error("Treatment not found")]
    TreatmentNotFound,

    #[error("Treatment is still referenced by consultations; deactivate it instead")]
    TreatmentInUse,

    #[error("Consultation treatment not found")]
    ConsultationTreatmentNotFound,

    #[error("Diagnostic test not found")]
    DiagnosticTestNotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Only the recording veterinarian or an administrator may change this consultation")]
    NotRecordingVet,

    #[error(transparent)]
    Appointment(#[from] AppointmentError),

    #[error(transparent)]
    Access(#[from] AppError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl ConsultationError {
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ConsultationError::Validation(FieldErrors::single(field, message))
    }
}

impl From<DbError> for ConsultationError {
    fn from(e: DbError) -> Self {
        ConsultationError::DatabaseError(e.to_string())
    }
}

impl From<PatientError> for ConsultationError {
    fn from(e: PatientError) -> Self {
        ConsultationError::Access(AppError::from(e))
    }
}

impl From<ConsultationError> for AppError {
    fn from(e: ConsultationError) -> Self {
        match e {
            ConsultationError::NotFound => AppError::NotFound("Consultation not found".to_string()),
            ConsultationError::PrescriptionNotFound => {
                AppError::NotFound("Prescription not found".to_string())
            }
            ConsultationError::AlreadyDispensed => {
                AppError::Conflict("Prescription has already been dispensed".to_string())
            }
            ConsultationError::TreatmentNotFound
            | ConsultationError::ConsultationTreatmentNotFound
            | ConsultationError::DiagnosticTestNotFound => AppError::NotFound(e.to_string()),
            ConsultationError::TreatmentInUse => AppError::Conflict(e.to_string()),
            ConsultationError::Validation(fields) => AppError::ValidationError(fields),
            ConsultationError::NotRecordingVet => AppError::Forbidden(e.to_string()),
            ConsultationError::Appointment(inner) => AppError::from(inner),
            ConsultationError::Access(inner) => inner,
            ConsultationError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

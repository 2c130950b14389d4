use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use patient_cell::PatientError;
use shared_database::DbError;
use shared_models::error::{AppError, FieldErrors};

pub const DEFAULT_UPCOMING_DAYS: i64 = 30;
pub const MAX_UPCOMING_DAYS: i64 = 365;

// ==============================================================================
// CATALOG
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vaccine {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Species the vaccine is meant for; `None` applies to any.
    pub species: Option<String>,
    pub recommended_schedule: Option<String>,
    /// Days of protection after a dose.
    pub duration_days: Option<i32>,
    pub is_core: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVaccineRequest {
    pub name: String,
    pub description: Option<String>,
    pub species: Option<String>,
    pub recommended_schedule: Option<String>,
    pub duration_days: Option<i32>,
    pub is_core: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateVaccineRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub species: Option<String>,
    pub recommended_schedule: Option<String>,
    pub duration_days: Option<i32>,
    pub is_core: Option<bool>,
    pub is_active: Option<bool>,
}

pub fn validate_vaccine_fields(name: Option<&str>, duration_days: Option<i32>) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if name.is_some_and(|n| n.trim().is_empty()) {
        errors.add("name", "Vaccine name is required");
    }
    if duration_days.is_some_and(|d| d <= 0) {
        errors.add("duration_days", "Duration must be a positive number of days");
    }
    errors.into_result()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaccineSearchQuery {
    pub species: Option<String>,
    pub include_inactive: Option<bool>,
}

// ==============================================================================
// RECORDS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaccineRecord {
    pub id: Uuid,
    pub vaccine_id: Uuid,
    pub patient_id: Uuid,
    pub administered_by: Uuid,
    pub date_given: NaiveDate,
    pub next_due_date: Option<NaiveDate>,
    pub lot_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordVaccinationRequest {
    pub vaccine_id: Uuid,
    pub patient_id: Uuid,
    /// Defaults to today.
    pub date_given: Option<NaiveDate>,
    pub next_due_date: Option<NaiveDate>,
    pub lot_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaccineRecordQuery {
    pub patient_id: Option<Uuid>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
}

/// Next due date for a dose given on `date_given`. An explicit date wins;
/// otherwise the vaccine's duration decides, and without one there is none.
pub fn next_due_date(
    date_given: NaiveDate,
    explicit: Option<NaiveDate>,
    duration_days: Option<i32>,
) -> Result<Option<NaiveDate>, FieldErrors> {
    let next_due = explicit.or_else(|| {
        duration_days.map(|days| date_given + Duration::days(i64::from(days)))
    });

    match next_due {
        Some(due) if due <= date_given => Err(FieldErrors::single(
            "next_due_date",
            "Next due date must be after the date given",
        )),
        other => Ok(other),
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VaccinationError {
    #[error("Vaccine not found")]
    VaccineNotFound,

    #[error("Vaccination record not found")]
    RecordNotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error(transparent)]
    Access(#[from] AppError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl VaccinationError {
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        VaccinationError::Validation(FieldErrors::single(field, message))
    }
}

impl From<DbError> for VaccinationError {
    fn from(e: DbError) -> Self {
        VaccinationError::DatabaseError(e.to_string())
    }
}

impl From<PatientError> for VaccinationError {
    fn from(e: PatientError) -> Self {
        VaccinationError::Access(AppError::from(e))
    }
}

impl From<VaccinationError> for AppError {
    fn from(e: VaccinationError) -> Self {
        match e {
            VaccinationError::VaccineNotFound | VaccinationError::RecordNotFound => {
                AppError::NotFound(e.to_string())
            }
            VaccinationError::Validation(fields) => AppError::ValidationError(fields),
            VaccinationError::Access(inner) => inner,
            VaccinationError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

use axum::response::{IntoResponse, Response};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use patient_cell::PatientError;
use shared_database::DbError;
use shared_models::error::{AppError, FieldErrors};

pub const MIN_DURATION_MINUTES: i32 = 5;
pub const MAX_DURATION_MINUTES: i32 = 480;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub vet_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub scheduled_end: DateTime<Utc>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// End of the half-open `[appointment_date, end)` slot.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.appointment_date + Duration::minutes(self.duration_minutes as i64)
    }

    pub fn blocks_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// Calendar colour for the status.
    pub fn color(&self) -> &'static str {
        match self {
            AppointmentStatus::Completed => "#28a745",
            AppointmentStatus::Cancelled => "#dc3545",
            AppointmentStatus::Confirmed => "#17a2b8",
            AppointmentStatus::Scheduled => "#007bff",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleAppointmentRequest {
    pub patient_id: Uuid,
    pub vet_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub appointment_date: DateTime<Utc>,
    /// Moves the appointment to another veterinarian when set.
    pub vet_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub vet_id: Option<Uuid>,
    pub appointment_date: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl EditAppointmentRequest {
    pub fn moves_slot(&self) -> bool {
        self.vet_id.is_some() || self.appointment_date.is_some() || self.duration_minutes.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub status: Option<AppointmentStatus>,
    pub vet_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckQuery {
    pub vet_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub vet_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub color: String,
    pub vet_id: Uuid,
    pub vet_name: Option<String>,
    pub status: AppointmentStatus,
}

/// Result of completing an appointment when a consultation is recorded.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Completed(Appointment),
    /// The appointment was already completed by an earlier consultation.
    AlreadyCompleted(Appointment),
}

impl CompletionOutcome {
    pub fn appointment(&self) -> &Appointment {
        match self {
            CompletionOutcome::Completed(a) | CompletionOutcome::AlreadyCompleted(a) => a,
        }
    }

    pub fn transitioned(&self) -> bool {
        matches!(self, CompletionOutcome::Completed(_))
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Appointment conflicts with {} existing booking(s)", conflicts.len())]
    ConflictDetected { conflicts: Vec<Appointment> },

    #[error("Cannot change appointment status from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment is {0} and can no longer be changed")]
    NotModifiable(AppointmentStatus),

    #[error("Appointment was modified by another user")]
    ConcurrentModification,

    #[error(transparent)]
    Access(#[from] AppError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AppointmentError {
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        AppointmentError::Validation(FieldErrors::single(field, message))
    }
}

impl From<DbError> for AppointmentError {
    fn from(e: DbError) -> Self {
        AppointmentError::DatabaseError(e.to_string())
    }
}

impl From<PatientError> for AppointmentError {
    fn from(e: PatientError) -> Self {
        AppointmentError::Access(AppError::from(e))
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
            AppointmentError::Validation(fields) => AppError::ValidationError(fields),
            AppointmentError::ConflictDetected { .. } => AppError::invalid_field(
                "appointment_date",
                "The veterinarian already has an appointment at this time",
            ),
            AppointmentError::InvalidStatusTransition { .. } | AppointmentError::NotModifiable(_) => {
                AppError::invalid_field("status", e.to_string())
            }
            AppointmentError::ConcurrentModification => AppError::Conflict(e.to_string()),
            AppointmentError::Access(inner) => inner,
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

impl IntoResponse for AppointmentError {
    fn into_response(self) -> Response {
        match self {
            // Overlaps carry the bookings they collide with.
            AppointmentError::ConflictDetected { conflicts } => {
                tracing::warn!("Rejected booking overlapping {} appointment(s)", conflicts.len());
                let fields = FieldErrors::single(
                    "appointment_date",
                    "The veterinarian already has an appointment at this time",
                );
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({
                        "error": "Validation failed",
                        "fields": fields,
                        "conflicting_appointments": conflicts,
                    })),
                ).into_response()
            }
            other => AppError::from(other).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(AppointmentStatus::Confirmed).unwrap(), json!("confirmed"));
        let parsed: AppointmentStatus = serde_json::from_value(json!("cancelled")).unwrap();
        assert_eq!(parsed, AppointmentStatus::Cancelled);
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(AppointmentStatus::Completed.color(), "#28a745");
        assert_eq!(AppointmentStatus::Cancelled.color(), "#dc3545");
        assert_eq!(AppointmentStatus::Confirmed.color(), "#17a2b8");
        assert_eq!(AppointmentStatus::Scheduled.color(), "#007bff");
    }

    #[test]
    fn test_overlap_error_renders_conflicts() {
        let response = AppointmentError::ConflictDetected { conflicts: vec![] }.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = AppointmentError::ConcurrentModification.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

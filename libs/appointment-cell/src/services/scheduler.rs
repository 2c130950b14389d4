use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use patient_cell::{Patient, RecordScope};
use shared_config::AppConfig;
use shared_database::supabase::{filter_timestamp, in_list, SupabaseClient};
use shared_database::DbError;
use shared_models::error::FieldErrors;
use shared_models::role::Role;

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, CalendarEvent,
    CalendarQuery, CancelAppointmentRequest, CompletionOutcome, EditAppointmentRequest,
    RescheduleAppointmentRequest, ScheduleAppointmentRequest, MAX_DURATION_MINUTES,
    MIN_DURATION_MINUTES,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;

/// Staff directory row, kept loose so legacy role spellings still parse.
#[derive(Debug, Deserialize)]
struct VetRow {
    role: String,
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct PatientName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VetName {
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    #[serde(flatten)]
    appointment: Appointment,
    patient: Option<PatientName>,
    vet: Option<VetName>,
}

impl From<CalendarRow> for CalendarEvent {
    fn from(row: CalendarRow) -> Self {
        let apt = row.appointment;
        let title = match (row.patient, apt.reason.as_deref().filter(|r| !r.is_empty())) {
            (Some(patient), Some(reason)) => format!("{} - {}", patient.name, reason),
            (Some(patient), None) => patient.name,
            (None, Some(reason)) => reason.to_string(),
            (None, None) => "Appointment".to_string(),
        };
        let vet_name = row.vet.map(|v| {
            [v.first_name, v.last_name].into_iter().flatten().collect::<Vec<_>>().join(" ")
        });

        CalendarEvent {
            id: apt.id,
            title,
            start: apt.appointment_date,
            end: apt.end_time(),
            color: apt.status.color().to_string(),
            vet_id: apt.vet_id,
            vet_name,
            status: apt.status,
        }
    }
}

pub fn validate_duration(duration_minutes: i32) -> Result<(), FieldErrors> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        return Err(FieldErrors::single(
            "duration_minutes",
            format!(
                "Duration must be between {} and {} minutes",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
            ),
        ));
    }
    Ok(())
}

fn exact_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub struct AppointmentSchedulerService {
    supabase: Arc<SupabaseClient>,
    conflicts: ConflictDetectionService,
    lifecycle: AppointmentLifecycleService,
    default_duration: i32,
}

impl AppointmentSchedulerService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(
            Arc::new(SupabaseClient::new(config)),
            config.default_appointment_minutes,
        )
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, default_duration: i32) -> Self {
        Self {
            conflicts: ConflictDetectionService::new(Arc::clone(&supabase)),
            lifecycle: AppointmentLifecycleService::new(),
            supabase,
            default_duration,
        }
    }

    pub fn conflicts(&self) -> &ConflictDetectionService {
        &self.conflicts
    }

    // ==========================================================================
    // SCHEDULING
    // ==========================================================================

    pub async fn schedule(
        &self,
        scope: &RecordScope,
        request: ScheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let duration = request.duration_minutes.unwrap_or(self.default_duration);
        debug!("Scheduling patient {} with vet {} at {} for {} minutes",
               request.patient_id, request.vet_id, request.appointment_date, duration);

        let mut errors = match validate_duration(duration) {
            Ok(()) => FieldErrors::new(),
            Err(errors) => errors,
        };

        let (patient_problem, vet_problem) = futures::try_join!(
            self.validate_patient(scope, request.patient_id, auth_token),
            self.validate_vet(request.vet_id, auth_token),
        )?;
        if let Some(message) = patient_problem {
            errors.add("patient_id", message);
        }
        if let Some(message) = vet_problem {
            errors.add("vet_id", message);
        }
        errors.into_result().map_err(AppointmentError::Validation)?;

        let start = request.appointment_date;
        let end = start + Duration::minutes(duration as i64);
        self.ensure_slot_free(request.vet_id, start, end, None, auth_token).await?;

        let now = Utc::now().to_rfc3339();
        let appointment_data = json!({
            "patient_id": request.patient_id,
            "vet_id": request.vet_id,
            "appointment_date": start.to_rfc3339(),
            "duration_minutes": duration,
            "scheduled_end": end.to_rfc3339(),
            "reason": request.reason,
            "notes": request.notes,
            "status": AppointmentStatus::Scheduled,
            "created_at": now,
            "updated_at": now,
        });

        let result = self.supabase
            .write_returning::<Appointment>(Method::POST, "/rest/v1/appointments", auth_token, appointment_data)
            .await;
        let mut rows = self.map_slot_error(result, request.vet_id, start, end, None, auth_token).await?;

        if rows.is_empty() {
            return Err(AppointmentError::DatabaseError("Failed to create appointment".to_string()));
        }

        let appointment = rows.swap_remove(0);
        info!("Appointment {} scheduled for patient {} with vet {}",
              appointment.id, appointment.patient_id, appointment.vet_id);
        Ok(appointment)
    }

    pub async fn reschedule(
        &self,
        scope: &RecordScope,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(scope, appointment_id, auth_token).await?;
        self.lifecycle.ensure_modifiable(current.status)?;

        let vet_id = request.vet_id.unwrap_or(current.vet_id);
        if let Some(message) = self.validate_vet(vet_id, auth_token).await? {
            return Err(AppointmentError::invalid_field("vet_id", message));
        }

        let start = request.appointment_date;
        let end = start + Duration::minutes(current.duration_minutes as i64);
        self.ensure_slot_free(vet_id, start, end, Some(current.id), auth_token).await?;

        let update = json!({
            "appointment_date": start.to_rfc3339(),
            "scheduled_end": end.to_rfc3339(),
            "vet_id": vet_id,
        });
        let result = self.patch_guarded(&current, update, auth_token).await;
        let appointment = self.map_slot_error(result, vet_id, start, end, Some(current.id), auth_token).await?;

        info!("Appointment {} rescheduled to {} with vet {}", appointment_id, start, vet_id);
        Ok(appointment)
    }

    pub async fn cancel(
        &self,
        scope: &RecordScope,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(scope, appointment_id, auth_token).await?;
        self.lifecycle.validate_status_transition(current.status, AppointmentStatus::Cancelled)?;

        let mut update = Map::new();
        update.insert("status".to_string(), json!(AppointmentStatus::Cancelled));
        if let Some(reason) = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            let notes = match current.notes.as_deref() {
                Some(existing) if !existing.is_empty() => {
                    format!("{}\nCancellation reason: {}", existing, reason)
                }
                _ => format!("Cancellation reason: {}", reason),
            };
            update.insert("notes".to_string(), json!(notes));
        }

        let appointment = self.patch_guarded(&current, Value::Object(update), auth_token).await?;
        info!("Appointment {} cancelled", appointment_id);
        Ok(appointment)
    }

    /// Edits any field. Status changes follow the lifecycle table and slot changes are re-checked.
    pub async fn edit(
        &self,
        scope: &RecordScope,
        appointment_id: Uuid,
        request: EditAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(scope, appointment_id, auth_token).await?;
        self.lifecycle.ensure_modifiable(current.status)?;

        let mut errors = FieldErrors::new();

        let status = request.status.unwrap_or(current.status);
        if status != current.status {
            if let Err(e) = self.lifecycle.validate_status_transition(current.status, status) {
                errors.add("status", e.to_string());
            }
        }

        let duration = request.duration_minutes.unwrap_or(current.duration_minutes);
        if let Err(duration_errors) = validate_duration(duration) {
            if let Some(messages) = duration_errors.get("duration_minutes") {
                for message in messages {
                    errors.add("duration_minutes", message.clone());
                }
            }
        }

        let patient_id = request.patient_id.unwrap_or(current.patient_id);
        let vet_id = request.vet_id.unwrap_or(current.vet_id);
        let (patient_problem, vet_problem) = futures::try_join!(
            async {
                if patient_id != current.patient_id {
                    self.validate_patient(scope, patient_id, auth_token).await
                } else {
                    Ok(None)
                }
            },
            async {
                if request.moves_slot() {
                    self.validate_vet(vet_id, auth_token).await
                } else {
                    Ok(None)
                }
            },
        )?;
        if let Some(message) = patient_problem {
            errors.add("patient_id", message);
        }
        if let Some(message) = vet_problem {
            errors.add("vet_id", message);
        }
        errors.into_result().map_err(AppointmentError::Validation)?;

        let start = request.appointment_date.unwrap_or(current.appointment_date);
        let end = start + Duration::minutes(duration as i64);
        let checks_slot = request.moves_slot() && status != AppointmentStatus::Cancelled;
        if checks_slot {
            self.ensure_slot_free(vet_id, start, end, Some(current.id), auth_token).await?;
        }

        let mut update = Map::new();
        if patient_id != current.patient_id {
            update.insert("patient_id".to_string(), json!(patient_id));
        }
        if vet_id != current.vet_id {
            update.insert("vet_id".to_string(), json!(vet_id));
        }
        if start != current.appointment_date || duration != current.duration_minutes {
            update.insert("appointment_date".to_string(), json!(start.to_rfc3339()));
            update.insert("duration_minutes".to_string(), json!(duration));
            update.insert("scheduled_end".to_string(), json!(end.to_rfc3339()));
        }
        if let Some(reason) = request.reason {
            update.insert("reason".to_string(), json!(reason));
        }
        if let Some(notes) = request.notes {
            update.insert("notes".to_string(), json!(notes));
        }
        if status != current.status {
            update.insert("status".to_string(), json!(status));
        }

        if update.is_empty() {
            return Ok(current);
        }

        let result = self.patch_guarded(&current, Value::Object(update), auth_token).await;
        let appointment = if checks_slot {
            self.map_slot_error(result, vet_id, start, end, Some(current.id), auth_token).await?
        } else {
            result?
        };

        info!("Appointment {} edited", appointment_id);
        Ok(appointment)
    }

    /// Marks the appointment Completed once a consultation has been recorded against it.
    /// The status precondition in the update makes the transition happen at most once.
    pub async fn complete_for_consultation(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<CompletionOutcome, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status={}",
            appointment_id,
            in_list([AppointmentStatus::Scheduled, AppointmentStatus::Confirmed]),
        );
        let body = json!({
            "status": AppointmentStatus::Completed,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let mut rows: Vec<Appointment> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, body)
            .await?;

        if !rows.is_empty() {
            let appointment = rows.swap_remove(0);
            info!("Appointment {} completed", appointment_id);
            return Ok(CompletionOutcome::Completed(appointment));
        }

        let current = self.fetch_appointment(appointment_id, auth_token).await?
            .ok_or(AppointmentError::NotFound)?;

        match current.status {
            AppointmentStatus::Completed => {
                debug!("Appointment {} already completed", appointment_id);
                Ok(CompletionOutcome::AlreadyCompleted(current))
            }
            AppointmentStatus::Cancelled => {
                warn!("Refusing to complete cancelled appointment {}", appointment_id);
                Err(AppointmentError::NotModifiable(AppointmentStatus::Cancelled))
            }
            // Status moved between the update and the read; treat as a lost race.
            _ => Err(AppointmentError::ConcurrentModification),
        }
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    /// Appointment visible in `scope`; anything outside it is reported as not found.
    pub async fn get_appointment(
        &self,
        scope: &RecordScope,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?
            .ok_or(AppointmentError::NotFound)?;

        if !scope.allows_patient(appointment.patient_id) {
            debug!("Appointment {} is outside the caller's scope", appointment_id);
            return Err(AppointmentError::NotFound);
        }

        Ok(appointment)
    }

    pub async fn list_appointments(
        &self,
        scope: &RecordScope,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if scope.is_empty() {
            return Ok(vec![]);
        }
        if let Some(patient_id) = query.patient_id {
            if !scope.allows_patient(patient_id) {
                return Ok(vec![]);
            }
        }

        let mut query_parts = Vec::new();
        match query.patient_id {
            Some(patient_id) => query_parts.push(format!("patient_id=eq.{}", patient_id)),
            None => query_parts.extend(scope.patient_filter("patient_id")),
        }
        if let Some(vet_id) = query.vet_id {
            query_parts.push(format!("vet_id=eq.{}", vet_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("appointment_date=gte.{}", filter_timestamp(from_date)));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("appointment_date=lt.{}", filter_timestamp(to_date)));
        }
        query_parts.push("order=appointment_date.desc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset.max(0)));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        let appointments: Vec<Appointment> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(appointments)
    }

    pub async fn calendar_events(
        &self,
        scope: &RecordScope,
        query: CalendarQuery,
        auth_token: &str,
    ) -> Result<Vec<CalendarEvent>, AppointmentError> {
        if query.end <= query.start {
            return Err(AppointmentError::invalid_field("end", "End must be after start"));
        }
        if scope.is_empty() {
            return Ok(vec![]);
        }

        let mut query_parts = vec![
            "select=*,patient:patients(name),vet:users(first_name,last_name)".to_string(),
            format!("appointment_date=gte.{}", filter_timestamp(query.start)),
            format!("appointment_date=lt.{}", filter_timestamp(query.end)),
        ];
        query_parts.extend(scope.patient_filter("patient_id"));
        if let Some(vet_id) = query.vet_id {
            query_parts.push(format!("vet_id=eq.{}", vet_id));
        }
        query_parts.push("order=appointment_date.asc".to_string());

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        let rows: Vec<CalendarRow> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(rows.into_iter().map(CalendarEvent::from).collect())
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let appointment = self.supabase
            .fetch_one("appointments", &format!("id=eq.{}", appointment_id), auth_token)
            .await?;
        Ok(appointment)
    }

    /// `Some(message)` when the patient cannot be booked by this caller.
    async fn validate_patient(
        &self,
        scope: &RecordScope,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<String>, AppointmentError> {
        if !scope.allows_patient(patient_id) {
            return Ok(Some("Patient not found".to_string()));
        }

        let patient: Option<Patient> = self.supabase
            .fetch_one("patients", &format!("id=eq.{}", patient_id), auth_token)
            .await?;

        Ok(match patient {
            None => Some("Patient not found".to_string()),
            Some(p) if !p.is_active => Some("Patient is no longer active".to_string()),
            Some(_) => None,
        })
    }

    /// `Some(message)` unless `vet_id` is an active veterinarian.
    async fn validate_vet(
        &self,
        vet_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<String>, AppointmentError> {
        let vet: Option<VetRow> = self.supabase
            .fetch_one("users", &format!("id=eq.{}&select=role,is_active", vet_id), auth_token)
            .await?;

        Ok(match vet {
            None => Some("Veterinarian not found".to_string()),
            Some(v) if v.role.parse::<Role>().ok() != Some(Role::Veterinarian) => {
                Some("Selected user is not a veterinarian".to_string())
            }
            Some(v) if !v.is_active => Some("Veterinarian is not active".to_string()),
            Some(_) => None,
        })
    }

    async fn ensure_slot_free(
        &self,
        vet_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let conflicts = self.conflicts
            .find_conflicts(vet_id, start, end, exclude_appointment_id, auth_token)
            .await?;
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(AppointmentError::ConflictDetected { conflicts })
        }
    }

    /// Turns the store's exclusion-constraint rejection into the same overlap error the read-side check gives.
    async fn map_slot_error<T>(
        &self,
        result: Result<T, impl Into<SlotWriteError>>,
        vet_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<T, AppointmentError> {
        match result.map_err(Into::<SlotWriteError>::into) {
            Ok(value) => Ok(value),
            Err(SlotWriteError::Overlap) => {
                warn!("Store rejected overlapping booking for vet {}", vet_id);
                let conflicts = match self.conflicts
                    .find_conflicts(vet_id, start, end, exclude_appointment_id, auth_token)
                    .await
                {
                    Ok(conflicts) => conflicts,
                    Err(e) => {
                        warn!("Could not list conflicts for vet {} after overlap: {}", vet_id, e);
                        Vec::new()
                    }
                };
                Err(AppointmentError::ConflictDetected { conflicts })
            }
            Err(SlotWriteError::Other(e)) => Err(e),
        }
    }

    /// PATCH guarded by the row's `updated_at`, so a concurrent writer makes this update a no-op.
    async fn patch_guarded(
        &self,
        current: &Appointment,
        mut update: Value,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if let Some(fields) = update.as_object_mut() {
            fields.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&updated_at=eq.{}",
            current.id,
            exact_timestamp(current.updated_at),
        );

        let mut rows: Vec<Appointment> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, update)
            .await
            .map_err(|e| match e {
                e if e.is_exclusion_violation() => AppointmentError::ConflictDetected { conflicts: vec![] },
                e => AppointmentError::from(e),
            })?;

        if !rows.is_empty() {
            return Ok(rows.swap_remove(0));
        }

        match self.fetch_appointment(current.id, auth_token).await? {
            Some(_) => {
                warn!("Appointment {} changed underneath this update", current.id);
                Err(AppointmentError::ConcurrentModification)
            }
            None => Err(AppointmentError::NotFound),
        }
    }
}

/// Failure of a write that may collide with the no-double-booking constraint.
enum SlotWriteError {
    Overlap,
    Other(AppointmentError),
}

impl From<DbError> for SlotWriteError {
    fn from(e: DbError) -> Self {
        if e.is_exclusion_violation() {
            SlotWriteError::Overlap
        } else {
            SlotWriteError::Other(AppointmentError::from(e))
        }
    }
}

impl From<AppointmentError> for SlotWriteError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::ConflictDetected { conflicts } if conflicts.is_empty() => SlotWriteError::Overlap,
            other => SlotWriteError::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_bounds() {
        assert!(validate_duration(5).is_ok());
        assert!(validate_duration(480).is_ok());
        assert!(validate_duration(4).unwrap_err().contains("duration_minutes"));
        assert!(validate_duration(481).is_err());
        assert!(validate_duration(0).is_err());
    }

    #[test]
    fn test_calendar_title_uses_patient_and_reason() {
        let row: CalendarRow = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "patient_id": Uuid::new_v4(),
            "vet_id": Uuid::new_v4(),
            "appointment_date": "2024-06-03T09:00:00Z",
            "duration_minutes": 45,
            "scheduled_end": "2024-06-03T09:45:00Z",
            "reason": "Vaccination",
            "notes": null,
            "status": "confirmed",
            "created_at": "2024-06-01T00:00:00Z",
            "updated_at": "2024-06-01T00:00:00Z",
            "patient": { "name": "Biscuit" },
            "vet": { "first_name": "Morgan", "last_name": "Reyes" }
        })).unwrap();

        let event = CalendarEvent::from(row);
        assert_eq!(event.title, "Biscuit - Vaccination");
        assert_eq!(event.color, "#17a2b8");
        assert_eq!(event.vet_name.as_deref(), Some("Morgan Reyes"));
        assert_eq!((event.end - event.start).num_minutes(), 45);
    }

    #[test]
    fn test_exact_timestamp_keeps_fraction_and_zulu() {
        let ts: DateTime<Utc> = "2024-06-03T09:00:00.123456Z".parse().unwrap();
        assert_eq!(exact_timestamp(ts), "2024-06-03T09:00:00.123456Z");
    }
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use chrono::Duration;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use patient_cell::{RecordScope, ScopeService};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::User;
use shared_models::role::Capability;

use crate::models::{
    AppointmentError, AppointmentSearchQuery, CalendarQuery, CancelAppointmentRequest,
    ConflictCheckQuery, EditAppointmentRequest, RescheduleAppointmentRequest,
    ScheduleAppointmentRequest,
};
use crate::services::scheduler::{validate_duration, AppointmentSchedulerService};

async fn caller_scope(
    config: &AppConfig,
    user: &User,
    token: &str,
) -> Result<RecordScope, AppointmentError> {
    let role = user.clinic_role()?;
    let user_id = user.user_id()?;
    let scopes = ScopeService::new(Arc::new(SupabaseClient::new(config)));
    Ok(scopes.resolve(role, user_id, token).await?)
}

// ==============================================================================
// SCHEDULING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn schedule_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ScheduleAppointmentRequest>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    user.require_any(&[Capability::ScheduleAnyPatient, Capability::ScheduleOwnPatient])?;

    let scope = caller_scope(&state, &user, token).await?;
    let scheduler = AppointmentSchedulerService::new(&state);
    let appointment = scheduler.schedule(&scope, request, token).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment scheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    user.require_any(&[Capability::ManageAppointments, Capability::ScheduleOwnPatient])?;

    let scope = caller_scope(&state, &user, token).await?;
    let scheduler = AppointmentSchedulerService::new(&state);
    let appointment = scheduler.reschedule(&scope, appointment_id, request, token).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    user.require_any(&[Capability::ManageAppointments, Capability::ScheduleOwnPatient])?;

    let scope = caller_scope(&state, &user, token).await?;
    let scheduler = AppointmentSchedulerService::new(&state);
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let appointment = scheduler.cancel(&scope, appointment_id, request, token).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn edit_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<EditAppointmentRequest>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    user.require(Capability::ManageAppointments)?;

    let scheduler = AppointmentSchedulerService::new(&state);
    let appointment = scheduler.edit(&RecordScope::Clinic, appointment_id, request, token).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated successfully"
    })))
}

// ==============================================================================
// QUERY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    let scope = caller_scope(&state, &user, token).await?;

    let scheduler = AppointmentSchedulerService::new(&state);
    let appointment = scheduler.get_appointment(&scope, appointment_id, token).await?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    let scope = caller_scope(&state, &user, token).await?;

    let scheduler = AppointmentSchedulerService::new(&state);
    let appointments = scheduler.list_appointments(&scope, query, token).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_calendar_events(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    let scope = caller_scope(&state, &user, token).await?;

    let scheduler = AppointmentSchedulerService::new(&state);
    let events = scheduler.calendar_events(&scope, query, token).await?;

    Ok(Json(json!(events)))
}

/// Read-only check of a vet's availability. Callers without clinic-wide access
/// learn whether the slot is taken but not whose appointments occupy it.
#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppointmentError> {
    let token = auth.token();
    let role = user.require_any(&[Capability::ScheduleAnyPatient, Capability::ScheduleOwnPatient])?;

    let duration = query.duration_minutes.unwrap_or(state.default_appointment_minutes);
    validate_duration(duration).map_err(AppointmentError::Validation)?;

    let scheduler = AppointmentSchedulerService::new(&state);
    let end_time = query.start_time + Duration::minutes(duration as i64);
    let mut response = scheduler.conflicts()
        .check_conflicts(query.vet_id, query.start_time, end_time, query.exclude_appointment_id, token)
        .await?;

    if !role.can(Capability::ViewAllRecords) {
        response.conflicting_appointments.clear();
    }

    Ok(Json(json!({
        "vet_id": query.vet_id,
        "start_time": query.start_time,
        "end_time": end_time,
        "has_conflict": response.has_conflict,
        "conflicting_appointments": response.conflicting_appointments,
    })))
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::role::Capability;

use crate::models::{
    CreateOwnerRequest, CreatePatientRequest, OwnerSearchQuery, PatientError,
    PatientSearchQuery, UpdateOwnerRequest, UpdatePatientRequest,
};
use crate::services::{PatientService, RecordScope};

async fn caller_scope(
    service: &PatientService,
    user: &User,
    token: &str,
) -> Result<RecordScope, AppError> {
    let role = user.clinic_role()?;
    let user_id = user.user_id()?;
    Ok(service.scopes().resolve(role, user_id, token).await?)
}

// ==============================================================================
// OWNER HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_owner(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateOwnerRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManageOwners)?;

    let service = PatientService::new(&config);
    let owner = service.owners().create_owner(request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "owner": owner,
    })))
}

#[axum::debug_handler]
pub async fn list_owners(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<OwnerSearchQuery>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManageOwners)?;

    let service = PatientService::new(&config);
    let owners = service.owners().search_owners(query, auth.token()).await?;

    Ok(Json(json!({
        "owners": owners,
        "total": owners.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_my_owner(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user.user_id()?;

    let service = PatientService::new(&config);
    let owner = service.scopes()
        .find_owner_for_user(user_id, auth.token())
        .await?
        .ok_or(PatientError::OwnerRecordMissing)?;

    Ok(Json(json!(owner)))
}

#[axum::debug_handler]
pub async fn get_owner(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(owner_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = PatientService::new(&config);
    let scope = caller_scope(&service, &user, auth.token()).await?;

    if !scope.is_clinic() && scope.owner_id() != Some(owner_id) {
        return Err(PatientError::OwnerNotFound.into());
    }

    let owner = service.owners().get_owner(owner_id, auth.token()).await?;
    Ok(Json(json!(owner)))
}

#[axum::debug_handler]
pub async fn update_owner(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(owner_id): Path<Uuid>,
    Json(request): Json<UpdateOwnerRequest>,
) -> Result<Json<Value>, AppError> {
    let role = user.clinic_role()?;
    let service = PatientService::new(&config);

    if !role.can(Capability::ManageOwners) {
        let scope = caller_scope(&service, &user, auth.token()).await?;
        if scope.owner_id() != Some(owner_id) {
            if scope.is_clinic() {
                warn!("User {} attempted to edit owner {} without permission", user.id, owner_id);
                return Err(AppError::Forbidden("Not authorized to edit owner records".to_string()));
            }
            return Err(PatientError::OwnerNotFound.into());
        }
    }

    let owner = service.owners().update_owner(owner_id, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "owner": owner,
    })))
}

// ==============================================================================
// PATIENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn register_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    let role = user.require_any(&[Capability::ManagePatients, Capability::RegisterOwnPatient])?;
    let user_id = user.user_id()?;

    let service = PatientService::new(&config);
    let patient = service
        .register_patient(&user, role, user_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "patient": patient,
    })))
}

#[axum::debug_handler]
pub async fn list_patients(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let service = PatientService::new(&config);
    let scope = caller_scope(&service, &user, auth.token()).await?;

    let patients = service.list_patients(&scope, query, auth.token()).await?;

    Ok(Json(json!({
        "patients": patients,
        "total": patients.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = PatientService::new(&config);
    let scope = caller_scope(&service, &user, auth.token()).await?;

    let patient = service.get_patient(&scope, patient_id, auth.token()).await?;
    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn update_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<UpdatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_any(&[Capability::ManagePatients, Capability::RegisterOwnPatient])?;

    let service = PatientService::new(&config);
    let scope = caller_scope(&service, &user, auth.token()).await?;

    let patient = service.update_patient(&scope, patient_id, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "patient": patient,
    })))
}

#[axum::debug_handler]
pub async fn deactivate_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManagePatients)?;

    let service = PatientService::new(&config);
    let patient = service
        .deactivate_patient(&RecordScope::Clinic, patient_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "patient": patient,
        "message": "Patient deactivated",
    })))
}

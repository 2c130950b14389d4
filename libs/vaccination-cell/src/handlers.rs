use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use patient_cell::{RecordScope, ScopeService};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::role::Capability;

use crate::models::{
    CreateVaccineRequest, RecordVaccinationRequest, UpcomingQuery, UpdateVaccineRequest,
    VaccineRecordQuery, VaccineSearchQuery,
};
use crate::services::VaccinationRecordService;

async fn caller_scope(config: &AppConfig, user: &User, token: &str) -> Result<RecordScope, AppError> {
    let role = user.clinic_role()?;
    let user_id = user.user_id()?;
    let scopes = ScopeService::new(Arc::new(SupabaseClient::new(config)));
    Ok(scopes.resolve(role, user_id, token).await?)
}

// ==============================================================================
// CATALOG HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_vaccines(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<VaccineSearchQuery>,
) -> Result<Json<Value>, AppError> {
    // Retired vaccines are only listed for those who maintain the catalog.
    if !user.clinic_role()?.can(Capability::ManageVaccineCatalog) {
        query.include_inactive = None;
    }

    let service = VaccinationRecordService::new(&config);
    let vaccines = service.catalog().list_vaccines(query, auth.token()).await?;

    Ok(Json(json!({
        "vaccines": vaccines,
        "total": vaccines.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_vaccine(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(vaccine_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = VaccinationRecordService::new(&config);
    let vaccine = service.catalog().get_vaccine(vaccine_id, auth.token()).await?;

    Ok(Json(json!(vaccine)))
}

#[axum::debug_handler]
pub async fn create_vaccine(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateVaccineRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManageVaccineCatalog)?;

    let service = VaccinationRecordService::new(&config);
    let vaccine = service.catalog().create_vaccine(request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "vaccine": vaccine,
    })))
}

#[axum::debug_handler]
pub async fn update_vaccine(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(vaccine_id): Path<Uuid>,
    Json(request): Json<UpdateVaccineRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManageVaccineCatalog)?;

    let service = VaccinationRecordService::new(&config);
    let vaccine = service.catalog().update_vaccine(vaccine_id, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "vaccine": vaccine,
    })))
}

// ==============================================================================
// RECORD HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn record_vaccination(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RecordVaccinationRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::AdministerVaccine)?;
    let administered_by = user.user_id()?;

    let service = VaccinationRecordService::new(&config);
    let record = service.record_vaccination(administered_by, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "record": record,
    })))
}

#[axum::debug_handler]
pub async fn list_vaccine_records(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<VaccineRecordQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = VaccinationRecordService::new(&config);
    let records = service.list_records(&scope, query, auth.token()).await?;

    Ok(Json(json!({
        "records": records,
        "total": records.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_vaccine_record(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(record_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = VaccinationRecordService::new(&config);
    let record = service.get_record(&scope, record_id, auth.token()).await?;

    Ok(Json(json!(record)))
}

#[axum::debug_handler]
pub async fn upcoming_vaccinations(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<UpcomingQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = VaccinationRecordService::new(&config);
    let records = service
        .upcoming(&scope, Utc::now().date_naive(), query.days, auth.token())
        .await?;

    Ok(Json(json!({
        "records": records,
        "total": records.len(),
    })))
}

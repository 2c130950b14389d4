use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use patient_cell::{RecordScope, ScopeService};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::role::{Capability, Role};

use crate::models::{
    AddTreatmentRequest, ConsultationSearchQuery, CreatePrescriptionRequest, CreateTreatmentRequest,
    OrderDiagnosticTestRequest, RecordConsultationRequest, TreatmentSearchQuery,
    UpdateConsultationRequest, UpdateConsultationTreatmentRequest, UpdateDiagnosticTestRequest,
    UpdateTreatmentRequest,
};
use crate::services::{
    ConsultationService, ConsultationTreatmentService, DiagnosticTestService, PrescriptionService,
    TreatmentCatalogService,
};

fn treatment_catalog(config: &AppConfig) -> TreatmentCatalogService {
    TreatmentCatalogService::new(Arc::new(SupabaseClient::new(config)))
}

async fn caller_scope(config: &AppConfig, user: &User, token: &str) -> Result<RecordScope, AppError> {
    let role = user.clinic_role()?;
    let user_id = user.user_id()?;
    let scopes = ScopeService::new(Arc::new(SupabaseClient::new(config)));
    Ok(scopes.resolve(role, user_id, token).await?)
}

// ==============================================================================
// CONSULTATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn record_consultation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RecordConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::RecordConsultation)?;
    let vet_id = user.user_id()?;

    let service = ConsultationService::new(&config);
    let (consultation, appointment_completed) = service
        .record_consultation(vet_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation,
        "appointment_completed": appointment_completed,
    })))
}

#[axum::debug_handler]
pub async fn list_consultations(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<ConsultationSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let role = user.clinic_role()?;
    let user_id = user.user_id()?;
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = ConsultationService::new(&config);
    let consultations = service
        .list_consultations(&scope, role, user_id, query, auth.token())
        .await?;

    Ok(Json(json!({
        "consultations": consultations,
        "total": consultations.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_consultation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = ConsultationService::new(&config);
    let consultation = service.get_consultation(&scope, consultation_id, auth.token()).await?;

    Ok(Json(json!(consultation)))
}

#[axum::debug_handler]
pub async fn update_consultation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
    Json(request): Json<UpdateConsultationRequest>,
) -> Result<Json<Value>, AppError> {
    let role = user.clinic_role()?;
    let user_id = user.user_id()?;
    if !role.can(Capability::RecordConsultation) && role != Role::Admin {
        return Err(AppError::Forbidden("Not authorized to edit consultations".to_string()));
    }

    let service = ConsultationService::new(&config);
    let consultation = service
        .update_consultation(role, user_id, consultation_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation,
    })))
}

// ==============================================================================
// PRESCRIPTION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
    Json(request): Json<CreatePrescriptionRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::WritePrescription)?;

    let service = PrescriptionService::new(&config);
    let prescription = service.create_prescription(consultation_id, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "prescription": prescription,
    })))
}

#[axum::debug_handler]
pub async fn list_consultation_prescriptions(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = PrescriptionService::new(&config);
    let prescriptions = service
        .list_for_consultation(&scope, consultation_id, auth.token())
        .await?;

    Ok(Json(json!({
        "prescriptions": prescriptions,
        "total": prescriptions.len(),
    })))
}

#[axum::debug_handler]
pub async fn list_active_prescriptions(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ViewAllRecords)?;

    let service = PrescriptionService::new(&config);
    let prescriptions = service.list_active(auth.token()).await?;

    Ok(Json(json!({
        "prescriptions": prescriptions,
        "total": prescriptions.len(),
    })))
}

#[axum::debug_handler]
pub async fn dispense_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::DispensePrescription)?;

    let service = PrescriptionService::new(&config);
    let prescription = service.dispense(prescription_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "prescription": prescription,
    })))
}

#[axum::debug_handler]
pub async fn delete_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::WritePrescription)?;

    let service = PrescriptionService::new(&config);
    let prescription = service.delete_prescription(prescription_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "prescription": prescription,
        "message": "Prescription deleted",
    })))
}

// ==============================================================================
// TREATMENT CATALOG HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_treatments(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<TreatmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    if !user.clinic_role()?.can(Capability::ManageTreatmentCatalog) {
        query.include_inactive = None;
    }

    let treatments = treatment_catalog(&config).list_treatments(query, auth.token()).await?;

    Ok(Json(json!({
        "treatments": treatments,
        "total": treatments.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_treatment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(treatment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let treatment = treatment_catalog(&config).get_treatment(treatment_id, auth.token()).await?;
    Ok(Json(json!(treatment)))
}

#[axum::debug_handler]
pub async fn create_treatment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateTreatmentRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManageTreatmentCatalog)?;

    let treatment = treatment_catalog(&config).create_treatment(request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "treatment": treatment,
    })))
}

#[axum::debug_handler]
pub async fn update_treatment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(treatment_id): Path<Uuid>,
    Json(request): Json<UpdateTreatmentRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManageTreatmentCatalog)?;

    let treatment = treatment_catalog(&config)
        .update_treatment(treatment_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "treatment": treatment,
    })))
}

#[axum::debug_handler]
pub async fn delete_treatment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(treatment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::ManageTreatmentCatalog)?;

    let treatment = treatment_catalog(&config).delete_treatment(treatment_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "treatment": treatment,
        "message": "Treatment deleted",
    })))
}

// ==============================================================================
// CONSULTATION TREATMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn add_consultation_treatment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
    Json(request): Json<AddTreatmentRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::RecordConsultation)?;

    let service = ConsultationTreatmentService::new(&config);
    let treatment = service.add_treatment(consultation_id, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "treatment": treatment,
    })))
}

#[axum::debug_handler]
pub async fn list_consultation_treatments(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = ConsultationTreatmentService::new(&config);
    let treatments = service.list_for_consultation(&scope, consultation_id, auth.token()).await?;
    let total_cost_cents: i64 = treatments.iter().map(|t| t.cost_cents).sum();

    Ok(Json(json!({
        "treatments": treatments,
        "total": treatments.len(),
        "total_cost_cents": total_cost_cents,
    })))
}

#[axum::debug_handler]
pub async fn update_consultation_treatment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((consultation_id, row_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateConsultationTreatmentRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::RecordConsultation)?;

    let service = ConsultationTreatmentService::new(&config);
    let treatment = service
        .update_treatment(consultation_id, row_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "treatment": treatment,
    })))
}

#[axum::debug_handler]
pub async fn remove_consultation_treatment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((consultation_id, row_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::RecordConsultation)?;

    let service = ConsultationTreatmentService::new(&config);
    let treatment = service.remove_treatment(consultation_id, row_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "treatment": treatment,
        "message": "Treatment removed from consultation",
    })))
}

// ==============================================================================
// DIAGNOSTIC TEST HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn order_diagnostic_test(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
    Json(request): Json<OrderDiagnosticTestRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::RecordDiagnostics)?;

    let service = DiagnosticTestService::new(&config);
    let test = service.order_test(consultation_id, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "diagnostic_test": test,
    })))
}

#[axum::debug_handler]
pub async fn list_consultation_diagnostics(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = DiagnosticTestService::new(&config);
    let tests = service.list_for_consultation(&scope, consultation_id, auth.token()).await?;

    Ok(Json(json!({
        "diagnostic_tests": tests,
        "total": tests.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_diagnostic_test(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((consultation_id, test_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = DiagnosticTestService::new(&config);
    let test = service.get_test(&scope, consultation_id, test_id, auth.token()).await?;

    Ok(Json(json!(test)))
}

#[axum::debug_handler]
pub async fn update_diagnostic_test(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((consultation_id, test_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateDiagnosticTestRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::RecordDiagnostics)?;

    let service = DiagnosticTestService::new(&config);
    let test = service.update_test(consultation_id, test_id, request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "diagnostic_test": test,
    })))
}

#[axum::debug_handler]
pub async fn delete_diagnostic_test(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((consultation_id, test_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::RecordDiagnostics)?;

    let service = DiagnosticTestService::new(&config);
    let test = service.delete_test(consultation_id, test_id, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "diagnostic_test": test,
        "message": "Diagnostic test deleted",
    })))
}

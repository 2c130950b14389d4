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
use shared_models::role::Capability;

use crate::models::{CreateInvoiceRequest, InvoiceSearchQuery, RecordPaymentRequest};
use crate::services::InvoiceService;

async fn caller_scope(config: &AppConfig, user: &User, token: &str) -> Result<RecordScope, AppError> {
    let role = user.clinic_role()?;
    let user_id = user.user_id()?;
    let scopes = ScopeService::new(Arc::new(SupabaseClient::new(config)));
    Ok(scopes.resolve(role, user_id, token).await?)
}

#[axum::debug_handler]
pub async fn create_invoice(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<Json<Value>, AppError> {
    user.require(Capability::CreateInvoice)?;

    let service = InvoiceService::new(&config);
    let invoice = service.create_invoice(request, auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "invoice": invoice,
    })))
}

#[axum::debug_handler]
pub async fn list_invoices(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<InvoiceSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = InvoiceService::new(&config);
    let invoices = service.list_invoices(&scope, query, auth.token()).await?;

    let outstanding_cents: i64 = invoices.iter().map(|i| i.balance_cents).sum();
    Ok(Json(json!({
        "invoices": invoices,
        "total": invoices.len(),
        "outstanding_cents": outstanding_cents,
    })))
}

#[axum::debug_handler]
pub async fn get_invoice(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = InvoiceService::new(&config);
    let invoice = service.get_invoice(&scope, invoice_id, auth.token()).await?;

    Ok(Json(json!(invoice)))
}

/// Clients pay their own invoices; the scope hides everyone else's as 404.
#[axum::debug_handler]
pub async fn record_payment(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_any(&[Capability::RecordAnyPayment, Capability::PayOwnInvoice])?;
    let scope = caller_scope(&config, &user, auth.token()).await?;

    let service = InvoiceService::new(&config);
    let invoice = service
        .record_payment(&scope, invoice_id, request.amount_cents, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "invoice": invoice,
    })))
}

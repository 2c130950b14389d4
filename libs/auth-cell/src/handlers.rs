use std::sync::Arc;

use axum::{
    extract::{Extension, Json, State},
    http::HeaderMap,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::{ClinicUser, TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::extractor::bearer_token;
use shared_utils::jwt;

pub async fn validate_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = bearer_token(&headers)?;
    let user = jwt::validate_token(token, &config.supabase_jwt_secret).map_err(AppError::Auth)?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role: user.role,
    }))
}

/// Never fails on a bad token; reports `valid: false` instead.
pub async fn verify_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    debug!("Verifying token");

    let token = bearer_token(&headers)?;
    let valid = jwt::validate_token(token, &config.supabase_jwt_secret).is_ok();

    Ok(Json(json!({ "valid": valid })))
}

/// Identity of the caller, the clinic role the token carries and what that role may do.
#[axum::debug_handler]
pub async fn me(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = user.user_id()?;
    let role = user.clinic_role().ok();
    if role.is_none() {
        warn!("User {} has no recognised clinic role ({:?})", user_id, user.role);
    }

    let client = SupabaseClient::new(&config);
    let profile: Option<ClinicUser> = client
        .fetch_one("users", &format!("id=eq.{}", user_id), auth.token())
        .await
        .map_err(|e| AppError::ExternalService(e.to_string()))?;

    let display_name = profile.as_ref().map(ClinicUser::display_name);

    Ok(Json(json!({
        "user_id": user_id,
        "email": user.email,
        "role": role,
        "capabilities": role.map(|r| r.capabilities()).unwrap_or_default(),
        "profile": profile,
        "display_name": display_name,
    })))
}

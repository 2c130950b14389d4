use std::sync::Arc;

use axum::{middleware, routing::{get, post}, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{me, validate_token, verify_token};

/// `/validate` and `/verify` read the token themselves; `/me` sits behind the auth middleware.
pub fn auth_routes(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/me", get(me))
        .route_layer(middleware::from_fn_with_state(config.clone(), auth_middleware))
        .route("/validate", post(validate_token))
        .route("/verify", post(verify_token))
        .with_state(config)
}

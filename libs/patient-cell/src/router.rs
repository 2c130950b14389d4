use std::sync::Arc;
use axum::{middleware, routing::{get, post}, Router};
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

pub fn patient_routes(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(register_patient).get(list_patients))
        .route("/{patient_id}", get(get_patient).put(update_patient))
        .route("/{patient_id}/deactivate", post(deactivate_patient))
        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware))
        .with_state(config)
}

pub fn owner_routes(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(create_owner).get(list_owners))
        .route("/me", get(get_my_owner))
        .route("/{owner_id}", get(get_owner).put(update_owner))
        .layer(middleware::from_fn_with_state(config.clone(), auth_middleware))
        .with_state(config)
}

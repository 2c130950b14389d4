use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn vaccine_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::list_vaccines).post(handlers::create_vaccine))
        .route("/{vaccine_id}", get(handlers::get_vaccine).put(handlers::update_vaccine))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

pub fn vaccine_record_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::record_vaccination).get(handlers::list_vaccine_records))
        .route("/upcoming", get(handlers::upcoming_vaccinations))
        .route("/{record_id}", get(handlers::get_vaccine_record))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

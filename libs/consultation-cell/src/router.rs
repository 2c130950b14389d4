use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn consultation_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::record_consultation).get(handlers::list_consultations))
        .route("/{consultation_id}", get(handlers::get_consultation).put(handlers::update_consultation))
        .route(
            "/{consultation_id}/prescriptions",
            post(handlers::create_prescription).get(handlers::list_consultation_prescriptions),
        )
        .route(
            "/{consultation_id}/treatments",
            post(handlers::add_consultation_treatment).get(handlers::list_consultation_treatments),
        )
        .route(
            "/{consultation_id}/treatments/{row_id}",
            put(handlers::update_consultation_treatment).delete(handlers::remove_consultation_treatment),
        )
        .route(
            "/{consultation_id}/diagnostics",
            post(handlers::order_diagnostic_test).get(handlers::list_consultation_diagnostics),
        )
        .route(
            "/{consultation_id}/diagnostics/{test_id}",
            get(handlers::get_diagnostic_test)
                .put(handlers::update_diagnostic_test)
                .delete(handlers::delete_diagnostic_test),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

pub fn prescription_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/active", get(handlers::list_active_prescriptions))
        .route("/{prescription_id}", delete(handlers::delete_prescription))
        .route("/{prescription_id}/dispense", post(handlers::dispense_prescription))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

pub fn treatment_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::list_treatments).post(handlers::create_treatment))
        .route(
            "/{treatment_id}",
            get(handlers::get_treatment)
                .put(handlers::update_treatment)
                .delete(handlers::delete_treatment),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

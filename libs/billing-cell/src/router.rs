use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn invoice_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::create_invoice).get(handlers::list_invoices))
        .route("/{invoice_id}", get(handlers::get_invoice))
        .route("/{invoice_id}/payments", post(handlers::record_payment))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

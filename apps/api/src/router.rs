use std::sync::Arc;

use axum::{
    Json,
    Router,
    extract::State,
    routing::get,
};
use serde_json::{json, Value};

use appointment_cell::appointment_routes;
use auth_cell::auth_routes;
use billing_cell::invoice_routes;
use consultation_cell::{consultation_routes, prescription_routes, treatment_routes};
use patient_cell::{owner_routes, patient_routes};
use shared_config::AppConfig;
use vaccination_cell::{vaccine_record_routes, vaccine_routes};

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Veterinary clinic API is running!" }))
        .route("/health", get(health).with_state(state.clone()))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/owners", owner_routes(state.clone()))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/consultations", consultation_routes(state.clone()))
        .nest("/prescriptions", prescription_routes(state.clone()))
        .nest("/treatments", treatment_routes(state.clone()))
        .nest("/invoices", invoice_routes(state.clone()))
        .nest("/vaccines", vaccine_routes(state.clone()))
        .nest("/vaccine-records", vaccine_record_routes(state))
}

async fn health(State(config): State<Arc<AppConfig>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "configured": config.is_configured(),
    }))
}

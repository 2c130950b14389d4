use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{Authorization, authorization::Bearer};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consultation_cell::handlers::*;
use consultation_cell::models::*;
use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn user_with_role(role: &str) -> Extension<User> {
    Extension(User {
        id: Uuid::new_v4().to_string(),
        email: Some(format!("{}@example.com", role)),
        role: Some(role.to_string()),
        metadata: None,
        created_at: Some(Utc::now()),
    })
}

fn bearer() -> TypedHeader<Authorization<Bearer>> {
    TypedHeader(Authorization::bearer("test-token").unwrap())
}

async fn setup() -> (MockServer, Arc<AppConfig>) {
    let server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
    (server, config)
}

async fn with_consultation(server: &MockServer, consultation_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("id", format!("eq.{}", consultation_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_row(consultation_id, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
        ])))
        .mount(server)
        .await;
}

async fn with_treatment(server: &MockServer, treatment_id: Uuid, default_cost_cents: Option<i64>, is_active: bool) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/treatments"))
        .and(query_param("id", format!("eq.{}", treatment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::treatment_row(treatment_id, default_cost_cents, is_active)
        ])))
        .mount(server)
        .await;
}

fn give(treatment_id: Uuid, cost_cents: Option<i64>) -> AddTreatmentRequest {
    AddTreatmentRequest {
        treatment_id,
        details: Some("Both ears".to_string()),
        cost_cents,
        notes: None,
    }
}

#[tokio::test]
async fn test_treatment_cost_defaults_to_catalog_price() {
    let (server, config) = setup().await;
    let (consultation_id, treatment_id) = (Uuid::new_v4(), Uuid::new_v4());
    with_consultation(&server, consultation_id).await;
    with_treatment(&server, treatment_id, Some(3_500), true).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_treatments"))
        .and(body_partial_json(json!({ "treatment_id": treatment_id, "cost_cents": 3_500 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::consultation_treatment_row(Uuid::new_v4(), consultation_id, treatment_id, 3_500)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let Json(body) = add_consultation_treatment(
        State(config),
        bearer(),
        user_with_role("veterinarian"),
        Path(consultation_id),
        Json(give(treatment_id, None)),
    ).await.unwrap();

    assert_eq!(body["treatment"]["cost_cents"], json!(3_500));
    assert_eq!(body["treatment"]["treatment"]["name"], json!("Ear flush"));
}

#[tokio::test]
async fn test_retired_treatment_cannot_be_given() {
    let (server, config) = setup().await;
    let (consultation_id, treatment_id) = (Uuid::new_v4(), Uuid::new_v4());
    with_consultation(&server, consultation_id).await;
    with_treatment(&server, treatment_id, Some(3_500), false).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_treatments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let result = add_consultation_treatment(
        State(config),
        bearer(),
        user_with_role("veterinarian"),
        Path(consultation_id),
        Json(give(treatment_id, None)),
    ).await;

    assert_matches!(result, Err(AppError::ValidationError(ref fields)) => {
        assert!(fields.contains("treatment_id"));
    });
}

#[tokio::test]
async fn test_negative_treatment_cost_is_rejected() {
    let (server, config) = setup().await;
    let (consultation_id, treatment_id) = (Uuid::new_v4(), Uuid::new_v4());
    with_consultation(&server, consultation_id).await;
    with_treatment(&server, treatment_id, None, true).await;

    let result = add_consultation_treatment(
        State(config),
        bearer(),
        user_with_role("veterinarian"),
        Path(consultation_id),
        Json(give(treatment_id, Some(-100))),
    ).await;

    assert_matches!(result, Err(AppError::ValidationError(ref fields)) => {
        assert!(fields.contains("cost_cents"));
    });
}

#[tokio::test]
async fn test_staff_cannot_record_treatments() {
    let (_server, config) = setup().await;

    let result = add_consultation_treatment(
        State(config),
        bearer(),
        user_with_role("staff"),
        Path(Uuid::new_v4()),
        Json(give(Uuid::new_v4(), None)),
    ).await;

    assert_matches!(result, Err(AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_consultation_treatments_report_total_cost() {
    let (server, config) = setup().await;
    let consultation_id = Uuid::new_v4();
    with_consultation(&server, consultation_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultation_treatments"))
        .and(query_param("consultation_id", format!("eq.{}", consultation_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_treatment_row(Uuid::new_v4(), consultation_id, Uuid::new_v4(), 3_500),
            MockSupabaseResponses::consultation_treatment_row(Uuid::new_v4(), consultation_id, Uuid::new_v4(), 1_200),
        ])))
        .mount(&server)
        .await;

    let Json(body) = list_consultation_treatments(
        State(config),
        bearer(),
        user_with_role("staff"),
        Path(consultation_id),
    ).await.unwrap();

    assert_eq!(body["total"], json!(2));
    assert_eq!(body["total_cost_cents"], json!(4_700));
}

#[tokio::test]
async fn test_client_without_pets_cannot_see_consultation_treatments() {
    let (server, config) = setup().await;
    let consultation_id = Uuid::new_v4();
    with_consultation(&server, consultation_id).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/owners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/consultation_treatments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let result = list_consultation_treatments(
        State(config),
        bearer(),
        user_with_role("client"),
        Path(consultation_id),
    ).await;

    assert_matches!(result, Err(AppError::NotFound(_)));
}

#[tokio::test]
async fn test_used_treatment_cannot_be_deleted() {
    let (server, config) = setup().await;
    let treatment_id = Uuid::new_v4();

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/treatments"))
        .and(query_param("id", format!("eq.{}", treatment_id)))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::foreign_key_violation()))
        .expect(1)
        .mount(&server)
        .await;

    let result = delete_treatment(
        State(config),
        bearer(),
        user_with_role("admin"),
        Path(treatment_id),
    ).await;

    assert_matches!(result, Err(AppError::Conflict(_)));
}

#[tokio::test]
async fn test_client_catalog_hides_retired_treatments() {
    let (server, config) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/treatments"))
        .and(query_param("is_active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::treatment_row(Uuid::new_v4(), Some(3_500), true)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let Json(body) = list_treatments(
        State(config),
        bearer(),
        user_with_role("client"),
        Query(TreatmentSearchQuery { category: None, include_inactive: Some(true) }),
    ).await.unwrap();

    assert_eq!(body["total"], json!(1));
}

#[tokio::test]
async fn test_staff_cannot_change_treatment_catalog() {
    let (_server, config) = setup().await;

    let result = create_treatment(
        State(config),
        bearer(),
        user_with_role("staff"),
        Json(CreateTreatmentRequest {
            name: "Dental scaling".to_string(),
            description: None,
            category: Some("Dental".to_string()),
            default_cost_cents: Some(18_000),
        }),
    ).await;

    assert_matches!(result, Err(AppError::Forbidden(_)));
}

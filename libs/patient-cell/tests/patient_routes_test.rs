use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use patient_cell::router::{owner_routes, patient_routes};
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

struct TestApp {
    server: MockServer,
    config: TestConfig,
}

impl TestApp {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&server.uri());
        Self { server, config }
    }

    fn patients(&self) -> Router {
        patient_routes(self.config.to_arc())
    }

    fn owners(&self) -> Router {
        owner_routes(self.config.to_arc())
    }

    fn token(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.config.jwt_secret, None)
    }

    /// Mount the owner lookup and patient id listing that scope resolution performs for a client.
    async fn mount_client_scope(&self, client: &TestUser, owner_id: Uuid, patient_ids: &[Uuid]) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/owners"))
            .and(query_param("user_id", format!("eq.{}", client.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::owner_row(owner_id, Some(client.uuid()))
            ])))
            .mount(&self.server)
            .await;

        let rows: Vec<Value> = patient_ids.iter().map(|id| json!({ "id": id })).collect();
        Mock::given(method("GET"))
            .and(path("/rest/v1/patients"))
            .and(query_param("select", "id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(rows)))
            .mount(&self.server)
            .await;
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, json)
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let app = TestApp::start().await;

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(app.patients(), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_client_cannot_see_another_owners_patient() {
    let app = TestApp::start().await;
    let client = TestUser::client("dana@example.com");
    let own_patient = Uuid::new_v4();
    app.mount_client_scope(&client, Uuid::new_v4(), &[own_patient]).await;

    let foreign_patient = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", foreign_patient)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_row(foreign_patient, Uuid::new_v4(), true)
        ])))
        .expect(0)
        .mount(&app.server)
        .await;

    let (status, _) = send(
        app.patients(),
        get(&format!("/{}", foreign_patient), &app.token(&client)),
    ).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_client_can_read_own_patient() {
    let app = TestApp::start().await;
    let client = TestUser::client("dana@example.com");
    let owner_id = Uuid::new_v4();
    let own_patient = Uuid::new_v4();
    app.mount_client_scope(&client, owner_id, &[own_patient]).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", own_patient)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_row(own_patient, owner_id, true)
        ])))
        .mount(&app.server)
        .await;

    let (status, body) = send(
        app.patients(),
        get(&format!("/{}", own_patient), &app.token(&client)),
    ).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!(own_patient));
    assert_eq!(body["owner_id"], json!(owner_id));
}

#[tokio::test]
async fn test_staff_must_name_owner_when_registering_patient() {
    let app = TestApp::start().await;
    let staff = TestUser::staff("front.desk@clinic.test");

    let (status, body) = send(
        app.patients(),
        post_json("/", &app.token(&staff), json!({ "name": "Pepper", "species": "Cat" })),
    ).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["fields"]["owner_id"].is_array());
}

#[tokio::test]
async fn test_registering_patient_requires_name_and_species() {
    let app = TestApp::start().await;
    let staff = TestUser::staff("front.desk@clinic.test");

    let (status, body) = send(
        app.patients(),
        post_json(
            "/",
            &app.token(&staff),
            json!({ "owner_id": Uuid::new_v4(), "name": " ", "species": "" }),
        ),
    ).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["fields"]["name"].is_array());
    assert!(body["fields"]["species"].is_array());
}

#[tokio::test]
async fn test_client_registration_creates_owner_record_on_first_use() {
    let app = TestApp::start().await;
    let client = TestUser::client("sam@example.com");
    let owner_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/owners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&app.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/owners"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::owner_row(owner_id, Some(client.uuid()))
        ])))
        .expect(1)
        .mount(&app.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::patient_row(patient_id, owner_id, true)
        ])))
        .expect(1)
        .mount(&app.server)
        .await;

    let (status, body) = send(
        app.patients(),
        post_json("/", &app.token(&client), json!({ "name": "Biscuit", "species": "Dog" })),
    ).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["patient"]["owner_id"], json!(owner_id));
}

#[tokio::test]
async fn test_veterinarian_cannot_create_owner() {
    let app = TestApp::start().await;
    let vet = TestUser::veterinarian("vet@clinic.test");

    let (status, _) = send(
        app.owners(),
        post_json(
            "/",
            &app.token(&vet),
            json!({ "first_name": "Dana", "last_name": "Whitfield", "phone": "555-0101" }),
        ),
    ).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_client_without_owner_record_gets_not_found_for_me() {
    let app = TestApp::start().await;
    let client = TestUser::client("new@example.com");

    Mock::given(method("GET"))
        .and(path("/rest/v1/owners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&app.server)
        .await;

    let (status, _) = send(app.owners(), get("/me", &app.token(&client))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

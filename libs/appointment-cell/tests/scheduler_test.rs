use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, TimeZone, Utc};
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::handlers::*;
use appointment_cell::models::*;
use appointment_cell::AppointmentSchedulerService;
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::User;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn create_test_user_extension(role: &str, id: Uuid) -> Extension<User> {
    Extension(User {
        id: id.to_string(),
        email: Some(format!("{}@example.com", role)),
        role: Some(role.to_string()),
        metadata: None,
        created_at: Some(Utc::now()),
    })
}

fn create_auth_header(token: &str) -> TypedHeader<Authorization<Bearer>> {
    let auth = Authorization::bearer(token).unwrap();
    TypedHeader(auth)
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 3, hour, minute, 0).unwrap()
}

struct Clinic {
    server: MockServer,
    config: Arc<AppConfig>,
    patient_id: Uuid,
    owner_id: Uuid,
    vet_id: Uuid,
}

impl Clinic {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
        Self {
            server,
            config,
            patient_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            vet_id: Uuid::new_v4(),
        }
    }

    async fn with_active_patient_and_vet(self, vet_role: &str) -> Self {
        Mock::given(method("GET"))
            .and(path("/rest/v1/patients"))
            .and(query_param("id", format!("eq.{}", self.patient_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::patient_row(self.patient_id, self.owner_id, true)
            ])))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .and(query_param("id", format!("eq.{}", self.vet_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::clinic_user_row(self.vet_id, vet_role)
            ])))
            .mount(&self.server)
            .await;

        self
    }

    /// Rows returned for the vet's booked-range query.
    async fn with_vet_bookings(&self, rows: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("vet_id", format!("eq.{}", self.vet_id)))
            .and(query_param("status", "neq.cancelled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(rows)))
            .mount(&self.server)
            .await;
    }

    async fn expect_insert(&self, start: DateTime<Utc>, times: u64) {
        Mock::given(method("POST"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                MockSupabaseResponses::appointment_row(
                    Uuid::new_v4(), self.patient_id, self.vet_id, start, 30, "scheduled"
                )
            ])))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    async fn with_appointment(&self, row: Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("id", format!("eq.{}", row["id"].as_str().unwrap())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
            .mount(&self.server)
            .await;
    }

    fn request(&self, start: DateTime<Utc>, duration: Option<i32>) -> ScheduleAppointmentRequest {
        ScheduleAppointmentRequest {
            patient_id: self.patient_id,
            vet_id: self.vet_id,
            appointment_date: start,
            duration_minutes: duration,
            reason: Some("Annual checkup".to_string()),
            notes: None,
        }
    }

    async fn schedule_as(
        &self,
        role: &str,
        request: ScheduleAppointmentRequest,
    ) -> Result<Json<Value>, AppointmentError> {
        schedule_appointment(
            State(self.config.clone()),
            create_auth_header("test-token"),
            create_test_user_extension(role, Uuid::new_v4()),
            Json(request),
        ).await
    }

    fn scheduler(&self) -> AppointmentSchedulerService {
        AppointmentSchedulerService::with_client(Arc::new(SupabaseClient::new(&self.config)), 30)
    }
}

// ==============================================================================
// OVERLAP DETECTION
// ==============================================================================

#[tokio::test]
async fn test_overlapping_booking_is_rejected_with_conflicts() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    let existing = Uuid::new_v4();
    clinic.with_vet_bookings(vec![
        MockSupabaseResponses::appointment_row(existing, Uuid::new_v4(), clinic.vet_id, at(9, 0), 30, "scheduled"),
    ]).await;
    clinic.expect_insert(at(9, 15), 0).await;

    let result = clinic.schedule_as("staff", clinic.request(at(9, 15), Some(30))).await;

    assert_matches!(result, Err(AppointmentError::ConflictDetected { ref conflicts }) => {
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, existing);
    });
}

#[tokio::test]
async fn test_conflict_check_hides_details_from_clients() {
    let clinic = Clinic::start().await;
    clinic.with_vet_bookings(vec![
        MockSupabaseResponses::appointment_row(Uuid::new_v4(), Uuid::new_v4(), clinic.vet_id, at(9, 0), 30, "scheduled"),
    ]).await;

    let check_query = || ConflictCheckQuery {
        vet_id: clinic.vet_id,
        start_time: at(9, 15),
        duration_minutes: Some(30),
        exclude_appointment_id: None,
    };

    let Json(staff_view) = check_appointment_conflicts(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Query(check_query()),
    ).await.unwrap();
    assert_eq!(staff_view["has_conflict"], json!(true));
    assert_eq!(staff_view["conflicting_appointments"].as_array().unwrap().len(), 1);

    let Json(client_view) = check_appointment_conflicts(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("client", Uuid::new_v4()),
        Query(check_query()),
    ).await.unwrap();
    assert_eq!(client_view["has_conflict"], json!(true));
    assert_eq!(client_view["conflicting_appointments"], json!([]));
}

#[tokio::test]
async fn test_back_to_back_booking_is_accepted() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    clinic.with_vet_bookings(vec![
        MockSupabaseResponses::appointment_row(Uuid::new_v4(), Uuid::new_v4(), clinic.vet_id, at(9, 0), 30, "scheduled"),
    ]).await;
    clinic.expect_insert(at(9, 30), 1).await;

    let Json(body) = clinic.schedule_as("staff", clinic.request(at(9, 30), Some(30))).await.unwrap();

    assert_eq!(body["success"], json!(true));
    assert_eq!(body["appointment"]["status"], json!("scheduled"));
}

#[tokio::test]
async fn test_cancelled_booking_frees_its_slot() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    clinic.with_vet_bookings(vec![
        MockSupabaseResponses::appointment_row(Uuid::new_v4(), Uuid::new_v4(), clinic.vet_id, at(10, 0), 30, "cancelled"),
    ]).await;
    clinic.expect_insert(at(10, 0), 1).await;

    let result = clinic.schedule_as("staff", clinic.request(at(10, 0), Some(30))).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_store_exclusion_violation_reports_overlap() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    clinic.with_vet_bookings(vec![]).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::exclusion_violation()))
        .expect(1)
        .mount(&clinic.server)
        .await;

    let result = clinic.schedule_as("veterinarian", clinic.request(at(11, 0), None)).await;
    assert_matches!(result, Err(AppointmentError::ConflictDetected { .. }));
}

#[tokio::test]
async fn test_overlap_is_reported_even_when_conflict_listing_fails() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("vet_id", format!("eq.{}", clinic.vet_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&clinic.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("vet_id", format!("eq.{}", clinic.vet_id)))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "upstream unavailable" })))
        .mount(&clinic.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::exclusion_violation()))
        .expect(1)
        .mount(&clinic.server)
        .await;

    let result = clinic.schedule_as("staff", clinic.request(at(11, 0), None)).await;

    assert_matches!(result, Err(AppointmentError::ConflictDetected { ref conflicts }) => {
        assert!(conflicts.is_empty());
    });
}

// ==============================================================================
// VALIDATION
// ==============================================================================

#[tokio::test]
async fn test_unknown_patient_and_vet_are_reported_together() {
    let clinic = Clinic::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&clinic.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&clinic.server)
        .await;
    clinic.expect_insert(at(9, 0), 0).await;

    let result = clinic.schedule_as("admin", clinic.request(at(9, 0), Some(30))).await;

    assert_matches!(result, Err(AppointmentError::Validation(ref fields)) => {
        assert!(fields.contains("patient_id"));
        assert!(fields.contains("vet_id"));
    });
}

#[tokio::test]
async fn test_vet_must_hold_veterinarian_role() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("staff").await;
    clinic.expect_insert(at(9, 0), 0).await;

    let result = clinic.schedule_as("staff", clinic.request(at(9, 0), Some(30))).await;

    assert_matches!(result, Err(AppointmentError::Validation(ref fields)) => {
        assert!(fields.contains("vet_id"));
        assert!(!fields.contains("patient_id"));
    });
}

#[tokio::test]
async fn test_legacy_vet_role_spelling_is_accepted() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("Vet").await;
    clinic.with_vet_bookings(vec![]).await;
    clinic.expect_insert(at(14, 0), 1).await;

    let result = clinic.schedule_as("staff", clinic.request(at(14, 0), Some(30))).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_duration_out_of_range_is_rejected() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    clinic.expect_insert(at(9, 0), 0).await;

    let result = clinic.schedule_as("staff", clinic.request(at(9, 0), Some(600))).await;

    assert_matches!(result, Err(AppointmentError::Validation(ref fields)) => {
        assert!(fields.contains("duration_minutes"));
    });
}

#[tokio::test]
async fn test_client_cannot_book_another_owners_patient() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    let client_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/owners"))
        .and(query_param("user_id", format!("eq.{}", client_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::owner_row(Uuid::new_v4(), Some(client_id))
        ])))
        .mount(&clinic.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("select", "id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .mount(&clinic.server)
        .await;
    clinic.expect_insert(at(9, 0), 0).await;

    let result = schedule_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("client", client_id),
        Json(clinic.request(at(9, 0), Some(30))),
    ).await;

    assert_matches!(result, Err(AppointmentError::Validation(ref fields)) => {
        assert!(fields.contains("patient_id"));
    });
}

#[tokio::test]
async fn test_client_gets_not_found_for_foreign_appointment() {
    let clinic = Clinic::start().await;
    let client_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/owners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::owner_row(Uuid::new_v4(), Some(client_id))
        ])))
        .mount(&clinic.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("select", "id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .mount(&clinic.server)
        .await;
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "scheduled",
    )).await;

    let result = get_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("client", client_id),
        Path(appointment_id),
    ).await;

    assert_matches!(result, Err(AppointmentError::NotFound));
}

// ==============================================================================
// LIFECYCLE
// ==============================================================================

#[tokio::test]
async fn test_cancel_scheduled_appointment() {
    let clinic = Clinic::start().await;
    let appointment_id = Uuid::new_v4();
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(10, 0), 30, "scheduled",
    )).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("updated_at", "eq.2024-01-01T00:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id, clinic.patient_id, clinic.vet_id, at(10, 0), 30, "cancelled"
            )
        ])))
        .expect(1)
        .mount(&clinic.server)
        .await;

    let Json(body) = cancel_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Path(appointment_id),
        Some(Json(CancelAppointmentRequest { reason: Some("Owner travelling".to_string()) })),
    ).await.unwrap();

    assert_eq!(body["appointment"]["status"], json!("cancelled"));
}

#[tokio::test]
async fn test_completed_appointment_cannot_be_cancelled() {
    let clinic = Clinic::start().await;
    let appointment_id = Uuid::new_v4();
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(10, 0), 30, "completed",
    )).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&clinic.server)
        .await;

    let result = cancel_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("admin", Uuid::new_v4()),
        Path(appointment_id),
        None,
    ).await;

    assert_matches!(result, Err(AppointmentError::NotModifiable(AppointmentStatus::Completed)));
}

#[tokio::test]
async fn test_reschedule_detects_concurrent_edit() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    let appointment_id = Uuid::new_v4();
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "confirmed",
    )).await;
    clinic.with_vet_bookings(vec![]).await;

    // Another writer bumped updated_at, so the guarded PATCH matches nothing.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&clinic.server)
        .await;

    let result = reschedule_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Path(appointment_id),
        Json(RescheduleAppointmentRequest { appointment_date: at(15, 0), vet_id: None }),
    ).await;

    assert_matches!(result, Err(AppointmentError::ConcurrentModification));
}

#[tokio::test]
async fn test_reschedule_may_overlap_its_own_old_slot() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    let appointment_id = Uuid::new_v4();
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "scheduled",
    )).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("vet_id", format!("eq.{}", clinic.vet_id)))
        .and(query_param("id", format!("neq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&clinic.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(body_partial_json(json!({ "appointment_date": at(9, 15).to_rfc3339() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id, clinic.patient_id, clinic.vet_id, at(9, 15), 30, "scheduled"
            )
        ])))
        .expect(1)
        .mount(&clinic.server)
        .await;

    let Json(body) = reschedule_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Path(appointment_id),
        Json(RescheduleAppointmentRequest { appointment_date: at(9, 15), vet_id: None }),
    ).await.unwrap();

    assert_eq!(body["success"], json!(true));
    assert_eq!(body["appointment"]["id"], json!(appointment_id));
}

#[tokio::test]
async fn test_reschedule_into_taken_slot_is_rejected() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    let (appointment_id, other_id) = (Uuid::new_v4(), Uuid::new_v4());
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "scheduled",
    )).await;
    clinic.with_vet_bookings(vec![
        MockSupabaseResponses::appointment_row(other_id, Uuid::new_v4(), clinic.vet_id, at(11, 0), 30, "confirmed"),
    ]).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&clinic.server)
        .await;

    let result = reschedule_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Path(appointment_id),
        Json(RescheduleAppointmentRequest { appointment_date: at(11, 15), vet_id: None }),
    ).await;

    assert_matches!(result, Err(AppointmentError::ConflictDetected { ref conflicts }) => {
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, other_id);
    });
}

#[tokio::test]
async fn test_edit_lengthening_into_next_booking_is_rejected() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    let (appointment_id, next_id) = (Uuid::new_v4(), Uuid::new_v4());
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "scheduled",
    )).await;
    clinic.with_vet_bookings(vec![
        MockSupabaseResponses::appointment_row(next_id, Uuid::new_v4(), clinic.vet_id, at(9, 45), 30, "scheduled"),
    ]).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&clinic.server)
        .await;

    let result = edit_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Path(appointment_id),
        Json(EditAppointmentRequest { duration_minutes: Some(60), ..Default::default() }),
    ).await;

    assert_matches!(result, Err(AppointmentError::ConflictDetected { ref conflicts }) => {
        assert_eq!(conflicts[0].id, next_id);
    });
}

#[tokio::test]
async fn test_edit_to_cancelled_skips_slot_check() {
    let clinic = Clinic::start().await.with_active_patient_and_vet("veterinarian").await;
    let appointment_id = Uuid::new_v4();
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "scheduled",
    )).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("vet_id", format!("eq.{}", clinic.vet_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&clinic.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "status": "cancelled", "duration_minutes": 60 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 60, "cancelled"
            )
        ])))
        .expect(1)
        .mount(&clinic.server)
        .await;

    let Json(body) = edit_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Path(appointment_id),
        Json(EditAppointmentRequest {
            duration_minutes: Some(60),
            status: Some(AppointmentStatus::Cancelled),
            ..Default::default()
        }),
    ).await.unwrap();

    assert_eq!(body["appointment"]["status"], json!("cancelled"));
}

#[tokio::test]
async fn test_edit_rejects_reopening_a_confirmed_appointment() {
    let clinic = Clinic::start().await;
    let appointment_id = Uuid::new_v4();
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "confirmed",
    )).await;

    let result = edit_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("veterinarian", Uuid::new_v4()),
        Path(appointment_id),
        Json(EditAppointmentRequest {
            status: Some(AppointmentStatus::Scheduled),
            ..Default::default()
        }),
    ).await;

    assert_matches!(result, Err(AppointmentError::Validation(ref fields)) => {
        assert!(fields.contains("status"));
    });
}

#[tokio::test]
async fn test_client_cannot_edit_appointments() {
    let clinic = Clinic::start().await;

    let result = edit_appointment(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("client", Uuid::new_v4()),
        Path(Uuid::new_v4()),
        Json(EditAppointmentRequest::default()),
    ).await;

    assert_matches!(result, Err(AppointmentError::Access(_)));
}

#[tokio::test]
async fn test_completion_happens_once() {
    let clinic = Clinic::start().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "in.(scheduled,confirmed)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(
                appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "completed"
            )
        ])))
        .up_to_n_times(1)
        .mount(&clinic.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&clinic.server)
        .await;
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "completed",
    )).await;

    let scheduler = clinic.scheduler();

    let first = scheduler.complete_for_consultation(appointment_id, "test-token").await.unwrap();
    assert!(first.transitioned());
    assert_eq!(first.appointment().status, AppointmentStatus::Completed);

    let second = scheduler.complete_for_consultation(appointment_id, "test-token").await.unwrap();
    assert_matches!(second, CompletionOutcome::AlreadyCompleted(_));
}

#[tokio::test]
async fn test_cancelled_appointment_cannot_be_completed() {
    let clinic = Clinic::start().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&clinic.server)
        .await;
    clinic.with_appointment(MockSupabaseResponses::appointment_row(
        appointment_id, clinic.patient_id, clinic.vet_id, at(9, 0), 30, "cancelled",
    )).await;

    let result = clinic.scheduler().complete_for_consultation(appointment_id, "test-token").await;
    assert_matches!(result, Err(AppointmentError::NotModifiable(AppointmentStatus::Cancelled)));
}

// ==============================================================================
// QUERIES
// ==============================================================================

#[tokio::test]
async fn test_calendar_events_for_clinic() {
    let clinic = Clinic::start().await;
    let mut row = MockSupabaseResponses::appointment_row(
        Uuid::new_v4(), clinic.patient_id, clinic.vet_id, at(9, 0), 30, "completed",
    );
    row["patient"] = json!({ "name": "Biscuit" });
    row["vet"] = json!({ "first_name": "Morgan", "last_name": "Reyes" });

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&clinic.server)
        .await;

    let Json(body) = get_calendar_events(
        State(clinic.config.clone()),
        create_auth_header("test-token"),
        create_test_user_extension("staff", Uuid::new_v4()),
        Query(CalendarQuery { start: at(0, 0), end: at(23, 0), vet_id: None }),
    ).await.unwrap();

    assert_eq!(body[0]["title"], json!("Biscuit - Annual checkup"));
    assert_eq!(body[0]["color"], json!("#28a745"));
}

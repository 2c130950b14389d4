use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    /// Config pointing the REST client at a mock server.
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            port: 3000,
            default_appointment_minutes: 30,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "client".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn veterinarian(email: &str) -> Self {
        Self::new(email, "veterinarian")
    }

    pub fn client(email: &str) -> Self {
        Self::new(email, "client")
    }

    pub fn staff(email: &str) -> Self {
        Self::new(email, "staff")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::parse_str(&self.id).expect("test user ids are uuids")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

/// Mints HS256 tokens shaped like the identity provider's: the clinic role
/// travels in `app_metadata`, the top-level `role` is always `authenticated`.
pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let issued = Utc::now();
        let expires = issued + Duration::hours(exp_hours.unwrap_or(24));

        let claims = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": issued.timestamp(),
            "exp": expires.timestamp()
        });

        Self::sign(&claims, secret)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }

    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        let encode = |value: &serde_json::Value| URL_SAFE_NO_PAD.encode(value.to_string());
        let unsigned = format!("{}.{}", encode(&json!({ "alg": "HS256", "typ": "JWT" })), encode(claims));

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(unsigned.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", unsigned, signature)
    }
}

/// Canned PostgREST rows shaped like the clinic tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn owner_row(owner_id: Uuid, user_id: Option<Uuid>) -> serde_json::Value {
        json!({
            "id": owner_id,
            "user_id": user_id,
            "first_name": "Dana",
            "last_name": "Whitfield",
            "address": "12 Harbour Road",
            "city": "Galway",
            "state": null,
            "zip_code": "H91 X2Y3",
            "phone": "+353 91 555 0101",
            "email": "dana@example.com",
            "emergency_contact": null,
            "emergency_phone": null,
            "notes": null,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn patient_row(patient_id: Uuid, owner_id: Uuid, is_active: bool) -> serde_json::Value {
        json!({
            "id": patient_id,
            "owner_id": owner_id,
            "name": "Biscuit",
            "species": "Dog",
            "breed": "Beagle",
            "date_of_birth": "2019-04-12",
            "gender": "Male",
            "color": "Tricolor",
            "microchip_id": "985112003456789",
            "allergies": null,
            "medical_notes": null,
            "is_active": is_active,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn clinic_user_row(user_id: Uuid, role: &str) -> serde_json::Value {
        json!({
            "id": user_id,
            "email": format!("{}@clinic.test", role),
            "first_name": "Morgan",
            "last_name": "Reyes",
            "role": role,
            "is_active": true
        })
    }

    pub fn appointment_row(
        appointment_id: Uuid,
        patient_id: Uuid,
        vet_id: Uuid,
        start: DateTime<Utc>,
        duration_minutes: i64,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "patient_id": patient_id,
            "vet_id": vet_id,
            "appointment_date": start.to_rfc3339(),
            "duration_minutes": duration_minutes,
            "scheduled_end": (start + Duration::minutes(duration_minutes)).to_rfc3339(),
            "reason": "Annual checkup",
            "notes": null,
            "status": status,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn consultation_row(
        consultation_id: Uuid,
        appointment_id: Uuid,
        patient_id: Uuid,
        vet_id: Uuid,
    ) -> serde_json::Value {
        json!({
            "id": consultation_id,
            "appointment_id": appointment_id,
            "vet_id": vet_id,
            "patient_id": patient_id,
            "consultation_date": "2024-06-03T09:10:00Z",
            "weight_kg": 11.4,
            "temperature_c": 38.6,
            "heart_rate": 96,
            "respiration_rate": 22,
            "diagnosis": "Mild otitis externa",
            "notes": null,
            "is_follow_up": false,
            "follow_up_date": null,
            "created_at": "2024-06-03T09:10:00Z"
        })
    }

    pub fn prescription_row(prescription_id: Uuid, consultation_id: Uuid, is_dispensed: bool) -> serde_json::Value {
        json!({
            "id": prescription_id,
            "consultation_id": consultation_id,
            "medication_name": "Otomax",
            "dosage": "4 drops",
            "frequency": "Twice daily",
            "duration": "7 days",
            "instructions": "Clean ear before application",
            "refills": 0,
            "is_dispensed": is_dispensed,
            "prescribed_date": "2024-06-03T09:30:00Z"
        })
    }

    pub fn invoice_row(
        invoice_id: Uuid,
        patient_id: Uuid,
        total_cents: i64,
        paid_cents: i64,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": invoice_id,
            "patient_id": patient_id,
            "appointment_id": null,
            "consultation_id": null,
            "total_cents": total_cents,
            "paid_cents": paid_cents,
            "balance_cents": total_cents - paid_cents,
            "status": status,
            "bill_date": "2024-06-03T10:00:00Z",
            "due_date": "2024-06-17",
            "notes": null,
            "updated_at": "2024-06-03T10:00:00Z"
        })
    }

    pub fn vaccine_row(vaccine_id: Uuid, duration_days: Option<i32>, is_active: bool) -> serde_json::Value {
        json!({
            "id": vaccine_id,
            "name": "Rabies",
            "description": "Core rabies vaccine",
            "species": "Dog",
            "recommended_schedule": "Annually",
            "duration_days": duration_days,
            "is_core": true,
            "is_active": is_active
        })
    }

    pub fn vaccine_record_row(
        record_id: Uuid,
        vaccine_id: Uuid,
        patient_id: Uuid,
        administered_by: Uuid,
        next_due_date: Option<&str>,
    ) -> serde_json::Value {
        json!({
            "id": record_id,
            "vaccine_id": vaccine_id,
            "patient_id": patient_id,
            "administered_by": administered_by,
            "date_given": "2024-06-03",
            "next_due_date": next_due_date,
            "lot_number": "RB-2291",
            "notes": null,
            "created_at": "2024-06-03T09:00:00Z"
        })
    }

    pub fn treatment_row(treatment_id: Uuid, default_cost_cents: Option<i64>, is_active: bool) -> serde_json::Value {
        json!({
            "id": treatment_id,
            "name": "Ear flush",
            "description": "Cleaning of the external ear canal",
            "category": "Procedure",
            "default_cost_cents": default_cost_cents,
            "is_active": is_active
        })
    }

    pub fn consultation_treatment_row(
        row_id: Uuid,
        consultation_id: Uuid,
        treatment_id: Uuid,
        cost_cents: i64,
    ) -> serde_json::Value {
        json!({
            "id": row_id,
            "consultation_id": consultation_id,
            "treatment_id": treatment_id,
            "details": "Both ears",
            "cost_cents": cost_cents,
            "notes": null,
            "created_at": "2024-06-03T09:20:00Z",
            "treatment": { "name": "Ear flush", "category": "Procedure" }
        })
    }

    pub fn diagnostic_test_row(test_id: Uuid, consultation_id: Uuid, status: &str) -> serde_json::Value {
        json!({
            "id": test_id,
            "consultation_id": consultation_id,
            "test_type": "Cytology",
            "test_name": "Ear swab cytology",
            "test_date": "2024-06-03",
            "results": if status == "completed" { json!("Malassezia present") } else { json!(null) },
            "notes": null,
            "status": status,
            "created_at": "2024-06-03T09:25:00Z"
        })
    }

    pub fn foreign_key_violation() -> serde_json::Value {
        json!({
            "code": "23503",
            "details": "Key is still referenced from another table.",
            "hint": null,
            "message": "update or delete violates foreign key constraint"
        })
    }

    pub fn exclusion_violation() -> serde_json::Value {
        json!({
            "code": "23P01",
            "details": "Key conflicts with existing key.",
            "hint": null,
            "message": "conflicting key value violates exclusion constraint \"appointments_vet_no_overlap\""
        })
    }
}

use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::auth::User;
use shared_models::error::FieldErrors;
use shared_models::role::{Capability, Role};

use crate::models::{
    CreatePatientRequest, Patient, PatientError, PatientSearchQuery, UpdatePatientRequest,
};
use crate::services::owner::OwnerService;
use crate::services::scope::{RecordScope, ScopeService};

pub struct PatientService {
    supabase: Arc<SupabaseClient>,
    owners: OwnerService,
    scopes: ScopeService,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)))
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            owners: OwnerService::new(Arc::clone(&supabase)),
            scopes: ScopeService::new(Arc::clone(&supabase)),
            supabase,
        }
    }

    pub fn owners(&self) -> &OwnerService {
        &self.owners
    }

    pub fn scopes(&self) -> &ScopeService {
        &self.scopes
    }

    pub async fn register_patient(
        &self,
        user: &User,
        role: Role,
        user_id: Uuid,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        validate_patient_fields(Some(&request.name), Some(&request.species))
            .map_err(PatientError::Validation)?;

        let owner_id = if role.can(Capability::ManagePatients) {
            let owner_id = request.owner_id.ok_or_else(|| {
                PatientError::Validation(FieldErrors::single("owner_id", "Owner is required"))
            })?;
            match self.owners.get_owner(owner_id, auth_token).await {
                Ok(owner) => owner.id,
                Err(PatientError::OwnerNotFound) => {
                    return Err(PatientError::Validation(FieldErrors::single(
                        "owner_id",
                        "Owner does not exist",
                    )));
                }
                Err(e) => return Err(e),
            }
        } else {
            self.owners.find_or_create_for_user(user, user_id, auth_token).await?.id
        };

        debug!("Registering patient {} for owner {}", request.name, owner_id);

        let now = Utc::now().to_rfc3339();
        let patient_data = json!({
            "owner_id": owner_id,
            "name": request.name.trim(),
            "species": request.species.trim(),
            "breed": request.breed,
            "date_of_birth": request.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
            "gender": request.gender,
            "color": request.color,
            "microchip_id": request.microchip_id,
            "allergies": request.allergies,
            "medical_notes": request.medical_notes,
            "is_active": true,
            "created_at": now,
            "updated_at": now,
        });

        let mut rows: Vec<Patient> = self.supabase
            .write_returning(Method::POST, "/rest/v1/patients", auth_token, patient_data)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    PatientError::Validation(FieldErrors::single(
                        "microchip_id",
                        "Microchip id is already registered",
                    ))
                } else {
                    PatientError::from(e)
                }
            })?;

        if rows.is_empty() {
            return Err(PatientError::DatabaseError("Failed to create patient".to_string()));
        }

        let patient = rows.swap_remove(0);
        info!("Patient {} registered for owner {}", patient.id, owner_id);
        Ok(patient)
    }

    /// Patient visible in `scope`. Patients outside the scope are reported as not found.
    pub async fn get_patient(
        &self,
        scope: &RecordScope,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        if !scope.allows_patient(patient_id) {
            return Err(PatientError::NotFound);
        }

        self.supabase
            .fetch_one("patients", &format!("id=eq.{}", patient_id), auth_token)
            .await?
            .ok_or(PatientError::NotFound)
    }

    pub async fn list_patients(
        &self,
        scope: &RecordScope,
        query: PatientSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        if scope.is_empty() {
            return Ok(vec![]);
        }

        let mut query_parts = Vec::new();
        match scope {
            RecordScope::Clinic => {
                if let Some(owner_id) = query.owner_id {
                    query_parts.push(format!("owner_id=eq.{}", owner_id));
                }
            }
            RecordScope::Owner { owner_id: Some(owner_id), .. } => {
                query_parts.push(format!("owner_id=eq.{}", owner_id));
            }
            RecordScope::Owner { owner_id: None, .. } => return Ok(vec![]),
        }

        if !query.include_inactive.unwrap_or(false) {
            query_parts.push("is_active=eq.true".to_string());
        }
        if let Some(species) = query.species.as_deref().filter(|s| !s.is_empty()) {
            query_parts.push(format!("species=ilike.{}", urlencoding::encode(species)));
        }
        if let Some(name) = query.name.as_deref().filter(|s| !s.is_empty()) {
            query_parts.push(format!("name=ilike.{}", urlencoding::encode(&format!("*{}*", name))));
        }
        query_parts.push("order=name.asc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset.max(0)));
        }

        let path = format!("/rest/v1/patients?{}", query_parts.join("&"));
        let patients: Vec<Patient> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(patients)
    }

    pub async fn update_patient(
        &self,
        scope: &RecordScope,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        validate_patient_fields(request.name.as_ref(), request.species.as_ref())
            .map_err(PatientError::Validation)?;

        let current = self.get_patient(scope, patient_id, auth_token).await?;

        let mut update_data = Map::new();
        let fields = [
            ("name", request.name),
            ("species", request.species),
            ("breed", request.breed),
            ("gender", request.gender),
            ("color", request.color),
            ("microchip_id", request.microchip_id),
            ("allergies", request.allergies),
            ("medical_notes", request.medical_notes),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                update_data.insert(key.to_string(), json!(value));
            }
        }
        if let Some(dob) = request.date_of_birth {
            update_data.insert("date_of_birth".to_string(), json!(dob.format("%Y-%m-%d").to_string()));
        }

        if update_data.is_empty() {
            return Ok(current);
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.patch_patient(patient_id, Value::Object(update_data), auth_token).await
    }

    /// Patients are never deleted; deactivation hides them from booking and default listings.
    pub async fn deactivate_patient(
        &self,
        scope: &RecordScope,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let current = self.get_patient(scope, patient_id, auth_token).await?;
        if !current.is_active {
            return Ok(current);
        }

        let patient = self.patch_patient(
            patient_id,
            json!({ "is_active": false, "updated_at": Utc::now().to_rfc3339() }),
            auth_token,
        ).await?;

        info!("Patient {} deactivated", patient_id);
        Ok(patient)
    }

    async fn patch_patient(
        &self,
        patient_id: Uuid,
        body: Value,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let mut rows: Vec<Patient> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, body)
            .await?;

        if rows.is_empty() {
            return Err(PatientError::NotFound);
        }
        Ok(rows.swap_remove(0))
    }
}

pub fn validate_patient_fields(
    name: Option<&String>,
    species: Option<&String>,
) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if name.is_some_and(|v| v.trim().is_empty()) {
        errors.add("name", "Pet name is required");
    }
    if species.is_some_and(|v| v.trim().is_empty()) {
        errors.add("species", "Species is required");
    }
    errors.into_result()
}

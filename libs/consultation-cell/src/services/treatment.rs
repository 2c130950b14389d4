use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use patient_cell::RecordScope;
use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    treatment_cost, validate_treatment_fields, AddTreatmentRequest, ConsultationError,
    ConsultationTreatment, CreateTreatmentRequest, Treatment, TreatmentSearchQuery,
    UpdateConsultationTreatmentRequest, UpdateTreatmentRequest,
};
use crate::services::consultation::ConsultationService;

const CONSULTATION_TREATMENT_SELECT: &str = "select=*,treatment:treatments(name,category)";

pub struct TreatmentCatalogService {
    supabase: Arc<SupabaseClient>,
}

impl TreatmentCatalogService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn list_treatments(
        &self,
        query: TreatmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Treatment>, ConsultationError> {
        let mut query_parts = Vec::new();
        if !query.include_inactive.unwrap_or(false) {
            query_parts.push("is_active=eq.true".to_string());
        }
        if let Some(category) = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            query_parts.push(format!("category=ilike.{}", urlencoding::encode(category)));
        }
        query_parts.push("order=name.asc".to_string());

        let path = format!("/rest/v1/treatments?{}", query_parts.join("&"));
        debug!("Listing treatments: {}", path);
        let treatments: Vec<Treatment> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(treatments)
    }

    pub async fn get_treatment(&self, treatment_id: Uuid, auth_token: &str) -> Result<Treatment, ConsultationError> {
        self.supabase
            .fetch_one("treatments", &format!("id=eq.{}", treatment_id), auth_token)
            .await?
            .ok_or(ConsultationError::TreatmentNotFound)
    }

    pub async fn create_treatment(
        &self,
        request: CreateTreatmentRequest,
        auth_token: &str,
    ) -> Result<Treatment, ConsultationError> {
        validate_treatment_fields(Some(request.name.as_str()), request.default_cost_cents)
            .map_err(ConsultationError::Validation)?;

        let treatment_data = json!({
            "name": request.name.trim(),
            "description": request.description,
            "category": request.category,
            "default_cost_cents": request.default_cost_cents,
            "is_active": true,
        });

        let mut rows: Vec<Treatment> = self.supabase
            .write_returning(Method::POST, "/rest/v1/treatments", auth_token, treatment_data)
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::DatabaseError("Failed to create treatment".to_string()));
        }

        let treatment = rows.swap_remove(0);
        info!("Treatment {} ({}) added to catalog", treatment.id, treatment.name);
        Ok(treatment)
    }

    pub async fn update_treatment(
        &self,
        treatment_id: Uuid,
        request: UpdateTreatmentRequest,
        auth_token: &str,
    ) -> Result<Treatment, ConsultationError> {
        validate_treatment_fields(request.name.as_deref(), request.default_cost_cents)
            .map_err(ConsultationError::Validation)?;

        let mut update = Map::new();
        if let Some(name) = request.name {
            update.insert("name".to_string(), json!(name.trim()));
        }
        if let Some(description) = request.description {
            update.insert("description".to_string(), json!(description));
        }
        if let Some(category) = request.category {
            update.insert("category".to_string(), json!(category));
        }
        if let Some(cost) = request.default_cost_cents {
            update.insert("default_cost_cents".to_string(), json!(cost));
        }
        if let Some(is_active) = request.is_active {
            update.insert("is_active".to_string(), json!(is_active));
        }

        if update.is_empty() {
            return self.get_treatment(treatment_id, auth_token).await;
        }

        let path = format!("/rest/v1/treatments?id=eq.{}", treatment_id);
        let mut rows: Vec<Treatment> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, Value::Object(update))
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::TreatmentNotFound);
        }

        info!("Treatment {} updated", treatment_id);
        Ok(rows.swap_remove(0))
    }

    /// Removes a catalog entry nobody has used yet. Used entries must be deactivated.
    pub async fn delete_treatment(&self, treatment_id: Uuid, auth_token: &str) -> Result<Treatment, ConsultationError> {
        let path = format!("/rest/v1/treatments?id=eq.{}", treatment_id);
        let mut rows: Vec<Treatment> = match self.supabase.delete_returning(&path, auth_token).await {
            Ok(rows) => rows,
            Err(e) if e.is_foreign_key_violation() => {
                warn!("Treatment {} is referenced by consultations", treatment_id);
                return Err(ConsultationError::TreatmentInUse);
            }
            Err(e) => return Err(e.into()),
        };
        if rows.is_empty() {
            return Err(ConsultationError::TreatmentNotFound);
        }

        info!("Treatment {} removed from catalog", treatment_id);
        Ok(rows.swap_remove(0))
    }
}

pub struct ConsultationTreatmentService {
    supabase: Arc<SupabaseClient>,
    catalog: TreatmentCatalogService,
    consultations: ConsultationService,
}

impl ConsultationTreatmentService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            catalog: TreatmentCatalogService::new(Arc::clone(&supabase)),
            consultations: ConsultationService::new(config),
            supabase,
        }
    }

    pub async fn add_treatment(
        &self,
        consultation_id: Uuid,
        request: AddTreatmentRequest,
        auth_token: &str,
    ) -> Result<ConsultationTreatment, ConsultationError> {
        let consultation = self.consultations
            .get_consultation(&RecordScope::Clinic, consultation_id, auth_token)
            .await?;

        let treatment = match self.catalog.get_treatment(request.treatment_id, auth_token).await {
            Ok(treatment) if treatment.is_active => treatment,
            Ok(_) => {
                return Err(ConsultationError::invalid_field("treatment_id", "Treatment is no longer offered"));
            }
            Err(ConsultationError::TreatmentNotFound) => {
                return Err(ConsultationError::invalid_field("treatment_id", "Treatment not found"));
            }
            Err(e) => return Err(e),
        };
        let cost_cents = treatment_cost(request.cost_cents, &treatment).map_err(ConsultationError::Validation)?;

        let row = json!({
            "consultation_id": consultation.id,
            "treatment_id": treatment.id,
            "details": request.details,
            "cost_cents": cost_cents,
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
        });

        let path = format!("/rest/v1/consultation_treatments?{}", CONSULTATION_TREATMENT_SELECT);
        let mut rows: Vec<ConsultationTreatment> = self.supabase
            .write_returning(Method::POST, &path, auth_token, row)
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::DatabaseError("Failed to add treatment".to_string()));
        }

        let added = rows.swap_remove(0);
        info!("Treatment {} given in consultation {} ({} cents)", treatment.id, consultation.id, cost_cents);
        Ok(added)
    }

    pub async fn list_for_consultation(
        &self,
        scope: &RecordScope,
        consultation_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<ConsultationTreatment>, ConsultationError> {
        self.consultations.get_consultation(scope, consultation_id, auth_token).await?;

        let path = format!(
            "/rest/v1/consultation_treatments?consultation_id=eq.{}&{}&order=created_at.asc",
            consultation_id, CONSULTATION_TREATMENT_SELECT
        );
        let treatments: Vec<ConsultationTreatment> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(treatments)
    }

    pub async fn update_treatment(
        &self,
        consultation_id: Uuid,
        row_id: Uuid,
        request: UpdateConsultationTreatmentRequest,
        auth_token: &str,
    ) -> Result<ConsultationTreatment, ConsultationError> {
        request.validate().map_err(ConsultationError::Validation)?;

        let mut update = Map::new();
        if let Some(details) = request.details {
            update.insert("details".to_string(), json!(details));
        }
        if let Some(cost) = request.cost_cents {
            update.insert("cost_cents".to_string(), json!(cost));
        }
        if let Some(notes) = request.notes {
            update.insert("notes".to_string(), json!(notes));
        }

        let filter = format!("id=eq.{}&consultation_id=eq.{}", row_id, consultation_id);
        if update.is_empty() {
            return self.supabase
                .fetch_one("consultation_treatments", &format!("{}&{}", filter, CONSULTATION_TREATMENT_SELECT), auth_token)
                .await?
                .ok_or(ConsultationError::ConsultationTreatmentNotFound);
        }

        let path = format!("/rest/v1/consultation_treatments?{}&{}", filter, CONSULTATION_TREATMENT_SELECT);
        let mut rows: Vec<ConsultationTreatment> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, Value::Object(update))
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::ConsultationTreatmentNotFound);
        }

        info!("Consultation treatment {} updated", row_id);
        Ok(rows.swap_remove(0))
    }

    pub async fn remove_treatment(
        &self,
        consultation_id: Uuid,
        row_id: Uuid,
        auth_token: &str,
    ) -> Result<ConsultationTreatment, ConsultationError> {
        let path = format!(
            "/rest/v1/consultation_treatments?id=eq.{}&consultation_id=eq.{}",
            row_id, consultation_id
        );
        let mut rows: Vec<ConsultationTreatment> = self.supabase.delete_returning(&path, auth_token).await?;
        if rows.is_empty() {
            return Err(ConsultationError::ConsultationTreatmentNotFound);
        }

        info!("Consultation treatment {} removed", row_id);
        Ok(rows.swap_remove(0))
    }
}

use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{
    validate_vaccine_fields, CreateVaccineRequest, UpdateVaccineRequest, VaccinationError, Vaccine,
    VaccineSearchQuery,
};

pub struct VaccineCatalogService {
    supabase: Arc<SupabaseClient>,
}

impl VaccineCatalogService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Active vaccines by default. A species filter also keeps vaccines
    /// that are not tied to any species.
    pub async fn list_vaccines(
        &self,
        query: VaccineSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Vaccine>, VaccinationError> {
        let mut query_parts = Vec::new();
        if !query.include_inactive.unwrap_or(false) {
            query_parts.push("is_active=eq.true".to_string());
        }
        if let Some(species) = query.species.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query_parts.push(format!(
                "or=(species.ilike.{},species.is.null)",
                urlencoding::encode(species)
            ));
        }
        query_parts.push("order=name.asc".to_string());

        let path = format!("/rest/v1/vaccines?{}", query_parts.join("&"));
        debug!("Listing vaccines: {}", path);
        let vaccines: Vec<Vaccine> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(vaccines)
    }

    pub async fn get_vaccine(&self, vaccine_id: Uuid, auth_token: &str) -> Result<Vaccine, VaccinationError> {
        self.supabase
            .fetch_one("vaccines", &format!("id=eq.{}", vaccine_id), auth_token)
            .await?
            .ok_or(VaccinationError::VaccineNotFound)
    }

    pub async fn create_vaccine(
        &self,
        request: CreateVaccineRequest,
        auth_token: &str,
    ) -> Result<Vaccine, VaccinationError> {
        validate_vaccine_fields(Some(request.name.as_str()), request.duration_days)
            .map_err(VaccinationError::Validation)?;

        let vaccine_data = json!({
            "name": request.name.trim(),
            "description": request.description,
            "species": request.species,
            "recommended_schedule": request.recommended_schedule,
            "duration_days": request.duration_days,
            "is_core": request.is_core.unwrap_or(false),
            "is_active": true,
        });

        let mut rows: Vec<Vaccine> = self.supabase
            .write_returning(Method::POST, "/rest/v1/vaccines", auth_token, vaccine_data)
            .await?;
        if rows.is_empty() {
            return Err(VaccinationError::DatabaseError("Failed to create vaccine".to_string()));
        }

        let vaccine = rows.swap_remove(0);
        info!("Vaccine {} ({}) added to catalog", vaccine.id, vaccine.name);
        Ok(vaccine)
    }

    pub async fn update_vaccine(
        &self,
        vaccine_id: Uuid,
        request: UpdateVaccineRequest,
        auth_token: &str,
    ) -> Result<Vaccine, VaccinationError> {
        validate_vaccine_fields(request.name.as_deref(), request.duration_days)
            .map_err(VaccinationError::Validation)?;

        let mut update = Map::new();
        if let Some(name) = request.name {
            update.insert("name".to_string(), json!(name.trim()));
        }
        if let Some(description) = request.description {
            update.insert("description".to_string(), json!(description));
        }
        if let Some(species) = request.species {
            update.insert("species".to_string(), json!(species));
        }
        if let Some(schedule) = request.recommended_schedule {
            update.insert("recommended_schedule".to_string(), json!(schedule));
        }
        if let Some(days) = request.duration_days {
            update.insert("duration_days".to_string(), json!(days));
        }
        if let Some(is_core) = request.is_core {
            update.insert("is_core".to_string(), json!(is_core));
        }
        if let Some(is_active) = request.is_active {
            update.insert("is_active".to_string(), json!(is_active));
        }

        if update.is_empty() {
            return self.get_vaccine(vaccine_id, auth_token).await;
        }

        let path = format!("/rest/v1/vaccines?id=eq.{}", vaccine_id);
        let mut rows: Vec<Vaccine> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, Value::Object(update))
            .await?;
        if rows.is_empty() {
            return Err(VaccinationError::VaccineNotFound);
        }

        info!("Vaccine {} updated", vaccine_id);
        Ok(rows.swap_remove(0))
    }
}

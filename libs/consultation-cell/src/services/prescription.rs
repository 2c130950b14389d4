use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use patient_cell::RecordScope;
use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{ConsultationError, CreatePrescriptionRequest, Prescription};
use crate::services::consultation::ConsultationService;

pub struct PrescriptionService {
    supabase: Arc<SupabaseClient>,
    consultations: ConsultationService,
}

impl PrescriptionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            consultations: ConsultationService::new(config),
        }
    }

    pub async fn create_prescription(
        &self,
        consultation_id: Uuid,
        request: CreatePrescriptionRequest,
        auth_token: &str,
    ) -> Result<Prescription, ConsultationError> {
        request.validate().map_err(ConsultationError::Validation)?;

        let consultation = self.consultations
            .get_consultation(&RecordScope::Clinic, consultation_id, auth_token)
            .await?;

        let prescription_data = json!({
            "consultation_id": consultation.id,
            "medication_name": request.medication_name.trim(),
            "dosage": request.dosage.trim(),
            "frequency": request.frequency.trim(),
            "duration": request.duration.trim(),
            "instructions": request.instructions,
            "refills": request.refills.unwrap_or(0),
            "is_dispensed": false,
            "prescribed_date": Utc::now().to_rfc3339(),
        });

        let mut rows: Vec<Prescription> = self.supabase
            .write_returning(Method::POST, "/rest/v1/prescriptions", auth_token, prescription_data)
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::DatabaseError("Failed to create prescription".to_string()));
        }

        let prescription = rows.swap_remove(0);
        info!("Prescription {} written for consultation {}", prescription.id, consultation_id);
        Ok(prescription)
    }

    pub async fn list_for_consultation(
        &self,
        scope: &RecordScope,
        consultation_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Prescription>, ConsultationError> {
        // Scope is enforced through the parent consultation.
        self.consultations.get_consultation(scope, consultation_id, auth_token).await?;

        let path = format!(
            "/rest/v1/prescriptions?consultation_id=eq.{}&order=prescribed_date.desc",
            consultation_id
        );
        let prescriptions: Vec<Prescription> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(prescriptions)
    }

    /// Prescriptions still waiting to be dispensed, oldest first.
    pub async fn list_active(&self, auth_token: &str) -> Result<Vec<Prescription>, ConsultationError> {
        let prescriptions: Vec<Prescription> = self.supabase.request(
            Method::GET,
            "/rest/v1/prescriptions?is_dispensed=eq.false&order=prescribed_date.asc",
            Some(auth_token),
            None,
        ).await?;

        Ok(prescriptions)
    }

    pub async fn dispense(
        &self,
        prescription_id: Uuid,
        auth_token: &str,
    ) -> Result<Prescription, ConsultationError> {
        let path = format!("/rest/v1/prescriptions?id=eq.{}&is_dispensed=eq.false", prescription_id);
        let mut rows: Vec<Prescription> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, json!({ "is_dispensed": true }))
            .await?;

        if rows.is_empty() {
            return Err(self.missing_or_dispensed(prescription_id, auth_token).await?);
        }

        info!("Prescription {} dispensed", prescription_id);
        Ok(rows.swap_remove(0))
    }

    /// Only undispensed prescriptions can be withdrawn.
    pub async fn delete_prescription(
        &self,
        prescription_id: Uuid,
        auth_token: &str,
    ) -> Result<Prescription, ConsultationError> {
        let path = format!("/rest/v1/prescriptions?id=eq.{}&is_dispensed=eq.false", prescription_id);
        let mut rows: Vec<Prescription> = self.supabase.delete_returning(&path, auth_token).await?;

        if rows.is_empty() {
            return Err(self.missing_or_dispensed(prescription_id, auth_token).await?);
        }

        info!("Prescription {} deleted", prescription_id);
        Ok(rows.swap_remove(0))
    }

    /// Explains why a write guarded by `is_dispensed=eq.false` touched nothing.
    async fn missing_or_dispensed(
        &self,
        prescription_id: Uuid,
        auth_token: &str,
    ) -> Result<ConsultationError, ConsultationError> {
        let existing: Option<Prescription> = self.supabase
            .fetch_one("prescriptions", &format!("id=eq.{}", prescription_id), auth_token)
            .await?;

        Ok(match existing {
            Some(p) if p.is_dispensed => {
                warn!("Prescription {} was already dispensed", prescription_id);
                ConsultationError::AlreadyDispensed
            }
            _ => ConsultationError::PrescriptionNotFound,
        })
    }
}

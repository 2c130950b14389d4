use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use appointment_cell::{AppointmentError, AppointmentSchedulerService, AppointmentStatus, CompletionOutcome};
use patient_cell::RecordScope;
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::role::Role;

use crate::models::{
    Consultation, ConsultationError, ConsultationSearchQuery, RecordConsultationRequest,
    UpdateConsultationRequest, Vitals,
};

pub struct ConsultationService {
    supabase: Arc<SupabaseClient>,
    scheduler: AppointmentSchedulerService,
}

impl ConsultationService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            scheduler: AppointmentSchedulerService::with_client(
                Arc::clone(&supabase),
                config.default_appointment_minutes,
            ),
            supabase,
        }
    }

    /// Records a consultation by `vet_id` and completes its appointment.
    /// Returns whether this consultation moved the appointment to Completed.
    pub async fn record_consultation(
        &self,
        vet_id: Uuid,
        request: RecordConsultationRequest,
        auth_token: &str,
    ) -> Result<(Consultation, bool), ConsultationError> {
        Vitals {
            weight_kg: request.weight_kg,
            temperature_c: request.temperature_c,
            heart_rate: request.heart_rate,
            respiration_rate: request.respiration_rate,
            diagnosis: Some(request.diagnosis.as_str()),
        }.validate().map_err(ConsultationError::Validation)?;

        let appointment = match self.scheduler
            .get_appointment(&RecordScope::Clinic, request.appointment_id, auth_token)
            .await
        {
            Ok(appointment) => appointment,
            Err(AppointmentError::NotFound) => {
                return Err(ConsultationError::invalid_field("appointment_id", "Appointment not found"));
            }
            Err(e) => return Err(e.into()),
        };

        if appointment.status == AppointmentStatus::Cancelled {
            warn!("Consultation refused for cancelled appointment {}", appointment.id);
            return Err(ConsultationError::invalid_field(
                "appointment_id",
                "Cannot record a consultation for a cancelled appointment",
            ));
        }

        let consultation_date = request.consultation_date.unwrap_or_else(Utc::now);
        if let Some(follow_up) = request.follow_up_date {
            if follow_up <= consultation_date.date_naive() {
                return Err(ConsultationError::invalid_field(
                    "follow_up_date",
                    "Follow-up date must be after the consultation date",
                ));
            }
        }

        debug!("Recording consultation for appointment {} by vet {}", appointment.id, vet_id);

        let consultation_data = json!({
            "appointment_id": appointment.id,
            "vet_id": vet_id,
            "patient_id": appointment.patient_id,
            "consultation_date": consultation_date.to_rfc3339(),
            "weight_kg": request.weight_kg,
            "temperature_c": request.temperature_c,
            "heart_rate": request.heart_rate,
            "respiration_rate": request.respiration_rate,
            "diagnosis": request.diagnosis.trim(),
            "notes": request.notes,
            "is_follow_up": request.is_follow_up.unwrap_or(false),
            "follow_up_date": request.follow_up_date.map(|d| d.format("%Y-%m-%d").to_string()),
            "created_at": Utc::now().to_rfc3339(),
        });

        let mut rows: Vec<Consultation> = self.supabase
            .write_returning(Method::POST, "/rest/v1/consultations", auth_token, consultation_data)
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::DatabaseError("Failed to create consultation".to_string()));
        }
        let consultation = rows.swap_remove(0);

        let outcome = match self.scheduler
            .complete_for_consultation(appointment.id, auth_token)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Completing appointment {} failed, removing consultation {}: {}",
                       appointment.id, consultation.id, e);
                let path = format!("/rest/v1/consultations?id=eq.{}", consultation.id);
                let _: Vec<Consultation> = self.supabase.delete_returning(&path, auth_token).await?;
                return Err(match e {
                    AppointmentError::NotModifiable(AppointmentStatus::Cancelled) => {
                        ConsultationError::invalid_field(
                            "appointment_id",
                            "Cannot record a consultation for a cancelled appointment",
                        )
                    }
                    e => e.into(),
                });
            }
        };
        let completed_now = matches!(outcome, CompletionOutcome::Completed(_));

        info!("Consultation {} recorded for appointment {} (completed now: {})",
              consultation.id, appointment.id, completed_now);
        Ok((consultation, completed_now))
    }

    pub async fn get_consultation(
        &self,
        scope: &RecordScope,
        consultation_id: Uuid,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        let consultation: Consultation = self.supabase
            .fetch_one("consultations", &format!("id=eq.{}", consultation_id), auth_token)
            .await?
            .ok_or(ConsultationError::NotFound)?;

        if !scope.allows_patient(consultation.patient_id) {
            return Err(ConsultationError::NotFound);
        }
        Ok(consultation)
    }

    pub async fn list_consultations(
        &self,
        scope: &RecordScope,
        role: Role,
        user_id: Uuid,
        query: ConsultationSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Consultation>, ConsultationError> {
        if scope.is_empty() {
            return Ok(vec![]);
        }

        let mut query_parts = Vec::new();
        match query.patient_id {
            Some(patient_id) if !scope.allows_patient(patient_id) => return Ok(vec![]),
            Some(patient_id) => query_parts.push(format!("patient_id=eq.{}", patient_id)),
            None => query_parts.extend(scope.patient_filter("patient_id")),
        }
        if role == Role::Veterinarian && !query.all.unwrap_or(false) {
            query_parts.push(format!("vet_id=eq.{}", user_id));
        }
        if let Some(appointment_id) = query.appointment_id {
            query_parts.push(format!("appointment_id=eq.{}", appointment_id));
        }
        query_parts.push("order=consultation_date.desc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset.max(0)));
        }

        let path = format!("/rest/v1/consultations?{}", query_parts.join("&"));
        let consultations: Vec<Consultation> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(consultations)
    }

    pub async fn update_consultation(
        &self,
        role: Role,
        user_id: Uuid,
        consultation_id: Uuid,
        request: UpdateConsultationRequest,
        auth_token: &str,
    ) -> Result<Consultation, ConsultationError> {
        let current = self.get_consultation(&RecordScope::Clinic, consultation_id, auth_token).await?;
        if role != Role::Admin && current.vet_id != user_id {
            warn!("User {} attempted to edit consultation {} recorded by {}",
                  user_id, consultation_id, current.vet_id);
            return Err(ConsultationError::NotRecordingVet);
        }

        Vitals {
            weight_kg: request.weight_kg,
            temperature_c: request.temperature_c,
            heart_rate: request.heart_rate,
            respiration_rate: request.respiration_rate,
            diagnosis: request.diagnosis.as_deref(),
        }.validate().map_err(ConsultationError::Validation)?;

        if let Some(follow_up) = request.follow_up_date {
            if follow_up <= current.consultation_date.date_naive() {
                return Err(ConsultationError::invalid_field(
                    "follow_up_date",
                    "Follow-up date must be after the consultation date",
                ));
            }
        }

        let mut update = Map::new();
        if let Some(weight) = request.weight_kg {
            update.insert("weight_kg".to_string(), json!(weight));
        }
        if let Some(temperature) = request.temperature_c {
            update.insert("temperature_c".to_string(), json!(temperature));
        }
        if let Some(heart_rate) = request.heart_rate {
            update.insert("heart_rate".to_string(), json!(heart_rate));
        }
        if let Some(respiration) = request.respiration_rate {
            update.insert("respiration_rate".to_string(), json!(respiration));
        }
        if let Some(diagnosis) = request.diagnosis {
            update.insert("diagnosis".to_string(), json!(diagnosis.trim()));
        }
        if let Some(notes) = request.notes {
            update.insert("notes".to_string(), json!(notes));
        }
        if let Some(is_follow_up) = request.is_follow_up {
            update.insert("is_follow_up".to_string(), json!(is_follow_up));
        }
        if let Some(follow_up) = request.follow_up_date {
            update.insert("follow_up_date".to_string(), json!(follow_up.format("%Y-%m-%d").to_string()));
        }

        if update.is_empty() {
            return Ok(current);
        }

        let path = format!("/rest/v1/consultations?id=eq.{}", consultation_id);
        let mut rows: Vec<Consultation> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, Value::Object(update))
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::NotFound);
        }

        info!("Consultation {} updated by {}", consultation_id, user_id);
        Ok(rows.swap_remove(0))
    }
}

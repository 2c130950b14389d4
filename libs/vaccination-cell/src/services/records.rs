use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use patient_cell::services::PatientService;
use patient_cell::{PatientError, RecordScope};
use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    next_due_date, RecordVaccinationRequest, VaccinationError, VaccineRecord, VaccineRecordQuery,
    DEFAULT_UPCOMING_DAYS, MAX_UPCOMING_DAYS,
};
use crate::services::catalog::VaccineCatalogService;

pub struct VaccinationRecordService {
    supabase: Arc<SupabaseClient>,
    catalog: VaccineCatalogService,
    patients: PatientService,
}

impl VaccinationRecordService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            catalog: VaccineCatalogService::new(Arc::clone(&supabase)),
            patients: PatientService::with_client(Arc::clone(&supabase)),
            supabase,
        }
    }

    pub fn catalog(&self) -> &VaccineCatalogService {
        &self.catalog
    }

    pub async fn record_vaccination(
        &self,
        administered_by: Uuid,
        request: RecordVaccinationRequest,
        auth_token: &str,
    ) -> Result<VaccineRecord, VaccinationError> {
        let patient = match self.patients
            .get_patient(&RecordScope::Clinic, request.patient_id, auth_token)
            .await
        {
            Ok(patient) => patient,
            Err(PatientError::NotFound) => {
                return Err(VaccinationError::invalid_field("patient_id", "Patient not found"));
            }
            Err(e) => return Err(e.into()),
        };
        if !patient.is_active {
            warn!("Vaccination refused for inactive patient {}", patient.id);
            return Err(VaccinationError::invalid_field("patient_id", "Patient is not active"));
        }

        let vaccine = match self.catalog.get_vaccine(request.vaccine_id, auth_token).await {
            Ok(vaccine) if vaccine.is_active => vaccine,
            Ok(_) => {
                return Err(VaccinationError::invalid_field("vaccine_id", "Vaccine is no longer offered"));
            }
            Err(VaccinationError::VaccineNotFound) => {
                return Err(VaccinationError::invalid_field("vaccine_id", "Vaccine not found"));
            }
            Err(e) => return Err(e),
        };

        let date_given = request.date_given.unwrap_or_else(|| Utc::now().date_naive());
        let next_due = next_due_date(date_given, request.next_due_date, vaccine.duration_days)
            .map_err(VaccinationError::Validation)?;

        let record_data = json!({
            "vaccine_id": vaccine.id,
            "patient_id": patient.id,
            "administered_by": administered_by,
            "date_given": day(date_given),
            "next_due_date": next_due.map(day),
            "lot_number": request.lot_number,
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
        });

        let mut rows: Vec<VaccineRecord> = self.supabase
            .write_returning(Method::POST, "/rest/v1/vaccine_records", auth_token, record_data)
            .await?;
        if rows.is_empty() {
            return Err(VaccinationError::DatabaseError("Failed to record vaccination".to_string()));
        }

        let record = rows.swap_remove(0);
        info!("{} given to patient {} (next due {:?})", vaccine.name, patient.id, record.next_due_date);
        Ok(record)
    }

    pub async fn get_record(
        &self,
        scope: &RecordScope,
        record_id: Uuid,
        auth_token: &str,
    ) -> Result<VaccineRecord, VaccinationError> {
        let record: VaccineRecord = self.supabase
            .fetch_one("vaccine_records", &format!("id=eq.{}", record_id), auth_token)
            .await?
            .ok_or(VaccinationError::RecordNotFound)?;

        if !scope.allows_patient(record.patient_id) {
            return Err(VaccinationError::RecordNotFound);
        }
        Ok(record)
    }

    pub async fn list_records(
        &self,
        scope: &RecordScope,
        query: VaccineRecordQuery,
        auth_token: &str,
    ) -> Result<Vec<VaccineRecord>, VaccinationError> {
        if scope.is_empty() {
            return Ok(vec![]);
        }

        let mut query_parts = Vec::new();
        match query.patient_id {
            Some(patient_id) if !scope.allows_patient(patient_id) => return Ok(vec![]),
            Some(patient_id) => query_parts.push(format!("patient_id=eq.{}", patient_id)),
            None => query_parts.extend(scope.patient_filter("patient_id")),
        }
        query_parts.push("order=date_given.desc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset.max(0)));
        }

        self.fetch_records(&query_parts, auth_token).await
    }

    /// Doses falling due between `today` and `today + days`, soonest first.
    pub async fn upcoming(
        &self,
        scope: &RecordScope,
        today: NaiveDate,
        days: Option<i64>,
        auth_token: &str,
    ) -> Result<Vec<VaccineRecord>, VaccinationError> {
        if scope.is_empty() {
            return Ok(vec![]);
        }

        let days = days.unwrap_or(DEFAULT_UPCOMING_DAYS);
        if !(1..=MAX_UPCOMING_DAYS).contains(&days) {
            return Err(VaccinationError::invalid_field(
                "days",
                format!("Window must be between 1 and {} days", MAX_UPCOMING_DAYS),
            ));
        }

        let mut query_parts = vec![
            format!("next_due_date=gte.{}", day(today)),
            format!("next_due_date=lte.{}", day(today + Duration::days(days))),
        ];
        query_parts.extend(scope.patient_filter("patient_id"));
        query_parts.push("order=next_due_date.asc".to_string());

        self.fetch_records(&query_parts, auth_token).await
    }

    async fn fetch_records(
        &self,
        query_parts: &[String],
        auth_token: &str,
    ) -> Result<Vec<VaccineRecord>, VaccinationError> {
        let path = format!("/rest/v1/vaccine_records?{}", query_parts.join("&"));
        debug!("Fetching vaccine records: {}", path);
        let records: Vec<VaccineRecord> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;
        Ok(records)
    }
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

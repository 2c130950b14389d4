use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use patient_cell::RecordScope;
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::error::AppError;

use crate::models::{
    ConsultationError, DiagnosticStatus, DiagnosticTest, OrderDiagnosticTestRequest,
    UpdateDiagnosticTestRequest,
};
use crate::services::consultation::ConsultationService;

/// Lab work and imaging ordered during a consultation. Results are stored as text.
pub struct DiagnosticTestService {
    supabase: Arc<SupabaseClient>,
    consultations: ConsultationService,
}

impl DiagnosticTestService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            consultations: ConsultationService::new(config),
        }
    }

    pub async fn order_test(
        &self,
        consultation_id: Uuid,
        request: OrderDiagnosticTestRequest,
        auth_token: &str,
    ) -> Result<DiagnosticTest, ConsultationError> {
        request.validate().map_err(ConsultationError::Validation)?;

        let consultation = self.consultations
            .get_consultation(&RecordScope::Clinic, consultation_id, auth_token)
            .await?;

        let test_date = request.test_date.unwrap_or_else(|| consultation.consultation_date.date_naive());
        let status = request.initial_status();
        let test_data = json!({
            "consultation_id": consultation.id,
            "test_type": request.test_type,
            "test_name": request.test_name.trim(),
            "test_date": test_date.format("%Y-%m-%d").to_string(),
            "results": request.results,
            "notes": request.notes,
            "status": status,
            "created_at": Utc::now().to_rfc3339(),
        });

        let mut rows: Vec<DiagnosticTest> = self.supabase
            .write_returning(Method::POST, "/rest/v1/diagnostic_tests", auth_token, test_data)
            .await?;
        if rows.is_empty() {
            return Err(ConsultationError::DatabaseError("Failed to order diagnostic test".to_string()));
        }

        let test = rows.swap_remove(0);
        info!("Diagnostic test {} ({}) ordered for consultation {}", test.id, status.as_str(), consultation.id);
        Ok(test)
    }

    pub async fn list_for_consultation(
        &self,
        scope: &RecordScope,
        consultation_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<DiagnosticTest>, ConsultationError> {
        self.consultations.get_consultation(scope, consultation_id, auth_token).await?;

        let path = format!(
            "/rest/v1/diagnostic_tests?consultation_id=eq.{}&order=test_date.desc",
            consultation_id
        );
        let tests: Vec<DiagnosticTest> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(tests)
    }

    pub async fn get_test(
        &self,
        scope: &RecordScope,
        consultation_id: Uuid,
        test_id: Uuid,
        auth_token: &str,
    ) -> Result<DiagnosticTest, ConsultationError> {
        self.consultations.get_consultation(scope, consultation_id, auth_token).await?;
        self.fetch_test(consultation_id, test_id, auth_token).await
    }

    /// Updates a test. Cancelled tests are closed and completed ones need results.
    pub async fn update_test(
        &self,
        consultation_id: Uuid,
        test_id: Uuid,
        request: UpdateDiagnosticTestRequest,
        auth_token: &str,
    ) -> Result<DiagnosticTest, ConsultationError> {
        let current = self.fetch_test(consultation_id, test_id, auth_token).await?;
        request.validate(&current).map_err(ConsultationError::Validation)?;

        let mut update = Map::new();
        if let Some(test_type) = request.test_type {
            update.insert("test_type".to_string(), json!(test_type));
        }
        if let Some(test_name) = request.test_name {
            update.insert("test_name".to_string(), json!(test_name.trim()));
        }
        if let Some(test_date) = request.test_date {
            update.insert("test_date".to_string(), json!(test_date.format("%Y-%m-%d").to_string()));
        }
        if let Some(results) = request.results {
            update.insert("results".to_string(), json!(results));
        }
        if let Some(notes) = request.notes {
            update.insert("notes".to_string(), json!(notes));
        }
        if let Some(status) = request.status.filter(|s| *s != current.status) {
            update.insert("status".to_string(), json!(status));
        }

        if update.is_empty() {
            return Ok(current);
        }

        // Matches only while the status is still the one validated above.
        let path = format!(
            "/rest/v1/diagnostic_tests?id=eq.{}&consultation_id=eq.{}&status=eq.{}",
            test_id, consultation_id, current.status.as_str()
        );
        let mut rows: Vec<DiagnosticTest> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, Value::Object(update))
            .await?;
        if rows.is_empty() {
            return Err(changed_underneath(test_id));
        }

        let test = rows.swap_remove(0);
        info!("Diagnostic test {} updated ({})", test_id, test.status.as_str());
        Ok(test)
    }

    /// Only tests that have not produced results can be withdrawn.
    pub async fn delete_test(
        &self,
        consultation_id: Uuid,
        test_id: Uuid,
        auth_token: &str,
    ) -> Result<DiagnosticTest, ConsultationError> {
        let current = self.fetch_test(consultation_id, test_id, auth_token).await?;
        if current.status == DiagnosticStatus::Completed {
            return Err(ConsultationError::invalid_field("status", "Completed tests cannot be deleted"));
        }

        let path = format!(
            "/rest/v1/diagnostic_tests?id=eq.{}&consultation_id=eq.{}&status=neq.completed",
            test_id, consultation_id
        );
        let mut rows: Vec<DiagnosticTest> = self.supabase.delete_returning(&path, auth_token).await?;
        if rows.is_empty() {
            return Err(changed_underneath(test_id));
        }

        info!("Diagnostic test {} deleted", test_id);
        Ok(rows.swap_remove(0))
    }

    async fn fetch_test(
        &self,
        consultation_id: Uuid,
        test_id: Uuid,
        auth_token: &str,
    ) -> Result<DiagnosticTest, ConsultationError> {
        self.supabase
            .fetch_one(
                "diagnostic_tests",
                &format!("id=eq.{}&consultation_id=eq.{}", test_id, consultation_id),
                auth_token,
            )
            .await?
            .ok_or(ConsultationError::DiagnosticTestNotFound)
    }
}

fn changed_underneath(test_id: Uuid) -> ConsultationError {
    ConsultationError::Access(AppError::Conflict(format!(
        "Diagnostic test {} was modified by another request",
        test_id
    )))
}

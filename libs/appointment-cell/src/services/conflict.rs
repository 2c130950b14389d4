use chrono::{DateTime, Utc};
use reqwest::Method;
use tracing::{debug, warn};
use uuid::Uuid;

use std::sync::Arc;
use shared_database::supabase::{filter_timestamp, SupabaseClient};

use crate::models::{Appointment, AppointmentError, ConflictCheckResponse};

/// Half-open interval intersection: `[start1, end1)` and `[start2, end2)` share at least one instant.
/// Back-to-back slots (one ends exactly when the other starts) do not overlap.
pub fn overlaps(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && end1 > start2
}

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Non-cancelled appointments of `vet_id` intersecting `[start_time, end_time)`.
    pub async fn find_conflicts(
        &self,
        vet_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Checking conflicts for vet {} from {} to {}", vet_id, start_time, end_time);

        let existing = self.get_vet_appointments_in_range(
            vet_id,
            start_time,
            end_time,
            exclude_appointment_id,
            auth_token,
        ).await?;

        let conflicts: Vec<Appointment> = existing.into_iter()
            .filter(|apt| Some(apt.id) != exclude_appointment_id)
            .filter(|apt| apt.blocks_slot())
            .filter(|apt| overlaps(start_time, end_time, apt.appointment_date, apt.end_time()))
            .collect();

        if !conflicts.is_empty() {
            warn!("Conflict detected for vet {} - {} conflicting appointments",
                  vet_id, conflicts.len());
        }

        Ok(conflicts)
    }

    pub async fn check_conflicts(
        &self,
        vet_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        let conflicting_appointments = self
            .find_conflicts(vet_id, start_time, end_time, exclude_appointment_id, auth_token)
            .await?;

        Ok(ConflictCheckResponse {
            has_conflict: !conflicting_appointments.is_empty(),
            conflicting_appointments,
        })
    }

    async fn get_vet_appointments_in_range(
        &self,
        vet_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("vet_id=eq.{}", vet_id),
            format!("appointment_date=lt.{}", filter_timestamp(end_time)),
            format!("scheduled_end=gt.{}", filter_timestamp(start_time)),
            "status=neq.cancelled".to_string(),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}&order=appointment_date.asc",
                          query_parts.join("&"));

        let appointments: Vec<Appointment> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(appointments)
    }
}

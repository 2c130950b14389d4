use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_database::supabase::in_list;
use shared_models::role::{Capability, Role};

use crate::models::{Owner, PatientError};

/// Rows a caller may see. Clinic roles see everything; clients only see
/// records of the patients their owner record holds.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordScope {
    Clinic,
    Owner {
        owner_id: Option<Uuid>,
        patient_ids: Vec<Uuid>,
    },
}

impl RecordScope {
    pub fn is_clinic(&self) -> bool {
        matches!(self, RecordScope::Clinic)
    }

    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            RecordScope::Clinic => None,
            RecordScope::Owner { owner_id, .. } => *owner_id,
        }
    }

    pub fn allows_patient(&self, patient_id: Uuid) -> bool {
        match self {
            RecordScope::Clinic => true,
            RecordScope::Owner { patient_ids, .. } => patient_ids.contains(&patient_id),
        }
    }

    /// True when an owner-scoped caller has no patients, so any scoped query is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RecordScope::Owner { patient_ids, .. } if patient_ids.is_empty())
    }

    /// PostgREST filter restricting `column` to the caller's patients, if any restriction applies.
    pub fn patient_filter(&self, column: &str) -> Option<String> {
        match self {
            RecordScope::Clinic => None,
            RecordScope::Owner { patient_ids, .. } => {
                Some(format!("{}={}", column, in_list(patient_ids)))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PatientIdRow {
    id: Uuid,
}

pub struct ScopeService {
    supabase: Arc<SupabaseClient>,
}

impl ScopeService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn resolve(
        &self,
        role: Role,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<RecordScope, PatientError> {
        if role.can(Capability::ViewAllRecords) {
            return Ok(RecordScope::Clinic);
        }

        let owner = self.find_owner_for_user(user_id, auth_token).await?;
        let Some(owner) = owner else {
            debug!("User {} has no owner record; scope is empty", user_id);
            return Ok(RecordScope::Owner { owner_id: None, patient_ids: vec![] });
        };

        let path = format!("/rest/v1/patients?owner_id=eq.{}&select=id", owner.id);
        let rows: Vec<PatientIdRow> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(RecordScope::Owner {
            owner_id: Some(owner.id),
            patient_ids: rows.into_iter().map(|r| r.id).collect(),
        })
    }

    pub async fn find_owner_for_user(
        &self,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Owner>, PatientError> {
        let owner = self.supabase
            .fetch_one("owners", &format!("user_id=eq.{}", user_id), auth_token)
            .await?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clinic_scope_allows_everything() {
        let scope = RecordScope::Clinic;
        assert!(scope.allows_patient(Uuid::new_v4()));
        assert!(scope.patient_filter("patient_id").is_none());
        assert!(!scope.is_empty());
    }

    #[test]
    fn test_owner_scope_limits_to_own_patients() {
        let mine = Uuid::new_v4();
        let scope = RecordScope::Owner { owner_id: Some(Uuid::new_v4()), patient_ids: vec![mine] };

        assert!(scope.allows_patient(mine));
        assert!(!scope.allows_patient(Uuid::new_v4()));
        assert_eq!(
            scope.patient_filter("patient_id").unwrap(),
            format!("patient_id=in.({})", mine)
        );
    }

    #[test]
    fn test_owner_without_record_is_empty() {
        let scope = RecordScope::Owner { owner_id: None, patient_ids: vec![] };
        assert!(scope.is_empty());
        assert!(scope.owner_id().is_none());
    }
}

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::SupabaseClient;
use shared_models::auth::User;
use shared_models::error::FieldErrors;

use crate::models::{CreateOwnerRequest, Owner, OwnerSearchQuery, PatientError, UpdateOwnerRequest};

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok()).as_ref()
}

pub struct OwnerService {
    supabase: Arc<SupabaseClient>,
}

impl OwnerService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn create_owner(
        &self,
        request: CreateOwnerRequest,
        auth_token: &str,
    ) -> Result<Owner, PatientError> {
        validate_owner_fields(
            Some(&request.first_name),
            Some(&request.last_name),
            Some(&request.phone),
            request.email.as_deref(),
        ).map_err(PatientError::Validation)?;

        if let Some(user_id) = request.user_id {
            let existing: Option<Owner> = self.supabase
                .fetch_one("owners", &format!("user_id=eq.{}", user_id), auth_token)
                .await?;
            if existing.is_some() {
                return Err(PatientError::OwnerAlreadyLinked);
            }
        }

        let owner_data = json!({
            "user_id": request.user_id,
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "address": request.address,
            "city": request.city,
            "state": request.state,
            "zip_code": request.zip_code,
            "phone": request.phone.trim(),
            "email": request.email,
            "emergency_contact": request.emergency_contact,
            "emergency_phone": request.emergency_phone,
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
        });

        let owner = self.insert(owner_data, auth_token).await?;
        info!("Owner {} created", owner.id);
        Ok(owner)
    }

    /// Owner record for a client account, created from the token identity on first use.
    pub async fn find_or_create_for_user(
        &self,
        user: &User,
        user_id: Uuid,
        auth_token: &str,
    ) -> Result<Owner, PatientError> {
        if let Some(owner) = self.supabase
            .fetch_one::<Owner>("owners", &format!("user_id=eq.{}", user_id), auth_token)
            .await?
        {
            return Ok(owner);
        }

        let metadata = user.metadata.as_ref();
        let meta_str = |key: &str| {
            metadata
                .and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let email_local = user.email.as_deref()
            .and_then(|e| e.split('@').next())
            .unwrap_or("Client")
            .to_string();

        debug!("Creating owner record for user {}", user_id);
        let owner_data = json!({
            "user_id": user_id,
            "first_name": meta_str("first_name").unwrap_or(email_local),
            "last_name": meta_str("last_name").unwrap_or_default(),
            "phone": meta_str("phone"),
            "email": user.email,
            "created_at": Utc::now().to_rfc3339(),
        });

        let owner = self.insert(owner_data, auth_token).await?;
        info!("Owner {} created for user {}", owner.id, user_id);
        Ok(owner)
    }

    pub async fn get_owner(&self, owner_id: Uuid, auth_token: &str) -> Result<Owner, PatientError> {
        self.supabase
            .fetch_one("owners", &format!("id=eq.{}", owner_id), auth_token)
            .await?
            .ok_or(PatientError::OwnerNotFound)
    }

    pub async fn search_owners(
        &self,
        query: OwnerSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Owner>, PatientError> {
        let mut query_parts = Vec::new();

        if let Some(name) = query.name.as_deref().filter(|n| !n.trim().is_empty()) {
            let pattern = urlencoding::encode(&format!("*{}*", name.trim())).into_owned();
            query_parts.push(format!(
                "or=(first_name.ilike.{},last_name.ilike.{})",
                pattern, pattern
            ));
        }
        query_parts.push("order=last_name.asc,first_name.asc".to_string());
        query_parts.push(format!("limit={}", query.limit.unwrap_or(50).clamp(1, 200)));
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset.max(0)));
        }

        let path = format!("/rest/v1/owners?{}", query_parts.join("&"));
        let owners: Vec<Owner> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(owners)
    }

    pub async fn update_owner(
        &self,
        owner_id: Uuid,
        request: UpdateOwnerRequest,
        auth_token: &str,
    ) -> Result<Owner, PatientError> {
        validate_owner_fields(
            request.first_name.as_ref(),
            request.last_name.as_ref(),
            request.phone.as_ref(),
            request.email.as_deref(),
        ).map_err(PatientError::Validation)?;

        let mut update_data = Map::new();
        let fields = [
            ("first_name", request.first_name),
            ("last_name", request.last_name),
            ("address", request.address),
            ("city", request.city),
            ("state", request.state),
            ("zip_code", request.zip_code),
            ("phone", request.phone),
            ("email", request.email),
            ("emergency_contact", request.emergency_contact),
            ("emergency_phone", request.emergency_phone),
            ("notes", request.notes),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                update_data.insert(key.to_string(), json!(value));
            }
        }

        if update_data.is_empty() {
            return self.get_owner(owner_id, auth_token).await;
        }

        let path = format!("/rest/v1/owners?id=eq.{}", owner_id);
        let mut rows: Vec<Owner> = self.supabase
            .write_returning(Method::PATCH, &path, auth_token, Value::Object(update_data))
            .await?;

        if rows.is_empty() {
            return Err(PatientError::OwnerNotFound);
        }
        Ok(rows.swap_remove(0))
    }

    async fn insert(&self, owner_data: Value, auth_token: &str) -> Result<Owner, PatientError> {
        let mut rows: Vec<Owner> = self.supabase
            .write_returning(Method::POST, "/rest/v1/owners", auth_token, owner_data)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    PatientError::OwnerAlreadyLinked
                } else {
                    PatientError::from(e)
                }
            })?;

        if rows.is_empty() {
            return Err(PatientError::DatabaseError("Failed to create owner record".to_string()));
        }
        Ok(rows.swap_remove(0))
    }
}

/// Checks supplied owner fields. `None` means "not being set" and is not an error.
pub fn validate_owner_fields(
    first_name: Option<&String>,
    last_name: Option<&String>,
    phone: Option<&String>,
    email: Option<&str>,
) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if first_name.is_some_and(|v| v.trim().is_empty()) {
        errors.add("first_name", "First name is required");
    }
    if last_name.is_some_and(|v| v.trim().is_empty()) {
        errors.add("last_name", "Last name is required");
    }
    if phone.is_some_and(|v| v.trim().is_empty()) {
        errors.add("phone", "Phone number is required");
    }
    if let Some(email) = email.filter(|e| !e.is_empty()) {
        if !email_pattern().is_some_and(|re| re.is_match(email)) {
            errors.add("email", "Email address is not valid");
        }
    }

    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_validation_reports_each_field() {
        let blank = String::from("  ");
        let errors = validate_owner_fields(Some(&blank), Some(&blank), Some(&blank), Some("nope"))
            .unwrap_err();

        for field in ["first_name", "last_name", "phone", "email"] {
            assert!(errors.contains(field), "missing error for {}", field);
        }
    }

    #[test]
    fn test_owner_validation_ignores_unset_fields() {
        assert!(validate_owner_fields(None, None, None, None).is_ok());
        assert!(validate_owner_fields(None, None, None, Some("dana@example.com")).is_ok());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::role::{Capability, Role};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

impl JwtClaims {
    /// Clinic role: `app_metadata.role` when the identity provider sets it, else the top-level claim.
    pub fn clinic_role(&self) -> Option<String> {
        self.app_metadata.as_ref()
            .and_then(|meta| meta.get("role"))
            .and_then(|role| role.as_str())
            .map(str::to_string)
            .or_else(|| self.role.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.id)
            .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))
    }

    pub fn clinic_role(&self) -> Result<Role, AppError> {
        let raw = self.role.as_deref()
            .ok_or_else(|| AppError::Forbidden("No clinic role assigned".to_string()))?;
        raw.parse::<Role>().map_err(|e| AppError::Forbidden(e.to_string()))
    }

    /// The caller's role, provided it grants `capability`.
    pub fn require(&self, capability: Capability) -> Result<Role, AppError> {
        let role = self.clinic_role()?;
        if role.can(capability) {
            Ok(role)
        } else {
            Err(AppError::Forbidden(format!(
                "Role {} is not permitted to perform this action", role
            )))
        }
    }

    /// The caller's role, provided it grants at least one of `capabilities`.
    pub fn require_any(&self, capabilities: &[Capability]) -> Result<Role, AppError> {
        let role = self.clinic_role()?;
        if capabilities.iter().any(|c| role.can(*c)) {
            Ok(role)
        } else {
            Err(AppError::Forbidden(format!(
                "Role {} is not permitted to perform this action", role
            )))
        }
    }
}

/// Row of the clinic `users` directory: staff accounts and client logins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
}

impl ClinicUser {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(name), None) | (None, Some(name)) => name.clone(),
            (None, None) => self.email.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

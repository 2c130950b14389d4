use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Postgres SQLSTATE raised by an exclusion constraint.
pub const EXCLUSION_VIOLATION: &str = "23P01";
/// Postgres SQLSTATE raised by a unique constraint.
pub const UNIQUE_VIOLATION: &str = "23505";
/// Postgres SQLSTATE raised by a foreign key constraint.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Constraint violation ({code}): {message}")]
    Constraint { code: String, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid header value: {0}")]
    Header(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl DbError {
    pub fn is_exclusion_violation(&self) -> bool {
        matches!(self, DbError::Constraint { code, .. } if code == EXCLUSION_VIOLATION)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::Constraint { code, .. } if code == UNIQUE_VIOLATION)
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, DbError::Constraint { code, .. } if code == FOREIGN_KEY_VIOLATION)
    }
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, DbError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key).map_err(|e| DbError::Header(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| DbError::Header(e.to_string()))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, DbError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, DbError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);
            return Err(classify_error(status.as_u16(), error_text));
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Insert or patch with `Prefer: return=representation`, returning the affected rows.
    pub async fn write_returning<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: &str,
        body: Value,
    ) -> Result<Vec<T>, DbError>
    where T: DeserializeOwned {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        self.request_with_headers(method, path, Some(auth_token), Some(body), Some(headers))
            .await
    }

    /// Delete matching rows, returning what was removed.
    pub async fn delete_returning<T>(&self, path: &str, auth_token: &str) -> Result<Vec<T>, DbError>
    where T: DeserializeOwned {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        self.request_with_headers(Method::DELETE, path, Some(auth_token), None, Some(headers))
            .await
    }

    /// Fetch at most one row matching `query` from `table`.
    pub async fn fetch_one<T>(
        &self,
        table: &str,
        query: &str,
        auth_token: &str,
    ) -> Result<Option<T>, DbError>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/{}?{}&limit=1", table, query);
        let mut rows: Vec<T> = self.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// Map a PostgREST error response onto `DbError`, keeping the SQLSTATE of constraint failures.
fn classify_error(status: u16, body: String) -> DbError {
    let parsed: Option<Value> = serde_json::from_str(&body).ok();
    let code = parsed.as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = parsed.as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.clone());

    match (status, code) {
        (401 | 403, _) => DbError::Auth(message),
        (404, _) => DbError::NotFound(message),
        (_, Some(code)) if code.starts_with("23") => DbError::Constraint { code, message },
        _ => DbError::Api { status, message },
    }
}

/// Format a timestamp for a PostgREST filter value. Uses `Z` so the value needs no escaping,
/// and keeps any sub-second part so range bounds compare exactly.
pub fn filter_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Render a PostgREST `in.(...)` list.
pub fn in_list<I, T>(values: I) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let joined = values.into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({})", joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::{MockServer, Mock, ResponseTemplate};
    use wiremock::matchers::{method, path, header};

    fn config_for(url: &str) -> AppConfig {
        AppConfig {
            supabase_url: url.to_string(),
            supabase_anon_key: "anon-key".to_string(),
            supabase_jwt_secret: "secret".to_string(),
            port: 3000,
            default_appointment_minutes: 30,
        }
    }

    #[test]
    fn test_classify_exclusion_violation() {
        let body = json!({
            "code": "23P01",
            "message": "conflicting key value violates exclusion constraint \"appointments_no_overlap\""
        }).to_string();

        let err = classify_error(409, body);
        assert!(err.is_exclusion_violation());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_classify_plain_errors() {
        assert_matches!(classify_error(401, "nope".to_string()), DbError::Auth(_));
        assert_matches!(classify_error(404, "{}".to_string()), DbError::NotFound(_));
        assert_matches!(
            classify_error(500, "boom".to_string()),
            DbError::Api { status: 500, .. }
        );
    }

    #[test]
    fn test_filter_helpers() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 9, 30, 0).unwrap();
        assert_eq!(filter_timestamp(ts), "2024-05-06T09:30:00Z");
        let fractional = ts + chrono::Duration::milliseconds(250);
        assert_eq!(filter_timestamp(fractional), "2024-05-06T09:30:00.250Z");
        assert_eq!(in_list(vec![1, 2, 3]), "in.(1,2,3)");
    }

    #[tokio::test]
    async fn test_request_sends_api_key_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/owners"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let rows: Vec<Value> = client
            .request(Method::GET, "/rest/v1/owners?select=*", Some("token-123"), None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_one_returns_none_for_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/patients"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let row: Option<Value> = client.fetch_one("patients", "id=eq.42", "token").await.unwrap();
        assert!(row.is_none());
    }
}

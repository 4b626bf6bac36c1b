//! HTTP profile store for a PostgREST-style REST endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::model::{NewProfile, ProfileRecord, ProfileUpdate};
use super::store::ProfileStore;
use crate::error::StoreError;
use crate::identity::Identity;

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Connection settings for the REST endpoint.
#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// Base URL, e.g. `https://project.example.co`.
    pub base_url: String,
    pub api_key: SecretString,
    /// Table holding one row per identity.
    pub table: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Supplies the signed-in user's access token, so row-level policies see
/// the user rather than the anonymous role.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Option<SecretString>;
}

/// PostgREST-backed [`ProfileStore`].
pub struct PostgrestProfileStore {
    client: reqwest::Client,
    config: PostgrestConfig,
    tokens: Option<Arc<dyn AccessTokenSource>>,
}

impl PostgrestProfileStore {
    pub fn new(config: PostgrestConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Transient {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
            tokens: None,
        })
    }

    /// Authorize requests with the user's token when one is available.
    /// Without a source (or without a session) the API key is the bearer.
    pub fn with_access_tokens(mut self, tokens: Arc<dyn AccessTokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.table
        )
    }

    async fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let user_token = match &self.tokens {
            Some(source) => source.access_token().await,
            None => None,
        };
        let key = self.config.api_key.expose_secret();
        let bearer = user_token
            .as_ref()
            .map_or(key, |token| token.expose_secret());
        self.client
            .request(method, url)
            .header("apikey", key)
            .bearer_auth(bearer)
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout {
                after: self.config.request_timeout,
            }
        } else {
            StoreError::Transient {
                reason: err.to_string(),
            }
        }
    }

    /// Read a `return=representation` body and take its single row.
    async fn single_row(
        &self,
        response: reqwest::Response,
        id: &Identity,
    ) -> Result<ProfileRecord, StoreError> {
        let response = check_status(response, id).await?;
        let rows: Vec<ProfileRecord> = response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }
}

/// Map a non-success response onto the store error taxonomy.
async fn check_status(
    response: reqwest::Response,
    id: &Identity,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<PostgrestError>(&body).ok();
    let code = parsed.as_ref().and_then(|e| e.code.as_deref());

    if status == StatusCode::CONFLICT || code == Some(UNIQUE_VIOLATION) {
        return Err(StoreError::Conflict { id: id.to_string() });
    }
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return Err(StoreError::Transient {
            reason: format!("{status}: {body}"),
        });
    }
    let reason = parsed
        .and_then(|e| e.message)
        .unwrap_or(body);
    Err(StoreError::Rejected {
        status: status.as_u16(),
        reason,
    })
}

#[async_trait]
impl ProfileStore for PostgrestProfileStore {
    async fn insert(&self, profile: &NewProfile) -> Result<ProfileRecord, StoreError> {
        debug!(identity = %profile.id, "Inserting profile row");
        let response = self
            .request(reqwest::Method::POST, self.table_url())
            .await
            .header("Prefer", "return=representation")
            .json(profile)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.single_row(response, &profile.id).await
    }

    async fn get_by_id(&self, id: &Identity) -> Result<ProfileRecord, StoreError> {
        let url = format!("{}?id=eq.{}&select=*", self.table_url(), id);
        let response = self
            .request(reqwest::Method::GET, url)
            .await
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.single_row(response, id).await
    }

    async fn update(
        &self,
        id: &Identity,
        changes: &ProfileUpdate,
    ) -> Result<ProfileRecord, StoreError> {
        let url = format!("{}?id=eq.{}", self.table_url(), id);
        let response = self
            .request(reqwest::Method::PATCH, url)
            .await
            .header("Prefer", "return=representation")
            .json(changes)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.single_row(response, id).await
    }
}

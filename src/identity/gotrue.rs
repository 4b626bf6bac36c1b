//! HTTP identity provider for a GoTrue-style auth server.
//!
//! The rest of the flow only sees [`Session`] values and change
//! notifications. The access token leaves this module only through
//! [`AccessTokenSource`], for the profile store's requests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Identity, Session, SessionChange, SessionEvent};
use super::provider::{IdentityProvider, Subscription, SubscriptionHub};
use crate::callback::CallbackLink;
use crate::error::ProviderError;
use crate::profile::{AccessTokenSource, Role};

/// Connection settings for the auth server.
#[derive(Debug, Clone)]
pub struct GoTrueConfig {
    /// Base URL, e.g. `https://project.example.co`.
    pub base_url: String,
    /// Public API key sent as the `apikey` header.
    pub api_key: SecretString,
    pub request_timeout: Duration,
}

struct Tokens {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
}

impl Tokens {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserResponse,
}

/// GoTrue-backed [`IdentityProvider`].
pub struct GoTrueProvider {
    client: reqwest::Client,
    config: GoTrueConfig,
    tokens: RwLock<Option<Tokens>>,
    session: RwLock<Option<Session>>,
    hub: SubscriptionHub,
}

impl GoTrueProvider {
    pub fn new(config: GoTrueConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
            tokens: RwLock::new(None),
            session: RwLock::new(None),
            hub: SubscriptionHub::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<UserResponse, ProviderError> {
        let response = self
            .client
            .get(self.endpoint("user"))
            .header("apikey", self.config.api_key.expose_secret())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = check_status(response).await?;
        response
            .json::<UserResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                reason: e.to_string(),
            })
    }

    async fn post_for_tokens(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<TokenResponse, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("apikey", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = check_status(response).await?;
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                reason: e.to_string(),
            })
    }

    /// Store tokens and session, then notify subscribers.
    async fn establish(
        &self,
        event: SessionEvent,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
        user: UserResponse,
    ) -> Session {
        let expires_at = expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        let session = session_from_user(user, expires_at);

        *self.tokens.write().await = Some(Tokens {
            access_token: SecretString::from(access_token),
            refresh_token: refresh_token.map(SecretString::from),
            expires_at,
        });
        *self.session.write().await = Some(session.clone());

        info!(identity = %session.identity, %event, "Session established");
        self.hub
            .emit(SessionChange::new(event, Some(session.clone())));
        session
    }

    async fn refresh(&self) -> Result<Option<Session>, ProviderError> {
        let refresh_token = self
            .tokens
            .read()
            .await
            .as_ref()
            .and_then(|t| t.refresh_token.as_ref())
            .map(|token| token.expose_secret().to_string());
        let Some(refresh_token) = refresh_token else {
            info!("Access token expired and cannot be refreshed, ending session");
            self.end_session().await;
            return Ok(None);
        };

        debug!("Access token expired, refreshing");
        let url = format!("{}?grant_type=refresh_token", self.endpoint("token"));
        let tokens = match self
            .post_for_tokens(url, serde_json::json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(tokens) => tokens,
            Err(ProviderError::Unauthorized) => {
                warn!("Refresh token rejected, ending session");
                self.end_session().await;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let session = self
            .establish(
                SessionEvent::TokenRefreshed,
                tokens.access_token,
                tokens.refresh_token,
                tokens.expires_in,
                tokens.user,
            )
            .await;
        Ok(Some(session))
    }

    /// Drop local tokens and session, then tell subscribers.
    async fn end_session(&self) {
        *self.tokens.write().await = None;
        *self.session.write().await = None;
        self.hub
            .emit(SessionChange::new(SessionEvent::SignedOut, None));
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                after: self.config.request_timeout,
            }
        } else {
            ProviderError::RequestFailed {
                reason: err.to_string(),
            }
        }
    }
}

fn session_from_user(user: UserResponse, expires_at: Option<DateTime<Utc>>) -> Session {
    let signup_role = user
        .user_metadata
        .get("role")
        .cloned()
        .and_then(|v| serde_json::from_value::<Role>(v).ok());
    Session {
        identity: Identity::new(user.id),
        email: user.email,
        signup_role,
        expires_at,
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(ProviderError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::RequestFailed {
                reason: format!("{status}: {body}"),
            })
        }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        let expired = self
            .tokens
            .read()
            .await
            .as_ref()
            .is_some_and(Tokens::is_expired);
        if expired {
            return self.refresh().await;
        }
        Ok(self.session.read().await.clone())
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn active_subscriptions(&self) -> usize {
        self.hub.active()
    }

    async fn resend_verification(&self, email: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.endpoint("resend"))
            .header("apikey", self.config.api_key.expose_secret())
            .json(&serde_json::json!({ "type": "signup", "email": email }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(response).await?;
        info!(email = %email, "Verification email resent");
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let token = self
            .tokens
            .write()
            .await
            .take()
            .map(|t| t.access_token.expose_secret().to_string());
        *self.session.write().await = None;

        if let Some(token) = token {
            let result = self
                .client
                .post(self.endpoint("logout"))
                .header("apikey", self.config.api_key.expose_secret())
                .bearer_auth(token)
                .send()
                .await;
            if let Err(e) = result {
                warn!("Server-side logout failed, local session cleared anyway: {e}");
            }
        }

        self.hub
            .emit(SessionChange::new(SessionEvent::SignedOut, None));
        Ok(())
    }

    async fn detect_session_in_url(&self, link: &CallbackLink) -> Result<bool, ProviderError> {
        if let Some(access_token) = link.access_token() {
            let user = self.fetch_user(access_token).await?;
            self.establish(
                SessionEvent::SignedIn,
                access_token.to_string(),
                link.refresh_token().map(str::to_string),
                link.expires_in(),
                user,
            )
            .await;
            return Ok(true);
        }

        if let Some(token_hash) = link.token_hash() {
            let body = serde_json::json!({
                "type": link.verification_type().unwrap_or("signup"),
                "token_hash": token_hash,
            });
            let tokens = self.post_for_tokens(self.endpoint("verify"), body).await?;
            self.establish(
                SessionEvent::SignedIn,
                tokens.access_token,
                tokens.refresh_token,
                tokens.expires_in,
                tokens.user,
            )
            .await;
            return Ok(true);
        }

        debug!("Verification link carries no credentials to exchange");
        Ok(false)
    }
}

#[async_trait]
impl AccessTokenSource for GoTrueProvider {
    async fn access_token(&self) -> Option<SecretString> {
        self.tokens
            .read()
            .await
            .as_ref()
            .filter(|t| !t.is_expired())
            .map(|t| t.access_token.clone())
    }
}

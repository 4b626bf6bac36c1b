//! Error types for the session/onboarding flow.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Profile store error: {0}")]
    Store(#[from] StoreError),

    #[error("Profile creation error: {0}")]
    Creation(#[from] CreationError),

    #[error("Verification link error: {0}")]
    Link(#[from] LinkError),

    #[error("No signed-in identity")]
    NotSignedIn,

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Identity provider request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Identity provider rejected the credentials")]
    Unauthorized,

    #[error("Identity provider rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid response from identity provider: {reason}")]
    InvalidResponse { reason: String },

    #[error("Identity provider did not answer within {after:?}")]
    Timeout { after: Duration },
}

/// Errors from the profile store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Uniqueness violation on the identity key.
    #[error("Profile {id} already exists")]
    Conflict { id: String },

    #[error("Profile {id} not found")]
    NotFound { id: String },

    #[error("Transient store failure: {reason}")]
    Transient { reason: String },

    #[error("Store did not answer within {after:?}")]
    Timeout { after: Duration },

    #[error("Store rejected the request ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure of the retry-protected profile creation path.
#[derive(Debug, thiserror::Error)]
pub enum CreationError {
    #[error("Profile creation gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: StoreError },
}

/// Problems carried by (or with) a verification link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Malformed verification link: {0}")]
    Malformed(String),

    #[error("Verification link has expired or was already used: {description}")]
    Expired { description: String },

    #[error("Verification link was rejected ({code}): {description}")]
    Denied { code: String, description: String },
}

/// The four error classes the flow distinguishes when deciding how to
/// surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network trouble or a timeout; retried, then surfaced as "try again".
    Transient,
    /// Uniqueness violation; resolved by re-fetching, never shown.
    Conflict,
    /// Expired or consumed verification link.
    LinkExpired,
    /// Anything else; escalates to the global fallback.
    Unexpected,
}

/// What the user can do about a surfaced failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    ResendVerification,
    Reload,
}

/// A user-visible, non-blocking message describing a recoverable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotice {
    pub kind: ErrorKind,
    pub message: String,
    pub action: RecoveryAction,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Transient { .. } | Self::Timeout { .. } => ErrorKind::Transient,
            // Everything the creation path retries is user-retryable too.
            Self::NotFound { .. } | Self::Rejected { .. } => ErrorKind::Transient,
            Self::Serialization(_) => ErrorKind::Unexpected,
        }
    }
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::Timeout { .. } => {
                ErrorKind::Transient
            }
            Self::Unauthorized => ErrorKind::LinkExpired,
            Self::InvalidResponse { .. } => ErrorKind::Unexpected,
        }
    }
}

impl Error {
    /// Classify this error for surfacing.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Creation(_) => ErrorKind::Transient,
            Self::Link(LinkError::Malformed(_)) => ErrorKind::Unexpected,
            Self::Link(_) => ErrorKind::LinkExpired,
            Self::NotSignedIn => ErrorKind::LinkExpired,
            Self::Config(_) | Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<&Error> for UserNotice {
    fn from(err: &Error) -> Self {
        let kind = err.kind();
        let (message, action) = match (err, kind) {
            (Error::NotSignedIn, _) => (
                "You're not signed in. Open your verification link again or request a new one."
                    .to_string(),
                RecoveryAction::ResendVerification,
            ),
            (_, ErrorKind::Transient | ErrorKind::Conflict) => (
                "We couldn't reach the server. Please retry.".to_string(),
                RecoveryAction::Retry,
            ),
            (_, ErrorKind::LinkExpired) => (
                "This verification link has expired or was already used. \
                 Request a new one."
                    .to_string(),
                RecoveryAction::ResendVerification,
            ),
            (_, ErrorKind::Unexpected) => (
                "Something went wrong. Reload the page to continue.".to_string(),
                RecoveryAction::Reload,
            ),
        };
        tracing::debug!(error = %err, ?kind, "Mapped error to user notice");
        Self {
            kind,
            message,
            action,
        }
    }
}

/// Result type alias for the flow.
pub type Result<T> = std::result::Result<T, Error>;

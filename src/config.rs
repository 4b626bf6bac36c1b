//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::profile::{RetryPolicy, Role};

/// Paths of the screens the flow routes between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub landing: String,
    /// Where verification links land.
    pub verify_callback: String,
    /// Profile-completion form.
    pub onboarding: String,
    /// Main application.
    pub app: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            landing: "/".to_string(),
            verify_callback: "/auth/callback".to_string(),
            onboarding: "/onboarding".to_string(),
            app: "/app".to_string(),
        }
    }
}

impl Routes {
    /// Routes reachable without a session. Never redirected to landing.
    pub fn is_public(&self, path: &str) -> bool {
        let path = strip_query(path);
        path == self.landing || path == self.verify_callback
    }

    pub fn is_onboarding(&self, path: &str) -> bool {
        strip_query(path) == self.onboarding
    }

    pub fn is_verify_callback(&self, path: &str) -> bool {
        strip_query(path) == self.verify_callback
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Who creates the profile row for a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileProvisioning {
    /// A server-side trigger normally creates it; wait `grace` before falling
    /// back to the client creation path.
    ServerTrigger { grace: Duration },
    /// The client creates it.
    Client,
}

/// Flow configuration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub routes: Routes,
    /// Interval between "get current session" polls on the callback route.
    pub session_poll_interval: Duration,
    /// Maximum number of session polls before timing out.
    pub session_poll_attempts: u32,
    /// How long the callback waits for the profile after the session shows up.
    pub profile_wait: Duration,
    /// Upper bound on any single provider or store call.
    pub request_timeout: Duration,
    pub creation_retry: RetryPolicy,
    pub provisioning: ProfileProvisioning,
    /// Role for rows the client creates when sign-up recorded none.
    pub default_role: Role,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            routes: Routes::default(),
            session_poll_interval: Duration::from_millis(500),
            session_poll_attempts: 20, // 10 seconds
            profile_wait: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            creation_retry: RetryPolicy::default(),
            provisioning: ProfileProvisioning::Client,
            default_role: Role::Applicant,
        }
    }
}

impl FlowConfig {
    /// Load from `ONBOARD_*` environment variables, defaulting anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let millis = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(raw) => parse_number::<u64>(key, &raw).map(Duration::from_millis),
                None => Ok(default),
            }
        };
        let count = |key: &str, default: u32| -> Result<u32, ConfigError> {
            match lookup(key) {
                Some(raw) => parse_number::<u32>(key, &raw),
                None => Ok(default),
            }
        };

        let creation_retry = RetryPolicy {
            max_attempts: count("ONBOARD_CREATE_ATTEMPTS", defaults.creation_retry.max_attempts)?,
            initial_delay: millis(
                "ONBOARD_CREATE_INITIAL_DELAY_MS",
                defaults.creation_retry.initial_delay,
            )?,
            max_delay: millis("ONBOARD_CREATE_MAX_DELAY_MS", defaults.creation_retry.max_delay)?,
        };

        let grace = millis("ONBOARD_TRIGGER_GRACE_MS", Duration::from_millis(500))?;
        let provisioning = match lookup("ONBOARD_PROVISIONING").as_deref().map(str::trim) {
            None | Some("client") => ProfileProvisioning::Client,
            Some("trigger") => ProfileProvisioning::ServerTrigger { grace },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ONBOARD_PROVISIONING".to_string(),
                    message: format!("expected 'trigger' or 'client', got '{other}'"),
                });
            }
        };

        let default_role = match lookup("ONBOARD_DEFAULT_ROLE") {
            Some(raw) => raw.parse::<Role>().map_err(|message| ConfigError::InvalidValue {
                key: "ONBOARD_DEFAULT_ROLE".to_string(),
                message,
            })?,
            None => defaults.default_role,
        };

        let config = Self {
            routes: defaults.routes,
            session_poll_interval: millis("ONBOARD_POLL_INTERVAL_MS", defaults.session_poll_interval)?,
            session_poll_attempts: count("ONBOARD_POLL_ATTEMPTS", defaults.session_poll_attempts)?,
            profile_wait: millis("ONBOARD_PROFILE_WAIT_MS", defaults.profile_wait)?,
            request_timeout: millis("ONBOARD_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            creation_retry,
            provisioning,
            default_role,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_POLL_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.creation_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_CREATE_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_REQUEST_TIMEOUT_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

/// Endpoints and credentials for the HTTP collaborators (binary only).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub auth_url: String,
    pub rest_url: String,
    pub api_key: SecretString,
    pub profile_table: String,
    pub port: u16,
}

impl ServiceConfig {
    /// `None` when `ONBOARD_AUTH_URL` is unset (run the local simulation).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(auth_url) = lookup("ONBOARD_AUTH_URL") else {
            return Ok(None);
        };
        let api_key = lookup("ONBOARD_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("ONBOARD_API_KEY".to_string()))?;
        let rest_url = lookup("ONBOARD_REST_URL").unwrap_or_else(|| auth_url.clone());
        let port = match lookup("ONBOARD_PORT") {
            Some(raw) => parse_number::<u16>("ONBOARD_PORT", &raw)?,
            None => 8080,
        };
        Ok(Some(Self {
            auth_url,
            rest_url,
            api_key: SecretString::from(api_key),
            profile_table: lookup("ONBOARD_PROFILE_TABLE").unwrap_or_else(|| "profiles".to_string()),
            port,
        }))
    }
}

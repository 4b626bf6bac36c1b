//! Verification link parsing.
//!
//! Auth servers put the outcome of a verification either in the query string
//! (`?token_hash=...&type=signup`, `?error=...`) or in the fragment
//! (`#access_token=...&refresh_token=...`). Both are read into one map; a key
//! present in both takes the fragment's value.

use std::collections::HashMap;

use url::Url;

use crate::error::LinkError;

/// Error code auth servers use for an expired or already-consumed link.
const OTP_EXPIRED: &str = "otp_expired";

/// Parameters carried by a verification link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackLink {
    path: String,
    params: HashMap<String, String>,
}

impl CallbackLink {
    /// Parse an absolute URL or a bare path such as
    /// `/auth/callback#access_token=...`.
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost")
                .and_then(|base| base.join(raw))
                .map_err(|e| LinkError::Malformed(format!("{raw}: {e}")))?,
            Err(e) => return Err(LinkError::Malformed(format!("{raw}: {e}"))),
        };

        let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }

        Ok(Self {
            path: url.path().to_string(),
            params,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get("access_token")
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.get("refresh_token")
    }

    /// Access token lifetime in seconds.
    pub fn expires_in(&self) -> Option<i64> {
        self.get("expires_in").and_then(|v| v.parse().ok())
    }

    pub fn token_hash(&self) -> Option<&str> {
        self.get("token_hash")
    }

    /// `signup`, `magiclink`, `recovery`, `invite`, `email_change`, ...
    pub fn verification_type(&self) -> Option<&str> {
        self.get("type")
    }

    /// PKCE authorization code.
    pub fn code(&self) -> Option<&str> {
        self.get("code")
    }

    /// Whether the link carries anything a credential exchange could use.
    pub fn has_credentials(&self) -> bool {
        self.access_token().is_some() || self.token_hash().is_some() || self.code().is_some()
    }

    /// The failure the auth server reported through the link, if any.
    pub fn failure(&self) -> Option<LinkError> {
        let error = self.get("error");
        let code = self.get("error_code");
        if error.is_none() && code.is_none() {
            return None;
        }

        let description = self
            .get("error_description")
            .or(error)
            .unwrap_or("verification failed")
            .to_string();

        if code == Some(OTP_EXPIRED) {
            return Some(LinkError::Expired { description });
        }
        Some(LinkError::Denied {
            code: code.or(error).unwrap_or("unknown").to_string(),
            description,
        })
    }
}

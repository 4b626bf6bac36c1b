//! Session state snapshot.

use serde::Serialize;

use crate::error::UserNotice;
use crate::identity::Identity;
use crate::profile::ProfileRecord;

/// Everything the flow knows about the current user.
///
/// Lives for the lifetime of the process and is rebuilt from the identity
/// provider and profile store on every start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<ProfileRecord>,
    pub is_loading: bool,
    /// One-shot guard: survives router remounts, reset only on sign-out.
    pub has_redirected_to_onboarding: bool,
    /// Recoverable failure to show the user, if any.
    pub notice: Option<UserNotice>,
}

impl Default for SessionState {
    /// Loading until the bootstrapper has asked the provider for a session.
    fn default() -> Self {
        Self {
            identity: None,
            profile: None,
            is_loading: true,
            has_redirected_to_onboarding: false,
            notice: None,
        }
    }
}

impl SessionState {
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    /// Signed in with a complete profile. Protected routes consult this.
    pub fn is_onboarding_complete(&self) -> bool {
        self.identity.is_some() && self.profile.as_ref().is_some_and(|p| p.is_complete())
    }
}

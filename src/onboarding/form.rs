//! Profile-completion form submission.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::profile::creation::bounded;
use crate::profile::{ProfileRecord, ProfileStore, ProfileUpdate};
use crate::session::SessionStore;

/// Writes the completion form to the profile store and refreshes the session
/// store. Never navigates: the router notices the completed profile.
pub struct ProfileForm {
    profiles: Arc<dyn ProfileStore>,
    store: Arc<SessionStore>,
    request_timeout: Duration,
}

impl ProfileForm {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        store: Arc<SessionStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            profiles,
            store,
            request_timeout,
        }
    }

    pub async fn submit(&self, update: ProfileUpdate) -> Result<ProfileRecord> {
        let identity = self.store.state().identity.ok_or(Error::NotSignedIn)?;

        let record = bounded(self.request_timeout, self.profiles.update(&identity, &update)).await?;

        if self.store.state().identity != Some(identity) {
            warn!(identity = %identity, "Signed out while the form was saving, dropping result");
            return Err(Error::NotSignedIn);
        }
        info!(identity = %identity, complete = record.is_complete(), "Profile form saved");
        self.store.set_profile(Some(record.clone()));
        self.store.clear_notice();
        Ok(record)
    }
}

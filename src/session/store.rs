//! Process-wide session store.
//!
//! A `watch` channel holds the current [`SessionState`]. Each setter is a
//! single atomic modification of the whole snapshot, so readers never see a
//! torn state, and a write that changes nothing wakes nobody.
//!
//! Writers per field:
//! - `identity`: the session bootstrapper
//! - `has_redirected_to_onboarding`: the onboarding router
//! - `profile`: the bootstrapper's load/creation path and the completion form
//!
//! The setters are crate-private so nothing outside the flow can write.

use tokio::sync::watch;
use tracing::{debug, info};

use super::state::SessionState;
use crate::error::UserNotice;
use crate::identity::Identity;
use crate::profile::ProfileRecord;

pub struct SessionStore {
    tx: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self { tx }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Change stream. The receiver starts out having seen the current value.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn set_identity(&self, identity: Option<Identity>) {
        self.modify("identity", |state| {
            if state.identity == identity {
                return false;
            }
            state.identity = identity;
            true
        });
    }

    pub(crate) fn set_profile(&self, profile: Option<ProfileRecord>) {
        self.modify("profile", |state| {
            if state.profile == profile {
                return false;
            }
            state.profile = profile;
            true
        });
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.modify("is_loading", |state| {
            if state.is_loading == loading {
                return false;
            }
            state.is_loading = loading;
            true
        });
    }

    /// `setHasRedirectedToOnboarding(true)` as an atomic check-and-set.
    ///
    /// Returns true for exactly one caller per sign-in session. The flag is
    /// only ever cleared by [`SessionStore::sign_out`].
    pub(crate) fn claim_onboarding_redirect(&self) -> bool {
        let claimed = self.tx.send_if_modified(|state| {
            if state.has_redirected_to_onboarding {
                return false;
            }
            state.has_redirected_to_onboarding = true;
            true
        });
        debug!(claimed, "Onboarding redirect claim");
        claimed
    }

    pub(crate) fn set_notice(&self, notice: Option<UserNotice>) {
        self.modify("notice", |state| {
            if state.notice == notice {
                return false;
            }
            state.notice = notice;
            true
        });
    }

    pub(crate) fn clear_notice(&self) {
        self.set_notice(None);
    }

    /// Drop identity, profile, and the redirect flag in one write.
    pub(crate) fn sign_out(&self) {
        self.tx.send_modify(|state| {
            state.identity = None;
            state.profile = None;
            state.has_redirected_to_onboarding = false;
            state.is_loading = false;
            state.notice = None;
        });
        info!("Session store cleared");
    }

    fn modify(&self, field: &'static str, change: impl FnOnce(&mut SessionState) -> bool) {
        if self.tx.send_if_modified(change) {
            debug!(field, "Session state updated");
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Session bootstrapper — hydrates the session store from the identity
//! provider and owns the process's only subscription to its change stream.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::SessionStore;
use crate::config::{FlowConfig, ProfileProvisioning};
use crate::error::{Error, ProviderError, StoreError, UserNotice};
use crate::identity::{Identity, IdentityProvider, Session, SessionChange, SessionEvent};
use crate::profile::creation::bounded;
use crate::profile::{NewProfile, ProfileRecord, ProfileStore, Role, ensure_profile};

/// Hydrates [`SessionStore`] on startup and on every session change.
///
/// `start` is latched: no matter how many times the host runs its startup
/// code, there is at most one live subscription to the provider.
pub struct SessionBootstrapper {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    store: Arc<SessionStore>,
    config: FlowConfig,
    started: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionBootstrapper {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        store: Arc<SessionStore>,
        config: FlowConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            profiles,
            store,
            config,
            started: AtomicBool::new(false),
            listener: Mutex::new(None),
        })
    }

    /// Start once. Returns false (and does nothing) on every later call.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Session bootstrapper already started, ignoring");
            return false;
        }

        // Subscribe before the first query so no change can slip in between.
        let mut subscription = self.provider.subscribe();
        info!("Session bootstrapper started");

        let initial = match self.query_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Initial session query failed: {e}");
                self.store
                    .set_notice(Some(UserNotice::from(&Error::Provider(e))));
                None
            }
        };
        self.hydrate(initial).await;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                let event = change.event;
                let handled = AssertUnwindSafe(this.handle_change(change))
                    .catch_unwind()
                    .await;
                if handled.is_err() {
                    let crash =
                        Error::Unexpected(format!("session change handler panicked on {event}"));
                    error!(error = %crash, "Session listener recovered");
                    this.store.set_loading(false);
                    this.store.set_notice(Some(UserNotice::from(&crash)));
                }
            }
            debug!("Session change stream closed");
        });
        *self.listener.lock().await = Some(handle);
        true
    }

    /// Stop listening. The subscription is dropped before this returns.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
            let _ = handle.await;
            info!("Session bootstrapper stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Re-run the profile load for the signed-in identity ("please retry").
    pub async fn refresh_profile(&self) -> crate::error::Result<ProfileRecord> {
        let identity = self.store.state().identity.ok_or(Error::NotSignedIn)?;
        self.store.set_loading(true);
        let result = self.load_profile(identity, None).await;
        self.apply_profile_result(identity, &result);
        self.store.set_loading(false);
        result
    }

    async fn handle_change(&self, change: SessionChange) {
        info!(event = %change.event, "Session change received");
        match change.event {
            SessionEvent::SignedOut => self.store.sign_out(),
            _ => self.hydrate(change.session).await,
        }
    }

    async fn query_session(&self) -> Result<Option<Session>, ProviderError> {
        let limit = self.config.request_timeout;
        tokio::time::timeout(limit, self.provider.current_session())
            .await
            .unwrap_or(Err(ProviderError::Timeout { after: limit }))
    }

    async fn hydrate(&self, session: Option<Session>) {
        let Some(session) = session else {
            if self.store.state().identity.is_some() {
                self.store.sign_out();
            }
            self.store.set_loading(false);
            return;
        };

        let identity = session.identity;
        let current = self.store.state();
        if current.identity.is_some_and(|prev| prev != identity) {
            info!(identity = %identity, "Identity changed without sign-out, resetting session");
            self.store.sign_out();
        }

        let profile_loaded = current
            .profile
            .as_ref()
            .is_some_and(|p| p.id == identity);
        if !profile_loaded {
            self.store.set_loading(true);
        }
        self.store.set_identity(Some(identity));

        let result = self.load_profile(identity, session.signup_role).await;
        self.apply_profile_result(identity, &result);
        self.store.set_loading(false);
    }

    fn apply_profile_result(&self, identity: Identity, result: &crate::error::Result<ProfileRecord>) {
        // A sign-out may have landed while we were waiting on the store.
        if self.store.state().identity != Some(identity) {
            debug!(identity = %identity, "Identity changed during profile load, discarding");
            return;
        }
        match result {
            Ok(record) => {
                self.store.set_profile(Some(record.clone()));
                self.store.clear_notice();
            }
            Err(e) => {
                error!(identity = %identity, error = %e, "Failed to load profile");
                self.store.set_notice(Some(UserNotice::from(e)));
            }
        }
    }

    /// Fetch the profile, creating it if it does not exist.
    async fn load_profile(
        &self,
        identity: Identity,
        signup_role: Option<Role>,
    ) -> crate::error::Result<ProfileRecord> {
        let limit = self.config.request_timeout;

        match bounded(limit, self.profiles.get_by_id(&identity)).await {
            Ok(record) => return Ok(record),
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        if let ProfileProvisioning::ServerTrigger { grace } = self.config.provisioning {
            debug!(identity = %identity, ?grace, "No profile yet, giving the trigger a moment");
            tokio::time::sleep(grace).await;
            match bounded(limit, self.profiles.get_by_id(&identity)).await {
                Ok(record) => return Ok(record),
                Err(StoreError::NotFound { .. }) => {
                    warn!(identity = %identity, "Trigger did not create a profile, creating it");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let role = signup_role.unwrap_or(self.config.default_role);
        let draft = NewProfile::new(identity, role);
        let outcome =
            ensure_profile(self.profiles.as_ref(), &draft, &self.config.creation_retry, limit)
                .await?;
        Ok(outcome.into_record())
    }
}

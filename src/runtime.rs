//! Runtime wiring: one session store, one bootstrapper, one router, one
//! callback handler, sharing the collaborators.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::callback::{CallbackHandle, CallbackLink, ExchangeOutcome, VerificationCallback};
use crate::config::FlowConfig;
use crate::error::{Error, Result, UserNotice};
use crate::identity::IdentityProvider;
use crate::navigation::Navigator;
use crate::onboarding::{OnboardingRouter, ProfileForm};
use crate::profile::{ProfileRecord, ProfileStore};
use crate::session::{SessionBootstrapper, SessionStore};

pub struct SessionRuntime {
    config: FlowConfig,
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    store: Arc<SessionStore>,
    bootstrapper: Arc<SessionBootstrapper>,
    router: Arc<OnboardingRouter>,
    callback: Arc<VerificationCallback>,
    router_effect: Mutex<Option<AbortHandle>>,
}

impl SessionRuntime {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        navigator: Arc<dyn Navigator>,
        config: FlowConfig,
    ) -> Arc<Self> {
        let store = Arc::new(SessionStore::new());
        let bootstrapper = SessionBootstrapper::new(
            Arc::clone(&provider),
            Arc::clone(&profiles),
            Arc::clone(&store),
            config.clone(),
        );
        let router = OnboardingRouter::new(Arc::clone(&store), navigator, config.routes.clone());
        let callback = VerificationCallback::new(
            Arc::clone(&provider),
            Arc::clone(&store),
            Arc::clone(&router),
            config.clone(),
        );

        Arc::new(Self {
            config,
            provider,
            profiles,
            store,
            bootstrapper,
            router,
            callback,
            router_effect: Mutex::new(None),
        })
    }

    /// Hydrate the session and mount the router. Safe to call repeatedly;
    /// only the first call does anything.
    pub async fn start(&self) -> bool {
        if !self.bootstrapper.start().await {
            return false;
        }
        self.mount_router();
        info!("Session runtime started");
        true
    }

    /// Tear down and re-create the router effect, as a host framework does
    /// when it remounts the component tree.
    pub fn remount_router(&self) {
        self.mount_router();
    }

    /// Handle a verification link the user opened.
    ///
    /// Runs the provider's own credential exchange once in the background,
    /// unless a session is already established, then mounts the callback
    /// handler, which only observes.
    pub fn open_verification_link(&self, url: &str) -> Result<CallbackHandle> {
        let link = CallbackLink::parse(url)?;
        let exchange = self.start_exchange(&link);
        Ok(self.callback.mount_with_exchange(link, exchange))
    }

    fn start_exchange(&self, link: &CallbackLink) -> Option<ExchangeOutcome> {
        if link.failure().is_some() || !link.has_credentials() {
            return None;
        }
        if self.store.state().identity.is_some() {
            debug!("Session already established, skipping credential exchange");
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let provider = Arc::clone(&self.provider);
        let link = link.clone();
        tokio::spawn(async move {
            let result = provider.detect_session_in_url(&link).await;
            match &result {
                Ok(true) => info!("Credential exchange completed"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Credential exchange failed"),
            }
            // The callback may already be gone.
            let _ = tx.send(result);
        });
        Some(rx)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await?;
        self.store.sign_out();
        Ok(())
    }

    /// The "please retry" affordance for a failed profile load.
    pub async fn retry_profile(&self) -> Result<ProfileRecord> {
        self.bootstrapper.refresh_profile().await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<()> {
        self.callback.resend(email).await
    }

    pub fn profile_form(&self) -> ProfileForm {
        ProfileForm::new(
            Arc::clone(&self.profiles),
            Arc::clone(&self.store),
            self.config.request_timeout,
        )
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<OnboardingRouter> {
        &self.router
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Unmount the router and drop the provider subscription.
    pub async fn shutdown(&self) {
        if let Some(effect) = self.effect_slot().take() {
            effect.abort();
        }
        self.bootstrapper.shutdown().await;
        info!("Session runtime stopped");
    }

    fn mount_router(&self) {
        let task = self.router.mount().into_task();
        let abort = task.abort_handle();
        if let Some(previous) = self.effect_slot().replace(abort) {
            previous.abort();
        }

        // A panicking effect must not leave a silent blank screen.
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    let crash = Error::Unexpected("onboarding router crashed".to_string());
                    error!(error = %crash, "Router effect stopped");
                    store.set_loading(false);
                    store.set_notice(Some(UserNotice::from(&crash)));
                }
            }
        });
    }

    fn effect_slot(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.router_effect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

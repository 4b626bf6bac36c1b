//! In-memory identity provider for tests and local simulation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use super::model::{Session, SessionChange, SessionEvent};
use super::provider::{IdentityProvider, Subscription, SubscriptionHub};
use crate::callback::CallbackLink;
use crate::error::ProviderError;

/// Identity provider that keeps its session in memory.
///
/// Counts `current_session` queries and link exchanges, and records resend
/// requests, so tests can assert on how the flow used it.
pub struct InMemoryIdentityProvider {
    session: RwLock<Option<Session>>,
    hub: SubscriptionHub,
    session_queries: AtomicUsize,
    resent: Mutex<Vec<String>>,
    fail_queries: AtomicUsize,
    exchanges: AtomicUsize,
    reject_links: AtomicBool,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            session: RwLock::new(None),
            hub: SubscriptionHub::new(),
            session_queries: AtomicUsize::new(0),
            resent: Mutex::new(Vec::new()),
            fail_queries: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
            reject_links: AtomicBool::new(false),
        })
    }

    /// Complete a credential exchange: store the session and emit `SignedIn`.
    pub async fn sign_in(&self, session: Session) {
        info!(identity = %session.identity, "Simulated sign-in");
        *self.session.write().await = Some(session.clone());
        self.hub
            .emit(SessionChange::new(SessionEvent::SignedIn, Some(session)));
    }

    /// Sign in after `delay`, the way a verification link's exchange lands a
    /// little after the landing page has loaded.
    pub fn establish_after(self: &Arc<Self>, session: Session, delay: Duration) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            provider.sign_in(session).await;
        })
    }

    /// Emit `TokenRefreshed` for the current session, if any.
    pub async fn refresh_token(&self) {
        let current = self.session.read().await.clone();
        if current.is_some() {
            self.hub
                .emit(SessionChange::new(SessionEvent::TokenRefreshed, current));
        }
    }

    /// Make the next `n` session queries fail with a transient error.
    pub fn fail_next_queries(&self, n: usize) {
        self.fail_queries.store(n, Ordering::SeqCst);
    }

    /// Answer every link exchange with `Unauthorized`, as the auth server
    /// does for a consumed or expired token.
    pub fn reject_links(&self) {
        self.reject_links.store(true, Ordering::SeqCst);
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn session_queries(&self) -> usize {
        self.session_queries.load(Ordering::SeqCst)
    }

    pub async fn resent_to(&self) -> Vec<String> {
        self.resent.lock().await.clone()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        self.session_queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderError::RequestFailed {
                reason: "simulated network failure".to_string(),
            });
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
        info!(email = %email, "Simulated verification resend");
        self.resent.lock().await.push(email.to_string());
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        *self.session.write().await = None;
        self.hub
            .emit(SessionChange::new(SessionEvent::SignedOut, None));
        Ok(())
    }

    async fn detect_session_in_url(&self, _link: &CallbackLink) -> Result<bool, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.reject_links.load(Ordering::SeqCst) {
            return Err(ProviderError::Unauthorized);
        }
        Ok(false)
    }
}

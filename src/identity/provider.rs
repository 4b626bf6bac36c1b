//! `IdentityProvider` trait and the subscription plumbing shared by its
//! implementations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::model::{Session, SessionChange};
use crate::callback::CallbackLink;
use crate::error::ProviderError;

/// Default broadcast channel capacity for session change notifications.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// The identity provider as seen by this crate.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `getCurrentSession()`: the session the provider currently holds.
    async fn current_session(&self) -> Result<Option<Session>, ProviderError>;

    /// `onSessionChange()`: open a subscription to the change stream.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes.
    fn subscribe(&self) -> Subscription;

    /// Number of subscriptions currently open.
    fn active_subscriptions(&self) -> usize;

    /// Send a fresh verification email.
    async fn resend_verification(&self, email: &str) -> Result<(), ProviderError>;

    /// End the session. Subscribers observe `SignedOut`.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// The transport's own credential exchange for a verification link.
    ///
    /// Called once by the runtime when a link is opened. Returns whether a
    /// session was established. Providers whose transport needs no explicit
    /// step keep the default.
    async fn detect_session_in_url(&self, _link: &CallbackLink) -> Result<bool, ProviderError> {
        Ok(false)
    }
}

/// Fan-out hub for session change notifications with a live subscription
/// counter.
#[derive(Debug, Clone)]
pub struct SubscriptionHub {
    tx: broadcast::Sender<SessionChange>,
    active: Arc<AtomicUsize>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            tx,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let count = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(active = count, "Session change subscription opened");
        Subscription {
            rx: self.tx.subscribe(),
            active: Arc::clone(&self.active),
        }
    }

    /// Broadcast a change. Fine if nobody is listening.
    pub fn emit(&self, change: SessionChange) {
        debug!(event = %change.event, "Emitting session change");
        let _ = self.tx.send(change);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

/// An open subscription to session change notifications.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<SessionChange>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    /// Wait for the next change. `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<SessionChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!(active = remaining, "Session change subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, SessionEvent};

    #[test]
    fn counts_follow_subscription_lifetimes() {
        let hub = SubscriptionHub::new();
        assert_eq!(hub.active(), 0);

        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.active(), 2);

        drop(a);
        assert_eq!(hub.active(), 1);
        drop(b);
        assert_eq!(hub.active(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_changes() {
        let hub = SubscriptionHub::new();
        let mut sub = hub.subscribe();
        let session = Session::new(Identity::generate());

        hub.emit(SessionChange::new(SessionEvent::SignedIn, Some(session.clone())));

        let change = sub.recv().await.unwrap();
        assert_eq!(change.event, SessionEvent::SignedIn);
        assert_eq!(change.session, Some(session));
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let hub = SubscriptionHub::new();
        hub.emit(SessionChange::new(SessionEvent::SignedOut, None));
        assert_eq!(hub.active(), 0);
    }
}

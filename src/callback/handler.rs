//! Verification callback handler — runs on the verification landing route.
//!
//! Polls the identity provider until the session shows up, waits for the
//! session store to hold the profile, then hands the exit navigation to the
//! onboarding router. It never decides routing itself and never performs a
//! credential exchange of its own; when the runtime ran one, the handler only
//! listens for its outcome so a rejected link ends the run right away.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::link::CallbackLink;
use crate::config::FlowConfig;
use crate::error::{ErrorKind, LinkError, ProviderError, RecoveryAction, Result, UserNotice};
use crate::identity::IdentityProvider;
use crate::onboarding::OnboardingRouter;
use crate::session::{SessionState, SessionStore};

/// Where the handler is in its run.
///
/// `Polling → SessionFound → AwaitingProfile → Redirected`, or one of the
/// error terminals: `TimedOut`, `LinkRejected`, `ProfileUnavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CallbackPhase {
    /// `attempt` is 0 before the first query goes out.
    Polling { attempt: u32 },
    SessionFound,
    AwaitingProfile,
    Redirected { to: String },
    TimedOut,
    LinkRejected { reason: String },
    ProfileUnavailable,
}

impl CallbackPhase {
    pub fn can_transition_to(&self, target: &CallbackPhase) -> bool {
        use CallbackPhase::*;
        match (self, target) {
            (Polling { attempt: a }, Polling { attempt: b }) => *b == a + 1,
            (Polling { .. }, SessionFound | TimedOut | LinkRejected { .. }) => true,
            (SessionFound, AwaitingProfile) => true,
            (AwaitingProfile, Redirected { .. } | ProfileUnavailable) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Redirected { .. } | Self::TimedOut | Self::LinkRejected { .. } | Self::ProfileUnavailable
        )
    }

    /// The recovery message for error terminals.
    pub fn notice(&self) -> Option<UserNotice> {
        match self {
            Self::TimedOut => Some(UserNotice {
                kind: ErrorKind::Transient,
                message: "We couldn't confirm your email yet. Try again or request a new link."
                    .to_string(),
                action: RecoveryAction::ResendVerification,
            }),
            Self::LinkRejected { reason } => Some(UserNotice {
                kind: ErrorKind::LinkExpired,
                message: format!("{reason}. Request a new verification email."),
                action: RecoveryAction::ResendVerification,
            }),
            Self::ProfileUnavailable => Some(UserNotice {
                kind: ErrorKind::Transient,
                message: "Your account is confirmed but we couldn't load your profile. Please retry."
                    .to_string(),
                action: RecoveryAction::Retry,
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallbackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Polling { attempt } => write!(f, "polling({attempt})"),
            Self::SessionFound => write!(f, "session_found"),
            Self::AwaitingProfile => write!(f, "awaiting_profile"),
            Self::Redirected { to } => write!(f, "redirected({to})"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::LinkRejected { .. } => write!(f, "link_rejected"),
            Self::ProfileUnavailable => write!(f, "profile_unavailable"),
        }
    }
}

/// Mounted flag plus a wake-up for everything waiting on it.
#[derive(Debug)]
struct Mount {
    mounted: AtomicBool,
    notify: Notify,
}

impl Mount {
    fn new() -> Self {
        Self {
            mounted: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    async fn unmounted(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_mounted() {
                return;
            }
            notified.await;
        }
    }

    /// Run `fut` unless the handler is unmounted first. `None` means stop.
    async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            out = fut => self.is_mounted().then_some(out),
            _ = self.unmounted() => None,
        }
    }

    async fn sleep(&self, duration: Duration) -> bool {
        self.run(tokio::time::sleep(duration)).await.is_some()
    }
}

const EXPIRED_REASON: &str = "This verification link has expired or was already used";

/// Result of the provider's credential exchange for a link, delivered once.
pub type ExchangeOutcome = oneshot::Receiver<std::result::Result<bool, ProviderError>>;

enum ProfileWait {
    Ready,
    Failed,
}

/// Mounts callback runs for verification links.
pub struct VerificationCallback {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
    router: Arc<OnboardingRouter>,
    config: FlowConfig,
}

impl VerificationCallback {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<SessionStore>,
        router: Arc<OnboardingRouter>,
        config: FlowConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            store,
            router,
            config,
        })
    }

    /// Start handling `link`. The run stops when the returned handle is
    /// unmounted or dropped.
    pub fn mount(self: &Arc<Self>, link: CallbackLink) -> CallbackHandle {
        self.mount_with_exchange(link, None)
    }

    /// Like [`mount`](Self::mount), also watching a credential exchange that
    /// is already in flight for `link`.
    pub fn mount_with_exchange(
        self: &Arc<Self>,
        link: CallbackLink,
        exchange: Option<ExchangeOutcome>,
    ) -> CallbackHandle {
        let mount = Arc::new(Mount::new());
        let (phase_tx, phase_rx) = watch::channel(CallbackPhase::Polling { attempt: 0 });

        let this = Arc::clone(self);
        let run_mount = Arc::clone(&mount);
        let task = tokio::spawn(async move {
            let run = CallbackRun {
                handler: &this,
                mount: &run_mount,
                phase: phase_tx,
            };
            run.execute(link, exchange).await;
        });

        CallbackHandle {
            phase_rx,
            mount,
            task,
        }
    }

    /// The resend affordance for `TimedOut` and `LinkRejected`.
    pub async fn resend(&self, email: &str) -> Result<()> {
        info!(email = %email, "Resending verification email");
        self.provider.resend_verification(email).await?;
        Ok(())
    }
}

struct CallbackRun<'a> {
    handler: &'a VerificationCallback,
    mount: &'a Mount,
    phase: watch::Sender<CallbackPhase>,
}

impl CallbackRun<'_> {
    async fn execute(&self, link: CallbackLink, exchange: Option<ExchangeOutcome>) {
        if let Some(failure) = link.failure() {
            warn!(error = %failure, "Verification link rejected by the auth server");
            self.advance(CallbackPhase::LinkRejected {
                reason: reason_for(&failure),
            });
            return;
        }

        let already_signed_in = self.handler.store.state().identity.is_some();
        if already_signed_in {
            info!("Session already established, skipping poll");
        } else {
            let found = tokio::select! {
                found = self.poll_for_session() => found,
                reason = exchange_rejection(exchange) => {
                    warn!(%reason, "Credential exchange rejected the link");
                    self.advance(CallbackPhase::LinkRejected { reason });
                    false
                }
            };
            if !found {
                return;
            }
        }

        if !self.advance(CallbackPhase::SessionFound) || !self.advance(CallbackPhase::AwaitingProfile) {
            return;
        }

        let wait = self.handler.config.profile_wait;
        let Some(outcome) = self
            .mount
            .run(tokio::time::timeout(wait, self.wait_for_profile()))
            .await
        else {
            debug!("Unmounted while waiting for the profile");
            return;
        };

        match outcome {
            Ok(ProfileWait::Ready) => {}
            Ok(ProfileWait::Failed) => {
                self.advance(CallbackPhase::ProfileUnavailable);
                return;
            }
            Err(_) => {
                warn!(?wait, "Profile did not arrive in time");
                self.advance(CallbackPhase::ProfileUnavailable);
                return;
            }
        }

        if !self.mount.is_mounted() {
            return;
        }
        match self.handler.router.exit_verification_landing() {
            Some(to) => {
                self.advance(CallbackPhase::Redirected { to });
            }
            None => {
                self.advance(CallbackPhase::ProfileUnavailable);
            }
        }
    }

    /// Returns true once a session is observed; false on timeout or unmount.
    async fn poll_for_session(&self) -> bool {
        let attempts = self.handler.config.session_poll_attempts;
        let interval = self.handler.config.session_poll_interval;
        let limit = self.handler.config.request_timeout;

        for attempt in 1..=attempts {
            if !self.advance(CallbackPhase::Polling { attempt }) {
                return false;
            }

            let query = tokio::time::timeout(limit, self.handler.provider.current_session());
            let Some(result) = self.mount.run(query).await else {
                return false;
            };
            match result {
                Ok(Ok(Some(session))) => {
                    info!(identity = %session.identity, attempt, "Session established");
                    return true;
                }
                Ok(Ok(None)) => debug!(attempt, "No session yet"),
                Ok(Err(e)) => debug!(attempt, error = %e, "Session query failed"),
                Err(_) => debug!(attempt, ?limit, "Session query timed out"),
            }

            if attempt < attempts && !self.mount.sleep(interval).await {
                return false;
            }
        }

        warn!(attempts, "No session after polling, giving up");
        self.advance(CallbackPhase::TimedOut);
        false
    }

    async fn wait_for_profile(&self) -> ProfileWait {
        let mut rx = self.handler.store.subscribe();
        loop {
            let outcome = profile_outcome(&rx.borrow_and_update());
            if let Some(outcome) = outcome {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return ProfileWait::Failed;
            }
        }
    }

    /// Move to `next` if still mounted. Returns false when the run must stop.
    fn advance(&self, next: CallbackPhase) -> bool {
        if !self.mount.is_mounted() {
            return false;
        }
        let current = self.phase.borrow().clone();
        if !current.can_transition_to(&next) {
            warn!(from = %current, to = %next, "Invalid callback phase transition");
            return false;
        }
        debug!(from = %current, to = %next, "Callback phase");
        self.phase.send_replace(next);
        true
    }
}

fn profile_outcome(state: &SessionState) -> Option<ProfileWait> {
    let identity = state.identity?;
    if state.is_loading {
        return None;
    }
    if state.profile.as_ref().is_some_and(|p| p.id == identity) {
        return Some(ProfileWait::Ready);
    }
    state.notice.as_ref().map(|_| ProfileWait::Failed)
}

/// Resolves with a rejection reason if the exchange says the link is spent.
/// Otherwise never resolves, and polling decides the outcome.
async fn exchange_rejection(exchange: Option<ExchangeOutcome>) -> String {
    if let Some(outcome) = exchange {
        match outcome.await {
            Ok(Err(e)) if e.kind() == ErrorKind::LinkExpired => return EXPIRED_REASON.to_string(),
            Ok(Err(e)) => debug!(error = %e, "Credential exchange failed, still polling"),
            Ok(Ok(_)) | Err(_) => {}
        }
    }
    std::future::pending().await
}

fn reason_for(failure: &LinkError) -> String {
    match failure {
        LinkError::Expired { .. } => EXPIRED_REASON.to_string(),
        LinkError::Denied { description, .. } => description.clone(),
        LinkError::Malformed(raw) => format!("Malformed verification link ({raw})"),
    }
}

/// A mounted callback run.
pub struct CallbackHandle {
    phase_rx: watch::Receiver<CallbackPhase>,
    mount: Arc<Mount>,
    task: JoinHandle<()>,
}

impl CallbackHandle {
    pub fn phase(&self) -> CallbackPhase {
        self.phase_rx.borrow().clone()
    }

    /// Wait until the run reaches a terminal phase, or stops because it was
    /// unmounted (in which case the last phase it reached is returned).
    pub async fn finished(&mut self) -> CallbackPhase {
        let result = self
            .phase_rx
            .wait_for(CallbackPhase::is_terminal)
            .await
            .map(|phase| phase.clone());
        match result {
            Ok(phase) => phase,
            Err(_) => self.phase_rx.borrow().clone(),
        }
    }

    /// Navigate away: cancel pending timers and stop the run.
    pub fn unmount(&self) {
        if self.mount.is_mounted() {
            debug!("Verification callback unmounted");
        }
        self.mount.unmount();
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_mounted()
    }

    /// Whether the background run has exited.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        self.mount.unmount();
    }
}

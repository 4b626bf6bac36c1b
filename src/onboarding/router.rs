//! Onboarding router — the only place that navigates based on profile
//! completeness.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Routes;
use crate::navigation::{NavigateOptions, Navigator};
use crate::session::{SessionState, SessionStore};

/// What the current session state calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    /// Hydration in progress; render a loading state.
    Loading,
    RedirectToLanding,
    /// Signed in, profile still being fetched or created.
    AwaitingProfile,
    RedirectToOnboarding,
    /// Incomplete profile, but the one-shot redirect was already spent.
    AlreadyRedirected,
    RenderApp,
}

/// Pure routing predicate.
pub fn decide(state: &SessionState) -> RouteDecision {
    if state.is_loading {
        return RouteDecision::Loading;
    }
    if state.identity.is_none() {
        return RouteDecision::RedirectToLanding;
    }
    let Some(profile) = &state.profile else {
        return RouteDecision::AwaitingProfile;
    };
    if profile.is_complete() {
        RouteDecision::RenderApp
    } else if state.has_redirected_to_onboarding {
        RouteDecision::AlreadyRedirected
    } else {
        RouteDecision::RedirectToOnboarding
    }
}

/// Gate for protected routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteGuard {
    Allow,
    Wait,
    Redirect(String),
}

pub struct OnboardingRouter {
    store: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    routes: Routes,
    /// Held from reading the current path until the navigation it leads to.
    navigating: Mutex<()>,
}

impl OnboardingRouter {
    pub fn new(store: Arc<SessionStore>, navigator: Arc<dyn Navigator>, routes: Routes) -> Arc<Self> {
        Arc::new(Self {
            store,
            navigator,
            routes,
            navigating: Mutex::new(()),
        })
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    /// Decide from the current state and perform the navigation it calls for.
    pub fn evaluate(&self) -> RouteDecision {
        let _navigating = self.lock_navigation();
        self.evaluate_locked()
    }

    fn lock_navigation(&self) -> MutexGuard<'_, ()> {
        self.navigating
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn evaluate_locked(&self) -> RouteDecision {
        let state = self.store.state();
        let decision = decide(&state);
        let current = self.navigator.current_path();

        match decision {
            RouteDecision::Loading | RouteDecision::AwaitingProfile => {}
            RouteDecision::RedirectToLanding => {
                if !self.routes.is_public(&current) {
                    info!(from = %current, "Signed out, sending to landing");
                    self.navigator
                        .navigate(&self.routes.landing, NavigateOptions::replace());
                }
            }
            RouteDecision::RedirectToOnboarding => {
                if !self.store.claim_onboarding_redirect() {
                    debug!("Onboarding redirect already claimed");
                    return RouteDecision::AlreadyRedirected;
                }
                if !self.routes.is_onboarding(&current) {
                    info!(from = %current, "Profile incomplete, sending to onboarding");
                    self.navigator
                        .navigate(&self.routes.onboarding, NavigateOptions::replace());
                }
            }
            RouteDecision::AlreadyRedirected => {}
            RouteDecision::RenderApp => {
                if self.routes.is_public(&current) || self.routes.is_onboarding(&current) {
                    info!(from = %current, "Profile complete, entering app");
                    self.navigator
                        .navigate(&self.routes.app, NavigateOptions::replace());
                }
            }
        }
        decision
    }

    /// Leave the verification landing once the session and profile are in.
    ///
    /// Same predicate and same one-shot flag as the reactive effect. Returns
    /// where the user ends up, or `None` if the state does not allow leaving
    /// yet.
    pub fn exit_verification_landing(&self) -> Option<String> {
        let _navigating = self.lock_navigation();
        match self.evaluate_locked() {
            RouteDecision::RenderApp => Some(self.routes.app.clone()),
            RouteDecision::RedirectToOnboarding => Some(self.routes.onboarding.clone()),
            RouteDecision::AlreadyRedirected => {
                // The redirect was spent earlier in this session and the user
                // came back through a verification link.
                let current = self.navigator.current_path();
                if self.routes.is_verify_callback(&current) {
                    info!("Returning to onboarding from the verification landing");
                    self.navigator
                        .navigate(&self.routes.onboarding, NavigateOptions::replace());
                }
                Some(self.routes.onboarding.clone())
            }
            RouteDecision::Loading
            | RouteDecision::AwaitingProfile
            | RouteDecision::RedirectToLanding => None,
        }
    }

    /// Protected-route gate: the reactive "is onboarding complete" check.
    pub fn guard(&self, path: &str) -> RouteGuard {
        let state = self.store.state();
        if state.is_loading {
            return RouteGuard::Wait;
        }
        if self.routes.is_public(path) {
            return RouteGuard::Allow;
        }
        if !state.is_signed_in() {
            return RouteGuard::Redirect(self.routes.landing.clone());
        }
        if state.profile.is_none() {
            return RouteGuard::Wait;
        }
        if state.is_onboarding_complete() || self.routes.is_onboarding(path) {
            RouteGuard::Allow
        } else {
            RouteGuard::Redirect(self.routes.onboarding.clone())
        }
    }

    /// Mount the reactive effect: evaluate now, then on every state change.
    pub fn mount(self: &Arc<Self>) -> RouterHandle {
        let router = Arc::clone(self);
        let mut rx = self.store.subscribe();
        let task = tokio::spawn(async move {
            router.evaluate();
            while rx.changed().await.is_ok() {
                router.evaluate();
            }
        });
        debug!("Onboarding router mounted");
        RouterHandle { task }
    }
}

/// A mounted router effect.
#[derive(Debug)]
pub struct RouterHandle {
    task: JoinHandle<()>,
}

impl RouterHandle {
    pub fn unmount(&self) {
        debug!("Onboarding router unmounted");
        self.task.abort();
    }

    pub fn is_mounted(&self) -> bool {
        !self.task.is_finished()
    }

    /// The effect's task, for supervision.
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

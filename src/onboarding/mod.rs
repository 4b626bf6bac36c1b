//! Onboarding: the router that owns completeness-based navigation, the
//! profile-completion form, and the REST surface over both.

pub mod form;
pub mod router;
pub mod routes;

pub use form::ProfileForm;
pub use router::{OnboardingRouter, RouteDecision, RouteGuard, RouterHandle, decide};
pub use routes::{SessionRouteState, SessionStatus, session_routes};

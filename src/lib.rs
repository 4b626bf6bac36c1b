//! Onboard Flow — session and onboarding orchestration after email
//! verification.

pub mod callback;
pub mod config;
pub mod error;
pub mod identity;
pub mod navigation;
pub mod onboarding;
pub mod profile;
pub mod runtime;
pub mod session;

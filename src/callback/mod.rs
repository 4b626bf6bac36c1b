//! Verification landing: link parsing and the callback handler.

pub mod handler;
pub mod link;

pub use handler::{CallbackHandle, CallbackPhase, ExchangeOutcome, VerificationCallback};
pub use link::CallbackLink;

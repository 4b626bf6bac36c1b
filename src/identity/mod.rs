//! Identity provider seam: session types, the provider trait, and its
//! in-memory and HTTP implementations.

pub mod gotrue;
pub mod memory;
pub mod model;
pub mod provider;

pub use gotrue::{GoTrueConfig, GoTrueProvider};
pub use memory::InMemoryIdentityProvider;
pub use model::{Identity, Session, SessionChange, SessionEvent};
pub use provider::{IdentityProvider, Subscription, SubscriptionHub};

//! Process-wide session state and the bootstrapper that keeps it in sync
//! with the identity provider.

pub mod bootstrap;
pub mod state;
pub mod store;

pub use bootstrap::SessionBootstrapper;
pub use state::SessionState;
pub use store::SessionStore;

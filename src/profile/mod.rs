//! Profile records: the data model, the store seam with its in-memory and
//! HTTP implementations, and the retry-protected creation path.

pub mod creation;
pub mod memory;
pub mod model;
pub mod postgrest;
pub mod store;

pub use creation::{CreationOutcome, RetryPolicy, ensure_profile};
pub use memory::InMemoryProfileStore;
pub use model::{NewProfile, ProfileRecord, ProfileUpdate, Role};
pub use postgrest::{AccessTokenSource, PostgrestConfig, PostgrestProfileStore};
pub use store::ProfileStore;

//! `ProfileStore` trait — the record store keyed by identity.

use async_trait::async_trait;

use super::model::{NewProfile, ProfileRecord, ProfileUpdate};
use crate::error::StoreError;
use crate::identity::Identity;

/// Backend-agnostic profile store.
///
/// Implementations must enforce one record per identity and report a
/// duplicate insert as [`StoreError::Conflict`].
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert a new record. `Conflict` if one already exists for the id.
    async fn insert(&self, profile: &NewProfile) -> Result<ProfileRecord, StoreError>;

    /// Fetch by identity. `NotFound` if there is no row.
    async fn get_by_id(&self, id: &Identity) -> Result<ProfileRecord, StoreError>;

    /// Apply a partial update and return the updated record.
    async fn update(
        &self,
        id: &Identity,
        changes: &ProfileUpdate,
    ) -> Result<ProfileRecord, StoreError>;
}

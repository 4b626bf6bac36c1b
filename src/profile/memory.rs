//! In-memory profile store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::model::{NewProfile, ProfileRecord, ProfileUpdate};
use super::store::ProfileStore;
use crate::error::StoreError;
use crate::identity::Identity;

/// Profile store held in a map, with the uniqueness constraint of the real
/// thing plus knobs for latency and scripted failures.
pub struct InMemoryProfileStore {
    rows: RwLock<HashMap<Identity, ProfileRecord>>,
    latency: Duration,
    scripted_failures: Mutex<VecDeque<StoreError>>,
    insert_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemoryProfileStore {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    /// Every call sleeps `latency` before touching the map, so concurrent
    /// callers genuinely overlap.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            rows: RwLock::new(HashMap::new()),
            latency,
            scripted_failures: Mutex::new(VecDeque::new()),
            insert_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        })
    }

    /// Queue errors returned by the next inserts, in order.
    pub async fn fail_next_inserts(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.scripted_failures.lock().await.extend(errors);
    }

    /// What a server-side trigger does on sign-up: write the row directly,
    /// bypassing latency and scripted failures. Returns false if a row was
    /// already there.
    pub async fn simulate_trigger(&self, profile: NewProfile) -> bool {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&profile.id) {
            return false;
        }
        debug!(identity = %profile.id, "Simulated trigger created profile");
        rows.insert(profile.id, profile.into_record());
        true
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn insert(&self, profile: &NewProfile) -> Result<ProfileRecord, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(err) = self.scripted_failures.lock().await.pop_front() {
            return Err(err);
        }

        let mut rows = self.rows.write().await;
        if rows.contains_key(&profile.id) {
            return Err(StoreError::Conflict {
                id: profile.id.to_string(),
            });
        }
        let record = profile.clone().into_record();
        rows.insert(profile.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: &Identity) -> Result<ProfileRecord, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        self.rows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn update(
        &self,
        id: &Identity,
        changes: &ProfileUpdate,
    ) -> Result<ProfileRecord, StoreError> {
        self.simulate_latency().await;

        let mut rows = self.rows.write().await;
        let record = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        record.apply(changes);
        Ok(record.clone())
    }
}

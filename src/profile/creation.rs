//! Retry-protected profile creation.
//!
//! Needed when the store has no server-side trigger that creates the row on
//! sign-up, and harmless when it does: losing the insert race to the trigger
//! shows up as a conflict, which resolves to fetching the existing row.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::model::{NewProfile, ProfileRecord};
use super::store::ProfileStore;
use crate::error::{CreationError, StoreError};

/// Exponential backoff for the creation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// How the caller ended up with a record. Both are successes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationOutcome {
    Created(ProfileRecord),
    /// Someone else (a trigger, another tab) created it first.
    FetchedExisting(ProfileRecord),
}

impl CreationOutcome {
    pub fn record(&self) -> &ProfileRecord {
        match self {
            Self::Created(r) | Self::FetchedExisting(r) => r,
        }
    }

    pub fn into_record(self) -> ProfileRecord {
        match self {
            Self::Created(r) | Self::FetchedExisting(r) => r,
        }
    }
}

/// Make sure a profile row exists for `draft.id`.
///
/// Insert; on conflict fetch the existing row; on anything else back off and
/// try again, up to `policy.max_attempts`. Every store call is bounded by
/// `request_timeout`.
pub async fn ensure_profile(
    store: &dyn ProfileStore,
    draft: &NewProfile,
    policy: &RetryPolicy,
    request_timeout: Duration,
) -> Result<CreationOutcome, CreationError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match attempt_once(store, draft, request_timeout).await {
            Ok(outcome) => {
                info!(
                    identity = %draft.id,
                    attempt,
                    created = matches!(outcome, CreationOutcome::Created(_)),
                    "Profile ensured"
                );
                return Ok(outcome);
            }
            Err(e) => {
                warn!(identity = %draft.id, attempt, error = %e, "Profile creation attempt failed");
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            let delay = policy.delay_after(attempt);
            debug!(identity = %draft.id, ?delay, "Backing off before next creation attempt");
            tokio::time::sleep(delay).await;
        }
    }

    Err(CreationError::Exhausted {
        attempts,
        last_error: last_error.unwrap_or(StoreError::Transient {
            reason: "no attempt was made".to_string(),
        }),
    })
}

async fn attempt_once(
    store: &dyn ProfileStore,
    draft: &NewProfile,
    request_timeout: Duration,
) -> Result<CreationOutcome, StoreError> {
    match bounded(request_timeout, store.insert(draft)).await {
        Ok(record) => Ok(CreationOutcome::Created(record)),
        Err(StoreError::Conflict { .. }) => {
            debug!(identity = %draft.id, "Profile already exists, fetching it");
            let existing = bounded(request_timeout, store.get_by_id(&draft.id)).await?;
            Ok(CreationOutcome::FetchedExisting(existing))
        }
        Err(e) => Err(e),
    }
}

/// Await a store call with a deadline; an elapsed deadline is a transient
/// `Timeout`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout { after: limit }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::profile::{InMemoryProfileStore, Role};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn transient() -> StoreError {
        StoreError::Transient {
            reason: "connection reset".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(4));
        assert_eq!(policy.delay_after(40), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn fresh_identity_creates_incomplete_row() {
        let store = InMemoryProfileStore::new();
        let draft = NewProfile::new(Identity::generate(), Role::Applicant);

        let outcome = ensure_profile(store.as_ref(), &draft, &RetryPolicy::default(), TIMEOUT)
            .await
            .unwrap();

        assert!(matches!(outcome, CreationOutcome::Created(_)));
        assert!(!outcome.record().is_complete());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn conflict_fetches_existing_row() {
        let store = InMemoryProfileStore::new();
        let id = Identity::generate();
        store.simulate_trigger(NewProfile::new(id, Role::Coach)).await;

        let draft = NewProfile::new(id, Role::Applicant);
        let outcome = ensure_profile(store.as_ref(), &draft, &RetryPolicy::default(), TIMEOUT)
            .await
            .unwrap();

        match outcome {
            CreationOutcome::FetchedExisting(record) => assert_eq!(record.role, Role::Coach),
            other => panic!("expected FetchedExisting, got {other:?}"),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let store = InMemoryProfileStore::new();
        store.fail_next_inserts([transient(), transient()]).await;
        let draft = NewProfile::new(Identity::generate(), Role::Applicant);

        let started = tokio::time::Instant::now();
        let outcome = ensure_profile(store.as_ref(), &draft, &RetryPolicy::default(), TIMEOUT)
            .await
            .unwrap();

        assert!(matches!(outcome, CreationOutcome::Created(_)));
        assert_eq!(store.insert_calls(), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3), "waited {waited:?}");
        assert!(waited < Duration::from_secs(4), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let store = InMemoryProfileStore::new();
        store
            .fail_next_inserts([transient(), transient(), transient(), transient()])
            .await;
        let draft = NewProfile::new(Identity::generate(), Role::Applicant);

        let err = ensure_profile(store.as_ref(), &draft, &RetryPolicy::default(), TIMEOUT)
            .await
            .unwrap_err();

        let CreationError::Exhausted {
            attempts,
            last_error,
        } = err;
        assert_eq!(attempts, 3);
        assert!(matches!(last_error, StoreError::Transient { .. }));
        assert_eq!(store.insert_calls(), 3);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_counts_as_timeout() {
        let store = InMemoryProfileStore::with_latency(Duration::from_secs(30));
        let draft = NewProfile::new(Identity::generate(), Role::Applicant);
        let policy = RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        };

        let err = ensure_profile(store.as_ref(), &draft, &policy, TIMEOUT)
            .await
            .unwrap_err();

        let CreationError::Exhausted { last_error, .. } = err;
        assert!(matches!(last_error, StoreError::Timeout { .. }));
    }
}

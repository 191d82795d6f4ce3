//! Distributed Lock/Mutex Manager (§4.7).
//!
//! No direct counterpart in the teacher crate; grounded on the shape of
//! `DistributedCircuitBreaker` — a Postgres-row-backed, TTL-bearing
//! primitive wrapping the store — generalized from a single breaker row to
//! arbitrary named locks, and returning an RAII [`LockGuard`] instead of a
//! consuming permit, since release must not be skippable by an early return.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::model::LockType;
use crate::store::{StoreError, WorkflowStore};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock held by another owner: {0}")]
    AlreadyHeld(String),

    #[error("lock not held, cannot renew: {0}")]
    NotHeld(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Named exclusion primitive over the `DistributedLock` table (§4.7).
pub struct DistributedLockManager {
    store: Arc<dyn WorkflowStore>,
    owner: String,
}

impl DistributedLockManager {
    pub fn new(store: Arc<dyn WorkflowStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[instrument(skip(self))]
    pub async fn acquire(
        &self,
        key: &str,
        lock_type: LockType,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, LockError> {
        let now = Utc::now();
        let acquired = self
            .store
            .acquire_lock(key, &self.owner, lock_type, chrono::Duration::from_std(ttl).unwrap_or_default(), now)
            .await?;
        if acquired {
            Ok(Some(LockGuard {
                store: self.store.clone(),
                key: key.to_string(),
                owner: self.owner.clone(),
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self))]
    pub async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Utc::now();
        Ok(self
            .store
            .renew_lock(key, &self.owner, chrono::Duration::from_std(ttl).unwrap_or_default(), now)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn release(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.store.release_lock(key, &self.owner).await?)
    }

    #[instrument(skip(self))]
    pub async fn force_release(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.store.force_release_lock(key).await?)
    }

    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<u64, LockError> {
        Ok(self.store.cleanup_expired_locks(Utc::now()).await?)
    }

    pub fn instance_key(instance_id: i64) -> String {
        format!("workflow:instance:{instance_id}")
    }

    pub fn business_key(business_key: &str) -> String {
        format!("business:{business_key}")
    }

    pub fn mutex_key(mutex_key: &str) -> String {
        format!("mutex:{mutex_key}")
    }

    pub fn scheduler_leader_key() -> &'static str {
        "scheduler:leader"
    }

    pub fn new_owner_id() -> Uuid {
        Uuid::now_v7()
    }
}

/// RAII handle on an acquired lock: best-effort release on drop, mirroring
/// the teacher's consuming-permit pattern but release-on-drop since a lock
/// must not leak on an early return or panic unwind.
pub struct LockGuard {
    store: Arc<dyn WorkflowStore>,
    key: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release explicitly and observe the result, rather than relying on
    /// the best-effort `Drop` impl.
    pub async fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        Ok(self.store.release_lock(&self.key, &self.owner).await?)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = self.key.clone();
        let owner = self.owner.clone();
        tokio::spawn(async move {
            if let Err(e) = store.release_lock(&key, &owner).await {
                warn!(error = %e, %key, "failed to release lock on drop");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWorkflowStore;

    #[tokio::test]
    async fn acquire_conflicts_with_another_owner() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let a = DistributedLockManager::new(store.clone(), "engine-a");
        let b = DistributedLockManager::new(store.clone(), "engine-b");

        let guard = a
            .acquire("workflow:instance:1", LockType::Workflow, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(guard.is_some());

        let conflict = b
            .acquire("workflow:instance:1", LockType::Workflow, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(conflict.is_none());
    }

    #[tokio::test]
    async fn explicit_release_frees_the_key() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let a = DistributedLockManager::new(store.clone(), "engine-a");

        let guard = a
            .acquire("mutex:x", LockType::Mutex, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert!(guard.release().await.unwrap());

        let reacquired = a.acquire("mutex:x", LockType::Mutex, Duration::from_secs(30)).await.unwrap();
        assert!(reacquired.is_some());
    }

    #[tokio::test]
    async fn renew_requires_matching_owner() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
        let a = DistributedLockManager::new(store.clone(), "engine-a");
        let b = DistributedLockManager::new(store.clone(), "engine-b");

        let _guard = a
            .acquire("workflow:instance:1", LockType::Workflow, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        assert!(a.renew("workflow:instance:1", Duration::from_secs(30)).await.unwrap());
        assert!(!b.renew("workflow:instance:1", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn instance_key_format() {
        assert_eq!(DistributedLockManager::instance_key(42), "workflow:instance:42");
        assert_eq!(DistributedLockManager::business_key("biz"), "business:biz");
        assert_eq!(DistributedLockManager::mutex_key("m"), "mutex:m");
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::Result;

/// Storage for named, time-bounded exclusive leases.
///
/// Every call names the owner token of the caller, so a holder can only
/// extend or release its own lease. An expired lease is free for anyone.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Takes the lease if it is free or expired. Returns false if another
    /// owner holds a live lease.
    async fn try_acquire(&self, key: &str, owner: Uuid, ttl: Duration) -> Result<bool>;

    /// Pushes the expiry of a live lease held by `owner` to `now + ttl`.
    /// Returns false if the lease expired or belongs to someone else.
    async fn extend(&self, key: &str, owner: Uuid, ttl: Duration) -> Result<bool>;

    /// Drops the lease if `owner` holds it. Idempotent.
    async fn release(&self, key: &str, owner: Uuid) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: Uuid,
    expires_at: Instant,
}

/// In-memory lease store for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryLeaseStore {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the owner of the live lease on `key`, if any.
    pub async fn holder(&self, key: &str) -> Option<Uuid> {
        self.leases
            .lock()
            .await
            .get(key)
            .filter(|lease| lease.expires_at > Instant::now())
            .map(|lease| lease.owner)
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, key: &str, owner: Uuid, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if let Some(lease) = leases.get(key)
            && lease.expires_at > now
        {
            return Ok(false);
        }

        leases.insert(
            key.to_string(),
            Lease {
                owner,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn extend(&self, key: &str, owner: Uuid, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        match leases.get_mut(key) {
            Some(lease) if lease.owner == owner && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner: Uuid) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if leases.get(key).is_some_and(|lease| lease.owner == owner) {
            leases.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn second_owner_is_refused() {
        let store = InMemoryLeaseStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(store.try_acquire("k", a, TTL).await.unwrap());
        assert!(!store.try_acquire("k", b, TTL).await.unwrap());
        assert_eq!(store.holder("k").await, Some(a));
    }

    #[tokio::test]
    async fn release_is_owner_scoped_and_idempotent() {
        let store = InMemoryLeaseStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.try_acquire("k", a, TTL).await.unwrap();

        store.release("k", b).await.unwrap();
        assert_eq!(store.holder("k").await, Some(a));

        store.release("k", a).await.unwrap();
        store.release("k", a).await.unwrap();
        assert_eq!(store.holder("k").await, None);
        assert!(store.try_acquire("k", b, TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_can_be_taken_over() {
        let store = InMemoryLeaseStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .try_acquire("k", a, Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(!store.extend("k", a, TTL).await.unwrap());
        assert!(store.try_acquire("k", b, TTL).await.unwrap());
        assert_eq!(store.holder("k").await, Some(b));
    }

    #[tokio::test(start_paused = true)]
    async fn extend_keeps_lease_alive() {
        let store = InMemoryLeaseStore::new();
        let owner = Uuid::new_v4();
        let ttl = Duration::from_millis(100);
        store.try_acquire("k", owner, ttl).await.unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(60)).await;
            assert!(store.extend("k", owner, ttl).await.unwrap());
        }
        assert!(!store.extend("k", Uuid::new_v4(), ttl).await.unwrap());
        assert_eq!(store.holder("k").await, Some(owner));
    }
}

//! Lock coordinator: bounded acquisition, background renewal, ordered
//! multi-key locking.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{CancellationToken, ProductId};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{LeaseStore, LockError, Result};

/// Lock key guarding a product's ledger entry.
pub fn inventory_key(product_id: &ProductId) -> String {
    format!("inventory:{product_id}")
}

/// Lock coordinator configuration.
///
/// # Default Values
///
/// - `ttl`: 5 seconds
/// - `acquire_timeout`: 3 seconds
/// - `retry_interval`: 50ms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockConfig {
    /// Lease lifetime without renewal.
    pub ttl: Duration,
    /// How long `lock`/`with_lock` keep retrying before `LockError::Timeout`.
    pub acquire_timeout: Duration,
    /// Pause between acquisition attempts.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(5000),
            acquire_timeout: Duration::from_millis(3000),
            retry_interval: Duration::from_millis(50),
        }
    }
}

impl LockConfig {
    /// Held leases are extended every third of their TTL.
    pub fn renew_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_millis(1))
    }
}

type HeldKeys = Arc<Mutex<HashMap<String, Uuid>>>;

/// Acquires, renews and releases named leases on a [`LeaseStore`].
///
/// The coordinator is cheap to clone; clones share the set of leases held by
/// this process.
#[derive(Clone)]
pub struct LockCoordinator {
    store: Arc<dyn LeaseStore>,
    config: LockConfig,
    held: HeldKeys,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LeaseStore>, config: LockConfig) -> Self {
        Self {
            store,
            config,
            held: Arc::default(),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Single attempt to take `key`. Returns false if someone else holds it.
    ///
    /// A lease taken this way is not renewed; the caller extends or releases
    /// it explicitly.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let owner = Uuid::new_v4();
        let acquired = self.store.try_acquire(key, owner, ttl).await?;
        if acquired {
            self.held.lock().await.insert(key.to_string(), owner);
        }
        Ok(acquired)
    }

    /// Releases `key` if this coordinator holds it. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, key: &str) -> Result<()> {
        let owner = self.held.lock().await.remove(key);
        if let Some(owner) = owner {
            self.store.release(key, owner).await?;
        }
        Ok(())
    }

    /// Refreshes the expiry of a lease held by this coordinator.
    ///
    /// Returns false if the key is not held here or the lease already expired.
    pub async fn extend(&self, key: &str, ttl: Duration) -> Result<bool> {
        let owner = self.held.lock().await.get(key).copied();
        match owner {
            Some(owner) => self.store.extend(key, owner, ttl).await,
            None => Ok(false),
        }
    }

    /// Keys currently held through this coordinator, sorted.
    pub async fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.held.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Acquires `key`, retrying every `retry_interval` until `acquire_timeout`.
    ///
    /// The returned guard renews the lease in the background until it is
    /// released or dropped.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn lock(&self, key: &str, cancel: &CancellationToken) -> Result<LeaseGuard> {
        let started = Instant::now();
        let owner = Uuid::new_v4();

        loop {
            if let Some(reason) = cancel.reason() {
                return Err(LockError::Cancelled {
                    key: key.to_string(),
                    reason,
                });
            }

            if self.store.try_acquire(key, owner, self.config.ttl).await? {
                metrics::histogram!("lock_acquire_seconds")
                    .record(started.elapsed().as_secs_f64());
                self.held.lock().await.insert(key.to_string(), owner);
                return Ok(LeaseGuard::start(self, key, owner));
            }

            let waited = started.elapsed();
            if waited >= self.config.acquire_timeout {
                metrics::counter!("lock_timeouts_total").increment(1);
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    "lock acquisition timed out"
                );
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited,
                });
            }

            let pause = self
                .config
                .retry_interval
                .min(self.config.acquire_timeout - waited);
            if let Some(reason) = cancel.sleep(pause).await {
                return Err(LockError::Cancelled {
                    key: key.to_string(),
                    reason,
                });
            }
        }
    }

    /// Acquires every key in canonical (sorted, deduplicated) order.
    ///
    /// Any two callers with overlapping key sets contend in the same order,
    /// so they can never wait on each other in a cycle. If one key cannot be
    /// taken, the keys already acquired are released in reverse order.
    pub async fn lock_all<I, K>(
        &self,
        keys: I,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaseGuard>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        if keys.is_empty() {
            return Err(LockError::NoKeys);
        }

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.lock(key, cancel).await {
                Ok(guard) => guards.push(guard),
                Err(e) => {
                    tracing::debug!(
                        failed = %key,
                        acquired = guards.len(),
                        "bulk lock failed, releasing acquired keys"
                    );
                    release_in_reverse(guards).await;
                    return Err(e);
                }
            }
        }
        Ok(guards)
    }

    /// Runs `op` while holding `key`.
    ///
    /// The lease is released on success and on error. If the returned future
    /// is dropped mid-flight, the guard's drop hands the release to the
    /// runtime.
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.lock(key, cancel).await?;
        let result = op().await;
        guard.release().await;
        result
    }

    /// Runs `op` while holding every key, acquired via [`Self::lock_all`].
    pub async fn with_bulk_lock<I, K, F, Fut, T, E>(
        &self,
        keys: I,
        cancel: &CancellationToken,
        op: F,
    ) -> std::result::Result<T, E>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<LockError>,
    {
        let guards = self.lock_all(keys, cancel).await?;
        let result = op().await;
        release_in_reverse(guards).await;
        result
    }
}

async fn release_in_reverse(guards: Vec<LeaseGuard>) {
    for guard in guards.into_iter().rev() {
        guard.release().await;
    }
}

/// A held lease with its renewal task.
///
/// Call [`LeaseGuard::release`] to give the lease back. Dropping the guard
/// stops renewal and releases the lease on a spawned task.
pub struct LeaseGuard {
    key: String,
    owner: Uuid,
    store: Arc<dyn LeaseStore>,
    held: HeldKeys,
    renewal: Option<JoinHandle<()>>,
    released: bool,
}

impl LeaseGuard {
    fn start(coordinator: &LockCoordinator, key: &str, owner: Uuid) -> Self {
        let renewal = tokio::spawn(renew(
            Arc::clone(&coordinator.store),
            key.to_string(),
            owner,
            coordinator.config.ttl,
            coordinator.config.renew_interval(),
        ));

        Self {
            key: key.to_string(),
            owner,
            store: Arc::clone(&coordinator.store),
            held: Arc::clone(&coordinator.held),
            renewal: Some(renewal),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owner token this lease was acquired with.
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Stops renewal and releases the lease.
    pub async fn release(mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        release_lease(self.store.as_ref(), &self.held, &self.key, self.owner).await;
        self.released = true;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        if self.released {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %self.key, "lease guard dropped outside a runtime; lease will expire");
            return;
        };
        let store = Arc::clone(&self.store);
        let held = Arc::clone(&self.held);
        let key = std::mem::take(&mut self.key);
        let owner = self.owner;
        runtime.spawn(async move {
            release_lease(store.as_ref(), &held, &key, owner).await;
        });
    }
}

async fn release_lease(
    store: &dyn LeaseStore,
    held: &Mutex<HashMap<String, Uuid>>,
    key: &str,
    owner: Uuid,
) {
    {
        let mut held = held.lock().await;
        if held.get(key) == Some(&owner) {
            held.remove(key);
        }
    }
    if let Err(e) = store.release(key, owner).await {
        tracing::warn!(key, error = %e, "failed to release lease; it will expire");
    }
}

/// Extends the lease every `every` until aborted or until an extension fails.
async fn renew(
    store: Arc<dyn LeaseStore>,
    key: String,
    owner: Uuid,
    ttl: Duration,
    every: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        ticker.tick().await;
        match store.extend(&key, owner, ttl).await {
            Ok(true) => tracing::trace!(key = %key, "lease renewed"),
            Ok(false) => {
                metrics::counter!("lock_renewal_failures_total").increment(1);
                tracing::warn!(key = %key, "lease lost before renewal; stopping");
                return;
            }
            Err(e) => {
                metrics::counter!("lock_renewal_failures_total").increment(1);
                tracing::warn!(key = %key, error = %e, "lease renewal failed; stopping");
                return;
            }
        }
    }
}

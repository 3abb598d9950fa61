// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 FlowMesh Contributors
//
// This file is part of FlowMesh.
//
// FlowMesh is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// FlowMesh is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with FlowMesh. If not, see <https://www.gnu.org/licenses/>.

//! Distributed lock manager: uniform locking API plus auto-renewal.
//!
//! ## Purpose
//! Wraps a [`LockStore`] with the API the scheduler and execution engine
//! consume. Contention is reported as `false`/`None`, never as an error;
//! errors mean the backend itself failed.
//!
//! ## Auto-renewal
//! `enable_auto_renewal` spawns one timer task per lock key that calls
//! `renew` every interval. The task self-cancels when renewal fails (lock
//! lost or expired) or when the configured renewal count is reached.
//! Re-enabling renewal for a key replaces the previous timer.

use crate::store::LockStore;
use crate::types::{Lock, LockType};
use crate::LockResult;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Snapshot of one lock's auto-renewal timer.
#[derive(Debug, Clone)]
pub struct RenewalStatus {
    /// Lock key being renewed
    pub key: String,
    /// Holder on whose behalf the timer renews
    pub owner: String,
    /// Renewal interval
    pub interval: Duration,
    /// Renewals performed so far
    pub renewals: u32,
    /// Maximum renewals before the timer self-cancels (`None` = unbounded)
    pub max_renewals: Option<u32>,
    /// Wall-clock time of the last successful renewal
    pub last_renewed_at: Option<DateTime<Utc>>,
}

struct RenewalEntry {
    owner: String,
    /// Distinguishes this timer generation from a replacement for the same
    /// key, so a finished task only removes its own entry.
    token: String,
    status: Arc<RwLock<RenewalStatus>>,
    handle: JoinHandle<()>,
}

/// Distributed lock manager.
///
/// Cheap to clone; all clones share the same renewal timers.
///
/// ## Operating assumption
/// Lock correctness depends on clock skew between processes being bounded
/// well below the TTL margin. Pick TTLs accordingly (minutes, not tens of
/// milliseconds, for cross-host deployments).
#[derive(Clone)]
pub struct DistributedLockManager {
    store: Arc<dyn LockStore>,
    renewals: Arc<Mutex<HashMap<String, RenewalEntry>>>,
}

impl DistributedLockManager {
    /// Create a manager over the given lock store.
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            renewals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Atomically acquire the lock.
    ///
    /// ## Returns
    /// - `Ok(true)`: acquired (or refreshed by the same owner)
    /// - `Ok(false)`: held by a different, non-expired owner - routine
    pub async fn acquire_lock(
        &self,
        key: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
        payload: Option<serde_json::Value>,
    ) -> LockResult<bool> {
        let acquired = self
            .store
            .try_acquire(key, owner, lock_type, ttl, payload)
            .await?;
        match &acquired {
            Some(lock) => debug!(key, owner, version = %lock.version, "lock acquired"),
            None => debug!(key, owner, "lock held elsewhere"),
        }
        Ok(acquired.is_some())
    }

    /// Release the lock if `owner` still holds it.
    ///
    /// `Ok(false)` means not found or owner mismatch - the caller may have
    /// already lost the lock to expiry, which is routine.
    pub async fn release_lock(&self, key: &str, owner: &str) -> LockResult<bool> {
        let released = self.store.release(key, owner).await?;
        debug!(key, owner, released, "lock release");
        Ok(released)
    }

    /// Extend the lease if `owner` still holds a non-expired lock.
    pub async fn renew_lock(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
        Ok(self.store.renew(key, owner, ttl).await?.is_some())
    }

    /// Read-only snapshot of the lock row.
    pub async fn check_lock(&self, key: &str) -> LockResult<Option<Lock>> {
        self.store.get(key).await
    }

    /// Administrative delete regardless of owner (used during failover).
    pub async fn force_release_lock(&self, key: &str) -> LockResult<bool> {
        let released = self.store.force_release(key).await?;
        if released {
            info!(key, "lock force-released");
        }
        Ok(released)
    }

    /// Bulk-delete expired lock rows. Idempotent.
    pub async fn cleanup_expired_locks(&self) -> LockResult<u64> {
        let count = self.store.cleanup_expired().await?;
        if count > 0 {
            debug!(count, "expired locks cleaned up");
        }
        Ok(count)
    }

    /// Start a recurring timer that renews `key` for `owner` every
    /// `interval`, extending the lease by `ttl` each time.
    ///
    /// Exactly one timer exists per key: enabling again replaces the
    /// previous one. The timer self-cancels when renewal fails or after
    /// `max_renewals` successful renewals.
    pub async fn enable_auto_renewal(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
        interval: Duration,
        max_renewals: Option<u32>,
    ) {
        let mut renewals = self.renewals.lock().await;
        if let Some(previous) = renewals.remove(key) {
            previous.handle.abort();
            debug!(key, "replacing existing renewal timer");
        }

        let token = Ulid::new().to_string();
        let status = Arc::new(RwLock::new(RenewalStatus {
            key: key.to_string(),
            owner: owner.to_string(),
            interval,
            renewals: 0,
            max_renewals,
            last_renewed_at: None,
        }));

        let handle = tokio::spawn(Self::renewal_loop(
            self.store.clone(),
            self.renewals.clone(),
            status.clone(),
            key.to_string(),
            owner.to_string(),
            token.clone(),
            ttl,
            interval,
            max_renewals,
        ));

        renewals.insert(
            key.to_string(),
            RenewalEntry {
                owner: owner.to_string(),
                token,
                status,
                handle,
            },
        );
    }

    /// Cancel the renewal timer for `key` if `owner` started it. Idempotent.
    pub async fn disable_auto_renewal(&self, key: &str, owner: &str) -> bool {
        let mut renewals = self.renewals.lock().await;
        match renewals.get(key) {
            Some(entry) if entry.owner == owner => {
                let entry = renewals.remove(key).unwrap();
                entry.handle.abort();
                debug!(key, owner, "auto-renewal disabled");
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the renewal timer for `key`, if one is running.
    pub async fn get_renewal_status(&self, key: &str) -> Option<RenewalStatus> {
        let renewals = self.renewals.lock().await;
        match renewals.get(key) {
            Some(entry) => Some(entry.status.read().await.clone()),
            None => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn renewal_loop(
        store: Arc<dyn LockStore>,
        renewals: Arc<Mutex<HashMap<String, RenewalEntry>>>,
        status: Arc<RwLock<RenewalStatus>>,
        key: String,
        owner: String,
        token: String,
        ttl: Duration,
        interval: Duration,
        max_renewals: Option<u32>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so the first renewal
        // happens one full interval after enabling.
        ticker.tick().await;

        let mut count: u32 = 0;
        loop {
            ticker.tick().await;
            match store.renew(&key, &owner, ttl).await {
                Ok(Some(_)) => {
                    count += 1;
                    {
                        let mut s = status.write().await;
                        s.renewals = count;
                        s.last_renewed_at = Some(Utc::now());
                    }
                    debug!(key, owner, count, "lock renewed");
                    if let Some(max) = max_renewals {
                        if count >= max {
                            info!(key, owner, count, "renewal limit reached, stopping timer");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    warn!(key, owner, "renewal failed: lock lost or expired, stopping timer");
                    break;
                }
                Err(e) => {
                    warn!(key, owner, error = %e, "renewal failed: backend error, stopping timer");
                    break;
                }
            }
        }

        // Remove our own entry, unless a replacement timer has taken the slot.
        let mut map = renewals.lock().await;
        if map.get(&key).is_some_and(|entry| entry.token == token) {
            map.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLockStore;

    fn manager() -> DistributedLockManager {
        DistributedLockManager::new(Arc::new(MemoryLockStore::new()))
    }

    #[tokio::test]
    async fn test_acquire_release_bool_semantics() {
        let manager = manager();
        let ttl = Duration::from_secs(30);

        assert!(manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, ttl, None)
            .await
            .unwrap());
        // Contention is Ok(false), not an error.
        assert!(!manager
            .acquire_lock("workflow:1", "engine-2", LockType::Workflow, ttl, None)
            .await
            .unwrap());

        assert!(!manager.release_lock("workflow:1", "engine-2").await.unwrap());
        assert!(manager.release_lock("workflow:1", "engine-1").await.unwrap());
        assert!(manager.check_lock("workflow:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry_liveness() {
        let manager = manager();
        assert!(manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, Duration::from_millis(40), None)
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;

        // Acquirable by a different owner after TTL without explicit release.
        assert!(manager
            .acquire_lock("workflow:1", "engine-2", LockType::Workflow, Duration::from_secs(30), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_force_release() {
        let manager = manager();
        assert!(manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, Duration::from_secs(30), None)
            .await
            .unwrap());
        assert!(manager.force_release_lock("workflow:1").await.unwrap());
        assert!(manager
            .acquire_lock("workflow:1", "engine-2", LockType::Workflow, Duration::from_secs(30), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_auto_renewal_extends_liveness() {
        let manager = manager();
        let ttl = Duration::from_millis(120);
        assert!(manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, ttl, None)
            .await
            .unwrap());
        manager
            .enable_auto_renewal("workflow:1", "engine-1", ttl, Duration::from_millis(40), None)
            .await;

        // Several TTLs later the lock must still be held.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!manager
            .acquire_lock("workflow:1", "engine-2", LockType::Workflow, ttl, None)
            .await
            .unwrap());

        let status = manager.get_renewal_status("workflow:1").await.unwrap();
        assert!(status.renewals >= 2);
        assert_eq!(status.owner, "engine-1");

        // Disabling lets the lock expire normally thereafter.
        assert!(manager.disable_auto_renewal("workflow:1", "engine-1").await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(manager
            .acquire_lock("workflow:1", "engine-2", LockType::Workflow, ttl, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_auto_renewal_stops_at_max_count() {
        let manager = manager();
        let ttl = Duration::from_secs(30);
        assert!(manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, ttl, None)
            .await
            .unwrap());
        manager
            .enable_auto_renewal("workflow:1", "engine-1", ttl, Duration::from_millis(20), Some(2))
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        // Timer reached its limit and removed itself.
        assert!(manager.get_renewal_status("workflow:1").await.is_none());
    }

    #[tokio::test]
    async fn test_auto_renewal_self_cancels_when_lock_lost() {
        let manager = manager();
        let ttl = Duration::from_secs(30);
        assert!(manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, ttl, None)
            .await
            .unwrap());
        manager
            .enable_auto_renewal("workflow:1", "engine-1", ttl, Duration::from_millis(30), None)
            .await;

        // Pull the lock out from under the timer.
        manager.force_release_lock("workflow:1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(manager.get_renewal_status("workflow:1").await.is_none());
    }

    #[tokio::test]
    async fn test_enable_again_replaces_previous_timer() {
        let manager = manager();
        let ttl = Duration::from_secs(30);
        assert!(manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, ttl, None)
            .await
            .unwrap());
        manager
            .enable_auto_renewal("workflow:1", "engine-1", ttl, Duration::from_millis(25), None)
            .await;
        manager
            .enable_auto_renewal("workflow:1", "engine-1", ttl, Duration::from_secs(10), None)
            .await;

        tokio::time::sleep(Duration::from_millis(120)).await;

        // Replacement timer has a 10s interval, so it has renewed nothing yet.
        let status = manager.get_renewal_status("workflow:1").await.unwrap();
        assert_eq!(status.renewals, 0);
        assert_eq!(status.interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_disable_auto_renewal_owner_checked() {
        let manager = manager();
        let ttl = Duration::from_secs(30);
        manager
            .enable_auto_renewal("workflow:1", "engine-1", ttl, Duration::from_secs(5), None)
            .await;

        assert!(!manager.disable_auto_renewal("workflow:1", "engine-2").await);
        assert!(manager.disable_auto_renewal("workflow:1", "engine-1").await);
        // Idempotent.
        assert!(!manager.disable_auto_renewal("workflow:1", "engine-1").await);
    }

    #[tokio::test]
    async fn test_cleanup_expired_locks() {
        let manager = manager();
        manager
            .acquire_lock("workflow:1", "engine-1", LockType::Workflow, Duration::from_millis(20), None)
            .await
            .unwrap();
        manager
            .acquire_lock("workflow:2", "engine-1", LockType::Workflow, Duration::from_secs(30), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(manager.cleanup_expired_locks().await.unwrap(), 1);
    }
}

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

//! In-memory lock store implementation (for testing).

use crate::store::LockStore;
use crate::types::{Lock, LockType};
use crate::LockResult;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use ulid::Ulid;

/// In-memory lock store (for testing).
///
/// ## Purpose
/// Simple `HashMap` implementation of [`LockStore`] for tests and
/// single-process scenarios. All mutating operations take the write lock,
/// so concurrent acquirers for the same key observe exactly one winner.
///
/// ## Limitations
/// - Not persistent (locks lost on restart)
/// - Not distributed (single process only)
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    locks: Arc<RwLock<HashMap<String, Lock>>>,
}

impl MemoryLockStore {
    /// Create a new in-memory lock store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(ttl.as_millis() as i64)
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
        payload: Option<serde_json::Value>,
    ) -> LockResult<Option<Lock>> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        let expires_at = now + ttl_to_chrono(ttl);

        if let Some(existing) = locks.get(key) {
            if !existing.is_expired_at(now) && existing.owner != owner {
                return Ok(None);
            }
            // Expired, or a refresh by the same owner - take it over.
            let created_at = if existing.owner == owner && !existing.is_expired_at(now) {
                existing.created_at
            } else {
                now
            };
            let lock = Lock {
                key: key.to_string(),
                owner: owner.to_string(),
                lock_type,
                version: Ulid::new().to_string(),
                expires_at,
                created_at,
                last_renewed_at: now,
                payload: payload.or_else(|| existing.payload.clone()),
            };
            locks.insert(key.to_string(), lock.clone());
            return Ok(Some(lock));
        }

        let lock = Lock {
            key: key.to_string(),
            owner: owner.to_string(),
            lock_type,
            version: Ulid::new().to_string(),
            expires_at,
            created_at: now,
            last_renewed_at: now,
            payload,
        };
        locks.insert(key.to_string(), lock.clone());
        Ok(Some(lock))
    }

    async fn release(&self, key: &str, owner: &str) -> LockResult<bool> {
        let mut locks = self.locks.write().await;
        match locks.get(key) {
            Some(existing) if existing.owner == owner => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<Option<Lock>> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        match locks.get_mut(key) {
            Some(existing) if existing.owner == owner && !existing.is_expired_at(now) => {
                existing.expires_at = now + ttl_to_chrono(ttl);
                existing.last_renewed_at = now;
                existing.version = Ulid::new().to_string();
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn get(&self, key: &str) -> LockResult<Option<Lock>> {
        let locks = self.locks.read().await;
        Ok(locks.get(key).cloned())
    }

    async fn force_release(&self, key: &str) -> LockResult<bool> {
        let mut locks = self.locks.write().await;
        Ok(locks.remove(key).is_some())
    }

    async fn cleanup_expired(&self) -> LockResult<u64> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired_at(now));
        Ok((before - locks.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ttl(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn test_try_acquire() {
        let store = MemoryLockStore::new();
        let lock = store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(lock.key, "workflow:1");
        assert_eq!(lock.owner, "engine-1");
        assert!(!lock.is_expired());
    }

    #[tokio::test]
    async fn test_try_acquire_held_by_other() {
        let store = MemoryLockStore::new();
        store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap()
            .unwrap();

        let second = store
            .try_acquire("workflow:1", "engine-2", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_try_acquire_same_owner_refreshes() {
        let store = MemoryLockStore::new();
        let first = store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap()
            .unwrap();

        let second = store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(60_000), None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.owner, "engine-1");
        assert_ne!(second.version, first.version);
        assert!(second.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn test_try_acquire_expired_lock() {
        let store = MemoryLockStore::new();
        let old = store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(20), None)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let lock = store
            .try_acquire("workflow:1", "engine-2", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.owner, "engine-2");
        assert_ne!(lock.version, old.version);
    }

    #[tokio::test]
    async fn test_release_owner_checked() {
        let store = MemoryLockStore::new();
        store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap()
            .unwrap();

        // Wrong owner never mutates the row.
        assert!(!store.release("workflow:1", "engine-2").await.unwrap());
        assert!(store.get("workflow:1").await.unwrap().is_some());

        assert!(store.release("workflow:1", "engine-1").await.unwrap());
        assert!(store.get("workflow:1").await.unwrap().is_none());

        // Releasing an absent lock is routine.
        assert!(!store.release("workflow:1", "engine-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_owner_checked() {
        let store = MemoryLockStore::new();
        let lock = store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap()
            .unwrap();

        assert!(store.renew("workflow:1", "engine-2", ttl(30_000)).await.unwrap().is_none());

        let renewed = store
            .renew("workflow:1", "engine-1", ttl(60_000))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(renewed.version, lock.version);
        assert!(renewed.expires_at > lock.expires_at);
    }

    #[tokio::test]
    async fn test_renew_expired_but_not_cleaned() {
        let store = MemoryLockStore::new();
        store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(20), None)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Expired row still present, but renew must not resurrect it.
        assert!(store.get("workflow:1").await.unwrap().is_some());
        assert!(store.renew("workflow:1", "engine-1", ttl(30_000)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_force_release() {
        let store = MemoryLockStore::new();
        store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap()
            .unwrap();

        assert!(store.force_release("workflow:1").await.unwrap());
        assert!(store.get("workflow:1").await.unwrap().is_none());
        assert!(!store.force_release("workflow:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = MemoryLockStore::new();
        store
            .try_acquire("workflow:1", "engine-1", LockType::Workflow, ttl(20), None)
            .await
            .unwrap();
        store
            .try_acquire("workflow:2", "engine-1", LockType::Workflow, ttl(30_000), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert!(store.get("workflow:1").await.unwrap().is_none());
        assert!(store.get("workflow:2").await.unwrap().is_some());
        // Idempotent.
        assert_eq!(store.cleanup_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_payload_round_trip() {
        let store = MemoryLockStore::new();
        let payload = json!({"instance_id": "wf-42", "acquired_at": "2025-01-01T00:00:00Z"});
        let lock = store
            .try_acquire(
                "workflow:42",
                "engine-1",
                LockType::Workflow,
                ttl(30_000),
                Some(payload.clone()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lock.payload, Some(payload));
    }

    #[tokio::test]
    async fn test_concurrent_acquirers_single_winner() {
        let store = Arc::new(MemoryLockStore::new());
        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_acquire("workflow:race", &format!("engine-{i}"), LockType::Workflow, Duration::from_secs(30), None)
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

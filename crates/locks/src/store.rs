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

//! Lock store trait - the single atomic primitive every backend must provide.

use crate::types::{Lock, LockType};
use crate::LockResult;
use async_trait::async_trait;
use std::time::Duration;

/// Persistent table of named locks.
///
/// ## Purpose
/// Backends implement the one primitive that makes distributed locking
/// race-free: **insert-if-absent-or-expired** as a single atomic operation.
/// Everything else (release, renew, cleanup) is owner-checked row mutation.
///
/// ## Contention semantics
/// Methods return `None`/`false` for the routine "someone else holds it"
/// outcome. Errors are reserved for backend failures.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically acquire the lock if no row exists, the existing row is
    /// expired, or the existing row belongs to the same owner (refresh).
    ///
    /// ## Returns
    /// - `Ok(Some(Lock))`: acquired (or refreshed); lease runs `ttl` from now
    /// - `Ok(None)`: held by a different, non-expired owner
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
        payload: Option<serde_json::Value>,
    ) -> LockResult<Option<Lock>>;

    /// Delete the row only if `owner` matches.
    ///
    /// ## Returns
    /// - `Ok(true)`: released
    /// - `Ok(false)`: not found or owner mismatch (caller may have already
    ///   lost the lock to expiry - routine, not an error)
    async fn release(&self, key: &str, owner: &str) -> LockResult<bool>;

    /// Extend `expires_at` to `now + ttl` only if `owner` matches and the
    /// row has not expired.
    ///
    /// ## Returns
    /// - `Ok(Some(Lock))`: renewed, with a fresh version
    /// - `Ok(None)`: not found, owner mismatch, or already expired
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<Option<Lock>>;

    /// Read-only snapshot of the row, expired or not.
    async fn get(&self, key: &str) -> LockResult<Option<Lock>>;

    /// Administrative delete regardless of owner (used during failover).
    ///
    /// Returns `true` if a row was deleted.
    async fn force_release(&self, key: &str) -> LockResult<bool>;

    /// Bulk-delete rows whose lease has passed. Idempotent; safe to run
    /// concurrently with every other operation.
    ///
    /// Returns the number of rows deleted.
    async fn cleanup_expired(&self) -> LockResult<u64>;
}

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

//! SQLite-based lock store.
//!
//! Row-based, transactional locks with explicit lease semantics. Acquire
//! runs SELECT + conditional INSERT/UPDATE inside one transaction, which is
//! the "insert if absent or expired" primitive the rest of the system
//! relies on. PostgreSQL can be added by following the same pattern with a
//! `PgPool`.

use crate::store::LockStore;
use crate::types::{Lock, LockType};
use crate::{LockError, LockResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::instrument;
use ulid::Ulid;

/// SQLite-based lock store.
///
/// Uses a single `locks` table:
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS locks (
///   lock_key TEXT PRIMARY KEY,
///   owner TEXT NOT NULL,
///   lock_type TEXT NOT NULL,
///   version TEXT NOT NULL,
///   expires_at INTEGER NOT NULL,
///   created_at INTEGER NOT NULL,
///   last_renewed_at INTEGER NOT NULL,
///   payload TEXT
/// );
/// ```
///
/// Timestamps are stored as UNIX epoch milliseconds; `payload` is
/// JSON-encoded.
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    /// Create a new SQLite lock store.
    ///
    /// `database_url` is any valid `sqlx` SQLite URL, e.g.
    /// `sqlite://locks.db?mode=rwc`.
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> LockResult<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| LockError::BackendError(format!("failed to connect SQLite: {e}")))?;
        Self::with_pool(pool).await
    }

    /// Create a lock store over an existing pool (shared-database setups).
    pub async fn with_pool(pool: SqlitePool) -> LockResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
              lock_key TEXT PRIMARY KEY,
              owner TEXT NOT NULL,
              lock_type TEXT NOT NULL,
              version TEXT NOT NULL,
              expires_at INTEGER NOT NULL,
              created_at INTEGER NOT NULL,
              last_renewed_at INTEGER NOT NULL,
              payload TEXT
            );
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| LockError::BackendError(format!("failed to create locks table: {e}")))?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_locks_expires_at ON locks(expires_at);"#,
        )
        .execute(&pool)
        .await
        .map_err(|e| LockError::BackendError(format!("failed to create index: {e}")))?;

        Ok(Self { pool })
    }

    fn now_epoch_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn dt_from_ms(ms: i64) -> LockResult<DateTime<Utc>> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| LockError::BackendError(format!("invalid timestamp: {ms}")))
    }

    fn lock_from_row(row: &sqlx::sqlite::SqliteRow) -> LockResult<Lock> {
        let lock_type_str: String = row.get("lock_type");
        let lock_type = LockType::parse(&lock_type_str)
            .ok_or_else(|| LockError::BackendError(format!("invalid lock_type: {lock_type_str}")))?;
        let payload_json: Option<String> = row.get("payload");
        let payload = match payload_json {
            Some(json) if !json.is_empty() => Some(serde_json::from_str(&json)?),
            _ => None,
        };

        Ok(Lock {
            key: row.get("lock_key"),
            owner: row.get("owner"),
            lock_type,
            version: row.get("version"),
            expires_at: Self::dt_from_ms(row.get("expires_at"))?,
            created_at: Self::dt_from_ms(row.get("created_at"))?,
            last_renewed_at: Self::dt_from_ms(row.get("last_renewed_at"))?,
            payload,
        })
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    #[instrument(skip(self, payload), fields(key = %key, owner = %owner))]
    async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        lock_type: LockType,
        ttl: Duration,
        payload: Option<serde_json::Value>,
    ) -> LockResult<Option<Lock>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LockError::BackendError(format!("begin tx: {e}")))?;

        let now = Self::now_epoch_ms();
        let expires_at = now + ttl.as_millis() as i64;
        let payload_json = payload.as_ref().map(serde_json::to_string).transpose()?;

        let row = sqlx::query(
            r#"SELECT lock_key, owner, lock_type, version, expires_at, created_at,
                      last_renewed_at, payload
               FROM locks WHERE lock_key = ?1"#,
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| LockError::BackendError(format!("select lock: {e}")))?;

        if let Some(row) = row {
            let row_owner: String = row.get("owner");
            let row_expires_at: i64 = row.get("expires_at");
            let row_created_at: i64 = row.get("created_at");
            let row_payload: Option<String> = row.get("payload");

            let expired = row_expires_at <= now;
            if !expired && row_owner != owner {
                // Held by someone else - routine contention outcome.
                return Ok(None);
            }

            // Expired, or a same-owner refresh: take over the row.
            let created_at = if expired { now } else { row_created_at };
            let version = Ulid::new().to_string();
            let payload_new = payload_json.or(row_payload);

            sqlx::query(
                r#"UPDATE locks
                   SET owner = ?2,
                       lock_type = ?3,
                       version = ?4,
                       expires_at = ?5,
                       created_at = ?6,
                       last_renewed_at = ?7,
                       payload = ?8
                 WHERE lock_key = ?1"#,
            )
            .bind(key)
            .bind(owner)
            .bind(lock_type.as_str())
            .bind(&version)
            .bind(expires_at)
            .bind(created_at)
            .bind(now)
            .bind(payload_new.clone())
            .execute(&mut *tx)
            .await
            .map_err(|e| LockError::BackendError(format!("update lock: {e}")))?;

            tx.commit()
                .await
                .map_err(|e| LockError::BackendError(format!("commit tx: {e}")))?;

            return Ok(Some(Lock {
                key: key.to_string(),
                owner: owner.to_string(),
                lock_type,
                version,
                expires_at: Self::dt_from_ms(expires_at)?,
                created_at: Self::dt_from_ms(created_at)?,
                last_renewed_at: Self::dt_from_ms(now)?,
                payload: payload_new
                    .map(|json| serde_json::from_str(&json))
                    .transpose()?,
            }));
        }

        // No existing row - insert new.
        let version = Ulid::new().to_string();
        sqlx::query(
            r#"INSERT INTO locks
               (lock_key, owner, lock_type, version, expires_at, created_at, last_renewed_at, payload)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )
        .bind(key)
        .bind(owner)
        .bind(lock_type.as_str())
        .bind(&version)
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .bind(payload_json.clone())
        .execute(&mut *tx)
        .await
        .map_err(|e| LockError::BackendError(format!("insert lock: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| LockError::BackendError(format!("commit tx: {e}")))?;

        Ok(Some(Lock {
            key: key.to_string(),
            owner: owner.to_string(),
            lock_type,
            version,
            expires_at: Self::dt_from_ms(expires_at)?,
            created_at: Self::dt_from_ms(now)?,
            last_renewed_at: Self::dt_from_ms(now)?,
            payload,
        }))
    }

    #[instrument(skip(self), fields(key = %key, owner = %owner))]
    async fn release(&self, key: &str, owner: &str) -> LockResult<bool> {
        let result = sqlx::query(r#"DELETE FROM locks WHERE lock_key = ?1 AND owner = ?2"#)
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::BackendError(format!("delete lock: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(key = %key, owner = %owner))]
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<Option<Lock>> {
        let now = Self::now_epoch_ms();
        let expires_at = now + ttl.as_millis() as i64;
        let version = Ulid::new().to_string();

        // Owner and liveness checks happen in the WHERE clause, so a stale
        // former owner can never extend a lock it no longer holds.
        let result = sqlx::query(
            r#"UPDATE locks
               SET version = ?3, expires_at = ?4, last_renewed_at = ?5
             WHERE lock_key = ?1 AND owner = ?2 AND expires_at > ?5"#,
        )
        .bind(key)
        .bind(owner)
        .bind(&version)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::BackendError(format!("renew lock: {e}")))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(key).await
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> LockResult<Option<Lock>> {
        let row = sqlx::query(
            r#"SELECT lock_key, owner, lock_type, version, expires_at, created_at,
                      last_renewed_at, payload
               FROM locks WHERE lock_key = ?1"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::BackendError(format!("select lock: {e}")))?;

        row.as_ref().map(Self::lock_from_row).transpose()
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn force_release(&self, key: &str) -> LockResult<bool> {
        let result = sqlx::query(r#"DELETE FROM locks WHERE lock_key = ?1"#)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::BackendError(format!("force delete lock: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn cleanup_expired(&self) -> LockResult<u64> {
        let result = sqlx::query(r#"DELETE FROM locks WHERE expires_at <= ?1"#)
            .bind(Self::now_epoch_ms())
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::BackendError(format!("cleanup locks: {e}")))?;
        Ok(result.rows_affected())
    }
}

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

//! SQLite-based engine registry.
//!
//! Four tables back the registry: `engines`, `workflow_assignments`,
//! `node_assignments`, and `failover_events`. Timestamps are stored as
//! UNIX epoch milliseconds; executor lists and load gauges are
//! JSON-encoded. `failover_assignments` is overridden to run the whole
//! transfer in one transaction, so a crash mid-failover never strands
//! half the dead engine's work on it.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::EngineRegistry;
use crate::types::{
    AssignedNodeState, EngineInstance, EngineLoad, EngineStatus, FailoverEvent, NodeAssignment,
    TransferredWork, WorkflowAssignment,
};

/// Durable registry over SQLite.
#[derive(Clone)]
pub struct SqliteEngineRegistry {
    pool: SqlitePool,
}

impl SqliteEngineRegistry {
    /// Connect and create the schema if it does not exist.
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> SchedulerResult<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| SchedulerError::RegistryError(format!("failed to connect SQLite: {e}")))?;
        Self::with_pool(pool).await
    }

    /// Create a registry over an existing pool (shared-database setups).
    pub async fn with_pool(pool: SqlitePool) -> SchedulerResult<Self> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS engines (
              instance_id TEXT PRIMARY KEY,
              hostname TEXT NOT NULL,
              supported_executors TEXT NOT NULL,
              load TEXT NOT NULL,
              last_heartbeat INTEGER NOT NULL,
              status TEXT NOT NULL,
              registered_at INTEGER NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_engines_heartbeat ON engines(last_heartbeat);"#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_assignments (
              workflow_instance_id TEXT PRIMARY KEY,
              engine_id TEXT NOT NULL,
              assigned_at INTEGER NOT NULL,
              reason TEXT NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_wf_assign_engine ON workflow_assignments(engine_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS node_assignments (
              workflow_instance_id TEXT NOT NULL,
              node_id TEXT NOT NULL,
              engine_id TEXT NOT NULL,
              assigned_at INTEGER NOT NULL,
              reason TEXT NOT NULL,
              state TEXT NOT NULL,
              PRIMARY KEY (workflow_instance_id, node_id)
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS idx_node_assign_engine ON node_assignments(engine_id);"#,
            r#"
            CREATE TABLE IF NOT EXISTS failover_events (
              event_id TEXT PRIMARY KEY,
              failed_engine_id TEXT NOT NULL,
              takeover_engine_id TEXT NOT NULL,
              affected_workflows TEXT NOT NULL,
              affected_nodes TEXT NOT NULL,
              failed_over_at INTEGER NOT NULL,
              reason TEXT NOT NULL
            );
            "#,
        ];
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&pool)
                .await
                .map_err(|e| SchedulerError::RegistryError(format!("failed to create schema: {e}")))?;
        }
        Ok(Self { pool })
    }

    fn dt_from_ms(ms: i64) -> SchedulerResult<DateTime<Utc>> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| SchedulerError::RegistryError(format!("invalid timestamp: {ms}")))
    }

    fn engine_from_row(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<EngineInstance> {
        let status_str: String = row.get("status");
        let status = EngineStatus::parse(&status_str)
            .ok_or_else(|| SchedulerError::RegistryError(format!("invalid status: {status_str}")))?;
        let executors_json: String = row.get("supported_executors");
        let load_json: String = row.get("load");

        Ok(EngineInstance {
            instance_id: row.get("instance_id"),
            hostname: row.get("hostname"),
            supported_executors: serde_json::from_str(&executors_json)?,
            load: serde_json::from_str(&load_json)?,
            last_heartbeat: Self::dt_from_ms(row.get("last_heartbeat"))?,
            status,
            registered_at: Self::dt_from_ms(row.get("registered_at"))?,
        })
    }

    fn workflow_assignment_from_row(
        row: &sqlx::sqlite::SqliteRow,
    ) -> SchedulerResult<WorkflowAssignment> {
        Ok(WorkflowAssignment {
            workflow_instance_id: row.get("workflow_instance_id"),
            engine_id: row.get("engine_id"),
            assigned_at: Self::dt_from_ms(row.get("assigned_at"))?,
            reason: row.get("reason"),
        })
    }

    fn node_assignment_from_row(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<NodeAssignment> {
        let state_str: String = row.get("state");
        let state = AssignedNodeState::parse(&state_str)
            .ok_or_else(|| SchedulerError::RegistryError(format!("invalid node state: {state_str}")))?;
        Ok(NodeAssignment {
            workflow_instance_id: row.get("workflow_instance_id"),
            node_id: row.get("node_id"),
            engine_id: row.get("engine_id"),
            assigned_at: Self::dt_from_ms(row.get("assigned_at"))?,
            reason: row.get("reason"),
            state,
        })
    }
}

#[async_trait]
impl EngineRegistry for SqliteEngineRegistry {
    #[instrument(skip(self, engine), fields(instance_id = %engine.instance_id))]
    async fn save_engine(&self, engine: &EngineInstance) -> SchedulerResult<()> {
        sqlx::query(
            r#"INSERT INTO engines
               (instance_id, hostname, supported_executors, load, last_heartbeat, status, registered_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(instance_id) DO UPDATE SET
                 hostname = excluded.hostname,
                 supported_executors = excluded.supported_executors,
                 load = excluded.load,
                 last_heartbeat = excluded.last_heartbeat,
                 status = excluded.status,
                 registered_at = excluded.registered_at"#,
        )
        .bind(&engine.instance_id)
        .bind(&engine.hostname)
        .bind(serde_json::to_string(&engine.supported_executors)?)
        .bind(serde_json::to_string(&engine.load)?)
        .bind(engine.last_heartbeat.timestamp_millis())
        .bind(engine.status.as_str())
        .bind(engine.registered_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("save engine: {e}")))?;
        Ok(())
    }

    async fn get_engine(&self, instance_id: &str) -> SchedulerResult<Option<EngineInstance>> {
        let row = sqlx::query(r#"SELECT * FROM engines WHERE instance_id = ?1"#)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SchedulerError::RegistryError(format!("select engine: {e}")))?;
        row.as_ref().map(Self::engine_from_row).transpose()
    }

    async fn list_engines(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Vec<EngineInstance>> {
        let rows = match updated_since {
            Some(since) => {
                let ms = since.timestamp_millis();
                sqlx::query(
                    r#"SELECT * FROM engines
                       WHERE last_heartbeat >= ?1 OR registered_at >= ?1
                       ORDER BY instance_id"#,
                )
                .bind(ms)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(r#"SELECT * FROM engines ORDER BY instance_id"#)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| SchedulerError::RegistryError(format!("list engines: {e}")))?;

        rows.iter().map(Self::engine_from_row).collect()
    }

    #[instrument(skip(self, load), fields(instance_id = %instance_id))]
    async fn update_heartbeat(
        &self,
        instance_id: &str,
        load: &EngineLoad,
        at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"UPDATE engines SET last_heartbeat = ?2, load = ?3 WHERE instance_id = ?1"#,
        )
        .bind(instance_id)
        .bind(at.timestamp_millis())
        .bind(serde_json::to_string(load)?)
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("update heartbeat: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(instance_id = %instance_id))]
    async fn mark_inactive(&self, instance_id: &str) -> SchedulerResult<bool> {
        let result = sqlx::query(r#"UPDATE engines SET status = 'inactive' WHERE instance_id = ?1"#)
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SchedulerError::RegistryError(format!("mark inactive: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn purge_engines_stale_since(&self, cutoff: DateTime<Utc>) -> SchedulerResult<u64> {
        let result = sqlx::query(r#"DELETE FROM engines WHERE last_heartbeat < ?1"#)
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| SchedulerError::RegistryError(format!("purge engines: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn save_workflow_assignment(
        &self,
        assignment: &WorkflowAssignment,
    ) -> SchedulerResult<()> {
        sqlx::query(
            r#"INSERT INTO workflow_assignments
               (workflow_instance_id, engine_id, assigned_at, reason)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(workflow_instance_id) DO UPDATE SET
                 engine_id = excluded.engine_id,
                 assigned_at = excluded.assigned_at,
                 reason = excluded.reason"#,
        )
        .bind(&assignment.workflow_instance_id)
        .bind(&assignment.engine_id)
        .bind(assignment.assigned_at.timestamp_millis())
        .bind(&assignment.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("save workflow assignment: {e}")))?;
        Ok(())
    }

    async fn save_node_assignment(&self, assignment: &NodeAssignment) -> SchedulerResult<()> {
        sqlx::query(
            r#"INSERT INTO node_assignments
               (workflow_instance_id, node_id, engine_id, assigned_at, reason, state)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(workflow_instance_id, node_id) DO UPDATE SET
                 engine_id = excluded.engine_id,
                 assigned_at = excluded.assigned_at,
                 reason = excluded.reason,
                 state = excluded.state"#,
        )
        .bind(&assignment.workflow_instance_id)
        .bind(&assignment.node_id)
        .bind(&assignment.engine_id)
        .bind(assignment.assigned_at.timestamp_millis())
        .bind(&assignment.reason)
        .bind(assignment.state.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("save node assignment: {e}")))?;
        Ok(())
    }

    async fn find_workflows_by_engine(
        &self,
        engine_id: &str,
    ) -> SchedulerResult<Vec<WorkflowAssignment>> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_assignments
               WHERE engine_id = ?1 ORDER BY workflow_instance_id"#,
        )
        .bind(engine_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("find workflows: {e}")))?;

        rows.iter().map(Self::workflow_assignment_from_row).collect()
    }

    async fn find_nodes_by_engine(
        &self,
        engine_id: &str,
    ) -> SchedulerResult<Vec<NodeAssignment>> {
        let rows = sqlx::query(
            r#"SELECT * FROM node_assignments
               WHERE engine_id = ?1 ORDER BY workflow_instance_id, node_id"#,
        )
        .bind(engine_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("find nodes: {e}")))?;

        rows.iter().map(Self::node_assignment_from_row).collect()
    }

    /// Transactional override: the reads, both reassignment updates, and
    /// the node-state reset either all commit or none do.
    #[instrument(skip(self), fields(from = %from_engine, to = %to_engine))]
    async fn failover_assignments(
        &self,
        from_engine: &str,
        to_engine: &str,
        reason: &str,
    ) -> SchedulerResult<TransferredWork> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SchedulerError::RegistryError(format!("begin tx: {e}")))?;

        let now = Utc::now().timestamp_millis();

        let wf_rows = sqlx::query(
            r#"SELECT workflow_instance_id FROM workflow_assignments
               WHERE engine_id = ?1 ORDER BY workflow_instance_id"#,
        )
        .bind(from_engine)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("select workflows: {e}")))?;

        let node_rows = sqlx::query(
            r#"SELECT workflow_instance_id, node_id FROM node_assignments
               WHERE engine_id = ?1 ORDER BY workflow_instance_id, node_id"#,
        )
        .bind(from_engine)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("select nodes: {e}")))?;

        sqlx::query(
            r#"UPDATE workflow_assignments
               SET engine_id = ?2, assigned_at = ?3, reason = ?4
             WHERE engine_id = ?1"#,
        )
        .bind(from_engine)
        .bind(to_engine)
        .bind(now)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("reassign workflows: {e}")))?;

        sqlx::query(
            r#"UPDATE node_assignments
               SET engine_id = ?2, assigned_at = ?3, reason = ?4, state = 'pending'
             WHERE engine_id = ?1"#,
        )
        .bind(from_engine)
        .bind(to_engine)
        .bind(now)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("reassign nodes: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| SchedulerError::RegistryError(format!("commit tx: {e}")))?;

        Ok(TransferredWork {
            workflow_ids: wf_rows
                .iter()
                .map(|r| r.get("workflow_instance_id"))
                .collect(),
            node_ids: node_rows
                .iter()
                .map(|r| (r.get("workflow_instance_id"), r.get("node_id")))
                .collect(),
        })
    }

    async fn record_failover(&self, event: &FailoverEvent) -> SchedulerResult<()> {
        sqlx::query(
            r#"INSERT INTO failover_events
               (event_id, failed_engine_id, takeover_engine_id, affected_workflows,
                affected_nodes, failed_over_at, reason)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )
        .bind(&event.event_id)
        .bind(&event.failed_engine_id)
        .bind(&event.takeover_engine_id)
        .bind(serde_json::to_string(&event.affected_workflows)?)
        .bind(serde_json::to_string(&event.affected_nodes)?)
        .bind(event.failed_over_at.timestamp_millis())
        .bind(&event.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("record failover: {e}")))?;
        Ok(())
    }

    async fn list_failover_events(&self, limit: u32) -> SchedulerResult<Vec<FailoverEvent>> {
        let rows = sqlx::query(
            r#"SELECT * FROM failover_events ORDER BY failed_over_at DESC, event_id DESC LIMIT ?1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SchedulerError::RegistryError(format!("list failovers: {e}")))?;

        rows.iter()
            .map(|row| {
                let workflows_json: String = row.get("affected_workflows");
                let nodes_json: String = row.get("affected_nodes");
                Ok(FailoverEvent {
                    event_id: row.get("event_id"),
                    failed_engine_id: row.get("failed_engine_id"),
                    takeover_engine_id: row.get("takeover_engine_id"),
                    affected_workflows: serde_json::from_str(&workflows_json)?,
                    affected_nodes: serde_json::from_str(&nodes_json)?,
                    failed_over_at: Self::dt_from_ms(row.get("failed_over_at"))?,
                    reason: row.get("reason"),
                })
            })
            .collect()
    }
}

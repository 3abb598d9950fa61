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

//! SQLite-based instance store.
//!
//! Two tables: `workflow_instances` and `node_instances` (keyed by
//! workflow + node id). Timestamps are UNIX epoch milliseconds; JSON
//! payloads are stored as TEXT.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::error::{WorkflowError, WorkflowResult};
use crate::storage::InstanceStore;
use crate::types::{NodeInstance, NodeStatus, NodeType, WorkflowInstance, WorkflowStatus};

/// Durable instance store over SQLite.
#[derive(Clone)]
pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl SqliteInstanceStore {
    /// Connect and create the schema if it does not exist.
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> WorkflowResult<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| WorkflowError::Storage(format!("failed to connect SQLite: {e}")))?;
        Self::with_pool(pool).await
    }

    /// Create a store over an existing pool (shared-database setups).
    pub async fn with_pool(pool: SqlitePool) -> WorkflowResult<Self> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workflow_instances (
              id TEXT PRIMARY KEY,
              definition_id TEXT NOT NULL,
              status TEXT NOT NULL,
              current_node_id TEXT,
              input_data TEXT NOT NULL,
              context_data TEXT NOT NULL,
              started_at INTEGER,
              completed_at INTEGER,
              interrupted_at INTEGER,
              error_message TEXT,
              retry_count INTEGER NOT NULL,
              max_retries INTEGER NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS node_instances (
              id TEXT NOT NULL,
              workflow_instance_id TEXT NOT NULL,
              node_id TEXT NOT NULL,
              node_name TEXT NOT NULL,
              node_type TEXT NOT NULL,
              executor TEXT NOT NULL,
              status TEXT NOT NULL,
              input_data TEXT NOT NULL,
              output_data TEXT,
              error_message TEXT,
              error_details TEXT,
              started_at INTEGER,
              completed_at INTEGER,
              duration_ms INTEGER,
              retry_count INTEGER NOT NULL,
              max_retries INTEGER NOT NULL,
              PRIMARY KEY (workflow_instance_id, node_id)
            );
            "#,
        ];
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&pool)
                .await
                .map_err(|e| WorkflowError::Storage(format!("failed to create schema: {e}")))?;
        }
        Ok(Self { pool })
    }

    fn ms_opt(dt: Option<DateTime<Utc>>) -> Option<i64> {
        dt.map(|d| d.timestamp_millis())
    }

    fn dt_opt(ms: Option<i64>) -> WorkflowResult<Option<DateTime<Utc>>> {
        ms.map(|ms| {
            Utc.timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| WorkflowError::Storage(format!("invalid timestamp: {ms}")))
        })
        .transpose()
    }

    fn instance_from_row(row: &sqlx::sqlite::SqliteRow) -> WorkflowResult<WorkflowInstance> {
        let status_str: String = row.get("status");
        let status = WorkflowStatus::parse(&status_str)
            .ok_or_else(|| WorkflowError::Storage(format!("invalid status: {status_str}")))?;
        let input_json: String = row.get("input_data");
        let context_json: String = row.get("context_data");

        Ok(WorkflowInstance {
            id: row.get("id"),
            definition_id: row.get("definition_id"),
            status,
            current_node_id: row.get("current_node_id"),
            input_data: serde_json::from_str(&input_json)?,
            context_data: serde_json::from_str(&context_json)?,
            started_at: Self::dt_opt(row.get("started_at"))?,
            completed_at: Self::dt_opt(row.get("completed_at"))?,
            interrupted_at: Self::dt_opt(row.get("interrupted_at"))?,
            error_message: row.get("error_message"),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
        })
    }

    fn node_from_row(row: &sqlx::sqlite::SqliteRow) -> WorkflowResult<NodeInstance> {
        let status_str: String = row.get("status");
        let status = NodeStatus::parse(&status_str)
            .ok_or_else(|| WorkflowError::Storage(format!("invalid node status: {status_str}")))?;
        let type_str: String = row.get("node_type");
        let node_type = NodeType::parse(&type_str)
            .ok_or_else(|| WorkflowError::Storage(format!("invalid node type: {type_str}")))?;
        let input_json: String = row.get("input_data");
        let output_json: Option<String> = row.get("output_data");
        let details_json: Option<String> = row.get("error_details");

        Ok(NodeInstance {
            id: row.get("id"),
            workflow_instance_id: row.get("workflow_instance_id"),
            node_id: row.get("node_id"),
            node_name: row.get("node_name"),
            node_type,
            executor: row.get("executor"),
            status,
            input_data: serde_json::from_str(&input_json)?,
            output_data: output_json.map(|j| serde_json::from_str(&j)).transpose()?,
            error_message: row.get("error_message"),
            error_details: details_json.map(|j| serde_json::from_str(&j)).transpose()?,
            started_at: Self::dt_opt(row.get("started_at"))?,
            completed_at: Self::dt_opt(row.get("completed_at"))?,
            duration_ms: row.get("duration_ms"),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
        })
    }
}

#[async_trait]
impl InstanceStore for SqliteInstanceStore {
    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    async fn create_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()> {
        sqlx::query(
            r#"INSERT INTO workflow_instances
               (id, definition_id, status, current_node_id, input_data, context_data,
                started_at, completed_at, interrupted_at, error_message, retry_count, max_retries)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
        )
        .bind(&instance.id)
        .bind(&instance.definition_id)
        .bind(instance.status.as_str())
        .bind(&instance.current_node_id)
        .bind(serde_json::to_string(&instance.input_data)?)
        .bind(serde_json::to_string(&instance.context_data)?)
        .bind(Self::ms_opt(instance.started_at))
        .bind(Self::ms_opt(instance.completed_at))
        .bind(Self::ms_opt(instance.interrupted_at))
        .bind(&instance.error_message)
        .bind(instance.retry_count as i64)
        .bind(instance.max_retries as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("create instance: {e}")))?;
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> WorkflowResult<Option<WorkflowInstance>> {
        let row = sqlx::query(r#"SELECT * FROM workflow_instances WHERE id = ?1"#)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WorkflowError::Storage(format!("select instance: {e}")))?;
        row.as_ref().map(Self::instance_from_row).transpose()
    }

    #[instrument(skip(self, instance), fields(instance_id = %instance.id, status = %instance.status))]
    async fn update_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()> {
        let result = sqlx::query(
            r#"UPDATE workflow_instances
               SET status = ?2, current_node_id = ?3, input_data = ?4, context_data = ?5,
                   started_at = ?6, completed_at = ?7, interrupted_at = ?8,
                   error_message = ?9, retry_count = ?10, max_retries = ?11
             WHERE id = ?1"#,
        )
        .bind(&instance.id)
        .bind(instance.status.as_str())
        .bind(&instance.current_node_id)
        .bind(serde_json::to_string(&instance.input_data)?)
        .bind(serde_json::to_string(&instance.context_data)?)
        .bind(Self::ms_opt(instance.started_at))
        .bind(Self::ms_opt(instance.completed_at))
        .bind(Self::ms_opt(instance.interrupted_at))
        .bind(&instance.error_message)
        .bind(instance.retry_count as i64)
        .bind(instance.max_retries as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("update instance: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::NotFound(format!(
                "instance '{}'",
                instance.id
            )));
        }
        Ok(())
    }

    async fn save_node_instance(&self, node: &NodeInstance) -> WorkflowResult<()> {
        sqlx::query(
            r#"INSERT INTO node_instances
               (id, workflow_instance_id, node_id, node_name, node_type, executor, status,
                input_data, output_data, error_message, error_details,
                started_at, completed_at, duration_ms, retry_count, max_retries)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
               ON CONFLICT(workflow_instance_id, node_id) DO UPDATE SET
                 status = excluded.status,
                 input_data = excluded.input_data,
                 output_data = excluded.output_data,
                 error_message = excluded.error_message,
                 error_details = excluded.error_details,
                 started_at = excluded.started_at,
                 completed_at = excluded.completed_at,
                 duration_ms = excluded.duration_ms,
                 retry_count = excluded.retry_count,
                 max_retries = excluded.max_retries"#,
        )
        .bind(&node.id)
        .bind(&node.workflow_instance_id)
        .bind(&node.node_id)
        .bind(&node.node_name)
        .bind(node.node_type.as_str())
        .bind(&node.executor)
        .bind(node.status.as_str())
        .bind(serde_json::to_string(&node.input_data)?)
        .bind(
            node.output_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(&node.error_message)
        .bind(
            node.error_details
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(Self::ms_opt(node.started_at))
        .bind(Self::ms_opt(node.completed_at))
        .bind(node.duration_ms)
        .bind(node.retry_count as i64)
        .bind(node.max_retries as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("save node instance: {e}")))?;
        Ok(())
    }

    async fn get_node_instance(
        &self,
        workflow_instance_id: &str,
        node_id: &str,
    ) -> WorkflowResult<Option<NodeInstance>> {
        let row = sqlx::query(
            r#"SELECT * FROM node_instances WHERE workflow_instance_id = ?1 AND node_id = ?2"#,
        )
        .bind(workflow_instance_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("select node instance: {e}")))?;
        row.as_ref().map(Self::node_from_row).transpose()
    }

    async fn list_node_instances(
        &self,
        workflow_instance_id: &str,
    ) -> WorkflowResult<Vec<NodeInstance>> {
        let rows = sqlx::query(
            r#"SELECT * FROM node_instances WHERE workflow_instance_id = ?1 ORDER BY node_id"#,
        )
        .bind(workflow_instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WorkflowError::Storage(format!("list node instances: {e}")))?;
        rows.iter().map(Self::node_from_row).collect()
    }
}

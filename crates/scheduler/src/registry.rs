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

//! ## Purpose
//!
//! Storage abstraction for cluster membership and work assignments. Every
//! scheduler in the cluster points at the same registry backend; the
//! registry is the shared source of truth for which engines exist, which
//! work is assigned where, and what failovers have happened.
//!
//! ## Design
//!
//! The trait is deliberately backend-shaped rather than domain-shaped:
//! each method maps to one or a few storage statements so that backends
//! can make the right atomicity calls. `failover_assignments` has a
//! default implementation composed from the granular methods; the SQL
//! backend overrides it to run the whole transfer in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(feature = "memory-backend")]
pub mod memory;
#[cfg(feature = "sqlite-backend")]
pub mod sql;

use crate::error::SchedulerResult;
use crate::types::{
    EngineInstance, EngineLoad, FailoverEvent, NodeAssignment, TransferredWork,
    WorkflowAssignment,
};

/// Shared store for engine membership, assignments, and failover history.
#[async_trait]
pub trait EngineRegistry: Send + Sync {
    /// Insert or fully replace an engine record.
    async fn save_engine(&self, engine: &EngineInstance) -> SchedulerResult<()>;

    /// Fetch a single engine by id.
    async fn get_engine(&self, instance_id: &str) -> SchedulerResult<Option<EngineInstance>>;

    /// List engines, optionally only those whose heartbeat (or registration)
    /// changed since the given instant. `None` returns everything.
    async fn list_engines(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Vec<EngineInstance>>;

    /// Refresh an engine's heartbeat and load gauges. Returns false when the
    /// engine is unknown (caller should re-register).
    async fn update_heartbeat(
        &self,
        instance_id: &str,
        load: &EngineLoad,
        at: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// Flip an engine to `Inactive`. Returns false when unknown.
    async fn mark_inactive(&self, instance_id: &str) -> SchedulerResult<bool>;

    /// Delete engine rows whose heartbeat is older than `cutoff`. Returns
    /// the number of rows removed.
    async fn purge_engines_stale_since(&self, cutoff: DateTime<Utc>) -> SchedulerResult<u64>;

    /// Record (or move) a workflow-to-engine assignment.
    async fn save_workflow_assignment(
        &self,
        assignment: &WorkflowAssignment,
    ) -> SchedulerResult<()>;

    /// Record (or move) a node-to-engine assignment.
    async fn save_node_assignment(&self, assignment: &NodeAssignment) -> SchedulerResult<()>;

    /// All workflow assignments currently pointing at the given engine.
    async fn find_workflows_by_engine(
        &self,
        engine_id: &str,
    ) -> SchedulerResult<Vec<WorkflowAssignment>>;

    /// All node assignments currently pointing at the given engine.
    async fn find_nodes_by_engine(&self, engine_id: &str)
        -> SchedulerResult<Vec<NodeAssignment>>;

    /// Move every assignment off `from_engine` onto `to_engine`, resetting
    /// transferred nodes to a re-runnable state.
    ///
    /// The default implementation composes the granular methods and is not
    /// atomic across assignments; backends with transactions should
    /// override it so a crash mid-transfer cannot strand half the work.
    async fn failover_assignments(
        &self,
        from_engine: &str,
        to_engine: &str,
        reason: &str,
    ) -> SchedulerResult<TransferredWork> {
        let now = Utc::now();
        let mut transferred = TransferredWork::default();

        for wf in self.find_workflows_by_engine(from_engine).await? {
            self.save_workflow_assignment(&WorkflowAssignment {
                workflow_instance_id: wf.workflow_instance_id.clone(),
                engine_id: to_engine.to_string(),
                assigned_at: now,
                reason: reason.to_string(),
            })
            .await?;
            transferred.workflow_ids.push(wf.workflow_instance_id);
        }

        for node in self.find_nodes_by_engine(from_engine).await? {
            self.save_node_assignment(&NodeAssignment {
                workflow_instance_id: node.workflow_instance_id.clone(),
                node_id: node.node_id.clone(),
                engine_id: to_engine.to_string(),
                assigned_at: now,
                reason: reason.to_string(),
                state: crate::types::AssignedNodeState::Pending,
            })
            .await?;
            transferred
                .node_ids
                .push((node.workflow_instance_id, node.node_id));
        }

        Ok(transferred)
    }

    /// Append a failover audit record.
    async fn record_failover(&self, event: &FailoverEvent) -> SchedulerResult<()>;

    /// Failover history, newest first.
    async fn list_failover_events(&self, limit: u32) -> SchedulerResult<Vec<FailoverEvent>>;
}

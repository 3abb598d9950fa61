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

//! In-memory engine registry for tests and single-process deployments.
//!
//! All state lives behind tokio `RwLock`s; cloning the registry shares the
//! underlying maps, so several scheduler instances in one process can use
//! it as their common store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::SchedulerResult;
use crate::registry::EngineRegistry;
use crate::types::{
    EngineInstance, EngineLoad, EngineStatus, FailoverEvent, NodeAssignment, WorkflowAssignment,
};

/// Non-durable registry backed by hash maps.
#[derive(Clone, Default)]
pub struct MemoryEngineRegistry {
    engines: Arc<RwLock<HashMap<String, EngineInstance>>>,
    workflow_assignments: Arc<RwLock<HashMap<String, WorkflowAssignment>>>,
    node_assignments: Arc<RwLock<HashMap<(String, String), NodeAssignment>>>,
    failover_events: Arc<RwLock<Vec<FailoverEvent>>>,
}

impl MemoryEngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineRegistry for MemoryEngineRegistry {
    async fn save_engine(&self, engine: &EngineInstance) -> SchedulerResult<()> {
        self.engines
            .write()
            .await
            .insert(engine.instance_id.clone(), engine.clone());
        Ok(())
    }

    async fn get_engine(&self, instance_id: &str) -> SchedulerResult<Option<EngineInstance>> {
        Ok(self.engines.read().await.get(instance_id).cloned())
    }

    async fn list_engines(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Vec<EngineInstance>> {
        let engines = self.engines.read().await;
        let mut out: Vec<EngineInstance> = match updated_since {
            Some(since) => engines
                .values()
                .filter(|e| e.last_heartbeat >= since || e.registered_at >= since)
                .cloned()
                .collect(),
            None => engines.values().cloned().collect(),
        };
        out.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(out)
    }

    async fn update_heartbeat(
        &self,
        instance_id: &str,
        load: &EngineLoad,
        at: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut engines = self.engines.write().await;
        match engines.get_mut(instance_id) {
            Some(engine) => {
                engine.last_heartbeat = at;
                engine.load = load.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_inactive(&self, instance_id: &str) -> SchedulerResult<bool> {
        let mut engines = self.engines.write().await;
        match engines.get_mut(instance_id) {
            Some(engine) => {
                engine.status = EngineStatus::Inactive;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_engines_stale_since(&self, cutoff: DateTime<Utc>) -> SchedulerResult<u64> {
        let mut engines = self.engines.write().await;
        let before = engines.len();
        engines.retain(|_, e| e.last_heartbeat >= cutoff);
        Ok((before - engines.len()) as u64)
    }

    async fn save_workflow_assignment(
        &self,
        assignment: &WorkflowAssignment,
    ) -> SchedulerResult<()> {
        self.workflow_assignments
            .write()
            .await
            .insert(assignment.workflow_instance_id.clone(), assignment.clone());
        Ok(())
    }

    async fn save_node_assignment(&self, assignment: &NodeAssignment) -> SchedulerResult<()> {
        let key = (
            assignment.workflow_instance_id.clone(),
            assignment.node_id.clone(),
        );
        self.node_assignments
            .write()
            .await
            .insert(key, assignment.clone());
        Ok(())
    }

    async fn find_workflows_by_engine(
        &self,
        engine_id: &str,
    ) -> SchedulerResult<Vec<WorkflowAssignment>> {
        let mut out: Vec<WorkflowAssignment> = self
            .workflow_assignments
            .read()
            .await
            .values()
            .filter(|a| a.engine_id == engine_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.workflow_instance_id.cmp(&b.workflow_instance_id));
        Ok(out)
    }

    async fn find_nodes_by_engine(
        &self,
        engine_id: &str,
    ) -> SchedulerResult<Vec<NodeAssignment>> {
        let mut out: Vec<NodeAssignment> = self
            .node_assignments
            .read()
            .await
            .values()
            .filter(|a| a.engine_id == engine_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.workflow_instance_id.as_str(), a.node_id.as_str())
                .cmp(&(b.workflow_instance_id.as_str(), b.node_id.as_str()))
        });
        Ok(out)
    }

    async fn record_failover(&self, event: &FailoverEvent) -> SchedulerResult<()> {
        self.failover_events.write().await.push(event.clone());
        Ok(())
    }

    async fn list_failover_events(&self, limit: u32) -> SchedulerResult<Vec<FailoverEvent>> {
        let events = self.failover_events.read().await;
        Ok(events
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

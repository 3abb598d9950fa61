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

//! Storage abstraction for workflow and node instances.
//!
//! Any engine may read instances at any time; writes must come only from
//! the engine holding the corresponding workflow lock. The store does not
//! enforce that discipline, the engine does.

use async_trait::async_trait;

use crate::error::WorkflowResult;
use crate::types::{NodeInstance, WorkflowInstance};

#[cfg(feature = "memory-backend")]
pub mod memory;
#[cfg(feature = "sqlite-backend")]
pub mod sql;

/// Persistent store for workflow and node instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Persist a newly created workflow instance.
    async fn create_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()>;

    /// Point lookup by instance id.
    async fn get_instance(&self, instance_id: &str) -> WorkflowResult<Option<WorkflowInstance>>;

    /// Full-row update of an existing instance (status transitions,
    /// checkpoint advances).
    async fn update_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()>;

    /// Insert or replace a node instance, keyed by (workflow, node).
    async fn save_node_instance(&self, node: &NodeInstance) -> WorkflowResult<()>;

    /// Lookup one node's execution record within a workflow instance.
    async fn get_node_instance(
        &self,
        workflow_instance_id: &str,
        node_id: &str,
    ) -> WorkflowResult<Option<NodeInstance>>;

    /// All node records of a workflow instance, in node-id order.
    async fn list_node_instances(
        &self,
        workflow_instance_id: &str,
    ) -> WorkflowResult<Vec<NodeInstance>>;
}

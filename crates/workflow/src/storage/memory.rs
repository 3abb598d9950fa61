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

//! In-memory instance store for tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{WorkflowError, WorkflowResult};
use crate::storage::InstanceStore;
use crate::types::{NodeInstance, WorkflowInstance};

/// Non-durable store backed by hash maps. Cloning shares state.
#[derive(Clone, Default)]
pub struct MemoryInstanceStore {
    instances: Arc<RwLock<HashMap<String, WorkflowInstance>>>,
    nodes: Arc<RwLock<HashMap<(String, String), NodeInstance>>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn create_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(WorkflowError::Storage(format!(
                "instance '{}' already exists",
                instance.id
            )));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> WorkflowResult<Option<WorkflowInstance>> {
        Ok(self.instances.read().await.get(instance_id).cloned())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()> {
        let mut instances = self.instances.write().await;
        if !instances.contains_key(&instance.id) {
            return Err(WorkflowError::NotFound(format!(
                "instance '{}'",
                instance.id
            )));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn save_node_instance(&self, node: &NodeInstance) -> WorkflowResult<()> {
        let key = (node.workflow_instance_id.clone(), node.node_id.clone());
        self.nodes.write().await.insert(key, node.clone());
        Ok(())
    }

    async fn get_node_instance(
        &self,
        workflow_instance_id: &str,
        node_id: &str,
    ) -> WorkflowResult<Option<NodeInstance>> {
        let key = (workflow_instance_id.to_string(), node_id.to_string());
        Ok(self.nodes.read().await.get(&key).cloned())
    }

    async fn list_node_instances(
        &self,
        workflow_instance_id: &str,
    ) -> WorkflowResult<Vec<NodeInstance>> {
        let nodes = self.nodes.read().await;
        let mut out: Vec<NodeInstance> = nodes
            .values()
            .filter(|n| n.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeStatus, NodeType, WorkflowStatus};
    use serde_json::json;

    fn instance(id: &str) -> WorkflowInstance {
        WorkflowInstance {
            id: id.to_string(),
            definition_id: "def-1".to_string(),
            status: WorkflowStatus::Pending,
            current_node_id: None,
            input_data: json!({}),
            context_data: json!({}),
            started_at: None,
            completed_at: None,
            interrupted_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let store = MemoryInstanceStore::new();
        store.create_instance(&instance("wf-1")).await.unwrap();
        assert!(store.create_instance(&instance("wf-1")).await.is_err());

        let mut loaded = store.get_instance("wf-1").await.unwrap().unwrap();
        loaded.status = WorkflowStatus::Running;
        store.update_instance(&loaded).await.unwrap();
        assert_eq!(
            store.get_instance("wf-1").await.unwrap().unwrap().status,
            WorkflowStatus::Running
        );

        assert!(store.update_instance(&instance("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn test_node_instances_scoped_by_workflow() {
        let store = MemoryInstanceStore::new();
        for (wf, node) in [("wf-1", "a"), ("wf-1", "b"), ("wf-2", "a")] {
            store
                .save_node_instance(&NodeInstance {
                    id: ulid::Ulid::new().to_string(),
                    workflow_instance_id: wf.to_string(),
                    node_id: node.to_string(),
                    node_name: node.to_string(),
                    node_type: NodeType::Simple,
                    executor: "noop".to_string(),
                    status: NodeStatus::Pending,
                    input_data: json!({}),
                    output_data: None,
                    error_message: None,
                    error_details: None,
                    started_at: None,
                    completed_at: None,
                    duration_ms: None,
                    retry_count: 0,
                    max_retries: 0,
                })
                .await
                .unwrap();
        }

        let wf1 = store.list_node_instances("wf-1").await.unwrap();
        assert_eq!(wf1.len(), 2);
        assert_eq!(wf1[0].node_id, "a");
        assert!(store
            .get_node_instance("wf-2", "a")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_node_instance("wf-2", "b")
            .await
            .unwrap()
            .is_none());
    }
}

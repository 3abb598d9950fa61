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
//! The workflow execution engine: drives one instance at a time through
//! its node graph under the `workflow:<id>` lock, persisting a checkpoint
//! after every node so a different engine can resume after a failure.
//!
//! ## Design
//!
//! The lock and its auto-renewal are torn down on every exit path,
//! including executor panics; a stuck lock would deadlock the instance
//! cluster-wide until TTL expiry, so teardown happens in one place after
//! the run loop returns. Executor invocations run in their own spawned
//! task so a panic is contained as a join error and handled like any
//! other node failure.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use ulid::Ulid;

use flowmesh_locks::{DistributedLockManager, LockType};

use crate::error::{WorkflowError, WorkflowResult};
use crate::executor::{ExecutionContext, ExecutionResult};
use crate::params::coerce_input;
use crate::registry::ExecutorRegistry;
use crate::storage::InstanceStore;
use crate::types::{
    ExecutionOutcome, NodeDefinition, NodeInstance, NodeStatus, NodeType, WorkflowDefinition,
    WorkflowInstance, WorkflowStatus,
};

/// Engine execution settings.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// TTL of the per-instance execution lock
    pub lock_ttl: Duration,
    /// Auto-renewal cadence while executing; must be well below `lock_ttl`
    pub renewal_interval: Duration,
    /// Reject type mismatches instead of coercing start input
    pub strict_input: bool,
    /// Retry delay for nodes that configure none
    pub default_retry_delay: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            renewal_interval: Duration::from_secs(60),
            strict_input: false,
            default_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Drives workflow instances through their node graphs.
#[derive(Clone)]
pub struct WorkflowEngine {
    owner_id: String,
    store: Arc<dyn InstanceStore>,
    executors: ExecutorRegistry,
    locks: DistributedLockManager,
    config: ExecutionConfig,
}

impl WorkflowEngine {
    /// `owner_id` identifies this engine process as a lock owner; it must
    /// be globally unique and stable for the process lifetime.
    pub fn new(
        owner_id: impl Into<String>,
        store: Arc<dyn InstanceStore>,
        executors: ExecutorRegistry,
        locks: DistributedLockManager,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            store,
            executors,
            locks,
            config,
        }
    }

    /// Conventional owner id for a fresh engine process.
    pub fn generate_owner_id() -> String {
        format!(
            "engine-{}-{}",
            std::process::id(),
            Utc::now().timestamp_millis()
        )
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Validate input, create a new instance, and execute it.
    #[instrument(skip(self, definition, input), fields(definition_id = %definition.id))]
    pub async fn start_workflow(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> WorkflowResult<WorkflowInstance> {
        let input_data = coerce_input(&definition.input_schema, input, self.config.strict_input)?;

        let instance = WorkflowInstance {
            id: Ulid::new().to_string(),
            definition_id: definition.id.clone(),
            status: WorkflowStatus::Pending,
            current_node_id: None,
            input_data,
            context_data: json!({}),
            started_at: None,
            completed_at: None,
            interrupted_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: definition.max_retries,
        };
        self.store.create_instance(&instance).await?;
        info!(instance_id = %instance.id, "workflow instance created");

        self.execute_workflow_instance(definition, &instance.id)
            .await?;

        self.store
            .get_instance(&instance.id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("instance '{}'", instance.id)))
    }

    /// Execute (or resume) an instance under its workflow lock.
    ///
    /// Returns `LockHeldElsewhere` without touching the instance when
    /// another engine is already driving it.
    #[instrument(skip(self, definition), fields(instance_id = %instance_id, owner = %self.owner_id))]
    pub async fn execute_workflow_instance(
        &self,
        definition: &WorkflowDefinition,
        instance_id: &str,
    ) -> WorkflowResult<ExecutionOutcome> {
        let lock_key = format!("workflow:{instance_id}");
        let acquired = self
            .locks
            .acquire_lock(
                &lock_key,
                &self.owner_id,
                LockType::Workflow,
                self.config.lock_ttl,
                Some(json!({"instance_id": instance_id})),
            )
            .await?;
        if !acquired {
            debug!(key = %lock_key, "execution lock held elsewhere");
            return Ok(ExecutionOutcome::LockHeldElsewhere);
        }

        self.locks
            .enable_auto_renewal(
                &lock_key,
                &self.owner_id,
                self.config.lock_ttl,
                self.config.renewal_interval,
                None,
            )
            .await;

        let result = self.run_instance(definition, instance_id).await;

        // Teardown on every exit path. An unreleased lock blocks the
        // instance cluster-wide until TTL expiry.
        self.locks
            .disable_auto_renewal(&lock_key, &self.owner_id)
            .await;
        if let Err(e) = self.locks.release_lock(&lock_key, &self.owner_id).await {
            warn!(key = %lock_key, error = %e, "failed to release execution lock");
        }

        result
    }

    /// Re-enter an interrupted instance from its checkpoint.
    pub async fn resume_workflow(
        &self,
        definition: &WorkflowDefinition,
        instance_id: &str,
    ) -> WorkflowResult<ExecutionOutcome> {
        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("instance '{instance_id}'")))?;
        if instance.status != WorkflowStatus::Interrupted {
            return Err(WorkflowError::InvalidState(format!(
                "cannot resume instance '{instance_id}' in status {}",
                instance.status
            )));
        }
        self.execute_workflow_instance(definition, instance_id).await
    }

    /// Cooperative stop: flips the instance to `Interrupted`; an in-flight
    /// node runs to completion and the run loop observes the stop at the
    /// next checkpoint boundary.
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn stop_workflow(&self, instance_id: &str, reason: &str) -> WorkflowResult<()> {
        let mut instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("instance '{instance_id}'")))?;
        if instance.status.is_terminal() {
            return Err(WorkflowError::InvalidState(format!(
                "cannot stop instance '{instance_id}' in status {}",
                instance.status
            )));
        }
        instance.status = WorkflowStatus::Interrupted;
        instance.interrupted_at = Some(Utc::now());
        instance.error_message = Some(reason.to_string());
        self.store.update_instance(&instance).await?;
        info!(instance_id = %instance_id, reason = %reason, "workflow interrupted");
        Ok(())
    }

    async fn run_instance(
        &self,
        definition: &WorkflowDefinition,
        instance_id: &str,
    ) -> WorkflowResult<ExecutionOutcome> {
        let mut instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("instance '{instance_id}'")))?;

        match instance.status {
            WorkflowStatus::Completed => return Ok(ExecutionOutcome::Completed),
            WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
                return Err(WorkflowError::InvalidState(format!(
                    "instance '{instance_id}' is terminal ({})",
                    instance.status
                )))
            }
            _ => {}
        }

        instance.status = WorkflowStatus::Running;
        if instance.started_at.is_none() {
            instance.started_at = Some(Utc::now());
        }
        instance.interrupted_at = None;
        self.store.update_instance(&instance).await?;

        if definition.nodes.is_empty() {
            return self.complete_instance(instance).await;
        }

        let mut current_node_id = match &instance.current_node_id {
            Some(id) => {
                definition.node_index(id).ok_or_else(|| {
                    WorkflowError::InvalidDefinition(format!(
                        "checkpoint node '{id}' not in definition '{}'",
                        definition.id
                    ))
                })?;
                id.clone()
            }
            None => definition.nodes[0].id.clone(),
        };

        let mut visited: HashSet<String> = HashSet::new();
        loop {
            // Observe cooperative stops at the checkpoint boundary.
            let fresh = self
                .store
                .get_instance(instance_id)
                .await?
                .ok_or_else(|| WorkflowError::NotFound(format!("instance '{instance_id}'")))?;
            if fresh.status == WorkflowStatus::Interrupted {
                info!(instance_id = %instance_id, "stop observed at checkpoint boundary");
                return Ok(ExecutionOutcome::Interrupted);
            }
            instance = fresh;

            if !visited.insert(current_node_id.clone()) {
                return self
                    .fail_instance(
                        instance,
                        format!("routing loop detected at node '{current_node_id}'"),
                    )
                    .await;
            }

            let node = definition
                .nodes
                .iter()
                .find(|n| n.id == current_node_id)
                .ok_or_else(|| {
                    WorkflowError::InvalidDefinition(format!(
                        "node '{current_node_id}' not in definition '{}'",
                        definition.id
                    ))
                })?;

            // A node already completed on a previous run is never re-executed.
            let existing = self
                .store
                .get_node_instance(instance_id, &node.id)
                .await?;
            let output = match existing {
                Some(prior) if prior.status == NodeStatus::Completed => {
                    debug!(node = %node.id, "skipping completed node");
                    prior.output_data.unwrap_or(Value::Null)
                }
                prior => match self
                    .execute_node(definition, &instance, node, prior)
                    .await?
                {
                    Ok(output) => output,
                    Err(node_error) => {
                        return self
                            .fail_instance(
                                instance,
                                format!("node '{}' failed: {node_error}", node.id),
                            )
                            .await;
                    }
                },
            };

            let next = self.next_node_id(definition, node, &output);
            // Reload before persisting the checkpoint so a stop issued
            // while the node was running is not overwritten with a stale
            // Running status.
            instance = self
                .store
                .get_instance(instance_id)
                .await?
                .ok_or_else(|| WorkflowError::NotFound(format!("instance '{instance_id}'")))?;
            instance.current_node_id = next.clone();
            // A checkpoint that cannot be persisted must stop execution;
            // advancing past it would lose completed work on resume.
            self.store.update_instance(&instance).await?;
            if instance.status == WorkflowStatus::Interrupted {
                info!(instance_id = %instance_id, "stop observed at checkpoint boundary");
                return Ok(ExecutionOutcome::Interrupted);
            }

            match next {
                Some(next_id) => current_node_id = next_id,
                None => return self.complete_instance(instance).await,
            }
        }
    }

    /// Execute one node with its retry policy. `Ok(Err(msg))` is a node
    /// failure with retries exhausted; `Err(_)` is an infrastructure error.
    async fn execute_node(
        &self,
        definition: &WorkflowDefinition,
        instance: &WorkflowInstance,
        node: &NodeDefinition,
        prior: Option<NodeInstance>,
    ) -> WorkflowResult<Result<Value, String>> {
        let max_retries = node.max_retries.unwrap_or(definition.max_retries);
        let mut record = prior.unwrap_or_else(|| NodeInstance {
            id: Ulid::new().to_string(),
            workflow_instance_id: instance.id.clone(),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_type: node.node_type,
            executor: node.executor.clone(),
            status: NodeStatus::Pending,
            input_data: Value::Null,
            output_data: None,
            error_message: None,
            error_details: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
            max_retries,
        });
        record.max_retries = max_retries;

        loop {
            let context_data = self.build_context(definition, instance, node).await?;

            record.status = NodeStatus::Running;
            record.started_at = Some(Utc::now());
            record.input_data = context_data.clone();
            self.store.save_node_instance(&record).await?;

            let ctx = ExecutionContext {
                workflow_instance_id: instance.id.clone(),
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                config: node.config.clone(),
                data: context_data,
                attempt: record.retry_count,
            };

            let result = self.invoke_executor(node, ctx).await;
            let finished_at = Utc::now();
            record.duration_ms = record
                .started_at
                .map(|s| (finished_at - s).num_milliseconds());

            if result.success {
                let output = result.data.unwrap_or(Value::Null);
                record.status = NodeStatus::Completed;
                record.completed_at = Some(finished_at);
                record.output_data = Some(output.clone());
                record.error_message = None;
                record.error_details = None;
                self.store.save_node_instance(&record).await?;
                info!(
                    instance_id = %instance.id,
                    node = %node.id,
                    attempt = record.retry_count,
                    "node completed"
                );
                return Ok(Ok(output));
            }

            let message = result
                .error
                .unwrap_or_else(|| "executor reported failure without error".to_string());
            record.error_message = Some(message.clone());
            record.error_details = Some(json!({
                "executor": node.executor,
                "attempt": record.retry_count,
            }));

            if result.should_retry && record.retry_count < max_retries {
                record.retry_count += 1;
                record.status = NodeStatus::FailedRetry;
                self.store.save_node_instance(&record).await?;
                let delay = result
                    .retry_delay
                    .unwrap_or(if node.retry_delay.is_zero() {
                        self.config.default_retry_delay
                    } else {
                        node.retry_delay
                    });
                warn!(
                    instance_id = %instance.id,
                    node = %node.id,
                    attempt = record.retry_count,
                    max_retries,
                    error = %message,
                    "node failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            record.status = NodeStatus::Failed;
            record.completed_at = Some(finished_at);
            self.store.save_node_instance(&record).await?;
            error!(
                instance_id = %instance.id,
                node = %node.id,
                retries = record.retry_count,
                error = %message,
                "node failed permanently"
            );
            return Ok(Err(message));
        }
    }

    /// Resolve the executor and run it with panic containment.
    async fn invoke_executor(&self, node: &NodeDefinition, ctx: ExecutionContext) -> ExecutionResult {
        let executor = match self.executors.get(&node.executor).await {
            Ok(executor) => executor,
            // Missing/inactive executor is a configuration problem, not a
            // transient one.
            Err(e) => return ExecutionResult::fail_permanent(e.to_string()),
        };
        if let Err(e) = executor.validate_config(&node.config) {
            return ExecutionResult::fail_permanent(format!("invalid node config: {e}"));
        }

        let handle = tokio::spawn(async move { executor.execute(&ctx).await });
        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ExecutionResult::fail(e.to_string()),
            Err(join_err) => ExecutionResult::fail(format!("executor panicked: {join_err}")),
        }
    }

    /// Merged data view for one node: workflow input and context, all
    /// completed prior nodes' outputs under `nodes.<id>.output`, and the
    /// nearest preceding completed output under `previous`.
    async fn build_context(
        &self,
        definition: &WorkflowDefinition,
        instance: &WorkflowInstance,
        node: &NodeDefinition,
    ) -> WorkflowResult<Value> {
        let mut data = Map::new();
        if let Value::Object(input) = &instance.input_data {
            data.extend(input.clone());
        }
        if let Value::Object(context) = &instance.context_data {
            data.extend(context.clone());
        }

        let upto = definition.node_index(&node.id).unwrap_or(definition.nodes.len());
        let mut nodes_map = Map::new();
        let mut previous = Value::Null;
        for prior_def in &definition.nodes[..upto] {
            if let Some(prior) = self
                .store
                .get_node_instance(&instance.id, &prior_def.id)
                .await?
            {
                if prior.status == NodeStatus::Completed {
                    let output = prior.output_data.unwrap_or(Value::Null);
                    nodes_map.insert(prior_def.id.clone(), json!({"output": output}));
                    previous = output;
                }
            }
        }
        data.insert("previous".to_string(), previous);
        data.insert("nodes".to_string(), Value::Object(nodes_map));
        Ok(Value::Object(data))
    }

    /// Routing: condition nodes may emit `next` in their output; otherwise
    /// the definition's `next` field, falling back to sequential order.
    fn next_node_id(
        &self,
        definition: &WorkflowDefinition,
        node: &NodeDefinition,
        output: &Value,
    ) -> Option<String> {
        if node.node_type == NodeType::Condition {
            if let Some(chosen) = output.get("next").and_then(Value::as_str) {
                return Some(chosen.to_string());
            }
        }
        if let Some(next) = &node.next {
            return Some(next.clone());
        }
        let index = definition.node_index(&node.id)?;
        definition.nodes.get(index + 1).map(|n| n.id.clone())
    }

    async fn complete_instance(
        &self,
        mut instance: WorkflowInstance,
    ) -> WorkflowResult<ExecutionOutcome> {
        instance.status = WorkflowStatus::Completed;
        instance.completed_at = Some(Utc::now());
        instance.current_node_id = None;
        instance.error_message = None;
        self.store.update_instance(&instance).await?;
        info!(instance_id = %instance.id, "workflow completed");
        Ok(ExecutionOutcome::Completed)
    }

    async fn fail_instance(
        &self,
        mut instance: WorkflowInstance,
        error: String,
    ) -> WorkflowResult<ExecutionOutcome> {
        instance.status = WorkflowStatus::Failed;
        instance.completed_at = Some(Utc::now());
        instance.error_message = Some(error.clone());
        self.store.update_instance(&instance).await?;
        error!(instance_id = %instance.id, error = %error, "workflow failed");
        Ok(ExecutionOutcome::Failed)
    }
}

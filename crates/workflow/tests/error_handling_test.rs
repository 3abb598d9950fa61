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

//! Failure-path execution: retry bounds, permanent failures, executor
//! panics, and lock hygiene after a failed run.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowmesh_locks::{memory::MemoryLockStore, DistributedLockManager, LockStore};
use flowmesh_workflow::storage::memory::MemoryInstanceStore;
use flowmesh_workflow::{
    ExecutionConfig, ExecutionContext, ExecutionResult, ExecutorRegistry, InstanceStore,
    NodeDefinition, NodeExecutor, NodeStatus, NodeType, WorkflowDefinition, WorkflowEngine,
    WorkflowResult, WorkflowStatus,
};

/// Fails the first `fail_times` attempts, then succeeds.
struct FlakyExecutor {
    name: String,
    fail_times: u32,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl NodeExecutor for FlakyExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext) -> WorkflowResult<ExecutionResult> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(ctx.attempt, attempt, "engine attempt counter out of step");
        if attempt < self.fail_times {
            Ok(ExecutionResult::fail(format!("attempt {attempt} failed")))
        } else {
            Ok(ExecutionResult::ok(json!({"attempt": attempt})))
        }
    }
}

struct PanickingExecutor;

#[async_trait]
impl NodeExecutor for PanickingExecutor {
    fn name(&self) -> &str {
        "boom"
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> WorkflowResult<ExecutionResult> {
        panic!("executor blew up");
    }
}

struct AlwaysOk {
    name: String,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl NodeExecutor for AlwaysOk {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> WorkflowResult<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult::ok(json!({})))
    }
}

struct AlwaysFails {
    name: String,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl NodeExecutor for AlwaysFails {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> WorkflowResult<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult::fail("persistent failure"))
    }
}

fn node(id: &str, executor: &str, max_retries: Option<u32>) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        name: id.to_string(),
        node_type: NodeType::Simple,
        executor: executor.to_string(),
        config: Value::Null,
        next: None,
        max_retries,
        retry_delay: Duration::from_millis(5),
    }
}

fn definition(id: &str, nodes: Vec<NodeDefinition>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: id.to_string(),
        version: "1.0".to_string(),
        nodes,
        input_schema: vec![],
        max_retries: 0,
    }
}

fn engine_over(
    store: Arc<MemoryInstanceStore>,
    registry: ExecutorRegistry,
    lock_store: Arc<MemoryLockStore>,
) -> WorkflowEngine {
    WorkflowEngine::new(
        "engine-test-1",
        store,
        registry,
        DistributedLockManager::new(lock_store),
        ExecutionConfig {
            default_retry_delay: Duration::from_millis(5),
            ..ExecutionConfig::default()
        },
    )
}

#[tokio::test]
async fn test_retry_bound_two_retries_then_terminal_failure() {
    let store = Arc::new(MemoryInstanceStore::new());
    let registry = ExecutorRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));
    registry
        .register(Arc::new(AlwaysFails {
            name: "doomed".to_string(),
            calls: calls.clone(),
        }))
        .await
        .unwrap();
    let engine = engine_over(store.clone(), registry, Arc::new(MemoryLockStore::new()));

    let def = definition("wf-retry", vec![node("doomed", "doomed", Some(2))]);
    let instance = engine.start_workflow(&def, json!({})).await.unwrap();

    // Initial attempt + exactly two retries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(instance.status, WorkflowStatus::Failed);
    assert!(instance
        .error_message
        .as_deref()
        .unwrap()
        .contains("doomed"));

    let record = store
        .get_node_instance(&instance.id, "doomed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, NodeStatus::Failed);
    assert_eq!(record.retry_count, 2);
}

#[tokio::test]
async fn test_flaky_node_recovers_within_retry_limit() {
    let store = Arc::new(MemoryInstanceStore::new());
    let registry = ExecutorRegistry::new();
    let calls = Arc::new(AtomicU32::new(0));
    registry
        .register(Arc::new(FlakyExecutor {
            name: "flaky".to_string(),
            fail_times: 2,
            calls: calls.clone(),
        }))
        .await
        .unwrap();
    let engine = engine_over(store.clone(), registry, Arc::new(MemoryLockStore::new()));

    let def = definition("wf-flaky", vec![node("flaky", "flaky", Some(3))]);
    let instance = engine.start_workflow(&def, json!({})).await.unwrap();

    assert_eq!(instance.status, WorkflowStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let record = store
        .get_node_instance(&instance.id, "flaky")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, NodeStatus::Completed);
    assert_eq!(record.retry_count, 2);
}

#[tokio::test]
async fn test_permanent_failure_skips_downstream_nodes() {
    let store = Arc::new(MemoryInstanceStore::new());
    let registry = ExecutorRegistry::new();
    let fetch_calls = Arc::new(AtomicU32::new(0));
    let save_calls = Arc::new(AtomicU32::new(0));
    registry
        .register(Arc::new(AlwaysOk {
            name: "fetch".to_string(),
            calls: fetch_calls.clone(),
        }))
        .await
        .unwrap();
    registry
        .register(Arc::new(AlwaysFails {
            name: "transform".to_string(),
            calls: Arc::new(AtomicU32::new(0)),
        }))
        .await
        .unwrap();
    registry
        .register(Arc::new(AlwaysOk {
            name: "save".to_string(),
            calls: save_calls.clone(),
        }))
        .await
        .unwrap();
    let engine = engine_over(store.clone(), registry, Arc::new(MemoryLockStore::new()));

    let def = definition(
        "wf-etl",
        vec![
            node("fetch", "fetch", None),
            node("transform", "transform", Some(0)),
            node("save", "save", None),
        ],
    );
    let instance = engine.start_workflow(&def, json!({})).await.unwrap();

    assert_eq!(instance.status, WorkflowStatus::Failed);
    assert!(instance
        .error_message
        .as_deref()
        .unwrap()
        .contains("transform"));
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(save_calls.load(Ordering::SeqCst), 0);
    assert!(store
        .get_node_instance(&instance.id, "save")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_executor_panic_contained_as_workflow_failure() {
    let store = Arc::new(MemoryInstanceStore::new());
    let registry = ExecutorRegistry::new();
    registry.register(Arc::new(PanickingExecutor)).await.unwrap();
    let lock_store = Arc::new(MemoryLockStore::new());
    let engine = engine_over(store.clone(), registry, lock_store.clone());

    let def = definition("wf-panic", vec![node("boom", "boom", Some(0))]);
    let instance = engine.start_workflow(&def, json!({})).await.unwrap();

    assert_eq!(instance.status, WorkflowStatus::Failed);
    assert!(instance
        .error_message
        .as_deref()
        .unwrap()
        .contains("panicked"));

    // The execution lock did not leak past the panic.
    let key = format!("workflow:{}", instance.id);
    assert!(lock_store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unregistered_executor_fails_without_retry() {
    let store = Arc::new(MemoryInstanceStore::new());
    let registry = ExecutorRegistry::new();
    let engine = engine_over(store.clone(), registry, Arc::new(MemoryLockStore::new()));

    // max_retries is generous but a missing executor is permanent.
    let def = definition("wf-ghost", vec![node("work", "ghost", Some(5))]);
    let instance = engine.start_workflow(&def, json!({})).await.unwrap();

    assert_eq!(instance.status, WorkflowStatus::Failed);
    let record = store
        .get_node_instance(&instance.id, "work")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, NodeStatus::Failed);
    assert_eq!(record.retry_count, 0);
}

#[tokio::test]
async fn test_lock_released_after_failed_run() {
    let store = Arc::new(MemoryInstanceStore::new());
    let registry = ExecutorRegistry::new();
    registry
        .register(Arc::new(AlwaysFails {
            name: "doomed".to_string(),
            calls: Arc::new(AtomicU32::new(0)),
        }))
        .await
        .unwrap();
    let lock_store = Arc::new(MemoryLockStore::new());
    let engine = engine_over(store.clone(), registry, lock_store.clone());

    let def = definition("wf-fail", vec![node("doomed", "doomed", Some(0))]);
    let instance = engine.start_workflow(&def, json!({})).await.unwrap();
    assert_eq!(instance.status, WorkflowStatus::Failed);

    let key = format!("workflow:{}", instance.id);
    assert!(lock_store.get(&key).await.unwrap().is_none());
}

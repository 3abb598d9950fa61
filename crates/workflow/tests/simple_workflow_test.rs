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

//! Happy-path workflow execution: sequential traversal, data flow between
//! nodes, condition routing, and input schema handling.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use flowmesh_locks::{memory::MemoryLockStore, DistributedLockManager};
use flowmesh_workflow::storage::memory::MemoryInstanceStore;
use flowmesh_workflow::{
    ExecutionConfig, ExecutionContext, ExecutionResult, ExecutorRegistry, InputParamSpec,
    InstanceStore, NodeDefinition, NodeExecutor, NodeStatus, NodeType, ParamType,
    WorkflowDefinition, WorkflowEngine, WorkflowResult, WorkflowStatus,
};

/// Records each invocation's merged context and emits a fixed output.
struct EchoExecutor {
    name: String,
    output: Value,
    calls: Arc<AtomicU32>,
    seen: Arc<tokio::sync::Mutex<Vec<Value>>>,
}

#[async_trait]
impl NodeExecutor for EchoExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext) -> WorkflowResult<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(ctx.data.clone());
        Ok(ExecutionResult::ok(self.output.clone()))
    }
}

struct Harness {
    engine: WorkflowEngine,
    store: Arc<MemoryInstanceStore>,
    registry: ExecutorRegistry,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryInstanceStore::new());
    let registry = ExecutorRegistry::new();
    let engine = WorkflowEngine::new(
        "engine-test-1",
        store.clone(),
        registry.clone(),
        DistributedLockManager::new(Arc::new(MemoryLockStore::new())),
        ExecutionConfig::default(),
    );
    Harness {
        engine,
        store,
        registry,
    }
}

fn node(id: &str, executor: &str) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        name: id.to_string(),
        node_type: NodeType::Simple,
        executor: executor.to_string(),
        config: Value::Null,
        next: None,
        max_retries: None,
        retry_delay: std::time::Duration::ZERO,
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

async fn echo(
    harness: &Harness,
    name: &str,
    output: Value,
) -> (Arc<AtomicU32>, Arc<tokio::sync::Mutex<Vec<Value>>>) {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    harness
        .registry
        .register(Arc::new(EchoExecutor {
            name: name.to_string(),
            output,
            calls: calls.clone(),
            seen: seen.clone(),
        }))
        .await
        .unwrap();
    (calls, seen)
}

#[tokio::test]
async fn test_single_node_workflow_completes() {
    let h = harness();
    let (calls, _) = echo(&h, "greet", json!({"message": "hello"})).await;

    let def = definition("wf-single", vec![node("greet", "greet")]);
    let instance = h.engine.start_workflow(&def, json!({})).await.unwrap();

    assert_eq!(instance.status, WorkflowStatus::Completed);
    assert!(instance.current_node_id.is_none());
    assert!(instance.completed_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let nodes = h.store.list_node_instances(&instance.id).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].status, NodeStatus::Completed);
    assert_eq!(nodes[0].output_data, Some(json!({"message": "hello"})));
}

#[tokio::test]
async fn test_three_node_data_flow() {
    let h = harness();
    let (_, _) = echo(&h, "fetch", json!({"rows": 10})).await;
    let (_, transform_seen) = echo(&h, "transform", json!({"rows": 5})).await;
    let (_, save_seen) = echo(&h, "save", json!({"saved": true})).await;

    let def = definition(
        "wf-etl",
        vec![
            node("fetch", "fetch"),
            node("transform", "transform"),
            node("save", "save"),
        ],
    );
    let instance = h
        .engine
        .start_workflow(&def, json!({"source": "db"}))
        .await
        .unwrap();
    assert_eq!(instance.status, WorkflowStatus::Completed);

    // transform saw the workflow input plus fetch's output as `previous`.
    let transform_ctx = &transform_seen.lock().await[0];
    assert_eq!(transform_ctx["source"], json!("db"));
    assert_eq!(transform_ctx["previous"], json!({"rows": 10}));
    assert_eq!(transform_ctx["nodes"]["fetch"]["output"], json!({"rows": 10}));

    // save saw both prior outputs keyed by node id.
    let save_ctx = &save_seen.lock().await[0];
    assert_eq!(save_ctx["previous"], json!({"rows": 5}));
    assert_eq!(save_ctx["nodes"]["fetch"]["output"], json!({"rows": 10}));
    assert_eq!(save_ctx["nodes"]["transform"]["output"], json!({"rows": 5}));
}

#[tokio::test]
async fn test_empty_workflow_completes_immediately() {
    let h = harness();
    let def = definition("wf-empty", vec![]);
    let instance = h.engine.start_workflow(&def, json!({})).await.unwrap();
    assert_eq!(instance.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_condition_node_routes_by_output() {
    let h = harness();
    let (_, _) = echo(&h, "check", json!({"next": "low"})).await;
    let (high_calls, _) = echo(&h, "high", json!({})).await;
    let (low_calls, _) = echo(&h, "low", json!({})).await;

    let mut check = node("check", "check");
    check.node_type = NodeType::Condition;
    let mut high = node("high", "high");
    // Without the explicit jump, `high` would fall through to `low`.
    high.next = Some("end".to_string());
    let mut low = node("low", "low");
    low.next = Some("end".to_string());
    let (_, _) = echo(&h, "end", json!({})).await;
    let end = node("end", "end");

    let def = definition("wf-branch", vec![check, high, low, end]);
    let instance = h.engine.start_workflow(&def, json!({})).await.unwrap();

    assert_eq!(instance.status, WorkflowStatus::Completed);
    assert_eq!(low_calls.load(Ordering::SeqCst), 1);
    assert_eq!(high_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_input_schema_coercion_and_defaults() {
    let h = harness();
    let (_, seen) = echo(&h, "work", json!({})).await;

    let mut def = definition("wf-input", vec![node("work", "work")]);
    def.input_schema = vec![
        InputParamSpec {
            name: "count".to_string(),
            param_type: ParamType::Number,
            required: true,
            default: None,
        },
        InputParamSpec {
            name: "mode".to_string(),
            param_type: ParamType::String,
            required: false,
            default: Some(json!("fast")),
        },
    ];

    let instance = h
        .engine
        .start_workflow(&def, json!({"count": "7"}))
        .await
        .unwrap();
    assert_eq!(instance.status, WorkflowStatus::Completed);
    assert_eq!(instance.input_data["count"], json!(7));
    assert_eq!(instance.input_data["mode"], json!("fast"));

    let ctx = &seen.lock().await[0];
    assert_eq!(ctx["count"], json!(7));
    assert_eq!(ctx["mode"], json!("fast"));
}

#[tokio::test]
async fn test_missing_required_input_rejected_before_instance_creation() {
    let h = harness();
    let mut def = definition("wf-strict", vec![node("work", "work")]);
    def.input_schema = vec![InputParamSpec {
        name: "url".to_string(),
        param_type: ParamType::String,
        required: true,
        default: None,
    }];

    let err = h.engine.start_workflow(&def, json!({})).await.unwrap_err();
    assert!(err.to_string().contains("url"));
}

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

//! Workflow type definitions: definitions, instances, and their status
//! machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Template for workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique definition id
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Definition version
    pub version: String,

    /// Nodes in dependency order; `NodeDefinition::next` may override the
    /// sequential default
    pub nodes: Vec<NodeDefinition>,

    /// Declared input parameters, validated/coerced at start
    #[serde(default)]
    pub input_schema: Vec<InputParamSpec>,

    /// Default retry bound for nodes that do not set their own
    #[serde(default)]
    pub max_retries: u32,
}

impl WorkflowDefinition {
    /// Position of a node in definition order.
    pub fn node_index(&self, node_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == node_id)
    }
}

/// One node of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique within the definition
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Execution shape
    #[serde(default)]
    pub node_type: NodeType,

    /// Executor name to resolve in the registry
    pub executor: String,

    /// Executor-specific configuration, exposed in the execution context
    #[serde(default)]
    pub config: Value,

    /// Next node id; `None` means the following node in definition order
    #[serde(default)]
    pub next: Option<String>,

    /// Retry bound for this node; `None` falls back to the definition's
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Delay between retry attempts
    #[serde(default, with = "duration_ms")]
    pub retry_delay: Duration,
}

/// Execution shape of a node.
///
/// `Condition` nodes route by emitting a `next` field in their output;
/// `Parallel` marks a fan-out group executed as one checkpointed unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    Simple,
    Parallel,
    Condition,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Simple => "simple",
            NodeType::Parallel => "parallel",
            NodeType::Condition => "condition",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(NodeType::Simple),
            "parallel" => Some(NodeType::Parallel),
            "condition" => Some(NodeType::Condition),
            _ => None,
        }
    }
}

/// Declared input parameter with coercion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParamSpec {
    pub name: String,
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    /// Applied when the parameter is absent
    #[serde(default)]
    pub default: Option<Value>,
}

/// Expected type of an input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// Workflow instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Interrupted => "interrupted",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkflowStatus::Pending),
            "running" => Some(WorkflowStatus::Running),
            "completed" => Some(WorkflowStatus::Completed),
            "failed" => Some(WorkflowStatus::Failed),
            "interrupted" => Some(WorkflowStatus::Interrupted),
            "cancelled" => Some(WorkflowStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the instance can never run again without explicit action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    FailedRetry,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::FailedRetry => "failed_retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NodeStatus::Pending),
            "running" => Some(NodeStatus::Running),
            "completed" => Some(NodeStatus::Completed),
            "failed" => Some(NodeStatus::Failed),
            "failed_retry" => Some(NodeStatus::FailedRetry),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a workflow definition.
///
/// Mutated only by the engine currently holding `workflow:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// ULID instance id
    pub id: String,
    pub definition_id: String,
    pub status: WorkflowStatus,
    /// Checkpoint: next node to execute; `None` before the first node
    /// completes or after the last one does
    pub current_node_id: Option<String>,
    /// Validated/coerced start input
    pub input_data: Value,
    /// Workflow-level context shared across nodes
    pub context_data: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub interrupted_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// One execution record of a node within a workflow instance.
///
/// Immutable once `Completed`; a retried node reuses its record, bumping
/// `retry_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    /// ULID record id
    pub id: String,
    pub workflow_instance_id: String,
    /// Definition-scoped node id
    pub node_id: String,
    pub node_name: String,
    pub node_type: NodeType,
    pub executor: String,
    pub status: NodeStatus,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Terminal result of one `execute_workflow_instance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    Interrupted,
    /// Another engine holds the execution lock; nothing was attempted
    LockHeldElsewhere,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrips() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Interrupted,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(WorkflowStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            NodeStatus::Pending,
            NodeStatus::Running,
            NodeStatus::Completed,
            NodeStatus::Failed,
            NodeStatus::FailedRetry,
        ] {
            assert_eq!(NodeStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Interrupted.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
    }

    #[test]
    fn test_node_definition_defaults() {
        let json = r#"{"id": "fetch", "name": "Fetch", "executor": "http"}"#;
        let node: NodeDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(node.node_type, NodeType::Simple);
        assert!(node.next.is_none());
        assert!(node.max_retries.is_none());
        assert_eq!(node.retry_delay, Duration::ZERO);
    }
}

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

//! Scheduler type definitions: engine instances, assignments, failover
//! records, and configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Engine liveness as recorded in the registry.
///
/// An engine is considered live only if its `last_heartbeat` is within the
/// failure-detection timeout; `Inactive` engines are never selected by any
/// assignment strategy and only explicit re-registration revives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Active,
    Inactive,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Active => "active",
            EngineStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EngineStatus::Active),
            "inactive" => Some(EngineStatus::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load gauges reported with every heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineLoad {
    /// Workflow instances currently executing on the engine
    pub active_workflows: u32,
    /// CPU usage in [0.0, 1.0]
    pub cpu_usage: f64,
}

impl EngineLoad {
    /// Combined score used by load-balanced selection (lower is better).
    pub fn score(&self) -> f64 {
        self.active_workflows as f64 + self.cpu_usage
    }
}

/// One engine process participating in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInstance {
    /// Globally unique, stable for the process lifetime
    /// (e.g. `<hostname>-<pid>-<start_ts>`)
    pub instance_id: String,

    /// Host the engine runs on (used by the locality strategy)
    pub hostname: String,

    /// Executor capability names this engine can run
    pub supported_executors: Vec<String>,

    /// Latest reported load gauges
    pub load: EngineLoad,

    /// Last heartbeat timestamp
    pub last_heartbeat: DateTime<Utc>,

    /// Liveness status
    pub status: EngineStatus,

    /// When the engine first registered
    pub registered_at: DateTime<Utc>,
}

impl EngineInstance {
    /// Whether this engine can run all of the required capabilities.
    pub fn supports_all(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|cap| self.supported_executors.iter().any(|have| have == cap))
    }
}

/// Execution state recorded on a node assignment, used by failover to put
/// transferred nodes back into a re-runnable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignedNodeState {
    /// The assigned engine is (believed to be) executing the node
    Running,
    /// Re-runnable: waiting to be picked up by the assigned engine
    Pending,
}

impl AssignedNodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignedNodeState::Running => "running",
            AssignedNodeState::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(AssignedNodeState::Running),
            "pending" => Some(AssignedNodeState::Pending),
            _ => None,
        }
    }
}

/// Workflow-instance-to-engine assignment. Exists only while the
/// corresponding `workflow:<id>` lock is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAssignment {
    pub workflow_instance_id: String,
    pub engine_id: String,
    pub assigned_at: DateTime<Utc>,
    /// Why this engine was picked (strategy name or `failover:<engine>`)
    pub reason: String,
}

/// Node-to-engine assignment at `node:<wf>:<node>` granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAssignment {
    pub workflow_instance_id: String,
    pub node_id: String,
    pub engine_id: String,
    pub assigned_at: DateTime<Utc>,
    pub reason: String,
    /// Reset to `Pending` when failover transfers the node
    pub state: AssignedNodeState,
}

/// Immutable audit record, created once per detected engine failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// ULID event id
    pub event_id: String,
    pub failed_engine_id: String,
    pub takeover_engine_id: String,
    pub affected_workflows: Vec<String>,
    /// Affected nodes as (workflow_instance_id, node_id) pairs
    pub affected_nodes: Vec<(String, String)>,
    pub failed_over_at: DateTime<Utc>,
    pub reason: String,
}

/// Work moved off a dead engine by one failover pass.
#[derive(Debug, Clone, Default)]
pub struct TransferredWork {
    /// Workflow instance ids reassigned to the takeover engine
    pub workflow_ids: Vec<String>,
    /// Nodes reset to a re-runnable state, as (workflow, node) pairs
    pub node_ids: Vec<(String, String)>,
}

/// Engine-discovery loop settings.
///
/// The loop self-adjusts its polling interval between `base_interval` and
/// `max_interval`: membership changes pull it back to the base, quiet
/// cycles and store errors push it toward the cap.
#[derive(Debug, Clone)]
pub struct EngineDiscoveryConfig {
    pub enabled: bool,
    pub base_interval: Duration,
    pub max_interval: Duration,
    /// Consecutive no-change cycles before the interval is lengthened
    pub incremental_threshold: u32,
    /// How often a full resync replaces incremental syncs
    pub full_sync_interval: Duration,
    /// When false, the loop polls at `base_interval` without adapting
    pub enable_smart_interval: bool,
}

impl Default for EngineDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(120),
            incremental_threshold: 5,
            full_sync_interval: Duration::from_secs(300),
            enable_smart_interval: true,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Strategy used by `assign_workflow` / `assign_node` / failover
    pub assignment_strategy: crate::strategy::AssignmentStrategy,
    /// How often the local engine emits heartbeats
    pub heartbeat_interval: Duration,
    /// TTL for workflow/node assignment locks
    pub lock_ttl: Duration,
    /// Heartbeat age after which an engine is declared dead
    pub failure_detection_timeout: Duration,
    /// How often the failure-detection loop runs
    pub failure_detection_interval: Duration,
    /// Whether the failure-detection loop performs failover
    pub enable_failover: bool,
    /// Heartbeat age after which engine rows are purged entirely
    pub stale_engine_retention: Duration,
    /// How often the stale-engine cleanup runs
    pub stale_cleanup_interval: Duration,
    /// Engine-discovery loop settings
    pub discovery: EngineDiscoveryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            assignment_strategy: crate::strategy::AssignmentStrategy::LoadBalanced,
            heartbeat_interval: Duration::from_secs(10),
            lock_ttl: Duration::from_secs(300),
            failure_detection_timeout: Duration::from_secs(60),
            failure_detection_interval: Duration::from_secs(30),
            enable_failover: true,
            stale_engine_retention: Duration::from_secs(24 * 60 * 60),
            stale_cleanup_interval: Duration::from_secs(60 * 60),
            discovery: EngineDiscoveryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_status_roundtrip() {
        assert_eq!(EngineStatus::parse("active"), Some(EngineStatus::Active));
        assert_eq!(EngineStatus::parse("inactive"), Some(EngineStatus::Inactive));
        assert_eq!(EngineStatus::parse("zombie"), None);
    }

    #[test]
    fn test_supports_all() {
        let engine = EngineInstance {
            instance_id: "e1".to_string(),
            hostname: "host-a".to_string(),
            supported_executors: vec!["http".to_string(), "script".to_string()],
            load: EngineLoad::default(),
            last_heartbeat: Utc::now(),
            status: EngineStatus::Active,
            registered_at: Utc::now(),
        };
        assert!(engine.supports_all(&[]));
        assert!(engine.supports_all(&["http".to_string()]));
        assert!(!engine.supports_all(&["http".to_string(), "email".to_string()]));
    }

    #[test]
    fn test_load_score() {
        let load = EngineLoad {
            active_workflows: 3,
            cpu_usage: 0.25,
        };
        assert!((load.score() - 3.25).abs() < f64::EPSILON);
    }
}

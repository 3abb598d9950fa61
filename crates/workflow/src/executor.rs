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
//! The executor contract: the open, user-extensible side of the system.
//! An executor performs one node's actual work (an HTTP call, a script, a
//! transformation); the engine never knows what a node does, only how to
//! invoke it and interpret the result.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::WorkflowResult;

/// Everything an executor sees for one node attempt.
///
/// `data` is the merged view assembled by the engine: workflow input and
/// context, the preceding node's output under `previous`, and all
/// completed nodes' outputs under `nodes.<id>.output`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_instance_id: String,
    pub node_id: String,
    pub node_name: String,
    /// Node configuration from the definition
    pub config: Value,
    /// Merged input/context/prior-output view
    pub data: Value,
    /// Zero-based attempt number (0 is the first try)
    pub attempt: u32,
}

/// What one executor invocation produced.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Whether a failure is worth retrying (permanent errors set false)
    pub should_retry: bool,
    /// Overrides the node's configured retry delay when set
    pub retry_delay: Option<Duration>,
}

impl ExecutionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            should_retry: false,
            retry_delay: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            should_retry: true,
            retry_delay: None,
        }
    }

    /// A failure no amount of retrying will fix.
    pub fn fail_permanent(error: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            ..Self::fail(error)
        }
    }
}

/// A pluggable unit of node logic.
///
/// `execute` errors and panics are both treated as node failures by the
/// engine; an executor should prefer returning a failed
/// [`ExecutionResult`] so it can control `should_retry`.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Registry name, unique per registration.
    fn name(&self) -> &str;

    /// Perform the node's work.
    async fn execute(&self, ctx: &ExecutionContext) -> WorkflowResult<ExecutionResult>;

    /// Reject malformed node configuration before execution starts.
    fn validate_config(&self, _config: &Value) -> WorkflowResult<()> {
        Ok(())
    }

    /// Liveness probe for registry health checks.
    async fn health_check(&self) -> bool {
        true
    }

    /// One-time setup hook, called on registration.
    async fn initialize(&self) -> WorkflowResult<()> {
        Ok(())
    }

    /// Teardown hook, called on unregistration.
    async fn destroy(&self) -> WorkflowResult<()> {
        Ok(())
    }
}

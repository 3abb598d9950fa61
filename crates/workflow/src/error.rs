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

//! Error types for workflow execution.
//!
//! Lock contention during execution is not represented here; it surfaces
//! as `ExecutionOutcome::LockHeldElsewhere`. Node-level failures flow
//! through `ExecutionResult` and the retry machinery, not through these
//! variants.

use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors that can occur during workflow operations.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Workflow or node instance not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid workflow definition
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Input failed schema validation/coercion
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested operation not valid in the instance's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Executor missing from the registry or marked inactive
    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    /// Lock manager error
    #[error("Lock error: {0}")]
    Lock(#[from] flowmesh_locks::LockError),
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        WorkflowError::Storage(format!("SQL error: {}", err))
    }
}

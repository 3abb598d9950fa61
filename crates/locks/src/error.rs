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

//! Error types for distributed lock operations.
//!
//! Contention (lock held by another live owner) is NOT an error: store and
//! manager methods report it through `Option`/`bool` return values. These
//! variants cover genuine infrastructure and contract failures only.

use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur during lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// Invalid lock key (empty or malformed)
    #[error("Invalid lock key: {0}")]
    InvalidKey(String),

    /// Invalid owner identifier
    #[error("Invalid owner: {0}")]
    InvalidOwner(String),

    /// Backend error (database, network, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl From<serde_json::Error> for LockError {
    fn from(err: serde_json::Error) -> Self {
        LockError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for LockError {
    fn from(err: sqlx::Error) -> Self {
        LockError::BackendError(format!("SQL error: {}", err))
    }
}

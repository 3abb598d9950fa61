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

//! Lock row model shared by all backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of resource a lock guards.
///
/// Stored as a plain string column so that backends stay schema-compatible
/// when new lock kinds are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    /// Exclusive execution of one workflow instance (`workflow:<id>`)
    Workflow,
    /// Exclusive execution of one node (`node:<wf>:<node>`)
    Node,
    /// Any other mutually-exclusive resource
    Resource,
}

impl LockType {
    /// Column representation used by the SQL backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Workflow => "workflow",
            LockType::Node => "node",
            LockType::Resource => "resource",
        }
    }

    /// Parse the column representation back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow" => Some(LockType::Workflow),
            "node" => Some(LockType::Node),
            "resource" => Some(LockType::Resource),
            _ => None,
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A distributed lock row.
///
/// Invariant: at most one non-expired row exists per `key`. The `version`
/// is a ULID regenerated on every acquire and renew; holders that care about
/// fencing can compare it across operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    /// Unique lock key (e.g. `workflow:<id>`, `node:<wf>:<node>`)
    pub key: String,

    /// Opaque holder identifier (e.g. `engine-<pid>-<start_ts>`)
    pub owner: String,

    /// Kind of resource guarded
    pub lock_type: LockType,

    /// Fencing token, regenerated on every acquire/renew
    pub version: String,

    /// When the current lease expires
    pub expires_at: DateTime<Utc>,

    /// When the lock row was first created
    pub created_at: DateTime<Utc>,

    /// When the lease was last extended (equals `created_at` until renewed)
    pub last_renewed_at: DateTime<Utc>,

    /// Opaque holder payload (e.g. `{"instance_id": ..., "acquired_at": ...}`)
    pub payload: Option<serde_json::Value>,
}

impl Lock {
    /// Whether the lease has expired as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the lease has expired as of the current wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

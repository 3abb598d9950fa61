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

//! # FlowMesh Workflow Engine
//!
//! ## Purpose
//! Executes workflow instances node by node: input validation, sequential
//! traversal with per-node retry, checkpoint persistence after every node,
//! and cooperative stop/resume. Mutual exclusion across engine processes
//! comes from `flowmesh-locks`: an instance executes under `workflow:<id>`
//! with auto-renewal for the duration of the run.
//!
//! ## Architecture Context
//! - **Executors** are the open, pluggable side: registered by name in an
//!   [`ExecutorRegistry`], resolved at node-execution time
//! - **Instance storage** is a trait ([`storage::InstanceStore`]) with
//!   in-memory and SQLite backends; any engine can read instances, only
//!   the lock holder writes them
//! - The distributed scheduler (`flowmesh-scheduler`) decides *where* an
//!   instance runs; this crate decides *how*
//!
//! ## Design Decisions
//! - **Checkpoint = next node to execute**: resume never re-invokes a
//!   completed node's executor
//! - **Guaranteed lock teardown**: release and renewal-stop happen on
//!   every exit path, executor panics included
//! - **Store errors stop execution**: a checkpoint that cannot be
//!   persisted fails the run rather than advancing past it
//!
//! ## Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use flowmesh_locks::{DistributedLockManager, memory::MemoryLockStore};
//! use flowmesh_workflow::storage::memory::MemoryInstanceStore;
//! use flowmesh_workflow::{ExecutionConfig, ExecutorRegistry, WorkflowEngine};
//!
//! # async fn example(definition: flowmesh_workflow::WorkflowDefinition)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WorkflowEngine::new(
//!     WorkflowEngine::generate_owner_id(),
//!     Arc::new(MemoryInstanceStore::new()),
//!     ExecutorRegistry::new(),
//!     DistributedLockManager::new(Arc::new(MemoryLockStore::new())),
//!     ExecutionConfig::default(),
//! );
//! let instance = engine.start_workflow(&definition, json!({"url": "https://example.com"})).await?;
//! println!("{} finished as {}", instance.id, instance.status);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod executor;
pub mod params;
pub mod registry;
pub mod storage;
pub mod types;

pub use engine::{ExecutionConfig, WorkflowEngine};
pub use error::{WorkflowError, WorkflowResult};
pub use executor::{ExecutionContext, ExecutionResult, NodeExecutor};
pub use registry::{ExecutorRegistry, RegistryStats};
pub use storage::InstanceStore;
pub use types::{
    ExecutionOutcome, InputParamSpec, NodeDefinition, NodeInstance, NodeStatus, NodeType,
    ParamType, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
};

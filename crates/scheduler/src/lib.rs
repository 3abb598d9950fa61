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

//! # FlowMesh Distributed Scheduler
//!
//! ## Purpose
//! Coordinates a cluster of workflow engines sharing one registry: engine
//! registration and heartbeating, lock-guarded workflow and node
//! assignment, failure detection, and automatic failover of a dead
//! engine's work to a survivor.
//!
//! ## Architecture Context
//! Each engine process embeds one [`DistributedScheduler`]. All instances
//! run the same background loops against the shared [`EngineRegistry`], so
//! there is no leader: any live instance can detect a peer's death and
//! repair it. Mutual exclusion for assignment decisions comes from
//! `flowmesh-locks`.
//!
//! ## Design Decisions
//! - **Contention is not an error**: losing an assignment lock returns
//!   `Ok(None)`; only backend failures surface as `Err`
//! - **Failover before deactivation**: a dead engine stays `Active` until
//!   its work has actually moved, so a pass with no eligible survivor is
//!   retried instead of dropped
//! - **Adaptive discovery**: the membership poll backs off while the
//!   cluster is quiet and snaps back on any change
//!
//! ## Backend Support
//!
//! - **InMemory**: HashMap-based (always available, for testing)
//! - **SQLite**: Persistent via `sqlx` (feature: `sqlite-backend`)
//!
//! ## Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowmesh_locks::{DistributedLockManager, memory::MemoryLockStore};
//! use flowmesh_scheduler::registry::memory::MemoryEngineRegistry;
//! use flowmesh_scheduler::{DistributedScheduler, SchedulerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = DistributedScheduler::new(
//!     "engine-1",
//!     "host-a",
//!     Arc::new(MemoryEngineRegistry::new()),
//!     DistributedLockManager::new(Arc::new(MemoryLockStore::new())),
//!     SchedulerConfig::default(),
//! );
//! scheduler.register_engine(vec!["http".to_string()]).await?;
//! scheduler.start().await?;
//!
//! if let Some(engine) = scheduler.assign_workflow("wf-42").await? {
//!     println!("wf-42 runs on {engine}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod strategy;
pub mod types;

pub use error::{SchedulerError, SchedulerResult};
pub use registry::EngineRegistry;
pub use scheduler::DistributedScheduler;
pub use strategy::{AssignmentStrategy, StrategyState};
pub use types::{
    AssignedNodeState, EngineDiscoveryConfig, EngineInstance, EngineLoad, EngineStatus,
    FailoverEvent, NodeAssignment, SchedulerConfig, TransferredWork, WorkflowAssignment,
};

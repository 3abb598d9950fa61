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

//! # FlowMesh Distributed Locks
//!
//! ## Purpose
//! Provides distributed lock coordination for the workflow scheduler and
//! execution engine. A lock guards exactly one unit of work (a workflow
//! instance or a single node execution) and guarantees at most one live
//! holder per key across all engine instances sharing a lock store.
//!
//! ## Architecture Context
//! This crate is used internally by:
//! - **Distributed Scheduler**: `workflow:<id>` / `node:<wf>:<node>` locks
//!   prevent double-assignment during scheduling and failover
//! - **Execution Engine**: holds the workflow lock (with auto-renewal) for
//!   the entire duration of an instance execution
//!
//! ## Design Decisions
//! - **Owner-checked release/renew**: a delayed retry from a former owner
//!   can never mutate a lock now held by someone else
//! - **ULID fencing versions**: regenerated on every acquire/renew
//! - **TTL expiration**: a dead holder's lock becomes acquirable within one
//!   lease duration without consensus
//! - **Auto-renewal**: an in-process timer extends a held lock until the
//!   holder stops it or renewal fails
//!
//! Correctness depends on clock skew between engine instances being bounded
//! well below the lock TTL. This is an operating assumption, not something
//! the lock store enforces.
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
//! use std::time::Duration;
//! use flowmesh_locks::{DistributedLockManager, LockType, memory::MemoryLockStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DistributedLockManager::new(Arc::new(MemoryLockStore::new()));
//!
//! let acquired = manager
//!     .acquire_lock("workflow:42", "engine-1", LockType::Workflow, Duration::from_secs(300), None)
//!     .await?;
//! if acquired {
//!     manager
//!         .enable_auto_renewal("workflow:42", "engine-1", Duration::from_secs(300), Duration::from_secs(60), None)
//!         .await;
//!     // ... execute the workflow ...
//!     manager.disable_auto_renewal("workflow:42", "engine-1").await;
//!     manager.release_lock("workflow:42", "engine-1").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod manager;
pub mod store;
pub mod types;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "sqlite-backend")]
pub mod sql;

pub use error::{LockError, LockResult};
pub use manager::{DistributedLockManager, RenewalStatus};
pub use store::LockStore;
pub use types::{Lock, LockType};

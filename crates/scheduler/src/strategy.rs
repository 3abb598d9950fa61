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
//! Engine selection for workflow and node assignment. All strategies work
//! over the scheduler's in-memory view of active engines and never touch
//! the registry directly.
//!
//! ## Design
//!
//! Selection is a pure function of (candidates, strategy, state). The only
//! mutable state is the round-robin cursor, a shared atomic counter, so
//! concurrent assignment calls distribute work evenly instead of all
//! reading the same stale position. Ties in load-based strategies break on
//! the lowest instance id, which keeps selection deterministic for tests.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::EngineInstance;

/// How the scheduler picks an engine among the live candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentStrategy {
    /// Rotate through candidates in instance-id order
    RoundRobin,
    /// Lowest combined load score wins
    LoadBalanced,
    /// Prefer the local engine, fall back to load-balanced
    Affinity,
    /// Load-balanced over capability-matching engines
    CapabilityMatch,
    /// Prefer engines on the local host, fall back to load-balanced
    Locality,
}

impl AssignmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStrategy::RoundRobin => "round-robin",
            AssignmentStrategy::LoadBalanced => "load-balanced",
            AssignmentStrategy::Affinity => "affinity",
            AssignmentStrategy::CapabilityMatch => "capability-match",
            AssignmentStrategy::Locality => "locality",
        }
    }
}

/// Mutable selection state shared by all assignment call sites.
#[derive(Debug, Default)]
pub struct StrategyState {
    round_robin: AtomicU64,
}

impl StrategyState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Pick an engine for a unit of work.
///
/// `engines` is the current view of the cluster; inactive engines and
/// engines missing a required capability are filtered out before the
/// strategy applies. Returns `None` when no candidate survives filtering.
pub fn select_engine(
    strategy: AssignmentStrategy,
    engines: &[EngineInstance],
    local_instance_id: &str,
    local_hostname: &str,
    required_capabilities: Option<&[String]>,
    state: &StrategyState,
) -> Option<String> {
    let candidates: Vec<&EngineInstance> = engines
        .iter()
        .filter(|e| e.status == crate::types::EngineStatus::Active)
        .filter(|e| match required_capabilities {
            Some(required) => e.supports_all(required),
            None => true,
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }

    match strategy {
        AssignmentStrategy::RoundRobin => {
            let mut ids: Vec<&str> = candidates.iter().map(|e| e.instance_id.as_str()).collect();
            ids.sort_unstable();
            let slot = state.round_robin.fetch_add(1, Ordering::Relaxed) as usize;
            Some(ids[slot % ids.len()].to_string())
        }
        AssignmentStrategy::LoadBalanced | AssignmentStrategy::CapabilityMatch => {
            least_loaded(&candidates)
        }
        AssignmentStrategy::Affinity => {
            if candidates
                .iter()
                .any(|e| e.instance_id == local_instance_id)
            {
                Some(local_instance_id.to_string())
            } else {
                least_loaded(&candidates)
            }
        }
        AssignmentStrategy::Locality => {
            let local: Vec<&EngineInstance> = candidates
                .iter()
                .filter(|e| e.hostname == local_hostname)
                .copied()
                .collect();
            if local.is_empty() {
                least_loaded(&candidates)
            } else {
                least_loaded(&local)
            }
        }
    }
}

fn least_loaded(candidates: &[&EngineInstance]) -> Option<String> {
    candidates
        .iter()
        .min_by(|a, b| {
            a.load
                .score()
                .total_cmp(&b.load.score())
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        })
        .map(|e| e.instance_id.clone())
}

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

//! Adaptive polling state for the engine-discovery loop.
//!
//! Cluster membership changes rarely once a deployment settles, so the
//! discovery loop lengthens its polling interval while nothing changes and
//! snaps back to the base interval the moment it observes a change. Store
//! errors also back off, so a struggling database is not hammered.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::EngineDiscoveryConfig;

/// What one discovery cycle observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Membership changed (engines appeared, disappeared, or heartbeated)
    Changed,
    /// Nothing new since the previous cycle
    Unchanged,
    /// The registry could not be read
    Error,
}

/// Per-loop mutable state. Owned by the discovery task; not shared.
#[derive(Debug)]
pub struct DiscoveryState {
    current_interval: Duration,
    consecutive_no_change: u32,
    last_full_sync: Option<DateTime<Utc>>,
    last_sync: Option<DateTime<Utc>>,
}

impl DiscoveryState {
    pub fn new(config: &EngineDiscoveryConfig) -> Self {
        Self {
            current_interval: config.base_interval,
            consecutive_no_change: 0,
            last_full_sync: None,
            last_sync: None,
        }
    }

    /// Interval to sleep before the next cycle.
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Timestamp of the last successful sync, used as the incremental
    /// `updated_since` watermark.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// Whether the next cycle should drop the watermark and resync fully.
    pub fn full_sync_due(&self, config: &EngineDiscoveryConfig, now: DateTime<Utc>) -> bool {
        match self.last_full_sync {
            Some(at) => {
                now.signed_duration_since(at).to_std().unwrap_or_default()
                    >= config.full_sync_interval
            }
            None => true,
        }
    }

    /// Record one cycle's outcome and adapt the interval.
    pub fn record(
        &mut self,
        outcome: SyncOutcome,
        was_full_sync: bool,
        config: &EngineDiscoveryConfig,
        now: DateTime<Utc>,
    ) {
        if outcome != SyncOutcome::Error {
            self.last_sync = Some(now);
            if was_full_sync {
                self.last_full_sync = Some(now);
            }
        }

        if !config.enable_smart_interval {
            self.current_interval = config.base_interval;
            return;
        }

        match outcome {
            SyncOutcome::Changed => {
                self.consecutive_no_change = 0;
                self.current_interval = config.base_interval;
            }
            SyncOutcome::Unchanged => {
                self.consecutive_no_change += 1;
                if self.consecutive_no_change >= config.incremental_threshold {
                    self.consecutive_no_change = 0;
                    self.current_interval =
                        (self.current_interval * 2).min(config.max_interval);
                }
            }
            SyncOutcome::Error => {
                self.current_interval = (self.current_interval * 2).min(config.max_interval);
            }
        }
    }
}

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
//! The distributed scheduler: registers the local engine, keeps its
//! heartbeat fresh, assigns workflows and nodes to engines under
//! distributed locks, and fails work over from engines that stop
//! heartbeating.
//!
//! ## Design
//!
//! Every scheduler instance runs the same four background loops
//! (heartbeat, discovery, failure detection, stale cleanup) against the
//! shared registry, so any surviving instance can detect and repair a
//! peer's death. Assignment races are settled by the lock manager: the
//! scheduler that wins `workflow:<id>` records the assignment, the loser
//! gets `None` and moves on. Failover is idempotent because the first
//! pass flips the dead engine to `Inactive` and later passes skip
//! inactive engines.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use ulid::Ulid;

use flowmesh_locks::{DistributedLockManager, LockType};

use crate::discovery::{DiscoveryState, SyncOutcome};
use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::EngineRegistry;
use crate::strategy::{select_engine, StrategyState};
use crate::types::{
    AssignedNodeState, EngineInstance, EngineLoad, EngineStatus, FailoverEvent, NodeAssignment,
    SchedulerConfig, TransferredWork, WorkflowAssignment,
};

/// One scheduler instance, co-located with the engine it represents.
///
/// Cloning is cheap and shares all state, so the background loops and the
/// caller's assignment path operate on the same view.
#[derive(Clone)]
pub struct DistributedScheduler {
    instance_id: String,
    hostname: String,
    registry: Arc<dyn EngineRegistry>,
    locks: DistributedLockManager,
    config: Arc<SchedulerConfig>,
    /// Local view of the cluster, refreshed by the discovery loop
    engines: Arc<RwLock<HashMap<String, EngineInstance>>>,
    /// Load gauges reported with the next heartbeat
    local_load: Arc<RwLock<EngineLoad>>,
    strategy_state: Arc<StrategyState>,
    shutdown: Arc<Notify>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl DistributedScheduler {
    pub fn new(
        instance_id: impl Into<String>,
        hostname: impl Into<String>,
        registry: Arc<dyn EngineRegistry>,
        locks: DistributedLockManager,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            hostname: hostname.into(),
            registry,
            locks,
            config: Arc::new(config),
            engines: Arc::new(RwLock::new(HashMap::new())),
            local_load: Arc::new(RwLock::new(EngineLoad::default())),
            strategy_state: Arc::new(StrategyState::new()),
            shutdown: Arc::new(Notify::new()),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Register the local engine with its executor capabilities.
    ///
    /// The in-memory view is updated first so the engine can immediately be
    /// an assignment target; if persisting fails the view is rolled back
    /// and the error propagated.
    #[instrument(skip(self, supported_executors), fields(instance_id = %self.instance_id))]
    pub async fn register_engine(
        &self,
        supported_executors: Vec<String>,
    ) -> SchedulerResult<EngineInstance> {
        let now = Utc::now();
        let engine = EngineInstance {
            instance_id: self.instance_id.clone(),
            hostname: self.hostname.clone(),
            supported_executors,
            load: self.local_load.read().await.clone(),
            last_heartbeat: now,
            status: EngineStatus::Active,
            registered_at: now,
        };

        let previous = self
            .engines
            .write()
            .await
            .insert(engine.instance_id.clone(), engine.clone());

        if let Err(e) = self.registry.save_engine(&engine).await {
            let mut engines = self.engines.write().await;
            match previous {
                Some(prev) => {
                    engines.insert(prev.instance_id.clone(), prev);
                }
                None => {
                    engines.remove(&engine.instance_id);
                }
            }
            return Err(e);
        }

        info!(instance_id = %engine.instance_id, "engine registered");
        Ok(engine)
    }

    /// Mark the local engine inactive and drop it from the local view.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn unregister_engine(&self) -> SchedulerResult<bool> {
        let known = self.registry.mark_inactive(&self.instance_id).await?;
        self.engines.write().await.remove(&self.instance_id);
        if known {
            info!(instance_id = %self.instance_id, "engine unregistered");
        }
        Ok(known)
    }

    /// Update the load gauges the next heartbeat will report.
    pub async fn set_local_load(&self, load: EngineLoad) {
        *self.local_load.write().await = load;
    }

    /// Emit one heartbeat for the local engine.
    ///
    /// Returns false when the registry no longer knows the engine, in which
    /// case the caller should re-register.
    pub async fn update_heartbeat(&self) -> SchedulerResult<bool> {
        let load = self.local_load.read().await.clone();
        let now = Utc::now();
        let known = self
            .registry
            .update_heartbeat(&self.instance_id, &load, now)
            .await?;
        if known {
            if let Some(engine) = self.engines.write().await.get_mut(&self.instance_id) {
                engine.last_heartbeat = now;
                engine.load = load;
            }
        }
        Ok(known)
    }

    /// Try to assign a workflow instance to an engine.
    ///
    /// Acquires `workflow:<id>` first; losing that race returns `Ok(None)`
    /// and means some other scheduler owns the decision. Returns the chosen
    /// engine id on success.
    #[instrument(skip(self), fields(workflow = %workflow_instance_id))]
    pub async fn assign_workflow(
        &self,
        workflow_instance_id: &str,
    ) -> SchedulerResult<Option<String>> {
        let lock_key = format!("workflow:{workflow_instance_id}");
        let acquired = self
            .locks
            .acquire_lock(
                &lock_key,
                &self.instance_id,
                LockType::Workflow,
                self.config.lock_ttl,
                None,
            )
            .await?;
        if !acquired {
            debug!(key = %lock_key, "assignment lock held elsewhere");
            return Ok(None);
        }

        let engines: Vec<EngineInstance> =
            self.engines.read().await.values().cloned().collect();
        let target = select_engine(
            self.config.assignment_strategy,
            &engines,
            &self.instance_id,
            &self.hostname,
            None,
            &self.strategy_state,
        );

        let Some(engine_id) = target else {
            // Nothing to assign to; give the lock back so a later attempt
            // (possibly on another scheduler) can retry.
            self.locks.release_lock(&lock_key, &self.instance_id).await?;
            warn!(workflow = %workflow_instance_id, "no active engine available");
            return Ok(None);
        };

        let assignment = WorkflowAssignment {
            workflow_instance_id: workflow_instance_id.to_string(),
            engine_id: engine_id.clone(),
            assigned_at: Utc::now(),
            reason: self.config.assignment_strategy.as_str().to_string(),
        };
        if let Err(e) = self.registry.save_workflow_assignment(&assignment).await {
            if let Err(release_err) =
                self.locks.release_lock(&lock_key, &self.instance_id).await
            {
                warn!(key = %lock_key, error = %release_err, "failed to release lock after save error");
            }
            return Err(e);
        }

        info!(workflow = %workflow_instance_id, engine = %engine_id, "workflow assigned");
        Ok(Some(engine_id))
    }

    /// Try to assign one node of a workflow to an engine that supports the
    /// required executor capabilities.
    #[instrument(skip(self, required_capabilities), fields(workflow = %workflow_instance_id, node = %node_id))]
    pub async fn assign_node(
        &self,
        workflow_instance_id: &str,
        node_id: &str,
        required_capabilities: &[String],
    ) -> SchedulerResult<Option<String>> {
        let lock_key = format!("node:{workflow_instance_id}:{node_id}");
        let acquired = self
            .locks
            .acquire_lock(
                &lock_key,
                &self.instance_id,
                LockType::Node,
                self.config.lock_ttl,
                None,
            )
            .await?;
        if !acquired {
            debug!(key = %lock_key, "assignment lock held elsewhere");
            return Ok(None);
        }

        let engines: Vec<EngineInstance> =
            self.engines.read().await.values().cloned().collect();
        let target = select_engine(
            self.config.assignment_strategy,
            &engines,
            &self.instance_id,
            &self.hostname,
            Some(required_capabilities),
            &self.strategy_state,
        );

        let Some(engine_id) = target else {
            self.locks.release_lock(&lock_key, &self.instance_id).await?;
            warn!(
                workflow = %workflow_instance_id,
                node = %node_id,
                "no capable engine available"
            );
            return Ok(None);
        };

        let assignment = NodeAssignment {
            workflow_instance_id: workflow_instance_id.to_string(),
            node_id: node_id.to_string(),
            engine_id: engine_id.clone(),
            assigned_at: Utc::now(),
            reason: self.config.assignment_strategy.as_str().to_string(),
            state: AssignedNodeState::Running,
        };
        if let Err(e) = self.registry.save_node_assignment(&assignment).await {
            if let Err(release_err) =
                self.locks.release_lock(&lock_key, &self.instance_id).await
            {
                warn!(key = %lock_key, error = %release_err, "failed to release lock after save error");
            }
            return Err(e);
        }

        info!(workflow = %workflow_instance_id, node = %node_id, engine = %engine_id, "node assigned");
        Ok(Some(engine_id))
    }

    /// One failure-detection pass: find engines whose heartbeat went stale,
    /// transfer their work to survivors, and record the failovers.
    ///
    /// A dead engine with no eligible survivor is left `Active` (and stale)
    /// so the next pass retries it; flipping it to `Inactive` only happens
    /// once its work has actually been moved.
    #[instrument(skip(self))]
    pub async fn detect_failures_and_failover(&self) -> SchedulerResult<Vec<FailoverEvent>> {
        let now = Utc::now();
        let all = self.registry.list_engines(None).await?;

        let is_stale = |e: &EngineInstance| {
            now.signed_duration_since(e.last_heartbeat)
                .to_std()
                .unwrap_or_default()
                > self.config.failure_detection_timeout
        };

        let dead: Vec<EngineInstance> = all
            .iter()
            .filter(|e| {
                e.status == EngineStatus::Active
                    && e.instance_id != self.instance_id
                    && is_stale(e)
            })
            .cloned()
            .collect();
        if dead.is_empty() {
            return Ok(Vec::new());
        }

        let survivors: Vec<EngineInstance> = all
            .iter()
            .filter(|e| e.status == EngineStatus::Active && !is_stale(e))
            .cloned()
            .collect();

        let mut events = Vec::new();
        for failed in dead {
            warn!(
                engine = %failed.instance_id,
                last_heartbeat = %failed.last_heartbeat,
                "engine heartbeat stale, starting failover"
            );

            let takeover = select_engine(
                self.config.assignment_strategy,
                &survivors,
                &self.instance_id,
                &self.hostname,
                None,
                &self.strategy_state,
            );
            let Some(takeover_id) = takeover else {
                warn!(engine = %failed.instance_id, "no survivor to take over, will retry");
                continue;
            };

            let reason = format!("failover:{}", failed.instance_id);
            let transferred = self
                .registry
                .failover_assignments(&failed.instance_id, &takeover_id, &reason)
                .await?;

            self.release_locks_of(&failed.instance_id, &transferred).await;

            self.registry.mark_inactive(&failed.instance_id).await?;
            if let Some(engine) = self.engines.write().await.get_mut(&failed.instance_id) {
                engine.status = EngineStatus::Inactive;
            }

            let event = FailoverEvent {
                event_id: Ulid::new().to_string(),
                failed_engine_id: failed.instance_id.clone(),
                takeover_engine_id: takeover_id.clone(),
                affected_workflows: transferred.workflow_ids.clone(),
                affected_nodes: transferred.node_ids.clone(),
                failed_over_at: Utc::now(),
                reason: "heartbeat timeout".to_string(),
            };
            self.registry.record_failover(&event).await?;

            info!(
                failed = %failed.instance_id,
                takeover = %takeover_id,
                workflows = transferred.workflow_ids.len(),
                nodes = transferred.node_ids.len(),
                "failover complete"
            );
            events.push(event);
        }
        Ok(events)
    }

    /// Force-release the dead engine's assignment locks so the takeover
    /// engine can reacquire them. Lock-store errors are logged and skipped;
    /// an unreleased lock simply expires at its TTL.
    async fn release_locks_of(&self, engine_id: &str, transferred: &TransferredWork) {
        for workflow_id in &transferred.workflow_ids {
            let key = format!("workflow:{workflow_id}");
            if let Err(e) = self.locks.force_release_lock(&key).await {
                warn!(key = %key, engine = %engine_id, error = %e, "failed to force-release lock");
            }
        }
        for (workflow_id, node_id) in &transferred.node_ids {
            let key = format!("node:{workflow_id}:{node_id}");
            if let Err(e) = self.locks.force_release_lock(&key).await {
                warn!(key = %key, engine = %engine_id, error = %e, "failed to force-release lock");
            }
        }
    }

    /// Replace the local cluster view with the registry's current contents.
    pub async fn load_engines_from_database(&self) -> SchedulerResult<usize> {
        let listed = self.registry.list_engines(None).await?;
        let count = listed.len();
        let mut engines = self.engines.write().await;
        engines.clear();
        for engine in listed {
            engines.insert(engine.instance_id.clone(), engine);
        }
        Ok(count)
    }

    /// Merge engines changed since `since` into the local view. Returns
    /// whether anything changed.
    async fn sync_engines_since(&self, since: Option<DateTime<Utc>>) -> SchedulerResult<bool> {
        let listed = self.registry.list_engines(since).await?;
        if listed.is_empty() {
            return Ok(false);
        }
        let mut engines = self.engines.write().await;
        let mut changed = false;
        for engine in listed {
            let replaced = engines.insert(engine.instance_id.clone(), engine.clone());
            changed = changed
                || !replaced.is_some_and(|prev| {
                    prev.last_heartbeat == engine.last_heartbeat && prev.status == engine.status
                });
        }
        Ok(changed)
    }

    /// Purge engines whose heartbeat is older than the retention window.
    pub async fn cleanup_stale_engines(&self) -> SchedulerResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_engine_retention)
                .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
        let purged = self.registry.purge_engines_stale_since(cutoff).await?;
        if purged > 0 {
            self.engines
                .write()
                .await
                .retain(|_, e| e.last_heartbeat >= cutoff);
            info!(purged, "purged stale engine records");
        }
        Ok(purged)
    }

    /// Snapshot of the locally known engines.
    pub async fn known_engines(&self) -> Vec<EngineInstance> {
        self.engines.read().await.values().cloned().collect()
    }

    /// Start the background loops. Call after `register_engine`.
    pub async fn start(&self) -> SchedulerResult<()> {
        if let Err(e) = self.load_engines_from_database().await {
            warn!(error = %e, "initial engine sync failed, loops will retry");
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(self.clone().heartbeat_loop()));
        if self.config.discovery.enabled {
            tasks.push(tokio::spawn(self.clone().discovery_loop()));
        }
        if self.config.enable_failover {
            tasks.push(tokio::spawn(self.clone().failure_detection_loop()));
        }
        tasks.push(tokio::spawn(self.clone().stale_cleanup_loop()));
        info!(instance_id = %self.instance_id, "scheduler loops started");
        Ok(())
    }

    /// Stop the background loops and mark the local engine inactive.
    pub async fn stop(&self) -> SchedulerResult<()> {
        self.shutdown.notify_waiters();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        self.unregister_engine().await?;
        info!(instance_id = %self.instance_id, "scheduler stopped");
        Ok(())
    }

    async fn heartbeat_loop(self) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.update_heartbeat().await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(instance_id = %self.instance_id, "heartbeat lost registration, re-registering");
                            let executors = self
                                .engines
                                .read()
                                .await
                                .get(&self.instance_id)
                                .map(|e| e.supported_executors.clone())
                                .unwrap_or_default();
                            if let Err(e) = self.register_engine(executors).await {
                                error!(error = %e, "re-registration failed");
                            }
                        }
                        Err(e) => error!(error = %e, "heartbeat failed"),
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }
    }

    async fn discovery_loop(self) {
        let config = self.config.discovery.clone();
        let mut state = DiscoveryState::new(&config);
        loop {
            let sleep = tokio::time::sleep(state.current_interval());
            tokio::select! {
                _ = sleep => {
                    let now = Utc::now();
                    let full = state.full_sync_due(&config, now);
                    let outcome = if full {
                        match self.load_engines_from_database().await {
                            Ok(_) => SyncOutcome::Changed,
                            Err(e) => {
                                warn!(error = %e, "full engine sync failed");
                                SyncOutcome::Error
                            }
                        }
                    } else {
                        match self.sync_engines_since(state.last_sync()).await {
                            Ok(true) => SyncOutcome::Changed,
                            Ok(false) => SyncOutcome::Unchanged,
                            Err(e) => {
                                warn!(error = %e, "incremental engine sync failed");
                                SyncOutcome::Error
                            }
                        }
                    };
                    state.record(outcome, full, &config, now);
                }
                _ = self.shutdown.notified() => break,
            }
        }
    }

    async fn failure_detection_loop(self) {
        let mut ticker = tokio::time::interval(self.config.failure_detection_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.detect_failures_and_failover().await {
                        error!(error = %e, "failure detection pass failed");
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }
    }

    async fn stale_cleanup_loop(self) {
        let mut ticker = tokio::time::interval(self.config.stale_cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup_stale_engines().await {
                        error!(error = %e, "stale engine cleanup failed");
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }
    }
}

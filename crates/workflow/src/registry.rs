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

//! Name-indexed registry of pluggable node executors.
//!
//! Registration is unique per name; `get` refuses executors that have
//! been deactivated, so a misbehaving executor can be fenced off without
//! unregistering it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{WorkflowError, WorkflowResult};
use crate::executor::NodeExecutor;

struct ExecutorEntry {
    executor: Arc<dyn NodeExecutor>,
    active: bool,
}

/// Aggregate registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub healthy: usize,
}

/// Shared executor registry. Cloning shares the underlying table.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    entries: Arc<RwLock<HashMap<String, ExecutorEntry>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own name. Duplicate names are a
    /// contract error.
    pub async fn register(&self, executor: Arc<dyn NodeExecutor>) -> WorkflowResult<()> {
        self.register_as(executor.name().to_string(), executor).await
    }

    /// Register a whole domain's executors under `<domain>.<name>` keys.
    pub async fn register_batch(
        &self,
        domain: &str,
        executors: Vec<Arc<dyn NodeExecutor>>,
    ) -> WorkflowResult<()> {
        for executor in executors {
            let key = format!("{domain}.{}", executor.name());
            self.register_as(key, executor).await?;
        }
        Ok(())
    }

    async fn register_as(
        &self,
        name: String,
        executor: Arc<dyn NodeExecutor>,
    ) -> WorkflowResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&name) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "executor '{name}' already registered"
            )));
        }
        executor.initialize().await?;
        entries.insert(
            name.clone(),
            ExecutorEntry {
                executor,
                active: true,
            },
        );
        info!(executor = %name, "executor registered");
        Ok(())
    }

    /// Resolve an executor for execution. Missing or inactive names fail.
    pub async fn get(&self, name: &str) -> WorkflowResult<Arc<dyn NodeExecutor>> {
        let entries = self.entries.read().await;
        match entries.get(name) {
            Some(entry) if entry.active => Ok(entry.executor.clone()),
            Some(_) => Err(WorkflowError::ExecutorUnavailable(format!(
                "executor '{name}' is inactive"
            ))),
            None => Err(WorkflowError::ExecutorUnavailable(format!(
                "executor '{name}' not registered"
            ))),
        }
    }

    /// Registered names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove an executor, running its teardown hook. Returns false when
    /// the name was not registered.
    pub async fn unregister(&self, name: &str) -> WorkflowResult<bool> {
        let removed = self.entries.write().await.remove(name);
        match removed {
            Some(entry) => {
                if let Err(e) = entry.executor.destroy().await {
                    warn!(executor = %name, error = %e, "executor teardown failed");
                }
                info!(executor = %name, "executor unregistered");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Activate or fence off an executor. Returns false when unknown.
    pub async fn set_active(&self, name: &str, active: bool) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(name) {
            Some(entry) => {
                entry.active = active;
                true
            }
            None => false,
        }
    }

    /// Probe one executor, or all of them when `name` is `None`.
    pub async fn health_check(&self, name: Option<&str>) -> HashMap<String, bool> {
        let entries = self.entries.read().await;
        let mut results = HashMap::new();
        for (key, entry) in entries.iter() {
            if name.is_some_and(|n| n != key) {
                continue;
            }
            results.insert(key.clone(), entry.executor.health_check().await);
        }
        results
    }

    /// Aggregate counters: total registered, active, and active-and-healthy.
    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let total = entries.len();
        let active = entries.values().filter(|e| e.active).count();
        let mut healthy = 0;
        for entry in entries.values() {
            if entry.active && entry.executor.health_check().await {
                healthy += 1;
            }
        }
        RegistryStats {
            total,
            active,
            healthy,
        }
    }
}

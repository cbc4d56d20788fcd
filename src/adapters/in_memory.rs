//! In-Memory Adapters
//!
//! Doubles for the cluster, registry and event ports. They keep state in
//! memory for later inspection and can be told to fail specific calls.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use kube::ResourceExt;
use parking_lot::RwLock;

use crate::crd::{LVMVolumeGroup, LVMVolumeGroupNodeStatus};
use crate::domain::{
    ClusterStore, EventReason, EventSink, EventTarget, NodeEvent, RegistryStore,
};
use crate::error::{Error, Result};
use crate::lvmd::LvmdConfig;

// =============================================================================
// Cluster Store
// =============================================================================

/// In-memory cluster store for testing.
///
/// Finalizers are tracked per volume group name; node status objects are
/// keyed by `namespace/node`.
#[derive(Debug, Default)]
pub struct InMemoryClusterStore {
    labels: RwLock<HashMap<String, BTreeMap<String, String>>>,
    finalizers: RwLock<HashMap<String, Vec<String>>>,
    statuses: RwLock<BTreeMap<String, LVMVolumeGroupNodeStatus>>,
    status_writes: RwLock<usize>,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the labels of `node`.
    pub fn set_node_labels(&self, node: &str, labels: BTreeMap<String, String>) {
        self.labels.write().insert(node.to_string(), labels);
    }

    /// Finalizers recorded for the volume group `name`
    pub fn finalizers(&self, name: &str) -> Vec<String> {
        self.finalizers.read().get(name).cloned().unwrap_or_default()
    }

    /// Stored node status object
    pub fn node_status(&self, namespace: &str, node: &str) -> Option<LVMVolumeGroupNodeStatus> {
        self.statuses.read().get(&key(namespace, node)).cloned()
    }

    /// Number of create and update calls so far
    pub fn status_writes(&self) -> usize {
        *self.status_writes.read()
    }
}

fn key(namespace: &str, node: &str) -> String {
    format!("{}/{}", namespace, node)
}

fn status_key(status: &LVMVolumeGroupNodeStatus) -> String {
    key(&status.namespace().unwrap_or_default(), &status.name_any())
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn node_labels(&self, node: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.labels.read().get(node).cloned().unwrap_or_default())
    }

    async fn add_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()> {
        let mut finalizers = self.finalizers.write();
        let entry = finalizers.entry(vg.name_any()).or_default();
        if !entry.iter().any(|f| f == finalizer) {
            entry.push(finalizer.to_string());
        }
        Ok(())
    }

    async fn remove_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()> {
        if let Some(entry) = self.finalizers.write().get_mut(&vg.name_any()) {
            entry.retain(|f| f != finalizer);
        }
        Ok(())
    }

    async fn get_node_status(
        &self,
        namespace: &str,
        node: &str,
    ) -> Result<Option<LVMVolumeGroupNodeStatus>> {
        Ok(self.node_status(namespace, node))
    }

    async fn create_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()> {
        *self.status_writes.write() += 1;
        self.statuses
            .write()
            .entry(status_key(status))
            .or_insert_with(|| status.clone());
        Ok(())
    }

    async fn update_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()> {
        *self.status_writes.write() += 1;
        let mut statuses = self.statuses.write();
        match statuses.get_mut(&status_key(status)) {
            Some(existing) => {
                *existing = status.clone();
                Ok(())
            }
            None => Err(Error::Internal(format!(
                "node status {} does not exist",
                status_key(status)
            ))),
        }
    }

    async fn delete_node_status(&self, namespace: &str, node: &str) -> Result<()> {
        self.statuses.write().remove(&key(namespace, node));
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// In-memory device-class registry for testing.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    config: RwLock<Option<LvmdConfig>>,
    saves: RwLock<usize>,
    fail_load: RwLock<bool>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that starts out with `config`.
    pub fn with_config(config: LvmdConfig) -> Self {
        Self {
            config: RwLock::new(Some(config)),
            ..Default::default()
        }
    }

    /// Current contents
    pub fn config(&self) -> Option<LvmdConfig> {
        self.config.read().clone()
    }

    /// Number of saves so far
    pub fn saves(&self) -> usize {
        *self.saves.read()
    }

    /// Make every subsequent load fail.
    pub fn fail_loads(&self) {
        *self.fail_load.write() = true;
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn load(&self) -> Result<Option<LvmdConfig>> {
        if *self.fail_load.read() {
            return Err(Error::Config("lvmd config is unreadable".to_string()));
        }
        Ok(self.config.read().clone())
    }

    async fn save(&self, config: &LvmdConfig) -> Result<()> {
        *self.saves.write() += 1;
        *self.config.write() = Some(config.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        *self.config.write() = None;
        Ok(())
    }
}

// =============================================================================
// Event Collector
// =============================================================================

/// In-memory event collector for testing.
///
/// Collects events in memory for later inspection during tests.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<(EventTarget, NodeEvent)>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<(EventTarget, NodeEvent)> {
        self.events.read().clone()
    }

    /// Get the count of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if there are no events.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Distinct reasons in first-seen order.
    pub fn reasons(&self) -> Vec<EventReason> {
        let mut seen = HashSet::new();
        self.events
            .read()
            .iter()
            .map(|(_, e)| e.reason)
            .filter(|r| seen.insert(*r))
            .collect()
    }

    /// Events attached to objects of `kind`.
    pub fn events_for_kind(&self, kind: &str) -> Vec<NodeEvent> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.kind == kind)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for InMemoryEventCollector {
    async fn publish(&self, target: &EventTarget, event: &NodeEvent) -> Result<()> {
        self.events.write().push((target.clone(), event.clone()));
        Ok(())
    }
}

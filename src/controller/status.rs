//! Node Status Writer
//!
//! Maintains this node's entry for each volume group in the node status
//! object. Every write reports whether it changed the stored state so the
//! state machine can emit transition events once.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, warn};

use crate::crd::{LVMVolumeGroupNodeStatus, NodeStatusSpec, VolumeGroupPhase, VolumeGroupStatus};
use crate::domain::ClusterStore;
use crate::error::{Result, ResultExt};
use crate::metrics;

/// Reads and writes the node status object of one node
#[derive(Clone)]
pub struct StatusWriter {
    store: Arc<dyn ClusterStore>,
    namespace: String,
    node: String,
}

impl StatusWriter {
    pub fn new(store: Arc<dyn ClusterStore>, namespace: &str, node: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            node: node.to_string(),
        }
    }

    fn empty(&self) -> LVMVolumeGroupNodeStatus {
        let mut status = LVMVolumeGroupNodeStatus::new(&self.node, NodeStatusSpec::default());
        status.metadata.namespace = Some(self.namespace.clone());
        status
    }

    /// Current entries, `None` if the object does not exist.
    pub async fn current(&self) -> Result<Option<NodeStatusSpec>> {
        Ok(self
            .store
            .get_node_status(&self.namespace, &self.node)
            .await?
            .map(|status| status.spec))
    }

    /// Create the object with no entries unless it exists.
    pub async fn ensure_exists(&self) -> Result<()> {
        if self.current().await?.is_none() {
            self.store
                .create_node_status(&self.empty())
                .await
                .context(|| "could not create previously non-existing node status")?;
            debug!(node = %self.node, "Created node status");
        }
        Ok(())
    }

    /// Write the entry for `vg_name`. Returns whether anything changed.
    pub async fn set(
        &self,
        vg_name: &str,
        phase: VolumeGroupPhase,
        devices: Vec<String>,
        reason: impl Into<String>,
    ) -> Result<bool> {
        let entry = VolumeGroupStatus {
            name: vg_name.to_string(),
            status: phase,
            devices,
            reason: reason.into(),
        };
        metrics::set_phase(vg_name, phase);

        match self
            .store
            .get_node_status(&self.namespace, &self.node)
            .await?
        {
            Some(mut status) => {
                if !status.spec.upsert(entry) {
                    return Ok(false);
                }
                self.store.update_node_status(&status).await?;
            }
            None => {
                let mut status = self.empty();
                status.spec.upsert(entry);
                self.store.create_node_status(&status).await?;
            }
        }

        debug!(volume_group = vg_name, phase = %phase, "Node status updated");
        Ok(true)
    }

    /// Write a Failed entry, logging instead of returning write errors.
    pub async fn set_failed(&self, vg_name: &str, devices: Vec<String>, reason: &str) {
        if let Err(e) = self
            .set(vg_name, VolumeGroupPhase::Failed, devices, reason)
            .await
        {
            warn!(volume_group = vg_name, "Failed to set status to failed: {}", e);
        }
    }

    /// Drop the entry for `vg_name`, deleting the object once it is empty.
    pub async fn remove(&self, vg_name: &str) -> Result<()> {
        metrics::clear_phase(vg_name);

        let Some(mut status) = self
            .store
            .get_node_status(&self.namespace, &self.node)
            .await?
        else {
            return Ok(());
        };

        let removed = status.spec.remove(vg_name);
        if status.spec.node_status.is_empty() {
            self.store
                .delete_node_status(&self.namespace, &status.name_any())
                .await?;
            debug!(node = %self.node, "Deleted node status");
        } else if removed {
            self.store.update_node_status(&status).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StatusWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusWriter")
            .field("namespace", &self.namespace)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryClusterStore;

    fn writer() -> (Arc<InMemoryClusterStore>, StatusWriter) {
        let store = Arc::new(InMemoryClusterStore::new());
        let writer = StatusWriter::new(store.clone(), "ns", "worker-0");
        (store, writer)
    }

    #[tokio::test]
    async fn test_set_creates_lazily_and_reports_changes() {
        let (store, writer) = writer();
        let devices = vec!["/dev/sdb".to_string()];

        assert!(writer
            .set("vg1", VolumeGroupPhase::Progressing, devices.clone(), "")
            .await
            .unwrap());
        assert!(writer
            .set("vg1", VolumeGroupPhase::Ready, devices.clone(), "")
            .await
            .unwrap());
        assert!(!writer
            .set("vg1", VolumeGroupPhase::Ready, devices, "")
            .await
            .unwrap());

        let stored = store.node_status("ns", "worker-0").unwrap();
        assert_eq!(stored.spec.get("vg1").unwrap().status, VolumeGroupPhase::Ready);
        assert_eq!(store.status_writes(), 2);
    }

    #[tokio::test]
    async fn test_remove_deletes_empty_object() {
        let (store, writer) = writer();
        writer.ensure_exists().await.unwrap();
        writer
            .set("vg1", VolumeGroupPhase::Ready, vec![], "")
            .await
            .unwrap();
        writer
            .set("vg2", VolumeGroupPhase::Ready, vec![], "")
            .await
            .unwrap();

        writer.remove("vg1").await.unwrap();
        let stored = store.node_status("ns", "worker-0").unwrap();
        assert!(stored.spec.get("vg1").is_none());

        writer.remove("vg2").await.unwrap();
        assert!(store.node_status("ns", "worker-0").is_none());
        writer.remove("vg2").await.unwrap();
    }
}

//! Kubernetes Adapters
//!
//! Implements the [`ClusterStore`] and [`EventSink`] ports against the API
//! server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, ResourceExt};
use tracing::{debug, instrument};

use crate::crd::{LVMVolumeGroup, LVMVolumeGroupNodeStatus};
use crate::domain::{ClusterStore, EventSeverity, EventSink, EventTarget, NodeEvent};
use crate::error::{Error, Result};

/// Field manager for patches issued by the agent
pub const FIELD_MANAGER: &str = "vgmanager";

/// Attempts at a finalizer patch before a conflict is surfaced
const FINALIZER_PATCH_ATTEMPTS: usize = 5;

// =============================================================================
// Cluster Store
// =============================================================================

/// Cluster store backed by the API server
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn volume_groups(&self, vg: &LVMVolumeGroup) -> Api<LVMVolumeGroup> {
        match vg.namespace() {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    fn node_statuses(&self, namespace: &str) -> Api<LVMVolumeGroupNodeStatus> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Add or remove `finalizer` against the live object.
    ///
    /// The patch carries the fetched `resourceVersion`, so a concurrent
    /// writer turns it into a 409 and the change is recomputed.
    async fn update_finalizers(&self, vg: &LVMVolumeGroup, finalizer: &str, add: bool) -> Result<bool> {
        let api = self.volume_groups(vg);
        let name = vg.name_any();

        for attempt in 1..=FINALIZER_PATCH_ATTEMPTS {
            // a deleted object needs no finalizer bookkeeping
            let Some(current) = api.get_opt(&name).await? else {
                return Ok(false);
            };
            let Some(patch) = finalizer_patch(
                current.finalizers(),
                current.resource_version().as_deref(),
                finalizer,
                add,
            ) else {
                return Ok(false);
            };

            match api
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => return Ok(true),
                Err(kube::Error::Api(e)) if e.code == 409 => {
                    debug!(attempt, "Finalizer patch conflicted, retrying");
                }
                Err(e) => return Err(Error::Kube(e)),
            }
        }

        Err(Error::Internal(format!(
            "finalizer {} on {} still conflicting after {} attempts",
            finalizer, name, FINALIZER_PATCH_ATTEMPTS
        )))
    }
}

/// Merge patch moving `current` to include or exclude `finalizer`, or `None`
/// when the list already has the wanted shape.
fn finalizer_patch(
    current: &[String],
    resource_version: Option<&str>,
    finalizer: &str,
    add: bool,
) -> Option<serde_json::Value> {
    let present = current.iter().any(|f| f == finalizer);
    if present == add {
        return None;
    }

    let mut finalizers: Vec<String> = current.iter().filter(|f| *f != finalizer).cloned().collect();
    if add {
        finalizers.push(finalizer.to_string());
    }

    let mut metadata = serde_json::json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(rv.to_string());
    }
    Some(serde_json::json!({ "metadata": metadata }))
}

impl std::fmt::Debug for KubeClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    #[instrument(skip(self))]
    async fn node_labels(&self, node: &str) -> Result<BTreeMap<String, String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = nodes.get(node).await?;
        Ok(node.metadata.labels.unwrap_or_default())
    }

    #[instrument(skip(self, vg), fields(volume_group = %vg.name_any()))]
    async fn add_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()> {
        if vg.finalizers().iter().any(|f| f == finalizer) {
            return Ok(());
        }
        if self.update_finalizers(vg, finalizer, true).await? {
            debug!(finalizer, "Added finalizer");
        }
        Ok(())
    }

    #[instrument(skip(self, vg), fields(volume_group = %vg.name_any()))]
    async fn remove_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()> {
        if !vg.finalizers().iter().any(|f| f == finalizer) {
            return Ok(());
        }
        if self.update_finalizers(vg, finalizer, false).await? {
            debug!(finalizer, "Removed finalizer");
        }
        Ok(())
    }

    async fn get_node_status(
        &self,
        namespace: &str,
        node: &str,
    ) -> Result<Option<LVMVolumeGroupNodeStatus>> {
        Ok(self.node_statuses(namespace).get_opt(node).await?)
    }

    #[instrument(skip(self, status), fields(node = %status.name_any()))]
    async fn create_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()> {
        let namespace = status
            .namespace()
            .ok_or_else(|| Error::Internal("node status has no namespace".to_string()))?;
        match self
            .node_statuses(&namespace)
            .create(&PostParams::default(), status)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!("Node status already exists");
                Ok(())
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    #[instrument(skip(self, status), fields(node = %status.name_any()))]
    async fn update_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()> {
        let namespace = status
            .namespace()
            .ok_or_else(|| Error::Internal("node status has no namespace".to_string()))?;
        self.node_statuses(&namespace)
            .replace(&status.name_any(), &PostParams::default(), status)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_node_status(&self, namespace: &str, node: &str) -> Result<()> {
        match self
            .node_statuses(namespace)
            .delete(node, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Publishes events through the kube-runtime event recorder
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    /// Create a sink reporting as `vgmanager` from `node`.
    pub fn new(client: Client, node: &str) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance: Some(node.to_string()),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

fn object_reference(target: &EventTarget) -> ObjectReference {
    ObjectReference {
        api_version: Some(target.api_version.clone()),
        kind: Some(target.kind.clone()),
        name: Some(target.name.clone()),
        namespace: target.namespace.clone(),
        uid: target.uid.clone(),
        ..Default::default()
    }
}

fn recorder_event(event: &NodeEvent) -> Event {
    Event {
        type_: match event.severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        },
        reason: event.reason.as_str().to_string(),
        note: Some(event.message.clone()),
        action: "Reconcile".to_string(),
        secondary: None,
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, target: &EventTarget, event: &NodeEvent) -> Result<()> {
        self.recorder
            .publish(&recorder_event(event), &object_reference(target))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventReason;

    #[test]
    fn test_object_reference_from_target() {
        let target = EventTarget::node_status("openshift-storage", "worker-0");
        let reference = object_reference(&target);
        assert_eq!(reference.kind.as_deref(), Some("LVMVolumeGroupNodeStatus"));
        assert_eq!(reference.name.as_deref(), Some("worker-0"));
        assert_eq!(reference.namespace.as_deref(), Some("openshift-storage"));
        assert!(reference.uid.is_none());
    }

    const OURS: &str = "cleanup.vgmanager.node.topolvm.io/worker-0";
    const THEIRS: &str = "cleanup.vgmanager.node.topolvm.io/worker-1";

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_finalizer_patch_keeps_other_nodes() {
        let current = names(&[OURS, THEIRS]);
        let patch = finalizer_patch(&current, Some("4711"), OURS, false).unwrap();
        assert_eq!(
            patch,
            serde_json::json!({
                "metadata": {
                    "finalizers": [THEIRS],
                    "resourceVersion": "4711"
                }
            })
        );
    }

    #[test]
    fn test_finalizer_patch_appends_to_live_list() {
        let current = names(&[THEIRS]);
        let patch = finalizer_patch(&current, Some("12"), OURS, true).unwrap();
        assert_eq!(
            patch["metadata"]["finalizers"],
            serde_json::json!([THEIRS, OURS])
        );
        assert_eq!(patch["metadata"]["resourceVersion"], "12");
    }

    #[test]
    fn test_finalizer_patch_noop_when_settled() {
        let current = names(&[OURS]);
        assert!(finalizer_patch(&current, Some("1"), OURS, true).is_none());
        assert!(finalizer_patch(&current, Some("1"), THEIRS, false).is_none());
    }

    #[test]
    fn test_recorder_event_type() {
        let warning = recorder_event(&NodeEvent::warning(EventReason::InconsistentLvs, "bad"));
        assert!(matches!(warning.type_, EventType::Warning));
        assert_eq!(warning.reason, "InconsistentLVs");
        assert_eq!(warning.note.as_deref(), Some("bad"));

        let normal = recorder_event(&NodeEvent::normal(EventReason::VolumeGroupReady, "ok"));
        assert!(matches!(normal.type_, EventType::Normal));
    }
}

//! Notification Events
//!
//! Every warning and phase transition is reported as a cluster event. One
//! event fans out to the node status object, the volume group itself and
//! every owner of the volume group, with the message prefixed so readers of
//! each object can tell which node it came from.
//!
//! # Example
//!
//! ```ignore
//! let event = NodeEvent::warning(EventReason::InconsistentLvs, err.to_string());
//! publish_fan_out(sink.as_ref(), fan_out(&vg, &namespace, &node, &event)).await;
//! ```

use std::fmt;

use kube::ResourceExt;
use tracing::warn;

use crate::crd::LVMVolumeGroup;

use super::ports::EventSink;

const API_VERSION: &str = "lvm.topolvm.io/v1alpha1";

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Machine-readable event reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventReason {
    // =========================================================================
    // Warnings
    // =========================================================================
    NoAvailableDevicesForVg,
    InconsistentLvs,
    VgCreateOrExtendFailed,
    ThinPoolCreateOrExtendFailed,
    LvmdConfigUpdateFailed,

    // =========================================================================
    // Informational
    // =========================================================================
    LvmdConfigMissing,
    LvmdConfigUpdated,
    LvmdConfigDeleted,
    VolumeGroupReady,
    VolumeGroupProgressing,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::NoAvailableDevicesForVg => "NoAvailableDevicesForVG",
            EventReason::InconsistentLvs => "InconsistentLVs",
            EventReason::VgCreateOrExtendFailed => "VGCreateOrExtendFailed",
            EventReason::ThinPoolCreateOrExtendFailed => "ThinPoolCreateOrExtendFailed",
            EventReason::LvmdConfigUpdateFailed => "LVMDConfigUpdateFailed",
            EventReason::LvmdConfigMissing => "LVMDConfigMissing",
            EventReason::LvmdConfigUpdated => "LVMDConfigUpdated",
            EventReason::LvmdConfigDeleted => "LVMDConfigDeleted",
            EventReason::VolumeGroupReady => "VolumeGroupReady",
            EventReason::VolumeGroupProgressing => "VolumeGroupProgressing",
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single (severity, reason, message) notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub severity: EventSeverity,
    pub reason: EventReason,
    pub message: String,
}

impl NodeEvent {
    pub fn normal(reason: EventReason, message: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Normal,
            reason,
            message: message.into(),
        }
    }

    pub fn warning(reason: EventReason, message: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Warning,
            reason,
            message: message.into(),
        }
    }

    fn with_message(&self, message: String) -> Self {
        Self {
            message,
            ..self.clone()
        }
    }

    fn verb(&self) -> &'static str {
        match self.severity {
            EventSeverity::Normal => "update",
            EventSeverity::Warning => "error",
        }
    }
}

/// Object an event is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTarget {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub uid: Option<String>,
}

impl EventTarget {
    /// The node status object of `node`
    pub fn node_status(namespace: &str, node: &str) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: "LVMVolumeGroupNodeStatus".to_string(),
            name: node.to_string(),
            namespace: Some(namespace.to_string()),
            uid: None,
        }
    }

    /// The volume group object itself
    pub fn volume_group(vg: &LVMVolumeGroup) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: "LVMVolumeGroup".to_string(),
            name: vg.name_any(),
            namespace: vg.namespace(),
            uid: vg.uid(),
        }
    }
}

/// Expand one event into per-target events.
///
/// Order: node status, owners, volume group.
pub fn fan_out(
    vg: &LVMVolumeGroup,
    namespace: &str,
    node: &str,
    event: &NodeEvent,
) -> Vec<(EventTarget, NodeEvent)> {
    let node_key = format!("{}/{}", namespace, node);
    let vg_namespace = vg.namespace().unwrap_or_else(|| namespace.to_string());
    let vg_key = format!("{}/{}", vg_namespace, vg.name_any());
    let verb = event.verb();

    let mut targets = vec![(EventTarget::node_status(namespace, node), event.clone())];

    for owner in vg.owner_references() {
        let target = EventTarget {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            namespace: Some(vg_namespace.clone()),
            uid: Some(owner.uid.clone()),
        };
        let message = format!(
            "{} on node {} in volume group {}: {}",
            verb, node_key, vg_key, event.message
        );
        targets.push((target, event.with_message(message)));
    }

    let message = format!("{} on node {}: {}", verb, node_key, event.message);
    targets.push((EventTarget::volume_group(vg), event.with_message(message)));

    targets
}

/// Publish fanned-out events. Publishing failures are logged, never returned.
pub async fn publish_fan_out(sink: &dyn EventSink, events: Vec<(EventTarget, NodeEvent)>) {
    for (target, event) in events {
        if let Err(e) = sink.publish(&target, &event).await {
            warn!(
                kind = %target.kind,
                name = %target.name,
                reason = %event.reason,
                "Failed to publish event: {}",
                e
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::VolumeGroupSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn volume_group_with_owner() -> LVMVolumeGroup {
        let mut vg = LVMVolumeGroup::new("vg1", VolumeGroupSpec::default());
        vg.metadata.namespace = Some("openshift-storage".into());
        vg.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "lvm.topolvm.io/v1alpha1".into(),
            kind: "LVMCluster".into(),
            name: "my-lvmcluster".into(),
            uid: "1234".into(),
            ..Default::default()
        }]);
        vg
    }

    #[test]
    fn test_warning_fan_out_messages() {
        let vg = volume_group_with_owner();
        let event = NodeEvent::warning(EventReason::InconsistentLvs, "thin pool inactive");

        let events = fan_out(&vg, "openshift-storage", "worker-0", &event);
        assert_eq!(events.len(), 3);

        let (node_target, node_event) = &events[0];
        assert_eq!(node_target.kind, "LVMVolumeGroupNodeStatus");
        assert_eq!(node_target.name, "worker-0");
        assert_eq!(node_event.message, "thin pool inactive");

        let (owner_target, owner_event) = &events[1];
        assert_eq!(owner_target.kind, "LVMCluster");
        assert_eq!(owner_target.uid.as_deref(), Some("1234"));
        assert_eq!(
            owner_event.message,
            "error on node openshift-storage/worker-0 in volume group openshift-storage/vg1: thin pool inactive"
        );

        let (vg_target, vg_event) = &events[2];
        assert_eq!(vg_target.kind, "LVMVolumeGroup");
        assert_eq!(
            vg_event.message,
            "error on node openshift-storage/worker-0: thin pool inactive"
        );
        assert!(events
            .iter()
            .all(|(_, e)| e.reason == EventReason::InconsistentLvs
                && e.severity == EventSeverity::Warning));
    }

    #[test]
    fn test_normal_fan_out_without_owners() {
        let vg = LVMVolumeGroup::new("vg1", VolumeGroupSpec::default());
        let event = NodeEvent::normal(EventReason::VolumeGroupReady, "ready");

        let events = fan_out(&vg, "ns", "worker-0", &event);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].1.message, "update on node ns/worker-0: ready");
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(EventReason::NoAvailableDevicesForVg.as_str(), "NoAvailableDevicesForVG");
        assert_eq!(EventReason::LvmdConfigDeleted.to_string(), "LVMDConfigDeleted");
    }
}

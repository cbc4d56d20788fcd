//! LVMVolumeGroupNodeStatus Custom Resource Definition
//!
//! One object per node, named after the node, carrying the observed state
//! of every volume group the node agent manages there.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// LVMVolumeGroupNodeStatus CRD
// =============================================================================

/// Per-node report of managed volume groups
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "lvm.topolvm.io",
    version = "v1alpha1",
    kind = "LVMVolumeGroupNodeStatus",
    plural = "lvmvolumegroupnodestatuses",
    shortname = "lvgns",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusSpec {
    /// One entry per volume group on this node
    #[serde(default)]
    pub node_status: Vec<VolumeGroupStatus>,
}

/// Observed state of a single volume group on a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupStatus {
    /// Volume group name
    pub name: String,

    /// Current phase
    #[serde(default)]
    pub status: VolumeGroupPhase,

    /// Devices attached (or being attached) to the volume group
    #[serde(default)]
    pub devices: Vec<String>,

    /// Human-readable failure reason
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Volume group lifecycle phase on a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum VolumeGroupPhase {
    #[default]
    Progressing,
    Ready,
    Failed,
}

impl std::fmt::Display for VolumeGroupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeGroupPhase::Progressing => write!(f, "Progressing"),
            VolumeGroupPhase::Ready => write!(f, "Ready"),
            VolumeGroupPhase::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl NodeStatusSpec {
    /// Look up the entry for a volume group
    pub fn get(&self, vg_name: &str) -> Option<&VolumeGroupStatus> {
        self.node_status.iter().find(|s| s.name == vg_name)
    }

    /// Insert or replace the entry for `status.name`.
    ///
    /// Returns `true` if the stored entries changed.
    pub fn upsert(&mut self, status: VolumeGroupStatus) -> bool {
        match self.node_status.iter_mut().find(|s| s.name == status.name) {
            Some(existing) if *existing == status => false,
            Some(existing) => {
                *existing = status;
                true
            }
            None => {
                self.node_status.push(status);
                true
            }
        }
    }

    /// Remove the entry for a volume group. Returns `true` if one was removed.
    pub fn remove(&mut self, vg_name: &str) -> bool {
        let before = self.node_status.len();
        self.node_status.retain(|s| s.name != vg_name);
        self.node_status.len() != before
    }

    /// Whether the device path is recorded as attached to the volume group
    pub fn has_device(&self, vg_name: &str, path: &str) -> bool {
        self.get(vg_name)
            .map_or(false, |s| s.devices.iter().any(|d| d == path))
    }
}

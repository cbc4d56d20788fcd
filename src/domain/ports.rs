//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the reconciliation engine depends on.
//! Host storage tools, the cluster API and the registry file are all reached
//! through these traits so the state machine can be driven by in-memory
//! doubles in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Reconciliation State Machine                 │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  LogicalVolumeManager │ BlockDeviceLister │ ...      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Adapters                              │
//! │  HostLvm │ HostLsblk │ HostWipefs │ KubeClusterStore │ ...   │
//! │            all host adapters run through CommandExecutor     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::crd::{LVMVolumeGroup, LVMVolumeGroupNodeStatus};
use crate::devices::BlockDeviceCatalog;
use crate::domain::events::{EventTarget, NodeEvent};
use crate::domain::lv_attr::LvAttr;
use crate::error::Result;
use crate::lvmd::LvmdConfig;

// =============================================================================
// Value Objects
// =============================================================================

/// Volume group as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    /// Volume group name
    pub name: String,
    /// Member physical volumes
    pub pvs: Vec<PhysicalVolume>,
    /// Total size as reported, e.g. `<475.94g`
    pub size: String,
    /// Free size as reported
    pub free: String,
}

impl VolumeGroup {
    /// Whether the device path is a member of this group
    pub fn has_pv(&self, path: &str) -> bool {
        self.pvs.iter().any(|pv| pv.path == path)
    }

    /// Member device paths
    pub fn pv_paths(&self) -> Vec<String> {
        self.pvs.iter().map(|pv| pv.path.clone()).collect()
    }
}

/// Physical volume as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalVolume {
    /// Device path
    pub path: String,
    /// Owning volume group (empty if unassigned)
    pub vg_name: String,
}

/// Logical volume as reported by the host
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalVolume {
    pub name: String,
    pub vg_name: String,
    /// Parsed `lv_attr` bits
    pub attr: LvAttr,
    /// Size as reported, e.g. `40.00g`
    pub size: String,
    /// Metadata fill percentage. Only thin pools report one.
    pub metadata_percent: Option<f64>,
}

// =============================================================================
// Command Execution Port
// =============================================================================

/// Narrow capability for running a host command and capturing its stdout.
///
/// A non-zero exit status is reported as [`crate::error::Error::Command`]
/// carrying stderr as the reason.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` with `args` to completion.
    async fn execute(&self, command: &str, args: &[String]) -> Result<String>;
}

// =============================================================================
// Storage Ports
// =============================================================================

/// Port for volume group and logical volume operations.
///
/// Lookups by name return [`crate::error::Error::VolumeGroupNotFound`] when
/// the group is absent so callers can branch on
/// [`crate::error::Error::is_not_found`].
#[async_trait]
pub trait LogicalVolumeManager: Send + Sync {
    /// List every volume group together with its members.
    async fn list_vgs(&self) -> Result<Vec<VolumeGroup>>;

    /// Get a single volume group.
    async fn get_vg(&self, name: &str) -> Result<VolumeGroup>;

    /// List logical volumes of a volume group.
    async fn list_lvs(&self, vg_name: &str) -> Result<Vec<LogicalVolume>>;

    /// Check whether a logical volume exists in a volume group.
    async fn lv_exists(&self, vg_name: &str, lv_name: &str) -> Result<bool> {
        Ok(self
            .list_lvs(vg_name)
            .await?
            .iter()
            .any(|lv| lv.name == lv_name))
    }

    /// Create a volume group from the given devices.
    async fn create_vg(&self, name: &str, devices: &[String]) -> Result<()>;

    /// Add devices to an existing volume group.
    async fn extend_vg(&self, name: &str, devices: &[String]) -> Result<()>;

    /// Deactivate and remove a volume group, then release its members.
    async fn delete_vg(&self, vg: &VolumeGroup) -> Result<()>;

    /// Create a thin pool occupying `size_percent` of the free space.
    async fn create_thin_pool(&self, vg_name: &str, pool: &str, size_percent: u32) -> Result<()>;

    /// Grow a thin pool to `size_percent` of the volume group.
    async fn extend_thin_pool(&self, vg_name: &str, pool: &str, size_percent: u32) -> Result<()>;

    /// Deactivate and remove a logical volume.
    async fn delete_lv(&self, vg_name: &str, lv_name: &str) -> Result<()>;
}

/// Port for enumerating host block devices.
#[async_trait]
pub trait BlockDeviceLister: Send + Sync {
    /// Snapshot the device tree. Any failure aborts the pass.
    async fn list_block_devices(&self) -> Result<BlockDeviceCatalog>;
}

/// Port for erasing on-disk signatures.
#[async_trait]
pub trait SignatureWiper: Send + Sync {
    async fn wipe(&self, device: &str) -> Result<()>;
}

/// Port for removing device-mapper mappings.
///
/// An absent mapping is reported as
/// [`crate::error::Error::DeviceMapperReferenceNotFound`].
#[async_trait]
pub trait DeviceMapper: Send + Sync {
    async fn remove(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Registry Port
// =============================================================================

/// Port for the device-class registry consumed by the provisioning daemon.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load the registry. `None` when it has never been written.
    async fn load(&self) -> Result<Option<LvmdConfig>>;

    /// Overwrite the registry.
    async fn save(&self, config: &LvmdConfig) -> Result<()>;

    /// Remove the registry entirely.
    async fn delete(&self) -> Result<()>;
}

// =============================================================================
// Cluster Ports
// =============================================================================

/// Port for the cluster objects the engine reads and writes.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Labels of the node the engine runs on.
    async fn node_labels(&self, node: &str) -> Result<BTreeMap<String, String>>;

    /// Add `finalizer` to the volume group if it is not present yet.
    async fn add_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()>;

    /// Remove `finalizer` from the volume group.
    async fn remove_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()>;

    /// Fetch the node status object, `None` if it does not exist.
    async fn get_node_status(
        &self,
        namespace: &str,
        node: &str,
    ) -> Result<Option<LVMVolumeGroupNodeStatus>>;

    /// Create the node status object.
    async fn create_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()>;

    /// Replace the node status object.
    async fn update_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()>;

    /// Delete the node status object. Deleting an absent object succeeds.
    async fn delete_node_status(&self, namespace: &str, node: &str) -> Result<()>;
}

/// Port for notification events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, target: &EventTarget, event: &NodeEvent) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_group_membership() {
        let vg = VolumeGroup {
            name: "vg1".into(),
            pvs: vec![
                PhysicalVolume {
                    path: "/dev/sdb".into(),
                    vg_name: "vg1".into(),
                },
                PhysicalVolume {
                    path: "/dev/sdc".into(),
                    vg_name: "vg1".into(),
                },
            ],
            size: "200.00g".into(),
            free: "0 ".into(),
        };

        assert!(vg.has_pv("/dev/sdb"));
        assert!(!vg.has_pv("/dev/sdd"));
        assert_eq!(vg.pv_paths(), vec!["/dev/sdb", "/dev/sdc"]);
    }
}

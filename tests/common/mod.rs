//! Shared fixtures for the reconciliation scenarios
//!
//! [`FakeHost`] models the LVM state of one node. Every mutation, and every
//! registry and cluster write made through [`Harness`], lands in one shared
//! trace so scenarios can assert on ordering.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use vgmanager::adapters::{InMemoryClusterStore, InMemoryEventCollector, InMemoryRegistry};
use vgmanager::controller::{Ports, ReconcilerConfig, VgReconciler, NODE_CLEANUP_FINALIZER};
use vgmanager::crd::{
    DeviceSelector, LVMVolumeGroup, LVMVolumeGroupNodeStatus, ThinPoolConfig, VolumeGroupSpec,
};
use vgmanager::devices::{BlockDevice, BlockDeviceCatalog, PathResolver};
use vgmanager::domain::{
    BlockDeviceLister, ClusterStore, DeviceMapper, LogicalVolume, LogicalVolumeManager,
    PhysicalVolume, RegistryStore, SignatureWiper, VolumeGroup,
};
use vgmanager::error::{Error, Result};
use vgmanager::lvmd::LvmdConfig;

pub const NODE: &str = "worker-0";
pub const NAMESPACE: &str = "openshift-storage";
pub const VG_SIZE: &str = "100.00g";
pub const DISK_SIZE: u64 = 100 << 30;

pub type Trace = Arc<Mutex<Vec<String>>>;

// =============================================================================
// Host
// =============================================================================

#[derive(Debug, Default)]
struct HostState {
    disks: Vec<String>,
    vgs: BTreeMap<String, BTreeSet<String>>,
    lvs: Vec<LogicalVolume>,
    fail_delete_vg: bool,
    trace_listings: bool,
    listings: usize,
    fail_listings_after: Option<usize>,
}

/// In-memory node: disks, volume groups and logical volumes
pub struct FakeHost {
    state: Mutex<HostState>,
    trace: Trace,
}

impl FakeHost {
    pub fn new(trace: Trace, disks: &[&str]) -> Self {
        Self {
            state: Mutex::new(HostState {
                disks: disks.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            }),
            trace,
        }
    }

    /// Seed an existing volume group.
    pub fn add_vg(&self, name: &str, members: &[&str]) {
        self.state.lock().vgs.insert(
            name.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    /// Seed an existing thin pool at `percent` of the group.
    pub fn add_thin_pool(&self, vg: &str, pool: &str, percent: u32) {
        self.state.lock().lvs.push(thin_pool(vg, pool, percent));
    }

    /// Override the metadata fill reported for a thin pool.
    pub fn set_metadata_percent(&self, vg: &str, pool: &str, percent: f64) {
        let mut state = self.state.lock();
        if let Some(lv) = state
            .lvs
            .iter_mut()
            .find(|lv| lv.vg_name == vg && lv.name == pool)
        {
            lv.metadata_percent = Some(percent);
        }
    }

    /// Record every block device listing as `lsblk` in the trace.
    pub fn trace_listings(&self) {
        self.state.lock().trace_listings = true;
    }

    /// Let `count` more listings succeed, then fail the rest.
    pub fn fail_listings_after(&self, count: usize) {
        let mut state = self.state.lock();
        state.fail_listings_after = Some(state.listings + count);
    }

    pub fn fail_delete_vg(&self, fail: bool) {
        self.state.lock().fail_delete_vg = fail;
    }

    pub fn has_vg(&self, name: &str) -> bool {
        self.state.lock().vgs.contains_key(name)
    }

    pub fn lv_names(&self) -> Vec<String> {
        self.state.lock().lvs.iter().map(|lv| lv.name.clone()).collect()
    }

    fn record(&self, entry: String) {
        self.trace.lock().push(entry);
    }
}

fn thin_pool(vg: &str, pool: &str, percent: u32) -> LogicalVolume {
    LogicalVolume {
        name: pool.to_string(),
        vg_name: vg.to_string(),
        attr: "twi-a-tz--".parse().expect("valid lv_attr"),
        size: format!("{}.00g", percent),
        metadata_percent: Some(10.0),
    }
}

fn volume_group(name: &str, members: &BTreeSet<String>) -> VolumeGroup {
    VolumeGroup {
        name: name.to_string(),
        pvs: members
            .iter()
            .map(|path| PhysicalVolume {
                path: path.clone(),
                vg_name: name.to_string(),
            })
            .collect(),
        size: VG_SIZE.to_string(),
        free: "0 ".to_string(),
    }
}

#[async_trait]
impl LogicalVolumeManager for FakeHost {
    async fn list_vgs(&self) -> Result<Vec<VolumeGroup>> {
        let state = self.state.lock();
        Ok(state
            .vgs
            .iter()
            .map(|(name, members)| volume_group(name, members))
            .collect())
    }

    async fn get_vg(&self, name: &str) -> Result<VolumeGroup> {
        let state = self.state.lock();
        state
            .vgs
            .get(name)
            .map(|members| volume_group(name, members))
            .ok_or_else(|| Error::VolumeGroupNotFound(name.to_string()))
    }

    async fn list_lvs(&self, vg_name: &str) -> Result<Vec<LogicalVolume>> {
        let state = self.state.lock();
        Ok(state
            .lvs
            .iter()
            .filter(|lv| lv.vg_name == vg_name)
            .cloned()
            .collect())
    }

    async fn create_vg(&self, name: &str, devices: &[String]) -> Result<()> {
        if devices.is_empty() {
            return Err(Error::NoDevices {
                vg_name: name.to_string(),
            });
        }
        self.record(format!("vgcreate {} {}", name, devices.join(" ")));
        self.state
            .lock()
            .vgs
            .insert(name.to_string(), devices.iter().cloned().collect());
        Ok(())
    }

    async fn extend_vg(&self, name: &str, devices: &[String]) -> Result<()> {
        if devices.is_empty() {
            return Err(Error::NoDevices {
                vg_name: name.to_string(),
            });
        }
        self.record(format!("vgextend {} {}", name, devices.join(" ")));
        let mut state = self.state.lock();
        let members = state
            .vgs
            .get_mut(name)
            .ok_or_else(|| Error::VolumeGroupNotFound(name.to_string()))?;
        members.extend(devices.iter().cloned());
        Ok(())
    }

    async fn delete_vg(&self, vg: &VolumeGroup) -> Result<()> {
        self.record(format!("vgremove {}", vg.name));
        let mut state = self.state.lock();
        if state.fail_delete_vg {
            return Err(Error::Command {
                command: "/usr/sbin/vgremove".to_string(),
                args: vec![vg.name.clone()],
                reason: "Volume group is busy".to_string(),
            });
        }
        state.vgs.remove(&vg.name);
        Ok(())
    }

    async fn create_thin_pool(&self, vg_name: &str, pool: &str, size_percent: u32) -> Result<()> {
        self.record(format!("lvcreate {}/{} {}%", vg_name, pool, size_percent));
        self.state
            .lock()
            .lvs
            .push(thin_pool(vg_name, pool, size_percent));
        Ok(())
    }

    async fn extend_thin_pool(&self, vg_name: &str, pool: &str, size_percent: u32) -> Result<()> {
        self.record(format!("lvextend {}/{} {}%", vg_name, pool, size_percent));
        let mut state = self.state.lock();
        if let Some(lv) = state
            .lvs
            .iter_mut()
            .find(|lv| lv.vg_name == vg_name && lv.name == pool)
        {
            lv.size = format!("{}.00g", size_percent);
        }
        Ok(())
    }

    async fn delete_lv(&self, vg_name: &str, lv_name: &str) -> Result<()> {
        self.record(format!("lvremove {}/{}", vg_name, lv_name));
        self.state
            .lock()
            .lvs
            .retain(|lv| !(lv.vg_name == vg_name && lv.name == lv_name));
        Ok(())
    }
}

#[async_trait]
impl BlockDeviceLister for FakeHost {
    async fn list_block_devices(&self) -> Result<BlockDeviceCatalog> {
        let mut state = self.state.lock();
        if state.trace_listings {
            self.record("lsblk".to_string());
        }
        state.listings += 1;
        if state.fail_listings_after.map_or(false, |limit| state.listings > limit) {
            return Err(Error::Command {
                command: "/usr/bin/lsblk".to_string(),
                args: vec!["--json".to_string()],
                reason: "cannot read /sys/block".to_string(),
            });
        }

        let mut builder = BlockDeviceCatalog::builder();
        for disk in &state.disks {
            let mut device = BlockDevice::new(disk.as_str(), "disk", DISK_SIZE);
            if state.vgs.values().any(|members| members.contains(disk)) {
                device.fs_type = "LVM2_member".to_string();
            }
            builder.add(device, None);
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl SignatureWiper for FakeHost {
    async fn wipe(&self, device: &str) -> Result<()> {
        self.record(format!("wipefs {}", device));
        Ok(())
    }
}

#[async_trait]
impl DeviceMapper for FakeHost {
    async fn remove(&self, name: &str) -> Result<()> {
        Err(Error::DeviceMapperReferenceNotFound(name.to_string()))
    }
}

/// Paths are already canonical
pub struct IdentityResolver;

impl PathResolver for IdentityResolver {
    fn resolve(&self, path: &str) -> Result<String> {
        Ok(path.to_string())
    }
}

// =============================================================================
// Tracing stores
// =============================================================================

/// Registry store recording saves and deletes in the trace
pub struct TracedRegistry {
    pub inner: InMemoryRegistry,
    trace: Trace,
}

#[async_trait]
impl RegistryStore for TracedRegistry {
    async fn load(&self) -> Result<Option<LvmdConfig>> {
        self.inner.load().await
    }

    async fn save(&self, config: &LvmdConfig) -> Result<()> {
        self.trace.lock().push("registry save".to_string());
        self.inner.save(config).await
    }

    async fn delete(&self) -> Result<()> {
        self.trace.lock().push("registry delete".to_string());
        self.inner.delete().await
    }
}

/// Cluster store recording node status deletes and finalizer removals
pub struct TracedCluster {
    pub inner: InMemoryClusterStore,
    trace: Trace,
}

#[async_trait]
impl ClusterStore for TracedCluster {
    async fn node_labels(&self, node: &str) -> Result<BTreeMap<String, String>> {
        self.inner.node_labels(node).await
    }

    async fn add_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()> {
        self.inner.add_finalizer(vg, finalizer).await
    }

    async fn remove_finalizer(&self, vg: &LVMVolumeGroup, finalizer: &str) -> Result<()> {
        self.trace.lock().push("finalizer remove".to_string());
        self.inner.remove_finalizer(vg, finalizer).await
    }

    async fn get_node_status(
        &self,
        namespace: &str,
        node: &str,
    ) -> Result<Option<LVMVolumeGroupNodeStatus>> {
        self.inner.get_node_status(namespace, node).await
    }

    async fn create_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()> {
        self.inner.create_node_status(status).await
    }

    async fn update_node_status(&self, status: &LVMVolumeGroupNodeStatus) -> Result<()> {
        self.inner.update_node_status(status).await
    }

    async fn delete_node_status(&self, namespace: &str, node: &str) -> Result<()> {
        self.trace.lock().push("node status delete".to_string());
        self.inner.delete_node_status(namespace, node).await
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A reconciler wired to a fake host and in-memory cluster
pub struct Harness {
    pub host: Arc<FakeHost>,
    pub registry: Arc<TracedRegistry>,
    pub cluster: Arc<TracedCluster>,
    pub events: Arc<InMemoryEventCollector>,
    pub reconciler: VgReconciler,
    pub trace: Trace,
}

impl Harness {
    pub fn new(disks: &[&str]) -> Self {
        Self::with_registry(disks, InMemoryRegistry::new())
    }

    pub fn with_registry(disks: &[&str], registry: InMemoryRegistry) -> Self {
        let trace: Trace = Arc::default();
        let host = Arc::new(FakeHost::new(trace.clone(), disks));
        let registry = Arc::new(TracedRegistry {
            inner: registry,
            trace: trace.clone(),
        });
        let cluster = Arc::new(TracedCluster {
            inner: InMemoryClusterStore::new(),
            trace: trace.clone(),
        });
        let events = Arc::new(InMemoryEventCollector::new());

        let ports = Ports {
            lvm: host.clone(),
            lsblk: host.clone(),
            wipefs: host.clone(),
            dmsetup: host.clone(),
            resolver: Arc::new(IdentityResolver),
            registry: registry.clone(),
            cluster: cluster.clone(),
            events: events.clone(),
        };
        let reconciler = VgReconciler::new(ReconcilerConfig::new(NODE, NAMESPACE), ports);

        Self {
            host,
            registry,
            cluster,
            events,
            reconciler,
            trace,
        }
    }

    /// Trace entries recorded so far
    pub fn trace(&self) -> Vec<String> {
        self.trace.lock().clone()
    }

    pub fn clear_trace(&self) {
        self.trace.lock().clear();
    }

    /// Stored node status object, if any
    pub fn node_status(&self) -> Option<LVMVolumeGroupNodeStatus> {
        self.cluster.inner.node_status(NAMESPACE, NODE)
    }
}

// =============================================================================
// Resources
// =============================================================================

pub fn finalizer() -> String {
    format!("{}/{}", NODE_CLEANUP_FINALIZER, NODE)
}

/// Volume group carrying this node's finalizer
pub fn lvm_volume_group(name: &str, required_paths: &[&str]) -> LVMVolumeGroup {
    let device_selector = (!required_paths.is_empty()).then(|| DeviceSelector {
        required_paths: required_paths.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    });
    let mut vg = LVMVolumeGroup::new(
        name,
        VolumeGroupSpec {
            device_selector,
            ..Default::default()
        },
    );
    vg.metadata.namespace = Some(NAMESPACE.to_string());
    vg.metadata.finalizers = Some(vec![finalizer()]);
    vg
}

pub fn with_thin_pool(mut vg: LVMVolumeGroup, name: &str, size_percent: u32) -> LVMVolumeGroup {
    vg.spec.thin_pool_config = Some(ThinPoolConfig {
        name: name.to_string(),
        size_percent,
        overprovision_ratio: 10.0,
    });
    vg
}

pub fn force_wipe(mut vg: LVMVolumeGroup) -> LVMVolumeGroup {
    if let Some(selector) = vg.spec.device_selector.as_mut() {
        selector.force_wipe = true;
    }
    vg
}

pub fn deleting(mut vg: LVMVolumeGroup) -> LVMVolumeGroup {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    vg.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    vg
}

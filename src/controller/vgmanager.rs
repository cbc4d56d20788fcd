//! Volume Group Reconciler
//!
//! Drives one (volume group, node) pair toward its declared state.
//!
//! # Pass
//!
//! ```text
//! node selector ─▶ finalizer ─▶ load registry ─▶ list devices ─▶ wipe?
//!      ─▶ re-list ─▶ list groups ─▶ select ─▶ Progressing ─▶ create/extend
//!      ─▶ thin pool ─▶ validate ─▶ save registry ─▶ Ready
//! ```
//!
//! # Teardown
//!
//! ```text
//! load registry ─▶ delete thin pool ─▶ delete group ─▶ save/delete registry
//!      ─▶ drop node status entry ─▶ remove finalizer
//! ```
//!
//! Status is written before host state is touched, so a pass interrupted at
//! any point is resumed by the next one.

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::crd::{LVMVolumeGroup, VolumeGroupPhase};
use crate::devices::{
    filter::default_excluded_types, DeviceSelection, DeviceWiper, FilterSet, PathResolver,
    Selection, DEFAULT_MIN_DEVICE_SIZE,
};
use crate::domain::{
    fan_out, publish_fan_out, BlockDeviceLister, ClusterStore, DeviceMapper, EventReason,
    EventSink, LogicalVolumeManager, NodeEvent, RegistryStore, SignatureWiper, VolumeGroup,
};
use crate::error::{Error, Result, ResultExt};
use crate::lvmd::{DeviceClass, LvmdConfig, DEFAULT_SOCKET};

use super::status::StatusWriter;
use super::thin_pool::ensure_thin_pool;
use super::validate::validate_lvs;

/// Interval between passes for a converged or failed volume group
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(15);

/// Prefix of the per-node cleanup finalizer
pub const NODE_CLEANUP_FINALIZER: &str = "cleanup.vgmanager.node.topolvm.io";

const ALL_DEVICES_ATTACHED: &str = "all the available devices are attached to the volume group";

// =============================================================================
// Configuration
// =============================================================================

/// Identity and tunables of the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Node this agent runs on
    pub node_name: String,
    /// Namespace of the node status objects
    pub namespace: String,
    /// Socket written into a freshly created registry
    pub lvmd_socket: String,
    /// Smallest device considered for a volume group, in bytes
    pub min_device_size: u64,
}

impl ReconcilerConfig {
    pub fn new(node_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            namespace: namespace.into(),
            lvmd_socket: DEFAULT_SOCKET.to_string(),
            min_device_size: DEFAULT_MIN_DEVICE_SIZE,
        }
    }
}

/// Everything the reconciler talks to
#[derive(Clone)]
pub struct Ports {
    pub lvm: Arc<dyn LogicalVolumeManager>,
    pub lsblk: Arc<dyn BlockDeviceLister>,
    pub wipefs: Arc<dyn SignatureWiper>,
    pub dmsetup: Arc<dyn DeviceMapper>,
    pub resolver: Arc<dyn PathResolver>,
    pub registry: Arc<dyn RegistryStore>,
    pub cluster: Arc<dyn ClusterStore>,
    pub events: Arc<dyn EventSink>,
}

/// What the controller should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change to the object
    Done,
    /// Run another pass right away
    RequeueNow,
    /// Run another pass after the interval
    RequeueAfter(Duration),
}

// =============================================================================
// Reconciler
// =============================================================================

/// Per-node volume group state machine
pub struct VgReconciler {
    config: ReconcilerConfig,
    lvm: Arc<dyn LogicalVolumeManager>,
    lsblk: Arc<dyn BlockDeviceLister>,
    registry: Arc<dyn RegistryStore>,
    cluster: Arc<dyn ClusterStore>,
    events: Arc<dyn EventSink>,
    selection: DeviceSelection,
    wiper: DeviceWiper,
    status: StatusWriter,
}

impl VgReconciler {
    /// Create a reconciler with the standard device filters.
    pub fn new(config: ReconcilerConfig, ports: Ports) -> Self {
        let filters = FilterSet::standard(config.min_device_size, default_excluded_types());
        Self::with_filters(config, ports, filters)
    }

    /// Create a reconciler with an explicit filter set.
    pub fn with_filters(config: ReconcilerConfig, ports: Ports, filters: FilterSet) -> Self {
        let selection = DeviceSelection::new(filters, ports.resolver.clone());
        let wiper = DeviceWiper::new(ports.wipefs, ports.dmsetup, ports.resolver);
        let status = StatusWriter::new(ports.cluster.clone(), &config.namespace, &config.node_name);

        Self {
            config,
            lvm: ports.lvm,
            lsblk: ports.lsblk,
            registry: ports.registry,
            cluster: ports.cluster,
            events: ports.events,
            selection,
            wiper,
            status,
        }
    }

    /// Finalizer owned by this node
    pub fn finalizer(&self) -> String {
        format!("{}/{}", NODE_CLEANUP_FINALIZER, self.config.node_name)
    }

    async fn emit(&self, vg: &LVMVolumeGroup, event: NodeEvent) {
        let events = fan_out(vg, &self.config.namespace, &self.config.node_name, &event);
        publish_fan_out(self.events.as_ref(), events).await;
    }

    async fn warn_event(&self, vg: &LVMVolumeGroup, reason: EventReason, err: &Error) {
        warn!(reason = %reason, "{}", err);
        self.emit(vg, NodeEvent::warning(reason, err.to_string())).await;
    }

    async fn normal_event(&self, vg: &LVMVolumeGroup, reason: EventReason, message: &str) {
        info!(reason = %reason, "{}", message);
        self.emit(vg, NodeEvent::normal(reason, message)).await;
    }

    /// Run one pass for `vg`.
    #[instrument(skip(self, vg), fields(volume_group = %vg.name_any(), node = %self.config.node_name))]
    pub async fn reconcile(&self, vg: &LVMVolumeGroup) -> Result<ReconcileOutcome> {
        info!("Reconciling");

        let labels = self
            .cluster
            .node_labels(&self.config.node_name)
            .await
            .context(|| "failed to match nodeSelector to node labels")?;
        if !vg.selects_node(&self.config.node_name, &labels) {
            info!("Node labels do not match the selector");
            return Ok(ReconcileOutcome::Done);
        }

        self.status.ensure_exists().await?;

        if vg.metadata.deletion_timestamp.is_some() {
            self.delete(vg).await?;
            return Ok(ReconcileOutcome::Done);
        }

        let finalizer = self.finalizer();
        if !vg.finalizers().iter().any(|f| *f == finalizer) {
            info!(finalizer = %finalizer, "Adding finalizer");
            self.cluster.add_finalizer(vg, &finalizer).await?;
            return Ok(ReconcileOutcome::RequeueNow);
        }

        self.converge(vg).await
    }

    async fn converge(&self, vg: &LVMVolumeGroup) -> Result<ReconcileOutcome> {
        let vg_name = vg.name_any();

        if let Some(thin_pool) = vg.spec.thin_pool_config.as_ref() {
            if let Err(e) = thin_pool.validate() {
                self.status.set_failed(&vg_name, Vec::new(), &e.to_string()).await;
                return Err(e);
            }
        }

        let loaded = match self.registry.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                let e = e.context("failed to read the lvmd config file");
                self.status.set_failed(&vg_name, Vec::new(), &e.to_string()).await;
                return Err(e);
            }
        };
        let registry_was_missing = loaded.is_none();
        let snapshot = loaded.unwrap_or_else(|| LvmdConfig::new(&self.config.lvmd_socket));

        let mut catalog = self
            .lsblk
            .list_block_devices()
            .await
            .context(|| "failed to list block devices")?;

        let status = self.status.current().await?;
        let wiped = self
            .wiper
            .wipe_if_necessary(vg, status.as_ref(), &catalog)
            .await
            .context(|| "failed to wipe devices")?;
        if wiped {
            catalog = self
                .lsblk
                .list_block_devices()
                .await
                .context(|| "failed to list block devices")?;
        }

        let vgs = self
            .lvm
            .list_vgs()
            .await
            .context(|| "failed to list volume groups")?;
        let existing = vgs
            .iter()
            .find(|host_vg| host_vg.name == vg_name && !host_vg.pvs.is_empty());
        let known_devices = existing.map(VolumeGroup::pv_paths).unwrap_or_default();

        let selection = match self.selection.select(
            &catalog,
            &vgs,
            &vg_name,
            vg.spec.device_selector.as_ref(),
        ) {
            Ok(selection) => selection,
            Err(e) => {
                let e = e.context(format!(
                    "failed to get matching available block devices for volume group {}",
                    vg_name
                ));
                self.status.set_failed(&vg_name, known_devices, &e.to_string()).await;
                return Err(e);
            }
        };

        if selection.is_empty() {
            if existing.is_none() {
                let e = Error::NoAvailableDevices(vg_name.clone());
                self.warn_event(vg, EventReason::NoAvailableDevicesForVg, &e).await;
                self.status.set_failed(&vg_name, known_devices, &e.to_string()).await;
                return Err(e);
            }

            info!("No new available devices discovered, verifying existing setup");
            // a pool lost to a failed or interrupted pass is recreated here
            self.reconcile_thin_pool(vg, &vg_name, &known_devices).await?;
            return self.finish(vg, snapshot, registry_was_missing, known_devices).await;
        }

        self.progress(vg, &vg_name, existing, &selection, known_devices, snapshot, registry_was_missing)
            .await
    }

    /// Mark Progressing, then grow the group and its thin pool.
    #[allow(clippy::too_many_arguments)]
    async fn progress(
        &self,
        vg: &LVMVolumeGroup,
        vg_name: &str,
        existing: Option<&VolumeGroup>,
        selection: &Selection,
        known_devices: Vec<String>,
        snapshot: LvmdConfig,
        registry_was_missing: bool,
    ) -> Result<ReconcileOutcome> {
        let new_devices = selection.paths();

        let mut intended = known_devices.clone();
        intended.extend(new_devices.iter().cloned());
        match self
            .status
            .set(vg_name, VolumeGroupPhase::Progressing, intended, "")
            .await
        {
            Ok(true) => {
                let message = format!("new available devices discovered: {}", new_devices.join(", "));
                self.normal_event(vg, EventReason::VolumeGroupProgressing, &message)
                    .await;
                return Ok(ReconcileOutcome::RequeueNow);
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to set status to progressing: {}", e),
        }

        info!(devices = ?new_devices, "Adding devices to volume group");
        let grown = match existing {
            Some(_) => self.lvm.extend_vg(vg_name, &new_devices).await,
            None => self.lvm.create_vg(vg_name, &new_devices).await,
        };
        if let Err(e) = grown {
            let e = e.context(format!("failed to create/extend volume group {}", vg_name));
            self.warn_event(vg, EventReason::VgCreateOrExtendFailed, &e).await;
            self.status.set_failed(vg_name, known_devices, &e.to_string()).await;
            return Err(e);
        }

        self.reconcile_thin_pool(vg, vg_name, &known_devices).await?;

        let devices = match self.lvm.get_vg(vg_name).await {
            Ok(host_vg) => host_vg.pv_paths(),
            Err(e) => {
                let e = e.context(format!("failed to get volume group {}", vg_name));
                self.status.set_failed(vg_name, known_devices, &e.to_string()).await;
                return Err(e);
            }
        };

        self.finish(vg, snapshot, registry_was_missing, devices).await
    }

    /// Create or grow the configured thin pool, marking Failed on error.
    async fn reconcile_thin_pool(
        &self,
        vg: &LVMVolumeGroup,
        vg_name: &str,
        devices: &[String],
    ) -> Result<()> {
        let Some(thin_pool) = vg.spec.thin_pool_config.as_ref() else {
            return Ok(());
        };
        if let Err(e) = ensure_thin_pool(self.lvm.as_ref(), vg_name, thin_pool).await {
            let e = e.context(format!(
                "failed to create thin pool {} for volume group {}",
                thin_pool.name, vg_name
            ));
            self.warn_event(vg, EventReason::ThinPoolCreateOrExtendFailed, &e).await;
            self.status.set_failed(vg_name, devices.to_vec(), &e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Validate, publish the device class and mark Ready.
    async fn finish(
        &self,
        vg: &LVMVolumeGroup,
        snapshot: LvmdConfig,
        registry_was_missing: bool,
        devices: Vec<String>,
    ) -> Result<ReconcileOutcome> {
        let vg_name = vg.name_any();

        if let Err(e) = validate_lvs(self.lvm.as_ref(), vg).await {
            let e = e.context("error while validating logical volumes in existing volume group");
            self.warn_event(vg, EventReason::InconsistentLvs, &e).await;
            self.status.set_failed(&vg_name, devices, &e.to_string()).await;
            return Err(e);
        }

        let mut config = snapshot.clone();
        config.add_device_class(DeviceClass::for_volume_group(vg));
        if config != snapshot {
            if registry_was_missing {
                self.normal_event(
                    vg,
                    EventReason::LvmdConfigMissing,
                    "lvmd config file doesn't exist, will attempt to create a fresh config",
                )
                .await;
            }
            if let Err(e) = self.registry.save(&config).await {
                let e = e.context(format!(
                    "failed to update lvmd config file to update volume group {}",
                    vg_name
                ));
                self.warn_event(vg, EventReason::LvmdConfigUpdateFailed, &e).await;
                self.status.set_failed(&vg_name, devices, &e.to_string()).await;
                return Err(e);
            }
            self.normal_event(
                vg,
                EventReason::LvmdConfigUpdated,
                "updated lvmd config with new deviceClasses",
            )
            .await;
        }

        let changed = self
            .status
            .set(&vg_name, VolumeGroupPhase::Ready, devices, "")
            .await
            .context(|| format!("failed to set status for volume group {} to ready", vg_name))?;
        if changed {
            self.normal_event(vg, EventReason::VolumeGroupReady, ALL_DEVICES_ATTACHED)
                .await;
        }

        Ok(ReconcileOutcome::RequeueAfter(REQUEUE_INTERVAL))
    }

    /// Tear down the host state of `vg`, then release the finalizer.
    #[instrument(skip(self, vg), fields(volume_group = %vg.name_any()))]
    pub async fn delete(&self, vg: &LVMVolumeGroup) -> Result<()> {
        let vg_name = vg.name_any();
        info!("Deleting");

        let mut registry = self
            .registry
            .load()
            .await
            .context(|| "failed to read the lvmd config file")?;
        let removed_class = match registry.as_mut() {
            Some(config) => config.remove_device_class(&vg_name),
            None => {
                info!("lvmd config file does not exist, assuming deleted");
                false
            }
        };
        if registry.is_some() && !removed_class {
            info!("Volume group not in the lvmd device classes, assuming deleted");
        }

        match self.lvm.get_vg(&vg_name).await {
            Err(e) if e.is_not_found() => {
                info!("Volume group not found, assuming it was already deleted");
            }
            Err(e) => return Err(e.context(format!("failed to get volume group {}", vg_name))),
            Ok(host_vg) => self.delete_host_state(vg, &host_vg).await?,
        }

        if let Some(config) = registry {
            if config.device_classes.is_empty() {
                self.registry.delete().await.context(|| {
                    format!("failed to delete lvmd config file for volume group {}", vg_name)
                })?;
                self.normal_event(
                    vg,
                    EventReason::LvmdConfigDeleted,
                    "removed lvmd config after last deviceClass was removed",
                )
                .await;
            } else if removed_class {
                self.registry.save(&config).await.context(|| {
                    format!("failed to update lvmd config file for volume group {}", vg_name)
                })?;
                self.normal_event(
                    vg,
                    EventReason::LvmdConfigUpdated,
                    "updated lvmd config after deviceClass was removed",
                )
                .await;
            }
        }

        self.status
            .remove(&vg_name)
            .await
            .context(|| format!("failed to remove status for volume group {}", vg_name))?;

        let finalizer = self.finalizer();
        if vg.finalizers().iter().any(|f| *f == finalizer) {
            info!(finalizer = %finalizer, "Removing finalizer");
            self.cluster.remove_finalizer(vg, &finalizer).await?;
        }
        Ok(())
    }

    /// Remove the thin pool, then the group itself.
    async fn delete_host_state(&self, vg: &LVMVolumeGroup, host_vg: &VolumeGroup) -> Result<()> {
        let vg_name = host_vg.name.as_str();

        if let Some(thin_pool) = vg.spec.thin_pool_config.as_ref() {
            let exists = self
                .lvm
                .lv_exists(vg_name, &thin_pool.name)
                .await
                .context(|| {
                    format!(
                        "failed to check existence of thin pool {} in volume group {}",
                        thin_pool.name, vg_name
                    )
                })?;

            if exists {
                if let Err(e) = self.lvm.delete_lv(vg_name, &thin_pool.name).await {
                    let e = e.context(format!(
                        "failed to delete thin pool {} in volume group {}",
                        thin_pool.name, vg_name
                    ));
                    self.status.set_failed(vg_name, host_vg.pv_paths(), &e.to_string()).await;
                    return Err(e);
                }
                info!(thin_pool = %thin_pool.name, "Thin pool deleted");
            } else {
                debug!(thin_pool = %thin_pool.name, "Thin pool not found, assuming it was already deleted");
            }
        }

        if let Err(e) = self.lvm.delete_vg(host_vg).await {
            let e = e.context(format!("failed to delete volume group {}", vg_name));
            self.status.set_failed(vg_name, host_vg.pv_paths(), &e.to_string()).await;
            return Err(e);
        }
        info!("Volume group deleted");
        Ok(())
    }
}

impl std::fmt::Debug for VgReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VgReconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Device Wiper
//!
//! Destructive preparation of configured devices when force-wipe is set:
//! on-disk signatures are erased, then stale device-mapper mappings left
//! behind by a previous volume group are removed innermost first.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::crd::{LVMVolumeGroup, NodeStatusSpec};
use crate::domain::{DeviceMapper, SignatureWiper};
use crate::error::{Result, ResultExt};

use super::catalog::BlockDeviceCatalog;
use super::selector::PathResolver;

/// Erases configured devices that are not yet part of the volume group
#[derive(Clone)]
pub struct DeviceWiper {
    wipefs: Arc<dyn SignatureWiper>,
    dmsetup: Arc<dyn DeviceMapper>,
    resolver: Arc<dyn PathResolver>,
}

impl DeviceWiper {
    pub fn new(
        wipefs: Arc<dyn SignatureWiper>,
        dmsetup: Arc<dyn DeviceMapper>,
        resolver: Arc<dyn PathResolver>,
    ) -> Self {
        Self {
            wipefs,
            dmsetup,
            resolver,
        }
    }

    /// Wipe every configured, unclaimed device if force-wipe is enabled.
    ///
    /// Returns whether anything was wiped, in which case the catalog is stale.
    /// Failures on required paths abort; failures on optional paths are logged.
    #[instrument(skip_all, fields(volume_group = %vg.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn wipe_if_necessary(
        &self,
        vg: &LVMVolumeGroup,
        status: Option<&NodeStatusSpec>,
        catalog: &BlockDeviceCatalog,
    ) -> Result<bool> {
        let Some(selector) = vg.spec.device_selector.as_ref().filter(|s| s.force_wipe) else {
            return Ok(false);
        };
        let vg_name = vg.metadata.name.as_deref().unwrap_or_default();

        let mut wiped = false;
        for path in &selector.required_paths {
            if self.is_claimed(vg_name, status, path) {
                continue;
            }
            wiped |= self
                .wipe_device(path, catalog, true)
                .await
                .context(|| format!("failed to wipe device {}", path))?;
        }

        for path in &selector.optional_paths {
            if self.is_claimed(vg_name, status, path) {
                continue;
            }
            match self.wipe_device(path, catalog, false).await {
                Ok(device_wiped) => wiped |= device_wiped,
                Err(e) => warn!(device = %path, "Failed to wipe optional device: {}", e),
            }
        }

        Ok(wiped)
    }

    fn resolve(&self, path: &str) -> String {
        self.resolver
            .resolve(path)
            .unwrap_or_else(|_| path.to_string())
    }

    fn is_claimed(&self, vg_name: &str, status: Option<&NodeStatusSpec>, path: &str) -> bool {
        status.map_or(false, |status| {
            status.has_device(vg_name, path) || status.has_device(vg_name, &self.resolve(path))
        })
    }

    async fn wipe_device(
        &self,
        path: &str,
        catalog: &BlockDeviceCatalog,
        required: bool,
    ) -> Result<bool> {
        let resolved = self.resolve(path);
        let Some(id) = catalog.find(&resolved).or_else(|| catalog.find(path)) else {
            return Ok(false);
        };
        let device = catalog.get(id);

        self.wipefs.wipe(&device.kname).await?;
        info!(device = %device.kname, "Device wiped successfully");

        // wipefs leaves the mappings of former logical volumes in place
        for child in catalog.descendants_bottom_up(id) {
            let child = catalog.get(child);
            match self.dmsetup.remove(&child.kname).await {
                Ok(()) => info!(child = %child.kname, "Device-mapper reference removed"),
                Err(e) if e.is_not_found() => {
                    info!(child = %child.kname, "Device-mapper reference does not exist, skipping")
                }
                Err(e) if required => return Err(e),
                Err(e) => warn!(
                    child = %child.kname,
                    "Failed to remove device-mapper reference: {}",
                    e
                ),
            }
        }

        Ok(true)
    }
}

impl std::fmt::Debug for DeviceWiper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWiper").finish_non_exhaustive()
    }
}

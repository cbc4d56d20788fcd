//! Device Selector
//!
//! Decides which catalog devices are new candidates for a volume group.
//! Without a device selector every eligible leaf device is taken. With one,
//! each listed path is resolved through symlinks and checked individually:
//! required paths must be usable, optional paths are skipped with a warning
//! when they are not. Paths already in the volume group are skipped silently.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::crd::DeviceSelector;
use crate::domain::VolumeGroup;
use crate::error::{Error, Result};

use super::catalog::BlockDeviceCatalog;
use super::filter::{FilterContext, FilterSet};

/// Resolves a configured device path to the kernel device path
pub trait PathResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Result<String>;
}

/// Resolves symlinks such as `/dev/disk/by-id/...` on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct SymlinkResolver;

impl PathResolver for SymlinkResolver {
    fn resolve(&self, path: &str) -> Result<String> {
        let resolved = std::fs::canonicalize(Path::new(path))?;
        Ok(resolved.to_string_lossy().into_owned())
    }
}

/// A device chosen to join the volume group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    /// Path handed to the storage tools (the configured path when one was given)
    pub path: String,
    /// Kernel device path
    pub kname: String,
}

/// Result of a selection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// New devices, in configuration order
    pub devices: Vec<SelectedDevice>,
    /// Whether any configured path was already part of the volume group
    pub already_in_vg: bool,
}

impl Selection {
    pub fn paths(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.path.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

enum Candidate {
    New(SelectedDevice),
    AlreadyInVg,
}

/// Chooses new devices for a volume group
#[derive(Clone)]
pub struct DeviceSelection {
    filters: FilterSet,
    resolver: Arc<dyn PathResolver>,
}

impl DeviceSelection {
    pub fn new(filters: FilterSet, resolver: Arc<dyn PathResolver>) -> Self {
        Self { filters, resolver }
    }

    /// Select new devices for `vg_name`.
    pub fn select(
        &self,
        catalog: &BlockDeviceCatalog,
        volume_groups: &[VolumeGroup],
        vg_name: &str,
        selector: Option<&DeviceSelector>,
    ) -> Result<Selection> {
        let ctx = FilterContext {
            vg_name,
            volume_groups,
        };

        match selector {
            None => Ok(self.select_all(catalog, &ctx)),
            Some(selector) => self.select_paths(catalog, &ctx, selector),
        }
    }

    fn select_all(&self, catalog: &BlockDeviceCatalog, ctx: &FilterContext<'_>) -> Selection {
        let mut selection = Selection::default();
        for &root in catalog.roots() {
            for leaf in catalog.leaves(root) {
                let device = catalog.get(leaf);
                let verdict = self.filters.evaluate(device, ctx);
                if verdict.is_eligible() {
                    selection.devices.push(SelectedDevice {
                        path: device.kname.clone(),
                        kname: device.kname.clone(),
                    });
                } else {
                    debug!(device = %device.kname, "Device not eligible: {}", verdict);
                }
            }
        }
        selection
    }

    fn select_paths(
        &self,
        catalog: &BlockDeviceCatalog,
        ctx: &FilterContext<'_>,
        selector: &DeviceSelector,
    ) -> Result<Selection> {
        let duplicates = selector.duplicate_paths();
        if !duplicates.is_empty() {
            return Err(Error::DuplicateDevicePaths(duplicates));
        }

        let mut selection = Selection::default();

        for path in &selector.required_paths {
            match self.candidate(catalog, ctx, path) {
                Ok(Candidate::New(device)) => selection.devices.push(device),
                Ok(Candidate::AlreadyInVg) => {
                    info!(
                        device = %path,
                        "Skipping required device that is already part of volume group {}",
                        ctx.vg_name
                    );
                    selection.already_in_vg = true;
                }
                Err(reason) => {
                    return Err(Error::DeviceValidation {
                        path: path.clone(),
                        reason,
                    })
                }
            }
        }

        if selector.optional_paths.is_empty() {
            return Ok(selection);
        }

        for path in &selector.optional_paths {
            match self.candidate(catalog, ctx, path) {
                Ok(Candidate::New(device)) => selection.devices.push(device),
                Ok(Candidate::AlreadyInVg) => {
                    info!(
                        device = %path,
                        "Skipping optional device that is already part of volume group {}",
                        ctx.vg_name
                    );
                    selection.already_in_vg = true;
                }
                Err(reason) => warn!(device = %path, "Skipping optional device: {}", reason),
            }
        }

        if selection.devices.is_empty() && !selection.already_in_vg {
            return Err(Error::NoValidDevices);
        }

        Ok(selection)
    }

    /// Check one configured path. `Err` carries the reason it is unusable.
    fn candidate(
        &self,
        catalog: &BlockDeviceCatalog,
        ctx: &FilterContext<'_>,
        path: &str,
    ) -> std::result::Result<Candidate, String> {
        let resolved = self
            .resolver
            .resolve(path)
            .map_err(|e| format!("unable to resolve device path {}: {}", path, e))?;

        let in_this_vg = ctx
            .volume_groups
            .iter()
            .filter(|vg| vg.name == ctx.vg_name)
            .any(|vg| vg.has_pv(&resolved) || vg.has_pv(path));
        if in_this_vg {
            return Ok(Candidate::AlreadyInVg);
        }

        let id = catalog
            .find(&resolved)
            .or_else(|| catalog.find(path))
            .ok_or_else(|| format!("can not find device {} in the available block devices", path))?;
        let device = catalog.get(id);

        if device.is_container() {
            return Err(format!(
                "{} has child devices and cannot be used directly",
                device.kname
            ));
        }

        let verdict = self.filters.evaluate(device, ctx);
        if !verdict.is_eligible() {
            return Err(verdict.to_string());
        }

        Ok(Candidate::New(SelectedDevice {
            path: path.to_string(),
            kname: device.kname.clone(),
        }))
    }
}

impl std::fmt::Debug for DeviceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSelection")
            .field("filters", &self.filters)
            .finish()
    }
}

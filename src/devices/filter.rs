//! Device Filter Pipeline
//!
//! An ordered list of named predicates deciding whether a device may join a
//! volume group. Evaluation stops at the first predicate that rejects or
//! fails; a failing predicate disqualifies the device but is reported
//! separately from an ordinary rejection.

use std::fmt;
use std::sync::Arc;

use crate::domain::VolumeGroup;
use crate::error::Result;

use super::catalog::BlockDevice;

/// Default minimum device size (1 GiB)
pub const DEFAULT_MIN_DEVICE_SIZE: u64 = 1024 * 1024 * 1024;

/// Filesystem signature of an LVM physical volume
pub const LVM_PV_FSTYPE: &str = "LVM2_member";

// Filter names
pub const NOT_READ_ONLY: &str = "notReadOnly";
pub const NOT_SUSPENDED: &str = "notSuspended";
pub const NO_BIOS_BOOT_OR_RESERVED_PART_LABEL: &str = "noBiosBootOrReservedPartLabel";
pub const USABLE_DEVICE_TYPE: &str = "usableDeviceType";
pub const MINIMUM_SIZE: &str = "minimumSize";
pub const NO_PARTITION_TABLE: &str = "noPartitionTable";
pub const NO_FILESYSTEM_SIGNATURE: &str = "noFilesystemSignature";
pub const NOT_MOUNTED: &str = "notMounted";
pub const NOT_FOREIGN_VOLUME_GROUP_MEMBER: &str = "notForeignVolumeGroupMember";
pub const NOT_IN_THIS_VOLUME_GROUP: &str = "notInThisVolumeGroup";

/// Host state a predicate may consult
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// Volume group being reconciled
    pub vg_name: &'a str,
    /// Volume groups currently on the host
    pub volume_groups: &'a [VolumeGroup],
}

impl FilterContext<'_> {
    fn owning_vg(&self, device: &BlockDevice) -> Option<&str> {
        self.volume_groups
            .iter()
            .find(|vg| vg.has_pv(&device.kname) || vg.has_pv(&device.name))
            .map(|vg| vg.name.as_str())
    }
}

type Predicate = dyn Fn(&BlockDevice, &FilterContext<'_>) -> Result<bool> + Send + Sync;

/// A named eligibility predicate
#[derive(Clone)]
pub struct DeviceFilter {
    name: &'static str,
    predicate: Arc<Predicate>,
}

impl DeviceFilter {
    pub fn new<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&BlockDevice, &FilterContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceFilter").field("name", &self.name).finish()
    }
}

/// Outcome of evaluating one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Eligible,
    Rejected { filter: &'static str },
    Errored { filter: &'static str, error: String },
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Verdict::Eligible)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Eligible => write!(f, "eligible"),
            Verdict::Rejected { filter } => write!(f, "rejected by filter {}", filter),
            Verdict::Errored { filter, error } => write!(f, "filter {} failed: {}", filter, error),
        }
    }
}

/// Ordered set of device filters
#[derive(Debug, Clone)]
pub struct FilterSet {
    filters: Vec<DeviceFilter>,
}

impl FilterSet {
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        Self { filters }
    }

    /// The standard pipeline
    pub fn standard(min_size: u64, excluded_types: Vec<String>) -> Self {
        Self::new(vec![
            DeviceFilter::new(NOT_READ_ONLY, |dev, _| Ok(!dev.read_only)),
            DeviceFilter::new(NOT_SUSPENDED, |dev, _| Ok(dev.state != "suspended")),
            DeviceFilter::new(NO_BIOS_BOOT_OR_RESERVED_PART_LABEL, |dev, _| {
                let label = dev.part_label.to_lowercase();
                Ok(!(label.contains("bios") || label.contains("boot") || label.contains("reserved")))
            }),
            DeviceFilter::new(USABLE_DEVICE_TYPE, move |dev, _| {
                Ok(!excluded_types.iter().any(|t| *t == dev.device_type))
            }),
            DeviceFilter::new(MINIMUM_SIZE, move |dev, _| Ok(dev.size >= min_size)),
            DeviceFilter::new(NO_PARTITION_TABLE, |dev, _| Ok(dev.pt_type.is_empty())),
            DeviceFilter::new(NO_FILESYSTEM_SIGNATURE, |dev, _| {
                Ok(dev.fs_type.is_empty() || dev.fs_type == LVM_PV_FSTYPE)
            }),
            DeviceFilter::new(NOT_MOUNTED, |dev, _| Ok(dev.mountpoint.is_empty())),
            DeviceFilter::new(NOT_FOREIGN_VOLUME_GROUP_MEMBER, |dev, ctx| {
                Ok(ctx.owning_vg(dev).map_or(true, |vg| vg == ctx.vg_name))
            }),
            DeviceFilter::new(NOT_IN_THIS_VOLUME_GROUP, |dev, ctx| {
                Ok(ctx.owning_vg(dev) != Some(ctx.vg_name))
            }),
        ])
    }

    /// Filter names in evaluation order
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name).collect()
    }

    /// Evaluate one device, stopping at the first rejection or failure
    pub fn evaluate(&self, device: &BlockDevice, ctx: &FilterContext<'_>) -> Verdict {
        for filter in &self.filters {
            match (filter.predicate)(device, ctx) {
                Ok(true) => continue,
                Ok(false) => return Verdict::Rejected { filter: filter.name },
                Err(e) => {
                    return Verdict::Errored {
                        filter: filter.name,
                        error: e.to_string(),
                    }
                }
            }
        }
        Verdict::Eligible
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::standard(DEFAULT_MIN_DEVICE_SIZE, default_excluded_types())
    }
}

/// Device types never used for volume groups
pub fn default_excluded_types() -> Vec<String> {
    vec!["rom".to_string(), "lvm".to_string()]
}

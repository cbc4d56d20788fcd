//! Block Device Catalog
//!
//! Host block devices form a tree: disks carry partitions, physical volumes
//! carry device-mapper children, and so on. The catalog flattens that tree
//! into an arena of records with explicit child-index lists.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Index of a device in its catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(usize);

/// A single block device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDevice {
    /// Device path as listed, e.g. `/dev/sdb1`
    pub name: String,
    /// Kernel device path, e.g. `/dev/dm-0`
    pub kname: String,
    /// `disk`, `part`, `lvm`, `rom`, `loop`, ...
    pub device_type: String,
    /// Size in bytes
    pub size: u64,
    pub read_only: bool,
    pub state: String,
    pub part_label: String,
    pub fs_type: String,
    pub pt_type: String,
    pub mountpoint: String,
    pub(crate) children: Vec<DeviceId>,
    pub(crate) parent: Option<DeviceId>,
}

impl BlockDevice {
    /// A bare device of the given type and size
    pub fn new(kname: impl Into<String>, device_type: impl Into<String>, size: u64) -> Self {
        let kname = kname.into();
        Self {
            name: kname.clone(),
            kname,
            device_type: device_type.into(),
            size,
            ..Default::default()
        }
    }

    /// Containers are only ever recursed into, never selected.
    pub fn is_container(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn children(&self) -> &[DeviceId] {
        &self.children
    }

    pub fn parent(&self) -> Option<DeviceId> {
        self.parent
    }
}

/// Snapshot of the host block device tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDeviceCatalog {
    devices: Vec<BlockDevice>,
    roots: Vec<DeviceId>,
}

impl BlockDeviceCatalog {
    /// Build a catalog from `lsblk --json` output.
    pub fn from_lsblk_json(output: &str) -> Result<Self> {
        let report: LsblkReport = serde_json::from_str(output).map_err(|e| Error::ReportParse {
            tool: "lsblk".to_string(),
            reason: e.to_string(),
        })?;

        let mut catalog = Self::default();
        // (record, parent) pairs, children pushed in reverse to keep listing order
        let mut pending: Vec<(RawDevice, Option<DeviceId>)> =
            report.blockdevices.into_iter().rev().map(|d| (d, None)).collect();

        while let Some((raw, parent)) = pending.pop() {
            let id = DeviceId(catalog.devices.len());
            let children = raw.children;
            catalog.devices.push(BlockDevice {
                name: raw.name,
                kname: raw.kname,
                device_type: raw.device_type,
                size: raw.size.as_u64()?,
                read_only: raw.ro.as_bool(),
                state: raw.state.unwrap_or_default(),
                part_label: raw.partlabel.unwrap_or_default(),
                fs_type: raw.fstype.unwrap_or_default(),
                pt_type: raw.pttype.unwrap_or_default(),
                mountpoint: raw.mountpoint.unwrap_or_default(),
                children: Vec::new(),
                parent,
            });

            match parent {
                Some(parent) => catalog.devices[parent.0].children.push(id),
                None => catalog.roots.push(id),
            }
            pending.extend(children.into_iter().rev().map(|c| (c, Some(id))));
        }

        Ok(catalog)
    }

    /// Build a catalog from already-parsed records. Test and fixture helper.
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn get(&self, id: DeviceId) -> &BlockDevice {
        &self.devices[id.0]
    }

    pub fn roots(&self) -> &[DeviceId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Every device in pre-order
    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &BlockDevice)> {
        self.devices.iter().enumerate().map(|(i, d)| (DeviceId(i), d))
    }

    /// Find a device by kernel name, falling back to the listed name
    pub fn find(&self, path: &str) -> Option<DeviceId> {
        self.iter()
            .find(|(_, d)| d.kname == path)
            .or_else(|| self.iter().find(|(_, d)| d.name == path))
            .map(|(id, _)| id)
    }

    /// Leaf devices reachable from `id`, in listing order
    pub fn leaves(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut leaves = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let device = self.get(current);
            if device.is_container() {
                stack.extend(device.children.iter().rev().copied());
            } else {
                leaves.push(current);
            }
        }
        leaves
    }

    /// Descendants of `id` with the innermost first, excluding `id` itself
    pub fn descendants_bottom_up(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut order = Vec::new();
        for &child in self.get(id).children.iter() {
            order.extend(self.descendants_bottom_up(child));
            order.push(child);
        }
        order
    }
}

/// Incremental catalog construction
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: BlockDeviceCatalog,
}

impl CatalogBuilder {
    /// Add a device under `parent` (or as a root) and return its id.
    pub fn add(&mut self, device: BlockDevice, parent: Option<DeviceId>) -> DeviceId {
        let id = DeviceId(self.catalog.devices.len());
        self.catalog.devices.push(BlockDevice {
            children: Vec::new(),
            parent,
            ..device
        });
        match parent {
            Some(parent) => self.catalog.devices[parent.0].children.push(id),
            None => self.catalog.roots.push(id),
        }
        id
    }

    pub fn build(self) -> BlockDeviceCatalog {
        self.catalog
    }
}

// =============================================================================
// lsblk report
// =============================================================================

#[derive(Debug, Deserialize)]
struct LsblkReport {
    #[serde(default)]
    blockdevices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    name: String,
    #[serde(default)]
    kname: String,
    #[serde(rename = "type", default)]
    device_type: String,
    #[serde(default)]
    size: Flexible,
    #[serde(default)]
    ro: Flexible,
    state: Option<String>,
    partlabel: Option<String>,
    fstype: Option<String>,
    pttype: Option<String>,
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<RawDevice>,
}

/// Older lsblk releases print numbers and booleans as strings
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Flexible {
    Bool(bool),
    Number(u64),
    Text(String),
    #[default]
    Missing,
}

impl Flexible {
    fn as_u64(&self) -> Result<u64> {
        match self {
            Flexible::Number(n) => Ok(*n),
            Flexible::Text(s) => s.trim().parse().map_err(|e: std::num::ParseIntError| {
                Error::SizeParse {
                    value: s.clone(),
                    reason: e.to_string(),
                }
            }),
            Flexible::Missing => Ok(0),
            Flexible::Bool(b) => Err(Error::SizeParse {
                value: b.to_string(),
                reason: "expected a byte count".to_string(),
            }),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Flexible::Bool(b) => *b,
            Flexible::Number(n) => *n != 0,
            Flexible::Text(s) => s == "1" || s == "true",
            Flexible::Missing => false,
        }
    }
}

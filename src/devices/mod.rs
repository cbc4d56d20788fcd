//! Host Block Devices
//!
//! Discovery, filtering, selection and wiping of the devices that back
//! volume groups.

pub mod catalog;
pub mod filter;
pub mod selector;
pub mod wipe;

pub use catalog::{BlockDevice, BlockDeviceCatalog, CatalogBuilder, DeviceId};
pub use filter::{DeviceFilter, FilterContext, FilterSet, Verdict, DEFAULT_MIN_DEVICE_SIZE};
pub use selector::{DeviceSelection, PathResolver, SelectedDevice, Selection, SymlinkResolver};
pub use wipe::DeviceWiper;

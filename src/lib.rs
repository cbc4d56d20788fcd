//! vgmanager - Per-node LVM Volume Group Manager
//!
//! A Kubernetes node agent that turns `LVMVolumeGroup` resources into host
//! volume groups and thin pools, and publishes them as device classes to
//! the co-located lvmd provisioning daemon.
//!
//! # Architecture
//!
//! ```text
//! lsblk ─▶ Filters ─▶ Selector ─▶ State Machine ─▶ vgcreate / lvcreate
//!                                       │
//!                                       ├─▶ lvmd.yaml (device classes)
//!                                       └─▶ LVMVolumeGroupNodeStatus + Events
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Host executor, host tools, Kubernetes and in-memory adapters
//! - [`controller`] - Reconciliation state machine, thin pool, validator
//! - [`crd`] - Custom Resource Definitions for Kubernetes
//! - [`devices`] - Block device catalog, filters, selection and wiping
//! - [`domain`] - Domain layer with ports and events
//! - [`error`] - Error types
//! - [`lvm`] - LVM command adapter and report parsing
//! - [`lvmd`] - lvmd device-class registry file
//! - [`metrics`] - Prometheus metrics

pub mod adapters;
pub mod controller;
pub mod crd;
pub mod devices;
pub mod domain;
pub mod error;
pub mod lvm;
pub mod lvmd;
pub mod metrics;

// Re-export commonly used types
pub use controller::{ReconcileOutcome, ReconcilerConfig, VgReconciler};
pub use crd::{LVMVolumeGroup, LVMVolumeGroupNodeStatus};
pub use error::{Error, Result};

//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  CommandExecutor │ BlockDeviceLister │ ClusterStore │ ...  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ HostExecutor │ HostLsblk │ HostWipefs │ HostDmsetup       │ │
//! │  │ KubeClusterStore │ KubeEventSink │ In-memory doubles      │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The LVM adapter lives in [`crate::lvm`] and the registry file adapter
//! in [`crate::lvmd`].
//!
//! # Usage
//!
//! ```ignore
//! use vgmanager::adapters::{HostExecutor, HostLsblk};
//! use vgmanager::domain::BlockDeviceLister;
//!
//! let executor = Arc::new(HostExecutor::new(true));
//! let catalog = HostLsblk::new(executor).list_block_devices().await?;
//! ```

mod executor;
mod host_tools;
mod in_memory;
mod kubernetes;

pub use executor::{HostExecutor, RecordingExecutor, NSENTER};
pub use host_tools::{HostDmsetup, HostLsblk, HostWipefs, DMSETUP, LSBLK, WIPEFS};
pub use in_memory::{InMemoryClusterStore, InMemoryEventCollector, InMemoryRegistry};
pub use kubernetes::{KubeClusterStore, KubeEventSink, FIELD_MANAGER};

//! Block Device Tool Adapters
//!
//! Thin wrappers over `lsblk`, `wipefs` and `dmsetup`, each running through
//! a [`CommandExecutor`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::devices::BlockDeviceCatalog;
use crate::domain::{BlockDeviceLister, CommandExecutor, DeviceMapper, SignatureWiper};
use crate::error::{Error, Result};

pub const LSBLK: &str = "/usr/bin/lsblk";
pub const WIPEFS: &str = "/usr/sbin/wipefs";
pub const DMSETUP: &str = "/usr/sbin/dmsetup";

/// Columns requested from lsblk
const LSBLK_COLUMNS: &str = "NAME,KNAME,TYPE,SIZE,RO,STATE,PARTLABEL,FSTYPE,PTTYPE,MOUNTPOINT";

/// dmsetup stderr when the mapping is already gone
const DM_NOT_FOUND: &str = "No such device or address";

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

// =============================================================================
// lsblk
// =============================================================================

/// Lists block devices with `lsblk --json`
#[derive(Clone)]
pub struct HostLsblk {
    executor: Arc<dyn CommandExecutor>,
}

impl HostLsblk {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl BlockDeviceLister for HostLsblk {
    async fn list_block_devices(&self) -> Result<BlockDeviceCatalog> {
        let output = self
            .executor
            .execute(
                LSBLK,
                &to_args(&["--json", "--paths", "--bytes", "-o", LSBLK_COLUMNS]),
            )
            .await?;
        let catalog = BlockDeviceCatalog::from_lsblk_json(&output)?;
        debug!(devices = catalog.len(), "Listed block devices");
        Ok(catalog)
    }
}

// =============================================================================
// wipefs
// =============================================================================

/// Erases signatures with `wipefs --all --force`
#[derive(Clone)]
pub struct HostWipefs {
    executor: Arc<dyn CommandExecutor>,
}

impl HostWipefs {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl SignatureWiper for HostWipefs {
    async fn wipe(&self, device: &str) -> Result<()> {
        self.executor
            .execute(WIPEFS, &to_args(&["--all", "--force", device]))
            .await?;
        Ok(())
    }
}

// =============================================================================
// dmsetup
// =============================================================================

/// Removes mappings with `dmsetup remove --force`
#[derive(Clone)]
pub struct HostDmsetup {
    executor: Arc<dyn CommandExecutor>,
}

impl HostDmsetup {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl DeviceMapper for HostDmsetup {
    async fn remove(&self, name: &str) -> Result<()> {
        match self
            .executor
            .execute(DMSETUP, &to_args(&["remove", "--force", name]))
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Command { reason, .. }) if reason.contains(DM_NOT_FOUND) => {
                Err(Error::DeviceMapperReferenceNotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

macro_rules! debug_opaque {
    ($($name:ident),*) => {
        $(impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).finish_non_exhaustive()
            }
        })*
    };
}

debug_opaque!(HostLsblk, HostWipefs, HostDmsetup);

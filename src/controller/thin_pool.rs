//! Thin-Pool Manager
//!
//! Keeps the configured thin pool present and grows it toward its target
//! share of the volume group. Pools are never shrunk.

use tracing::{info, instrument};

use crate::crd::ThinPoolConfig;
use crate::domain::{LogicalVolume, LogicalVolumeManager};
use crate::error::{Error, Result, ResultExt};
use crate::lvm::fill_percent;

/// What a pass did, or would do, to the thin pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinPoolAction {
    /// The pool did not exist
    Create,
    /// The pool is below its target share
    Extend { current_percent: u32 },
    /// Nothing to do
    Unchanged,
}

/// Decide whether a pool at `current_percent` of its group should grow.
fn extension_needed(current_percent: u32, target_percent: u32) -> bool {
    target_percent > current_percent
}

/// Reject a same-named logical volume that is not a thin pool.
fn check_collision(lv: &LogicalVolume) -> Result<()> {
    if lv.attr.is_thin_pool() {
        return Ok(());
    }
    Err(Error::ThinPoolCollision {
        lv_name: lv.name.clone(),
        vg_name: lv.vg_name.clone(),
        attr: lv.attr.to_string(),
    })
}

/// Create or extend the thin pool of `vg_name`.
#[instrument(skip(lvm, config), fields(thin_pool = %config.name))]
pub async fn ensure_thin_pool(
    lvm: &dyn LogicalVolumeManager,
    vg_name: &str,
    config: &ThinPoolConfig,
) -> Result<ThinPoolAction> {
    let lvs = lvm
        .list_lvs(vg_name)
        .await
        .context(|| format!("failed to list logical volumes in the volume group {:?}", vg_name))?;

    let Some(pool) = lvs.iter().find(|lv| lv.name == config.name) else {
        info!("Creating thin pool");
        lvm.create_thin_pool(vg_name, &config.name, config.size_percent)
            .await
            .context(|| "failed to create thin pool")?;
        info!("Successfully created thin pool");
        return Ok(ThinPoolAction::Create);
    };
    check_collision(pool)?;

    let vg = match lvm.get_vg(vg_name).await {
        Ok(vg) => vg,
        // the group is recreated on a later pass
        Err(e) if e.is_not_found() => return Ok(ThinPoolAction::Unchanged),
        Err(e) => return Err(e.context(format!("failed to get volume group {:?}", vg_name))),
    };

    let current_percent = fill_percent(&pool.size, &vg.size)?;
    if !extension_needed(current_percent, config.size_percent) {
        return Ok(ThinPoolAction::Unchanged);
    }

    info!(current_percent, target_percent = config.size_percent, "Extending thin pool");
    lvm.extend_thin_pool(vg_name, &config.name, config.size_percent)
        .await
        .context(|| "failed to extend thin pool")?;
    info!("Successfully extended thin pool");
    Ok(ThinPoolAction::Extend { current_percent })
}

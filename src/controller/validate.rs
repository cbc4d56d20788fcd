//! Consistency Validator
//!
//! Re-checks the thin pool on every pass. Logical volumes created by the
//! provisioning daemon are not inspected; without a thin pool there is
//! nothing this agent owns inside the group.

use tracing::debug;

use crate::crd::LVMVolumeGroup;
use crate::domain::{LogicalVolume, LogicalVolumeManager};
use crate::error::{Error, Result, ResultExt};

/// Metadata fill above which a thin pool is considered at risk of overflow
pub const METADATA_HIGH_WATER_PERCENT: f64 = 95.0;

fn inconsistent(message: impl Into<String>) -> Error {
    Error::InconsistentLogicalVolumes(message.into())
}

/// Check the reported logical volumes of a group against its thin pool.
pub fn check_thin_pool(lvs: &[LogicalVolume], pool_name: &str) -> Result<()> {
    if lvs.is_empty() {
        return Err(inconsistent(
            "no logical volume was reported, the thin pool is gone but the volume group may still exist",
        ));
    }

    let pool = lvs
        .iter()
        .find(|lv| lv.name == pool_name)
        .ok_or_else(|| {
            inconsistent(format!(
                "thin pool {} is no longer present, but the volume group may still exist",
                pool_name
            ))
        })?;

    if !pool.attr.is_thin_pool() {
        return Err(inconsistent(format!(
            "logical volume {} is not a thin pool even though one is configured (lv_attr: {})",
            pool.name, pool.attr
        )));
    }

    if !pool.attr.is_active() {
        return Err(inconsistent(format!(
            "thin pool {} is inactive, cannot proceed until it is activated again (lv_attr: {})",
            pool.name, pool.attr
        )));
    }

    let metadata_percent = pool.metadata_percent.ok_or_else(|| {
        inconsistent(format!(
            "metadata percentage of thin pool {} was not reported",
            pool.name
        ))
    })?;
    if metadata_percent > METADATA_HIGH_WATER_PERCENT {
        return Err(inconsistent(format!(
            "metadata of thin pool {} is {}% full, above {}%; extend the metadata volume manually to avoid an unrecoverable overflow",
            pool.name, metadata_percent, METADATA_HIGH_WATER_PERCENT
        )));
    }

    debug!(thin_pool = %pool.name, lv_attr = %pool.attr, "Thin pool attributes confirmed");
    Ok(())
}

/// Validate the logical volumes of `vg`. A no-op without a thin pool.
pub async fn validate_lvs(lvm: &dyn LogicalVolumeManager, vg: &LVMVolumeGroup) -> Result<()> {
    let Some(thin_pool) = vg.spec.thin_pool_config.as_ref() else {
        return Ok(());
    };
    let vg_name = vg.metadata.name.as_deref().unwrap_or_default();

    let lvs = lvm
        .list_lvs(vg_name)
        .await
        .context(|| "could not list logical volumes inside the volume group")?;
    check_thin_pool(&lvs, &thin_pool.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lv(name: &str, attr: &str, metadata_percent: Option<f64>) -> LogicalVolume {
        LogicalVolume {
            name: name.into(),
            vg_name: "vg1".into(),
            attr: attr.parse().unwrap(),
            size: "26.96g".into(),
            metadata_percent,
        }
    }

    fn message(result: Result<()>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_healthy_pool() {
        let lvs = vec![
            lv("thin-pool-1", "twi-a-tz--", Some(16.09)),
            lv("pvc-1", "Vwi-aotz--", None),
        ];
        check_thin_pool(&lvs, "thin-pool-1").unwrap();
    }

    #[test]
    fn test_empty_report() {
        assert!(message(check_thin_pool(&[], "thin-pool-1")).contains("no logical volume"));
    }

    #[test]
    fn test_missing_pool() {
        let lvs = vec![lv("other", "twi-a-tz--", Some(1.0))];
        assert!(message(check_thin_pool(&lvs, "thin-pool-1")).contains("no longer present"));
    }

    #[test]
    fn test_wrong_type() {
        let lvs = vec![lv("thin-pool-1", "-wi-a-----", None)];
        assert!(message(check_thin_pool(&lvs, "thin-pool-1")).contains("not a thin pool"));
    }

    #[test]
    fn test_inactive_pool() {
        let lvs = vec![lv("thin-pool-1", "twi---tz--", Some(1.0))];
        assert!(message(check_thin_pool(&lvs, "thin-pool-1")).contains("inactive"));
    }

    #[test]
    fn test_metadata_high_water() {
        let at_limit = vec![lv("thin-pool-1", "twi-a-tz--", Some(95.0))];
        check_thin_pool(&at_limit, "thin-pool-1").unwrap();

        let over = vec![lv("thin-pool-1", "twi-a-tz--", Some(95.5))];
        let err = check_thin_pool(&over, "thin-pool-1").unwrap_err();
        assert!(matches!(err, Error::InconsistentLogicalVolumes(_)));
        assert!(err.to_string().contains("95.5% full"));
    }
}

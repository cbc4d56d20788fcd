//! Storage-Command Adapter
//!
//! Implements [`LogicalVolumeManager`] on top of the LVM command line tools.
//! List operations request JSON reports (`--reportformat json`), which have
//! the shape `{"report": [{"<entity>": [{...}, ...]}]}`.

pub mod size;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::{CommandExecutor, LogicalVolume, LogicalVolumeManager, PhysicalVolume, VolumeGroup};
use crate::error::{Error, Result};

pub use size::{fill_percent, parse_size};

pub const VGS: &str = "/usr/sbin/vgs";
pub const PVS: &str = "/usr/sbin/pvs";
pub const LVS: &str = "/usr/sbin/lvs";
pub const VGCREATE: &str = "/usr/sbin/vgcreate";
pub const VGEXTEND: &str = "/usr/sbin/vgextend";
pub const VGCHANGE: &str = "/usr/sbin/vgchange";
pub const VGREMOVE: &str = "/usr/sbin/vgremove";
pub const PVREMOVE: &str = "/usr/sbin/pvremove";
pub const LVCREATE: &str = "/usr/sbin/lvcreate";
pub const LVEXTEND: &str = "/usr/sbin/lvextend";
pub const LVCHANGE: &str = "/usr/sbin/lvchange";
pub const LVREMOVE: &str = "/usr/sbin/lvremove";

/// Thin pool chunk size in KiB
const THIN_POOL_CHUNK_SIZE: &str = "128";

/// LVM adapter running commands through an executor
#[derive(Clone)]
pub struct HostLvm {
    executor: Arc<dyn CommandExecutor>,
}

impl HostLvm {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    async fn run(&self, command: &str, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.executor.execute(command, &args).await
    }

    async fn raw_vgs(&self) -> Result<Vec<RawVg>> {
        let output = self
            .run(VGS, &["--units", "g", "--reportformat", "json"])
            .await?;
        parse_report("vgs", "vg", &output)
    }

    async fn pvs_of(&self, vg_name: &str) -> Result<Vec<PhysicalVolume>> {
        let selector = format!("vgname={}", vg_name);
        let output = self
            .run(
                PVS,
                &["--units", "g", "-v", "--reportformat", "json", "-S", selector.as_str()],
            )
            .await?;
        let pvs: Vec<RawPv> = parse_report("pvs", "pv", &output)?;
        Ok(pvs
            .into_iter()
            .map(|pv| PhysicalVolume {
                path: pv.pv_name,
                vg_name: pv.vg_name,
            })
            .collect())
    }

    async fn with_members(&self, raw: RawVg) -> Result<VolumeGroup> {
        let pvs = self.pvs_of(&raw.vg_name).await?;
        Ok(VolumeGroup {
            name: raw.vg_name,
            pvs,
            size: raw.vg_size,
            free: raw.vg_free,
        })
    }

    async fn create_or_extend(&self, command: &str, name: &str, devices: &[String]) -> Result<()> {
        if devices.is_empty() {
            return Err(Error::NoDevices {
                vg_name: name.to_string(),
            });
        }
        let mut args = vec![name.to_string()];
        args.extend(devices.iter().cloned());
        self.executor.execute(command, &args).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HostLvm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLvm").finish_non_exhaustive()
    }
}

#[async_trait]
impl LogicalVolumeManager for HostLvm {
    async fn list_vgs(&self) -> Result<Vec<VolumeGroup>> {
        let mut vgs = Vec::new();
        for raw in self.raw_vgs().await? {
            vgs.push(self.with_members(raw).await?);
        }
        debug!(count = vgs.len(), "Listed volume groups");
        Ok(vgs)
    }

    async fn get_vg(&self, name: &str) -> Result<VolumeGroup> {
        let raw = self
            .raw_vgs()
            .await?
            .into_iter()
            .find(|vg| vg.vg_name == name)
            .ok_or_else(|| Error::VolumeGroupNotFound(name.to_string()))?;
        self.with_members(raw).await
    }

    async fn list_lvs(&self, vg_name: &str) -> Result<Vec<LogicalVolume>> {
        let selector = format!("vgname={}", vg_name);
        let output = self
            .run(
                LVS,
                &[
                    "-S",
                    selector.as_str(),
                    "--units",
                    "g",
                    "--reportformat",
                    "json",
                    "-o",
                    "lv_name,vg_name,lv_attr,lv_size,metadata_percent",
                ],
            )
            .await?;

        let raw: Vec<RawLv> = parse_report("lvs", "lv", &output)?;
        raw.into_iter().map(RawLv::into_domain).collect()
    }

    #[instrument(skip(self))]
    async fn create_vg(&self, name: &str, devices: &[String]) -> Result<()> {
        self.create_or_extend(VGCREATE, name, devices).await?;
        info!("Volume group created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn extend_vg(&self, name: &str, devices: &[String]) -> Result<()> {
        self.create_or_extend(VGEXTEND, name, devices).await?;
        info!("Volume group extended");
        Ok(())
    }

    #[instrument(skip(self, vg), fields(volume_group = %vg.name))]
    async fn delete_vg(&self, vg: &VolumeGroup) -> Result<()> {
        self.run(VGCHANGE, &["-an", vg.name.as_str()]).await?;
        self.run(VGREMOVE, &[vg.name.as_str()]).await?;

        // the volume group is already gone; stale labels do not fail teardown
        let members = vg.pv_paths();
        if !members.is_empty() {
            if let Err(e) = self.executor.execute(PVREMOVE, &members).await {
                warn!(?members, error = %e, "Failed to remove physical volume labels");
            }
        }
        info!(members = members.len(), "Volume group removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_thin_pool(&self, vg_name: &str, pool: &str, size_percent: u32) -> Result<()> {
        let extents = format!("{}%FREE", size_percent);
        let target = format!("{}/{}", vg_name, pool);
        self.run(
            LVCREATE,
            &["-l", extents.as_str(), "-c", THIN_POOL_CHUNK_SIZE, "-Z", "y", "-T", target.as_str()],
        )
        .await?;
        info!("Thin pool created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn extend_thin_pool(&self, vg_name: &str, pool: &str, size_percent: u32) -> Result<()> {
        let extents = format!("{}%Vg", size_percent);
        let target = format!("{}/{}", vg_name, pool);
        self.run(LVEXTEND, &["-l", extents.as_str(), target.as_str()]).await?;
        info!("Thin pool extended");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_lv(&self, vg_name: &str, lv_name: &str) -> Result<()> {
        let target = format!("{}/{}", vg_name, lv_name);
        self.run(LVCHANGE, &["-an", target.as_str()]).await?;
        self.run(LVREMOVE, &["-y", target.as_str()]).await?;
        info!("Logical volume removed");
        Ok(())
    }
}

// =============================================================================
// JSON reports
// =============================================================================

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    report: Vec<HashMap<String, serde_json::Value>>,
}

/// Collect the `key` entries of every report section.
fn parse_report<T: DeserializeOwned>(tool: &str, key: &str, output: &str) -> Result<Vec<T>> {
    let parse_error = |reason: String| Error::ReportParse {
        tool: tool.to_string(),
        reason,
    };

    let report: Report = serde_json::from_str(output).map_err(|e| parse_error(e.to_string()))?;
    let mut entries = Vec::new();
    for mut section in report.report {
        if let Some(values) = section.remove(key) {
            let mut parsed: Vec<T> =
                serde_json::from_value(values).map_err(|e| parse_error(e.to_string()))?;
            entries.append(&mut parsed);
        }
    }
    Ok(entries)
}

#[derive(Debug, Deserialize)]
struct RawVg {
    vg_name: String,
    #[serde(default)]
    vg_size: String,
    #[serde(default)]
    vg_free: String,
}

#[derive(Debug, Deserialize)]
struct RawPv {
    pv_name: String,
    #[serde(default)]
    vg_name: String,
}

#[derive(Debug, Deserialize)]
struct RawLv {
    lv_name: String,
    vg_name: String,
    lv_attr: String,
    #[serde(default)]
    lv_size: String,
    #[serde(default)]
    metadata_percent: String,
}

impl RawLv {
    fn into_domain(self) -> Result<LogicalVolume> {
        let metadata_percent = match self.metadata_percent.trim() {
            "" => None,
            value => Some(value.parse::<f64>().map_err(|e| Error::ReportParse {
                tool: "lvs".to_string(),
                reason: format!("metadata_percent {:?} of {}: {}", value, self.lv_name, e),
            })?),
        };

        Ok(LogicalVolume {
            attr: self.lv_attr.parse()?,
            name: self.lv_name,
            vg_name: self.vg_name,
            size: self.lv_size,
            metadata_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RecordingExecutor;
    use assert_matches::assert_matches;

    const VGS_OUTPUT: &str = r#"{"report":[{"vg":[
        {"vg_name":"vg1","pv_count":"2","lv_count":"1","snap_count":"0","vg_attr":"wz--n-","vg_size":"<475.94g","vg_free":"0 "},
        {"vg_name":"vg2","pv_count":"1","lv_count":"0","snap_count":"0","vg_attr":"wz--n-","vg_size":"100.00g","vg_free":"100.00g"}
    ]}]}"#;

    const PVS_VG1: &str = r#"{"report":[{"pv":[
        {"pv_name":"/dev/sdb","vg_name":"vg1","pv_fmt":"lvm2","pv_attr":"a--","pv_size":"<237.97g","pv_free":"0 "},
        {"pv_name":"/dev/sdc","vg_name":"vg1","pv_fmt":"lvm2","pv_attr":"a--","pv_size":"<237.97g","pv_free":"0 "}
    ]}]}"#;

    const PVS_VG2: &str = r#"{"report":[{"pv":[
        {"pv_name":"/dev/sdd","vg_name":"vg2","pv_fmt":"lvm2","pv_attr":"a--","pv_size":"100.00g","pv_free":"100.00g"}
    ]}]}"#;

    const LVS_VG1: &str = r#"{"report":[{"lv":[
        {"lv_name":"thin-pool-1","vg_name":"vg1","lv_attr":"twi-a-tz--","lv_size":"26.96g","metadata_percent":"16.09"},
        {"lv_name":"pvc-1","vg_name":"vg1","lv_attr":"Vwi-aotz--","lv_size":"1.00g","metadata_percent":""}
    ]}]}"#;

    fn pvs_line(vg: &str) -> String {
        format!("{} --units g -v --reportformat json -S vgname={}", PVS, vg)
    }

    fn lvs_line(vg: &str) -> String {
        format!(
            "{} -S vgname={} --units g --reportformat json -o lv_name,vg_name,lv_attr,lv_size,metadata_percent",
            LVS, vg
        )
    }

    fn scripted() -> Arc<RecordingExecutor> {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond(&format!("{} --units g --reportformat json", VGS), VGS_OUTPUT);
        executor.respond(&pvs_line("vg1"), PVS_VG1);
        executor.respond(&pvs_line("vg2"), PVS_VG2);
        executor.respond(&lvs_line("vg1"), LVS_VG1);
        executor
    }

    #[tokio::test]
    async fn test_list_vgs_joins_members() {
        let executor = scripted();
        let lvm = HostLvm::new(executor.clone());

        let vgs = lvm.list_vgs().await.unwrap();
        assert_eq!(vgs.len(), 2);
        assert_eq!(vgs[0].name, "vg1");
        assert_eq!(vgs[0].size, "<475.94g");
        assert_eq!(vgs[0].pv_paths(), vec!["/dev/sdb", "/dev/sdc"]);
        assert_eq!(vgs[1].pv_paths(), vec!["/dev/sdd"]);
        assert_eq!(executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_get_vg_not_found() {
        let lvm = HostLvm::new(scripted());
        let err = lvm.get_vg("vg9").await.unwrap_err();
        assert!(err.is_not_found());
        assert_matches!(err, Error::VolumeGroupNotFound(name) if name == "vg9");
    }

    #[tokio::test]
    async fn test_list_lvs_parses_attributes() {
        let lvm = HostLvm::new(scripted());
        let lvs = lvm.list_lvs("vg1").await.unwrap();

        assert_eq!(lvs.len(), 2);
        assert!(lvs[0].attr.is_thin_pool());
        assert_eq!(lvs[0].metadata_percent, Some(16.09));
        assert_eq!(lvs[1].metadata_percent, None);
        assert!(lvm.lv_exists("vg1", "thin-pool-1").await.unwrap());
        assert!(!lvm.lv_exists("vg1", "thin-pool-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_report() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond(&lvs_line("vg1"), r#"{"report":[{"lv":[]}]}"#);
        let lvm = HostLvm::new(executor);
        assert!(lvm.list_lvs("vg1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_report() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.respond(&format!("{} --units g --reportformat json", VGS), "not json");
        let err = HostLvm::new(executor).list_vgs().await.unwrap_err();
        assert_matches!(err, Error::ReportParse { tool, .. } if tool == "vgs");
    }

    #[tokio::test]
    async fn test_create_and_extend_argv() {
        let executor = Arc::new(RecordingExecutor::new());
        let lvm = HostLvm::new(executor.clone());
        let devices = vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()];

        lvm.create_vg("vg1", &devices).await.unwrap();
        lvm.extend_vg("vg1", &devices[1..]).await.unwrap();

        assert_eq!(
            executor.calls(),
            vec![
                format!("{} vg1 /dev/sdb /dev/sdc", VGCREATE),
                format!("{} vg1 /dev/sdc", VGEXTEND),
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_devices_rejected_before_host_call() {
        let executor = Arc::new(RecordingExecutor::new());
        let lvm = HostLvm::new(executor.clone());

        assert_matches!(lvm.create_vg("vg1", &[]).await, Err(Error::NoDevices { .. }));
        assert_matches!(lvm.extend_vg("vg1", &[]).await, Err(Error::NoDevices { .. }));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_thin_pool_argv() {
        let executor = Arc::new(RecordingExecutor::new());
        let lvm = HostLvm::new(executor.clone());

        lvm.create_thin_pool("vg1", "thin-pool-1", 90).await.unwrap();
        lvm.extend_thin_pool("vg1", "thin-pool-1", 95).await.unwrap();
        lvm.delete_lv("vg1", "thin-pool-1").await.unwrap();

        assert_eq!(
            executor.calls(),
            vec![
                format!("{} -l 90%FREE -c 128 -Z y -T vg1/thin-pool-1", LVCREATE),
                format!("{} -l 95%Vg vg1/thin-pool-1", LVEXTEND),
                format!("{} -an vg1/thin-pool-1", LVCHANGE),
                format!("{} -y vg1/thin-pool-1", LVREMOVE),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_vg_releases_members() {
        let executor = scripted();
        let lvm = HostLvm::new(executor.clone());
        let vg = lvm.get_vg("vg1").await.unwrap();
        executor.clear();

        lvm.delete_vg(&vg).await.unwrap();
        assert_eq!(
            executor.calls(),
            vec![
                format!("{} -an vg1", VGCHANGE),
                format!("{} vg1", VGREMOVE),
                format!("{} /dev/sdb /dev/sdc", PVREMOVE),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_vg_tolerates_pvremove_failure() {
        let executor = scripted();
        let lvm = HostLvm::new(executor.clone());
        let vg = lvm.get_vg("vg1").await.unwrap();
        executor.clear();
        executor.fail(
            &format!("{} /dev/sdb /dev/sdc", PVREMOVE),
            "Can't open /dev/sdc exclusively.  Mounted filesystem?",
        );

        lvm.delete_vg(&vg).await.unwrap();
        assert_eq!(executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_command_failure_propagates() {
        let executor = Arc::new(RecordingExecutor::new());
        executor.fail(&format!("{} vg1 /dev/sdb", VGCREATE), "Device /dev/sdb excluded by a filter.");
        let err = HostLvm::new(executor)
            .create_vg("vg1", &["/dev/sdb".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("excluded by a filter"));
        assert!(!err.is_not_found());
    }
}

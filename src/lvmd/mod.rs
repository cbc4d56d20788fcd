//! Device-Class Registry
//!
//! The provisioning daemon reads its device classes from a YAML file that
//! this agent is the sole writer of. One device class is kept per volume
//! group that exists on the host and has completed its first creation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crd::LVMVolumeGroup;
use crate::domain::RegistryStore;
use crate::error::Result;

/// Default location of the registry file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/topolvm/lvmd.yaml";

/// Default socket of the provisioning daemon
pub const DEFAULT_SOCKET: &str = "/run/lvmd/lvmd.socket";

// =============================================================================
// Registry Schema
// =============================================================================

/// Registry file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LvmdConfig {
    pub socket_name: String,
    #[serde(default)]
    pub device_classes: Vec<DeviceClass>,
}

/// A device class routing volumes to a volume group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceClass {
    pub name: String,
    pub volume_group: String,
    #[serde(default)]
    pub default: bool,
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin_pool: Option<ThinPoolSettings>,
}

/// Thick or thin provisioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Thick,
    Thin,
}

/// Thin pool a thin device class provisions from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThinPoolSettings {
    pub name: String,
    pub overprovision_ratio: f64,
}

impl LvmdConfig {
    /// Empty registry pointing at `socket_name`
    pub fn new(socket_name: impl Into<String>) -> Self {
        Self {
            socket_name: socket_name.into(),
            device_classes: Vec::new(),
        }
    }

    pub fn device_class(&self, name: &str) -> Option<&DeviceClass> {
        self.device_classes.iter().find(|dc| dc.name == name)
    }

    /// Append `device_class` unless one with the same name exists.
    pub fn add_device_class(&mut self, device_class: DeviceClass) -> bool {
        if self.device_class(&device_class.name).is_some() {
            return false;
        }
        self.device_classes.push(device_class);
        true
    }

    /// Remove the device class named `name`.
    pub fn remove_device_class(&mut self, name: &str) -> bool {
        let before = self.device_classes.len();
        self.device_classes.retain(|dc| dc.name != name);
        self.device_classes.len() != before
    }
}

impl DeviceClass {
    /// Device class for a volume group, thin when a thin pool is configured
    pub fn for_volume_group(vg: &LVMVolumeGroup) -> Self {
        let name = vg.name_any();
        let thin_pool = vg.spec.thin_pool_config.as_ref().map(|tp| ThinPoolSettings {
            name: tp.name.clone(),
            overprovision_ratio: tp.overprovision_ratio,
        });

        Self {
            volume_group: name.clone(),
            name,
            default: vg.spec.default,
            device_type: if thin_pool.is_some() {
                DeviceType::Thin
            } else {
                DeviceType::Thick
            },
            thin_pool,
        }
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Registry stored as a YAML file
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RegistryStore for FileRegistry {
    async fn load(&self) -> Result<Option<LvmdConfig>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                debug!(path = %self.path.display(), "Loaded lvmd config");
                Ok(Some(serde_yaml::from_str(&contents)?))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, config: &LvmdConfig) -> Result<()> {
        let contents = serde_yaml::to_string(config)?;
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // the daemon may read at any time, so swap the file in whole
        let staging = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&staging, contents).await?;
        tokio::fs::rename(&staging, &self.path).await?;

        info!(
            path = %self.path.display(),
            device_classes = config.device_classes.len(),
            "Saved lvmd config"
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted lvmd config");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ThinPoolConfig, VolumeGroupSpec};

    fn thin_class() -> DeviceClass {
        DeviceClass {
            name: "vg1".into(),
            volume_group: "vg1".into(),
            default: true,
            device_type: DeviceType::Thin,
            thin_pool: Some(ThinPoolSettings {
                name: "thin-pool-1".into(),
                overprovision_ratio: 10.0,
            }),
        }
    }

    #[test]
    fn test_yaml_keys() {
        let mut config = LvmdConfig::new(DEFAULT_SOCKET);
        config.add_device_class(thin_class());

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("socket-name: /run/lvmd/lvmd.socket"));
        assert!(yaml.contains("volume-group: vg1"));
        assert!(yaml.contains("type: thin"));
        assert!(yaml.contains("overprovision-ratio: 10.0"));
    }

    #[test]
    fn test_reads_daemon_format() {
        let yaml = r#"
socket-name: /run/lvmd/lvmd.socket
device-classes:
  - name: vg1
    volume-group: vg1
    default: true
    spare-gb: 10
    type: thin
    thin-pool:
      name: thin-pool-1
      overprovision-ratio: 10
  - name: vg2
    volume-group: vg2
"#;
        let config: LvmdConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.device_classes.len(), 2);
        assert_eq!(config.device_classes[0], thin_class());
        assert_eq!(config.device_classes[1].device_type, DeviceType::Thick);
        assert!(config.device_classes[1].thin_pool.is_none());
    }

    #[test]
    fn test_add_and_remove_device_class() {
        let mut config = LvmdConfig::new(DEFAULT_SOCKET);
        assert!(config.add_device_class(thin_class()));
        assert!(!config.add_device_class(thin_class()));
        assert!(config.remove_device_class("vg1"));
        assert!(!config.remove_device_class("vg1"));
    }

    #[test]
    fn test_device_class_for_volume_group() {
        let thick = LVMVolumeGroup::new("vg2", VolumeGroupSpec::default());
        let dc = DeviceClass::for_volume_group(&thick);
        assert_eq!(dc.device_type, DeviceType::Thick);
        assert!(dc.thin_pool.is_none());

        let thin = LVMVolumeGroup::new(
            "vg1",
            VolumeGroupSpec {
                thin_pool_config: Some(ThinPoolConfig {
                    name: "thin-pool-1".into(),
                    size_percent: 90,
                    overprovision_ratio: 10.0,
                }),
                default: true,
                ..Default::default()
            },
        );
        assert_eq!(DeviceClass::for_volume_group(&thin), thin_class());
    }

    #[tokio::test]
    async fn test_file_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new(dir.path().join("topolvm").join("lvmd.yaml"));

        assert_eq!(registry.load().await.unwrap(), None);

        let mut config = LvmdConfig::new(DEFAULT_SOCKET);
        config.add_device_class(thin_class());
        registry.save(&config).await.unwrap();

        let loaded = registry.load().await.unwrap();
        assert_eq!(loaded.as_ref(), Some(&config));
        assert!(!registry.path().with_extension("yaml.tmp").exists());

        registry.delete().await.unwrap();
        assert_eq!(registry.load().await.unwrap(), None);
        registry.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lvmd.yaml");
        std::fs::write(&path, "device-classes: [").unwrap();
        assert!(FileRegistry::new(path).load().await.is_err());
    }
}

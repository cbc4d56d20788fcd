//! Error types for the volume group manager

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling volume groups on a node
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Host Command Errors
    // =========================================================================
    /// A host command exited unsuccessfully or could not be spawned
    #[error("command '{command} {}' failed: {reason}", .args.join(" "))]
    Command {
        command: String,
        args: Vec<String>,
        reason: String,
    },

    /// A structured report could not be decoded
    #[error("failed to parse {tool} report: {reason}")]
    ReportParse { tool: String, reason: String },

    /// A reported size could not be parsed
    #[error("failed to parse size {value:?}: {reason}")]
    SizeParse { value: String, reason: String },

    /// A logical volume attribute string could not be parsed
    #[error("failed to parse lv_attr {0:?}")]
    LvAttrParse(String),

    // =========================================================================
    // Not-Found Conditions
    // =========================================================================
    /// The volume group does not exist on the host
    #[error("volume group {0} not found")]
    VolumeGroupNotFound(String),

    /// The device-mapper reference does not exist
    #[error("device-mapper reference {0} not found")]
    DeviceMapperReferenceNotFound(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// The same device path was listed more than once
    #[error("duplicate device paths found: {}", .0.join(", "))]
    DuplicateDevicePaths(Vec<String>),

    /// Create/extend was asked to run without devices
    #[error("can't create or extend volume group {vg_name:?} with 0 devices")]
    NoDevices { vg_name: String },

    /// A required device could not be used
    #[error("unable to validate device {path}: {reason}")]
    DeviceValidation { path: String, reason: String },

    /// The thin pool settings can never be applied
    #[error("invalid thin pool config {name}: {reason}")]
    InvalidThinPoolConfig { name: String, reason: String },

    /// Neither required nor optional paths yielded a device
    #[error("at least 1 valid device is required if device selector paths or optionalPaths are specified")]
    NoValidDevices,

    /// No eligible devices exist and the volume group is absent
    #[error("the volume group {0} does not exist and there were no available devices to create it")]
    NoAvailableDevices(String),

    // =========================================================================
    // Consistency Errors
    // =========================================================================
    /// A non-thin-pool logical volume occupies the thin pool name
    #[error("logical volume {lv_name} already exists in volume group {vg_name} but is not a thin pool ({attr})")]
    ThinPoolCollision {
        lv_name: String,
        vg_name: String,
        attr: String,
    },

    /// Logical volume state failed validation
    #[error("inconsistent logical volumes: {0}")]
    InconsistentLogicalVolumes(String),

    /// A pass step failed; wraps the underlying cause with context
    #[error("{context}: {source}")]
    Step {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Check if this error is a not-found condition rather than a failure
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::VolumeGroupNotFound(_) | Error::DeviceMapperReferenceNotFound(_) => true,
            Error::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error requires a spec correction to clear
    pub fn is_validation(&self) -> bool {
        match self {
            Error::DuplicateDevicePaths(_)
            | Error::NoDevices { .. }
            | Error::DeviceValidation { .. }
            | Error::NoValidDevices
            | Error::InvalidThinPoolConfig { .. } => true,
            Error::Step { source, .. } => source.is_validation(),
            _ => false,
        }
    }

    /// Wrap this error with a description of the step that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Step {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait adding step context to results
pub trait ResultExt<T> {
    /// Attach context describing the failed step
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T> {
        self.map_err(|e| e.context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_survives_context() {
        let err = Error::VolumeGroupNotFound("vg1".into()).context("failed to get volume group");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "failed to get volume group: volume group vg1 not found"
        );
    }

    #[test]
    fn test_command_error_message() {
        let err = Error::Command {
            command: "vgcreate".into(),
            args: vec!["vg1".into(), "/dev/sdb".into()],
            reason: "exit status 5".into(),
        };
        assert_eq!(
            err.to_string(),
            "command 'vgcreate vg1 /dev/sdb' failed: exit status 5"
        );
        assert!(!err.is_not_found());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_duplicate_paths_is_validation() {
        let err = Error::DuplicateDevicePaths(vec!["/dev/sdb".into()]);
        assert!(err.is_validation());
        assert!(err.to_string().contains("/dev/sdb"));
    }
}

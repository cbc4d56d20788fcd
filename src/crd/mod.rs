//! Custom Resource Definitions
//!
//! This module contains all CRD definitions used by the node agent.

mod node_status;
mod volume_group;

pub use node_status::{
    LVMVolumeGroupNodeStatus, NodeStatusSpec, VolumeGroupPhase, VolumeGroupStatus,
};

pub use volume_group::{
    node_selector_matches, DeviceSelector, LVMVolumeGroup, ThinPoolConfig, VolumeGroupSpec,
    NODE_NAME_FIELD,
};

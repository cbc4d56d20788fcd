//! Domain Layer
//!
//! Core abstractions of the node agent.
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for host tools and the cluster
//! - **Events** (`events.rs`) - Notification events and their fan-out
//! - **LV attributes** (`lv_attr.rs`) - Parsed `lv_attr` bits

pub mod events;
pub mod lv_attr;
pub mod ports;

// Re-export commonly used types
pub use events::{fan_out, publish_fan_out, EventReason, EventSeverity, EventTarget, NodeEvent};
pub use lv_attr::{LvAttr, Permissions, State, VolumeType};
pub use ports::{
    // Port traits
    BlockDeviceLister,
    ClusterStore,
    CommandExecutor,
    DeviceMapper,
    EventSink,
    LogicalVolumeManager,
    // Value objects
    LogicalVolume,
    PhysicalVolume,
    RegistryStore,
    SignatureWiper,
    VolumeGroup,
};

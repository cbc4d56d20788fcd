//! Controller module
//!
//! Implements the per-node reconciliation loop for LVMVolumeGroup resources.

mod runner;
pub mod status;
pub mod thin_pool;
pub mod validate;
pub mod vgmanager;

pub use runner::run;
pub use status::StatusWriter;
pub use thin_pool::{ensure_thin_pool, ThinPoolAction};
pub use validate::{check_thin_pool, validate_lvs, METADATA_HIGH_WATER_PERCENT};
pub use vgmanager::{
    Ports, ReconcileOutcome, ReconcilerConfig, VgReconciler, NODE_CLEANUP_FINALIZER,
    REQUEUE_INTERVAL,
};

//! Metrics module
//!
//! Process-wide Prometheus collectors for reconciliation passes, host
//! commands and the phase of each volume group on this node.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::crd::VolumeGroupPhase;
use crate::error::{Error, Result};

/// Registry every collector below is registered with
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Reconciliation passes by result (`success`, `error`)
pub static RECONCILE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(IntCounterVec::new(
        Opts::new("vgmanager_reconcile_total", "Total number of reconciliation passes"),
        &["result"],
    ))
});

/// Host commands by binary and result
pub static HOST_COMMANDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(IntCounterVec::new(
        Opts::new("vgmanager_host_commands_total", "Total number of host commands run"),
        &["command", "result"],
    ))
});

/// 1 for the current phase of each volume group, 0 for the others
pub static VOLUME_GROUP_PHASE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register(IntGaugeVec::new(
        Opts::new("vgmanager_volume_group_phase", "Current phase of each volume group"),
        &["volume_group", "phase"],
    ))
});

fn register<C>(collector: prometheus::Result<C>) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    // metric names and labels are static, so construction cannot fail
    let collector = collector.expect("valid metric definition");
    if let Err(e) = REGISTRY.register(Box::new(collector.clone())) {
        tracing::warn!("Failed to register metric: {}", e);
    }
    collector
}

const PHASES: [VolumeGroupPhase; 3] = [
    VolumeGroupPhase::Progressing,
    VolumeGroupPhase::Ready,
    VolumeGroupPhase::Failed,
];

/// Count one reconciliation pass.
pub fn record_reconcile(success: bool) {
    let result = if success { "success" } else { "error" };
    RECONCILE_TOTAL.with_label_values(&[result]).inc();
}

/// Count one host command. `command` is reduced to its file name.
pub fn record_host_command(command: &str, success: bool) {
    let binary = command.rsplit('/').next().unwrap_or(command);
    let result = if success { "success" } else { "error" };
    HOST_COMMANDS_TOTAL.with_label_values(&[binary, result]).inc();
}

/// Publish the phase of a volume group.
pub fn set_phase(volume_group: &str, phase: VolumeGroupPhase) {
    for candidate in PHASES {
        let label = candidate.to_string();
        VOLUME_GROUP_PHASE
            .with_label_values(&[volume_group, label.as_str()])
            .set(i64::from(candidate == phase));
    }
}

/// Drop the phase series of a removed volume group.
pub fn clear_phase(volume_group: &str) {
    for candidate in PHASES {
        let label = candidate.to_string();
        let _ = VOLUME_GROUP_PHASE.remove_label_values(&[volume_group, label.as_str()]);
    }
}

/// Encode every collector in the text exposition format.
pub fn encode() -> Result<(String, Vec<u8>)> {
    // registration happens on first access
    Lazy::force(&RECONCILE_TOTAL);
    Lazy::force(&HOST_COMMANDS_TOTAL);
    Lazy::force(&VOLUME_GROUP_PHASE);

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::Internal(format!("failed to encode metrics: {}", e)))?;
    Ok((encoder.format_type().to_string(), buffer))
}

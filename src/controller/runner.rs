//! Volume Group Controller
//!
//! Watches the volume groups of one namespace and hands each change to the
//! [`VgReconciler`].

use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

use crate::crd::LVMVolumeGroup;
use crate::error::{Error, Result};
use crate::metrics;

use super::vgmanager::{ReconcileOutcome, VgReconciler, REQUEUE_INTERVAL};

impl From<ReconcileOutcome> for Action {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RequeueNow => Action::requeue(std::time::Duration::ZERO),
            ReconcileOutcome::RequeueAfter(interval) => Action::requeue(interval),
        }
    }
}

/// Run the volume group controller until a shutdown signal arrives
pub async fn run(client: Client, namespace: &str, reconciler: Arc<VgReconciler>) -> Result<()> {
    let volume_groups: Api<LVMVolumeGroup> = Api::namespaced(client, namespace);

    // Check if CRD exists
    if let Err(e) = volume_groups.list(&ListParams::default().limit(1)).await {
        error!(
            "LVMVolumeGroup CRD not found: {}. Please install the CRD first.",
            e
        );
        return Err(Error::Kube(e));
    }

    info!(namespace, "Starting LVMVolumeGroup controller");

    Controller::new(volume_groups, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("Controller shutdown complete");
    Ok(())
}

#[instrument(skip(vg, ctx), fields(volume_group = %vg.name_any()))]
async fn reconcile(vg: Arc<LVMVolumeGroup>, ctx: Arc<VgReconciler>) -> Result<Action> {
    let result = ctx.reconcile(&vg).await;
    metrics::record_reconcile(result.is_ok());
    result.map(Action::from)
}

fn error_policy(_vg: Arc<LVMVolumeGroup>, error: &Error, _ctx: Arc<VgReconciler>) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(REQUEUE_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outcome_to_action() {
        assert_eq!(Action::from(ReconcileOutcome::Done), Action::await_change());
        assert_eq!(
            Action::from(ReconcileOutcome::RequeueNow),
            Action::requeue(Duration::ZERO)
        );
        assert_eq!(
            Action::from(ReconcileOutcome::RequeueAfter(REQUEUE_INTERVAL)),
            Action::requeue(Duration::from_secs(15))
        );
    }
}

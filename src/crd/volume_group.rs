//! LVMVolumeGroup Custom Resource Definition
//!
//! Declares the desired volume group on every node matched by its
//! node selector: which devices to claim, whether to wipe them first,
//! and the thin pool to carve from the group.

use k8s_openapi::api::core::v1::{NodeSelector, NodeSelectorRequirement, NodeSelectorTerm};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Error;

// =============================================================================
// LVMVolumeGroup CRD
// =============================================================================

/// LVMVolumeGroup describes a volume group that the node agent maintains on
/// every node its selector matches.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "lvm.topolvm.io",
    version = "v1alpha1",
    kind = "LVMVolumeGroup",
    plural = "lvmvolumegroups",
    shortname = "lvg",
    printcolumn = r#"{"name": "Default", "type": "boolean", "jsonPath": ".spec.default"}"#,
    printcolumn = r#"{"name": "ThinPool", "type": "string", "jsonPath": ".spec.thinPoolConfig.name"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSpec {
    /// Nodes this volume group should exist on. Absent means every node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,

    /// Devices to claim. Absent means every eligible device on the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_selector: Option<DeviceSelector>,

    /// Thin pool to maintain inside the volume group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thin_pool_config: Option<ThinPoolConfig>,

    /// Mark the resulting device class as the default one
    #[serde(default)]
    pub default: bool,
}

// =============================================================================
// Device Selector
// =============================================================================

/// Explicit device paths for the volume group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelector {
    /// Paths that must resolve to usable devices
    #[serde(default, alias = "paths")]
    pub required_paths: Vec<String>,

    /// Paths that are used when available and skipped otherwise
    #[serde(default)]
    pub optional_paths: Vec<String>,

    /// Erase signatures on the selected devices before claiming them.
    /// Destroys any data on those devices.
    #[serde(default, alias = "forceWipeDevicesAndDestroyAllData")]
    pub force_wipe: bool,
}

impl DeviceSelector {
    /// Required paths followed by optional paths, in declaration order
    pub fn all_paths(&self) -> impl Iterator<Item = &String> {
        self.required_paths.iter().chain(self.optional_paths.iter())
    }

    /// Paths listed more than once across required and optional paths
    pub fn duplicate_paths(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for path in self.all_paths() {
            if !seen.insert(path.as_str()) {
                duplicates.insert(path.clone());
            }
        }
        duplicates.into_iter().collect()
    }
}

// =============================================================================
// Thin Pool
// =============================================================================

/// Thin pool carved out of the volume group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThinPoolConfig {
    /// Logical volume name of the thin pool
    pub name: String,

    /// Share of the volume group the pool should occupy (percent)
    #[serde(default = "default_size_percent")]
    #[schemars(range(min = 1, max = 100))]
    pub size_percent: u32,

    /// Factor by which thin volumes may over-commit the pool
    #[serde(default = "default_overprovision_ratio")]
    pub overprovision_ratio: f64,
}

impl ThinPoolConfig {
    /// Reject settings LVM would refuse on every pass.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(1..=100).contains(&self.size_percent) {
            return Err(Error::InvalidThinPoolConfig {
                name: self.name.clone(),
                reason: format!("sizePercent {} is outside 1..=100", self.size_percent),
            });
        }
        Ok(())
    }
}

fn default_size_percent() -> u32 {
    90
}

fn default_overprovision_ratio() -> f64 {
    10.0
}

// =============================================================================
// Node Selector
// =============================================================================

/// Field key a term's `matchFields` may select on
pub const NODE_NAME_FIELD: &str = "metadata.name";

/// Check whether `selector` picks the node with this name and labels.
///
/// Terms are ORed. Within a term, `matchExpressions` and `matchFields` are
/// ANDed, and a term with neither selects nothing.
pub fn node_selector_matches(
    selector: &NodeSelector,
    node_name: &str,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .node_selector_terms
        .iter()
        .any(|term| term_matches(term, node_name, labels))
}

fn term_matches(term: &NodeSelectorTerm, node_name: &str, labels: &BTreeMap<String, String>) -> bool {
    let expressions = term.match_expressions.as_deref().unwrap_or_default();
    let fields = term.match_fields.as_deref().unwrap_or_default();
    if expressions.is_empty() && fields.is_empty() {
        return false;
    }
    expressions.iter().all(|req| label_matches(req, labels))
        && fields.iter().all(|req| field_matches(req, node_name))
}

fn label_matches(req: &NodeSelectorRequirement, labels: &BTreeMap<String, String>) -> bool {
    let value = labels.get(&req.key);
    let values = req.values.as_deref().unwrap_or_default();
    match req.operator.as_str() {
        "In" => value.map_or(false, |v| values.contains(v)),
        "NotIn" => value.map_or(true, |v| !values.contains(v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        "Gt" | "Lt" => {
            let (Some(value), [bound]) = (value, values) else {
                return false;
            };
            match (value.parse::<i64>(), bound.parse::<i64>()) {
                (Ok(v), Ok(b)) if req.operator == "Gt" => v > b,
                (Ok(v), Ok(b)) => v < b,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Only `metadata.name` with `In`/`NotIn` and a single value is a valid field requirement.
fn field_matches(req: &NodeSelectorRequirement, node_name: &str) -> bool {
    let values = req.values.as_deref().unwrap_or_default();
    if req.key != NODE_NAME_FIELD {
        return false;
    }
    match (req.operator.as_str(), values) {
        ("In", [value]) => value == node_name,
        ("NotIn", [value]) => value != node_name,
        _ => false,
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl LVMVolumeGroup {
    /// Whether the volume group should be reconciled on the named node
    pub fn selects_node(&self, node_name: &str, labels: &BTreeMap<String, String>) -> bool {
        self.spec
            .node_selector
            .as_ref()
            .map_or(true, |selector| node_selector_matches(selector, node_name, labels))
    }

    /// Whether force-wipe has been requested
    pub fn force_wipe(&self) -> bool {
        self.spec
            .device_selector
            .as_ref()
            .map_or(false, |selector| selector.force_wipe)
    }
}

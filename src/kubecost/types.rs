use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker Kubecost puts in the name of synthetic idle-cost allocations.
pub const IDLE_MARKER: &str = "_idle_";

/// Body of `GET /allocation`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Vec<Option<AllocationSet>>>,
}

/// One step of an allocation query, keyed by aggregation key.
pub type AllocationSet = BTreeMap<String, Allocation>;

impl AllocationResponse {
    /// Flattens every step into `(key, allocation)` pairs in key order.
    pub fn into_records(self) -> Vec<(String, Allocation)> {
        self.data
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .flat_map(|set| set.into_iter())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Allocation {
    pub name: String,
    pub properties: Properties,
    pub window: Window,
    pub start: String,
    pub end: String,
    pub minutes: f64,
    pub cpu_core_hours: f64,
    pub cpu_cost: f64,
    pub cpu_cost_adjustment: f64,
    pub gpu_hours: f64,
    pub gpu_cost: f64,
    pub gpu_cost_adjustment: f64,
    pub ram_byte_hours: f64,
    pub ram_cost: f64,
    pub ram_cost_adjustment: f64,
    pub pv_byte_hours: f64,
    pub pv_cost: f64,
    pub pv_cost_adjustment: f64,
    pub network_transfer_bytes: f64,
    pub network_cost: f64,
    pub network_cost_adjustment: f64,
    pub shared_cost: f64,
    pub external_cost: f64,
    pub load_balancer_cost: f64,
    pub load_balancer_cost_adjustment: f64,
    pub total_cost: f64,
}

impl Allocation {
    /// True for synthetic idle allocations.
    pub fn is_idle(&self, key: &str) -> bool {
        if self.name.is_empty() {
            key.contains(IDLE_MARKER)
        } else {
            self.name.contains(IDLE_MARKER)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Properties {
    pub cluster: String,
    pub container: String,
    pub namespace: String,
    pub pod: String,
    pub node: String,
    pub controller: String,
    pub controller_kind: String,
    #[serde(rename = "providerID")]
    pub provider_id: String,
    pub labels: Option<BTreeMap<String, String>>,
    pub namespace_labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Window {
    pub start: String,
    pub end: String,
}

/// Body of `GET /getConfigs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigsResponse {
    #[serde(default)]
    pub data: Option<ConfigsData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigsData {
    pub currency_code: String,
}

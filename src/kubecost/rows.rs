//! Flattening of allocations into output rows.
//!
//! Every allocation becomes exactly eight rows, one per cost type, always in
//! the order of [`COST_TYPES`].

use super::types::{Allocation, Properties};
use crate::config::Aggregation;
use std::collections::BTreeMap;

pub type Row = [String; 20];

pub const COST_TYPES: [&str; 8] = [
    "cpuCost",
    "gpuCost",
    "ramCost",
    "pvCost",
    "networkCost",
    "sharedCost",
    "externalCost",
    "loadBalancerCost",
];

const USAGE_UNITS: [&str; 8] = [
    "cpuCoreHours",
    "gpuHours",
    "ramByteHours",
    "pvByteHours",
    "networkTransferBytes",
    "minutes",
    "minutes",
    "minutes",
];

const DEFAULT_CLUSTER: &str = "Cluster";

/// Per-day settings shared by every row.
#[derive(Debug, Clone)]
pub struct RowContext {
    pub currency: String,
    pub aggregation: Aggregation,
    pub multiplier: f64,
    pub override_pod_labels: bool,
    /// `YYYYMM` of the day being exported
    pub invoice_year_month: String,
}

pub fn allocation_rows(key: &str, allocation: &Allocation, ctx: &RowContext) -> Vec<Row> {
    let a = allocation;
    let costs = [
        a.cpu_cost + a.cpu_cost_adjustment,
        a.gpu_cost + a.gpu_cost_adjustment,
        a.ram_cost + a.ram_cost_adjustment,
        a.pv_cost + a.pv_cost_adjustment,
        a.network_cost + a.network_cost_adjustment,
        a.shared_cost,
        a.external_cost,
        a.load_balancer_cost + a.load_balancer_cost_adjustment,
    ];
    let amounts = [
        a.cpu_core_hours,
        a.gpu_hours,
        a.ram_byte_hours,
        a.pv_byte_hours,
        a.network_transfer_bytes,
        a.minutes,
        a.minutes,
        a.minutes,
    ];

    let p = &a.properties;
    let resource_id = if a.name.is_empty() { key } else { &a.name };
    let cluster = if p.cluster.is_empty() {
        DEFAULT_CLUSTER
    } else {
        &p.cluster
    };
    let labels = labels_json(p, ctx.override_pod_labels);

    (0..COST_TYPES.len())
        .map(|i| {
            [
                resource_id.to_string(),
                format!("{:.5}", ctx.multiplier * costs[i]),
                ctx.currency.clone(),
                ctx.aggregation.as_str().to_string(),
                COST_TYPES[i].to_string(),
                format!("{:.5}", amounts[i]),
                USAGE_UNITS[i].to_string(),
                cluster.to_string(),
                p.container.clone(),
                p.namespace.clone(),
                p.pod.clone(),
                p.node.clone(),
                p.controller.clone(),
                p.controller_kind.clone(),
                p.provider_id.clone(),
                labels.clone(),
                ctx.invoice_year_month.clone(),
                a.window.start.clone(),
                a.start.clone(),
                a.end.clone(),
            ]
        })
        .collect()
}

/// Merges pod and namespace labels and adds `kc-*` labels for every
/// non-empty property, serialized as a JSON object with sorted keys.
pub fn labels_json(properties: &Properties, override_pod_labels: bool) -> String {
    let mut labels: BTreeMap<String, String> = properties.labels.clone().unwrap_or_default();

    for (k, v) in properties.namespace_labels.iter().flatten() {
        if override_pod_labels || !labels.contains_key(k) {
            labels.insert(k.clone(), v.clone());
        }
    }

    let kc = [
        ("kc-cluster", &properties.cluster),
        ("kc-namespace", &properties.namespace),
        ("kc-controller-kind", &properties.controller_kind),
        ("kc-container", &properties.container),
        ("kc-controller", &properties.controller),
        ("kc-node", &properties.node),
        ("kc-pod-id", &properties.pod),
        ("kc-provider-id", &properties.provider_id),
    ];
    for (name, value) in kc {
        if !value.is_empty() {
            labels.insert(name.to_string(), value.clone());
        }
    }

    serde_json::to_string(&labels).unwrap_or_else(|_| "{}".to_string())
}

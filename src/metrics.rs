//! Registers and serves the process's Prometheus metrics.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter_vec, CounterVec, Gauge,
    IntCounterVec, TextEncoder,
};

pub static CONNECTED_CLIENTS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "wazuh_cluster_connected_clients",
        "Number of currently connected client nodes."
    )
    .unwrap()
});

pub static SYNCS_STARTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wazuh_cluster_syncs_started_total",
        "Sync runs started, labeled by kind.",
        &["kind"]
    )
    .unwrap()
});

pub static SYNCS_COMPLETED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wazuh_cluster_syncs_completed_total",
        "Sync runs completed, labeled by kind and outcome (ok|error).",
        &["kind", "outcome"]
    )
    .unwrap()
});

pub static FILE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "wazuh_cluster_file_errors_total",
        "Per-file write/decompression errors, labeled by cluster item key.",
        &["cluster_item_key"]
    )
    .unwrap()
});

pub static AGENTGROUPS_WARNINGS_TOTAL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "wazuh_cluster_agentgroups_warnings_total",
        "Agent-groups records dropped because they referenced an unknown agent."
    )
    .unwrap()
});

/// Renders all registered metrics in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}

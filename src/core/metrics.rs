// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, IntGauge, TextEncoder, register_counter, register_gauge,
    register_int_gauge};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("zircondb_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of transactions currently in the ACTIVE phase.
    pub static ref ACTIVE_TRANSACTIONS: Gauge =
        register_gauge!("zircondb_active_transactions", "Number of transactions currently active.").unwrap();
    /// The number of query cursors currently open.
    pub static ref OPEN_CURSORS: IntGauge =
        register_int_gauge!("zircondb_open_cursors", "Number of query cursors currently open.").unwrap();

    // --- Server-wide Counters ---
    /// The total number of requests processed by the server since startup.
    pub static ref REQUESTS_PROCESSED_TOTAL: Counter =
        register_counter!("zircondb_requests_processed_total", "Total number of requests processed.").unwrap();
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("zircondb_connections_received_total", "Total number of connections received.").unwrap();
    /// The total number of connections force-closed after a security failure.
    pub static ref SECURITY_DISCONNECTS_TOTAL: Counter =
        register_counter!("zircondb_security_disconnects_total", "Total number of connections closed by security errors.").unwrap();
    /// The total number of connections removed by the registry sweep.
    pub static ref SWEEP_REMOVALS_TOTAL: Counter =
        register_counter!("zircondb_sweep_removals_total", "Total number of connections removed by the sweeper.").unwrap();

    // --- Push Counters ---
    /// The total number of pending push events replaced before delivery.
    pub static ref PUSH_EVENTS_COALESCED_TOTAL: Counter =
        register_counter!("zircondb_push_events_coalesced_total", "Total number of push events coalesced by a newer event.").unwrap();
    /// The total number of push events delivered to subscribers.
    pub static ref PUSH_DELIVERIES_TOTAL: Counter =
        register_counter!("zircondb_push_deliveries_total", "Total number of push deliveries to subscribers.").unwrap();
    /// The total number of subscribers dropped after failed deliveries.
    pub static ref PUSH_SUBSCRIBERS_DROPPED_TOTAL: Counter =
        register_counter!("zircondb_push_subscribers_dropped_total", "Total number of push subscribers dropped after delivery failures.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

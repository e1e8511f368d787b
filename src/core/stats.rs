// src/core/stats.rs

//! Contains state definitions and logic for server statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Holds all state and logic related to server-wide statistics and monitoring.
#[derive(Debug, Default)]
pub struct StatsState {
    /// The total number of connections accepted by the server since startup.
    total_connections: AtomicU64,
    /// The total number of requests processed by the server since startup.
    total_requests: AtomicU64,
    /// The total number of transactions committed since startup.
    total_commits: AtomicU64,
}

impl StatsState {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn increment_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn increment_total_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn increment_total_commits(&self) {
        self.total_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_commits(&self) -> u64 {
        self.total_commits.load(Ordering::Relaxed)
    }
}

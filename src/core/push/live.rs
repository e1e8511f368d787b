// src/core/push/live.rs

//! Live-query monitors.
//!
//! A live-query subscription streams result changes for one statement to the
//! connection that registered it. Unlike the coalesced metadata mailboxes,
//! results are delivered directly and individually, still best-effort.

use crate::core::protocol::{LiveQueryPush, ServerMessage};
use crate::core::registry::ConnectionRegistry;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LiveMonitor {
    pub connection_id: u64,
    pub database: String,
    pub statement: String,
}

/// All live-query monitors, keyed by monitor id.
#[derive(Debug, Default)]
pub struct LiveQueryRegistry {
    monitors: DashMap<String, LiveMonitor>,
}

impl LiveQueryRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a monitor and returns its id.
    pub fn subscribe(&self, connection_id: u64, database: &str, statement: &str) -> String {
        let monitor_id = Uuid::new_v4().to_string();
        self.monitors.insert(
            monitor_id.clone(),
            LiveMonitor {
                connection_id,
                database: database.to_string(),
                statement: statement.to_string(),
            },
        );
        monitor_id
    }

    /// Removes a monitor; idempotent.
    pub fn unsubscribe(&self, monitor_id: &str) {
        self.monitors.remove(monitor_id);
    }

    /// Best-effort delivery of one result payload to a monitor's connection.
    /// A failed write unsubscribes the monitor.
    pub async fn publish_result(
        &self,
        registry: &ConnectionRegistry,
        monitor_id: &str,
        payload: Vec<u8>,
        write_timeout: Duration,
    ) {
        let Some(monitor) = self.monitors.get(monitor_id).map(|m| m.value().clone()) else {
            return;
        };
        let message = ServerMessage::LivePush(LiveQueryPush {
            monitor_id: monitor_id.to_string(),
            payload,
        });
        let delivered = match registry.lookup(monitor.connection_id) {
            Some(conn) => conn.send_push(message, write_timeout).await.is_ok(),
            None => false,
        };
        if !delivered {
            debug!("Dropping live-query monitor {}: delivery failed", monitor_id);
            self.monitors.remove(monitor_id);
        }
    }

    /// Drops every monitor owned by one connection.
    pub fn forget_connection(&self, connection_id: u64) {
        self.monitors
            .retain(|_, m| m.connection_id != connection_id);
    }

    /// Prunes monitors whose connection no longer exists in the registry.
    pub fn cleanup(&self, registry: &ConnectionRegistry) {
        self.monitors.retain(|_, m| registry.has(m.connection_id));
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

// src/core/settings.rs

//! The global configuration registry behind the `config get`/`set`/`list`
//! requests. A fixed table of known keys with defaults; unknown keys are
//! rejected, and `log_level` routes through the tracing reload handle.

use crate::core::ZirconDBError;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

pub type LogReloadHandle = Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>;

/// Every key the registry knows, with its default.
const KNOWN_SETTINGS: &[(&str, &str)] = &[
    ("log_level", "info"),
    ("query.max_page_size", "10000"),
    ("tx.max_operations", "100000"),
    ("registry.sweep_interval_ms", "30000"),
];

#[derive(Default)]
pub struct ServerSettings {
    entries: DashMap<String, String>,
    log_reload: Option<LogReloadHandle>,
}

impl ServerSettings {
    pub fn new(log_reload: Option<LogReloadHandle>) -> Self {
        let entries = DashMap::new();
        for (key, default) in KNOWN_SETTINGS {
            entries.insert(key.to_string(), default.to_string());
        }
        Self {
            entries,
            log_reload,
        }
    }

    pub fn get(&self, key: &str) -> Result<String, ZirconDBError> {
        self.entries
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| ZirconDBError::UnknownConfigKey(key.to_string()))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), ZirconDBError> {
        if !self.entries.contains_key(key) {
            return Err(ZirconDBError::UnknownConfigKey(key.to_string()));
        }
        self.validate(key, value)?;
        if key == "log_level"
            && let Some(handle) = &self.log_reload
        {
            handle
                .modify(|filter| *filter = EnvFilter::new(value))
                .map_err(|e| ZirconDBError::InvalidConfigValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
            info!("Log level changed to '{}'.", value);
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// All known keys and their current values, sorted by key.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort();
        entries
    }

    /// A numeric setting, falling back to its compiled default when the
    /// stored value is somehow unparseable.
    pub fn get_usize(&self, key: &str) -> usize {
        self.entries
            .get(key)
            .and_then(|v| v.value().parse().ok())
            .or_else(|| {
                KNOWN_SETTINGS
                    .iter()
                    .find(|(k, _)| *k == key)
                    .and_then(|(_, d)| d.parse().ok())
            })
            .unwrap_or(usize::MAX)
    }

    fn validate(&self, key: &str, value: &str) -> Result<(), ZirconDBError> {
        match key {
            "query.max_page_size" | "tx.max_operations" | "registry.sweep_interval_ms" => value
                .parse::<usize>()
                .map(|_| ())
                .map_err(|_| ZirconDBError::InvalidConfigValue {
                    key: key.to_string(),
                    reason: format!("'{value}' is not a non-negative integer"),
                }),
            _ => Ok(()),
        }
    }
}

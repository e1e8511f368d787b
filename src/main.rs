// src/main.rs

//! The main entry point for the ZirconDB server application.

use anyhow::Result;
use std::env;
use std::sync::Arc;
use tracing::error;
use zircondb::config::Config;
use zircondb::server;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("ZirconDB version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path. It can be provided via a --config
    // flag; otherwise, it defaults to "config.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    // A missing default config file is fine; explicit paths must exist.
    let mut config = if std::path::Path::new(config_path).exists() {
        match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{config_path}\": {e}");
                std::process::exit(1);
            }
        }
    } else if args.iter().any(|arg| arg == "--config") {
        eprintln!("Configuration file \"{config_path}\" does not exist");
        std::process::exit(1);
    } else {
        Config::default()
    };

    // Override port if provided as a command-line argument.
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    // Setup logging with reloading capabilities, so the global configuration
    // request `config set log_level` can retune verbosity at runtime.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    run_server(config, initial_log_level).await
}

async fn run_server(config: Config, initial_log_level: String) -> Result<()> {
    use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config, reload_handle).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}

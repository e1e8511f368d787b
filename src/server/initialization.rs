// src/server/initialization.rs

//! Handles the complete server initialization process, from configuration
//! loading to state setup and listener binding.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::settings::LogReloadHandle;
use crate::core::state::ServerState;
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config, log_reload_handle: LogReloadHandle) -> Result<ServerContext> {
    let acceptor = setup_tls(&config)?;

    let server_init = ServerState::initialize(config, Some(log_reload_handle))?;
    let server_state = server_init.state.clone();
    info!("Server state initialized.");

    let shutdown_tx = server_state.shutdown_tx.clone();

    let listener_config = server_state.config.lock().await;
    let listener = TcpListener::bind((listener_config.host.as_str(), listener_config.port)).await?;
    info!(
        "ZirconDB server listening on {}:{}",
        listener_config.host, listener_config.port
    );
    let connection_permits = Arc::new(tokio::sync::Semaphore::new(listener_config.max_clients));
    drop(listener_config);

    Ok(ServerContext {
        state: server_state,
        init_channels: Some(server_init),
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        acceptor,
        connection_permits,
    })
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.tls.enabled {
        info!("TLS is enabled. Loading certificate and key.");
        let certs = load_certs(&config.tls.cert_path)?;
        let key = load_key(&config.tls.key_path)?;
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    } else {
        Ok(None)
    }
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

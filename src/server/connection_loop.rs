// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::ConnectionHandler;
use crate::core::metrics;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            // An authenticated shutdown request fires the same broadcast the
            // signals do; stop accepting and drain.
            _ = shutdown_rx.recv() => {
                info!("Shutdown request received, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                if let Ok((socket, addr)) = res {
                    let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
                        warn!("Connection limit reached; refusing connection from {}", addr);
                        drop(socket);
                        continue;
                    };
                    info!("Accepted new connection from: {}", addr);
                    metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                    let state_clone = ctx.state.clone();
                    let global_shutdown_rx = ctx.shutdown_tx.subscribe();

                    if let Some(acceptor) = ctx.acceptor.clone() {
                        client_tasks.spawn(async move {
                            match acceptor.accept(socket).await {
                                Ok(tls_stream) => {
                                    info!("TLS handshake successful for {addr}");
                                    let any_stream = AnyStream::Tls(Box::new(tls_stream));
                                    let mut handler = ConnectionHandler::new(any_stream, addr, state_clone, global_shutdown_rx);
                                    if let Err(e) = handler.run().await { warn!("Connection from {} terminated unexpectedly: {}", addr, e); }
                                },
                                Err(e) => {
                                    warn!("TLS handshake error for {addr}: {e}");
                                }
                            }
                            drop(permit);
                        });
                    } else {
                        client_tasks.spawn(async move {
                            let any_stream = AnyStream::Tcp(socket);
                            let mut handler = ConnectionHandler::new(any_stream, addr, state_clone, global_shutdown_rx);
                            if let Err(e) = handler.run().await { warn!("Connection from {} terminated unexpectedly: {}", addr, e); }
                            drop(permit);
                        });
                    }
                } else if let Err(e) = res {
                    error!("Failed to accept connection: {}", e);
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    let _ = ctx.shutdown_tx.send(());

    client_tasks.shutdown().await;
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}

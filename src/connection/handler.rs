// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client channel.
//!
//! One handler task owns one socket. It reads request frames, dispatches
//! them through the `RequestExecutor`, writes replies, and interleaves
//! asynchronous push deliveries arriving on the channel's push queue.

use super::guard::ConnectionGuard;
use crate::core::ZirconDBError;
use crate::core::dispatch::{ExecutionOutcome, RequestExecutor};
use crate::core::protocol::{ServerCodec, ServerMessage};
use crate::core::state::ServerState;
use crate::server::AnyStream;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Capacity of the per-channel push queue. A subscriber further behind than
/// this is treated as dead by the push manager's write timeout.
const PUSH_QUEUE_CAPACITY: usize = 64;

/// Manages the full lifecycle of a client channel.
pub struct ConnectionHandler {
    framed: Framed<AnyStream, ServerCodec>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    executor: RequestExecutor,
    push_rx: mpsc::Receiver<ServerMessage>,
    interrupt_rx: broadcast::Receiver<()>,
    global_shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: AnyStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (push_tx, push_rx) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        let (interrupt_tx, interrupt_rx) = broadcast::channel(1);
        let executor = RequestExecutor::new(state.clone(), addr, push_tx, interrupt_tx);
        Self {
            framed: Framed::new(socket, ServerCodec),
            addr,
            state,
            executor,
            push_rx,
            interrupt_rx,
            global_shutdown_rx,
        }
    }

    /// The main event loop for the channel, handling incoming frames,
    /// pushes and shutdown signals.
    pub async fn run(&mut self) -> Result<(), ZirconDBError> {
        let mut guard = ConnectionGuard::new(self.state.clone(), self.addr);
        'main_loop: loop {
            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    info!("Connection handler for {} received GLOBAL shutdown signal.", self.addr);
                    break 'main_loop;
                }
                _ = self.interrupt_rx.recv() => {
                    info!("Connection handler for {} received kill signal.", self.addr);
                    break 'main_loop;
                }
                maybe_push = self.push_rx.recv() => {
                    // The sender side lives in the executor, so the channel
                    // can only close when this handler drops; a push always
                    // arrives here while the loop runs.
                    if let Some(message) = maybe_push {
                        if let Err(e) = self.framed.send(message).await {
                            warn!("Push write to {} failed: {}", self.addr, e);
                            break 'main_loop;
                        }
                    }
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(envelope)) => {
                            let outcome = self.executor.execute(envelope, &mut guard).await;
                            match outcome {
                                ExecutionOutcome::Reply(response) => {
                                    self.framed.send(ServerMessage::Reply(response)).await?;
                                }
                                ExecutionOutcome::ReplyAndClose(response) => {
                                    let _ = self.framed.send(ServerMessage::Reply(response)).await;
                                    break 'main_loop;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.addr, e);
                            } else {
                                warn!("Connection error for {}: {}", self.addr, e);
                            }
                            break 'main_loop;
                        }
                        None => {
                            debug!("Connection from {} closed by peer.", self.addr);
                            break 'main_loop;
                        }
                    }
                }
            }
        }
        // `guard` drops here and releases every connection bound on this
        // channel from the registry.
        Ok(())
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &ZirconDBError) -> bool {
    matches!(e, ZirconDBError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}

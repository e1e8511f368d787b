// src/core/push/worker.rs

//! The push delivery worker pool.
//!
//! A single dispatcher drains the job queue and hands each fan-out to a
//! spawned task, with a semaphore capping how many deliveries run at once.
//! Slow subscribers therefore delay at most one worker, never a publisher.

use super::PushJob;
use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tracing::info;

/// The background task that fans pushed events out to subscribers.
pub struct PushDeliveryTask {
    state: Arc<ServerState>,
    rx: mpsc::Receiver<PushJob>,
    workers: usize,
}

impl PushDeliveryTask {
    pub fn new(state: Arc<ServerState>, rx: mpsc::Receiver<PushJob>, workers: usize) -> Self {
        Self { state, rx, workers }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Push delivery task started with {} delivery workers.",
            self.workers
        );
        let permits = Arc::new(Semaphore::new(self.workers.max(1)));

        loop {
            tokio::select! {
                maybe_job = self.rx.recv() => {
                    let Some(job) = maybe_job else {
                        info!("Push job channel closed; delivery task exiting.");
                        return;
                    };
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        return;
                    };
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        state.push.deliver(&state.registry, job).await;
                        drop(permit);
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Push delivery task shutting down.");
                    return;
                }
            }
        }
    }
}

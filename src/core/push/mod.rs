// src/core/push/mod.rs

//! The push subsystem: coalesced metadata change notifications.
//!
//! Per (database, event kind) there is a single-slot mailbox, not a queue.
//! Publishing into an occupied slot replaces the pending event, so
//! subscribers always see the latest state under bursty metadata churn and
//! memory stays bounded. Delivery is best-effort: a subscriber whose
//! transport write fails is silently dropped.
//!
//! Bookkeeping (slots, subscriber sets, scheduling flags) lives behind one
//! manager-wide mutex; network writes always happen outside it.

mod live;
mod worker;

pub use live::LiveQueryRegistry;
pub use worker::PushDeliveryTask;

use crate::core::metrics;
use crate::core::protocol::{PushEnvelope, ServerMessage};
use crate::core::registry::ConnectionRegistry;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The metadata streams a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[derive(strum_macros::Display, strum_macros::EnumString, strum_macros::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum PushKind {
    StorageConfig,
    Schema,
    IndexManager,
    Functions,
    Sequences,
}

/// The storage/schema layer's change-notification hook. The push manager is
/// registered as the observer; only the publish contract matters here.
pub trait MetadataObserver: Send + Sync {
    fn metadata_changed(&self, database: &str, kind: PushKind, payload: Bytes);
}

/// A scheduled fan-out for one mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushJob {
    pub database: String,
    pub kind: PushKind,
}

#[derive(Default)]
struct Topic {
    /// At most one undelivered event; a newer publish replaces it.
    pending: Option<Bytes>,
    /// True while a fan-out job for this mailbox sits in the worker queue.
    fanout_scheduled: bool,
    subscribers: HashSet<u64>,
}

/// The central hub for push subscriptions and coalesced publication.
pub struct PushManager {
    topics: Mutex<HashMap<(String, PushKind), Topic>>,
    job_tx: mpsc::Sender<PushJob>,
    write_timeout: Duration,
}

impl PushManager {
    /// Creates the manager plus the job receiver the delivery task drains.
    pub fn new(queue_capacity: usize, write_timeout: Duration) -> (Self, mpsc::Receiver<PushJob>) {
        let (job_tx, job_rx) = mpsc::channel(queue_capacity);
        (
            Self {
                topics: Mutex::new(HashMap::new()),
                job_tx,
                write_timeout,
            },
            job_rx,
        )
    }

    /// Adds a subscriber for (database, kind).
    pub fn subscribe(&self, database: &str, kind: PushKind, connection_id: u64) {
        let mut topics = self.topics.lock();
        topics
            .entry((database.to_string(), kind))
            .or_default()
            .subscribers
            .insert(connection_id);
    }

    /// Removes a subscriber; a no-op when it was never subscribed.
    pub fn unsubscribe(&self, database: &str, kind: PushKind, connection_id: u64) {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get_mut(&(database.to_string(), kind)) {
            topic.subscribers.remove(&connection_id);
        }
    }

    /// Stores an event in the (database, kind) mailbox. An empty slot also
    /// schedules an asynchronous fan-out; an occupied slot is replaced so
    /// only the latest event is ever delivered.
    pub fn publish(&self, database: &str, kind: PushKind, payload: Bytes) {
        let mut topics = self.topics.lock();
        let topic = topics.entry((database.to_string(), kind)).or_default();
        if topic.pending.replace(payload).is_some() {
            metrics::PUSH_EVENTS_COALESCED_TOTAL.inc();
        }
        if !topic.fanout_scheduled {
            match self.job_tx.try_send(PushJob {
                database: database.to_string(),
                kind,
            }) {
                Ok(()) => topic.fanout_scheduled = true,
                Err(e) => {
                    // Queue full or delivery task gone. The event stays in the
                    // slot; the next publish retries the schedule.
                    warn!("Could not schedule push fan-out for '{database}'/{kind}: {e}");
                }
            }
        }
    }

    /// Takes the pending event and subscriber snapshot for a fan-out,
    /// clearing the slot and the scheduling flag. Returns `None` when a
    /// newer job already drained the mailbox.
    fn take_pending(&self, job: &PushJob) -> Option<(Bytes, Vec<u64>)> {
        let mut topics = self.topics.lock();
        let topic = topics.get_mut(&(job.database.clone(), job.kind))?;
        topic.fanout_scheduled = false;
        let event = topic.pending.take()?;
        Some((event, topic.subscribers.iter().copied().collect()))
    }

    /// Delivers the current pending event for a job to every subscriber.
    /// Transport writes happen with no manager lock held; any failure
    /// silently drops that subscriber.
    pub async fn deliver(&self, registry: &ConnectionRegistry, job: PushJob) {
        let Some((payload, subscribers)) = self.take_pending(&job) else {
            return;
        };
        for connection_id in subscribers {
            let message = ServerMessage::Push(PushEnvelope {
                database: job.database.clone(),
                kind: job.kind,
                payload: payload.to_vec(),
            });
            let delivered = match registry.lookup(connection_id) {
                Some(conn) => conn.send_push(message, self.write_timeout).await.is_ok(),
                None => false,
            };
            if delivered {
                metrics::PUSH_DELIVERIES_TOTAL.inc();
            } else {
                debug!(
                    "Dropping push subscriber {} for '{}'/{}: delivery failed",
                    connection_id, job.database, job.kind
                );
                metrics::PUSH_SUBSCRIBERS_DROPPED_TOTAL.inc();
                self.unsubscribe(&job.database, job.kind, connection_id);
            }
        }
    }

    /// Prunes subscribers whose connection no longer exists in the registry.
    /// A subscriber is alive iff its connection id is still registered.
    pub fn cleanup(&self, registry: &ConnectionRegistry) -> usize {
        let mut topics = self.topics.lock();
        let mut pruned = 0;
        for topic in topics.values_mut() {
            topic.subscribers.retain(|id| {
                let alive = registry.has(*id);
                if !alive {
                    pruned += 1;
                }
                alive
            });
        }
        topics.retain(|_, t| !t.subscribers.is_empty() || t.pending.is_some());
        if pruned > 0 {
            debug!("Pruned {} dead push subscribers.", pruned);
        }
        pruned
    }

    /// Drops every subscription held by one connection. Part of the
    /// registry's on-disconnect callbacks.
    pub fn forget_connection(&self, connection_id: u64) {
        let mut topics = self.topics.lock();
        for topic in topics.values_mut() {
            topic.subscribers.remove(&connection_id);
        }
    }

    /// Returns the number of subscribers for a specific mailbox.
    pub fn subscriber_count(&self, database: &str, kind: PushKind) -> usize {
        self.topics
            .lock()
            .get(&(database.to_string(), kind))
            .map_or(0, |t| t.subscribers.len())
    }
}

impl MetadataObserver for PushManager {
    fn metadata_changed(&self, database: &str, kind: PushKind, payload: Bytes) {
        self.publish(database, kind, payload);
    }
}

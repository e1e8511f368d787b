// src/core/registry/session.rs

//! A `ClientSession` groups every connection authenticated with one token.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;

/// The set of connections sharing an identical token byte-string. A client
/// may open several parallel channels under one authenticated token; their
/// ids land in one session. The set carries its own lock because members
/// are added and removed from different handler tasks concurrently.
#[derive(Debug)]
pub struct ClientSession {
    token_bytes: Bytes,
    connections: Mutex<HashSet<u64>>,
}

impl ClientSession {
    pub fn new(token_bytes: Bytes) -> Self {
        Self {
            token_bytes,
            connections: Mutex::new(HashSet::new()),
        }
    }

    pub fn token_bytes(&self) -> &Bytes {
        &self.token_bytes
    }

    pub fn add_connection(&self, connection_id: u64) {
        self.connections.lock().insert(connection_id);
    }

    /// Removes a member; returns true when it was present.
    pub fn remove_connection(&self, connection_id: u64) -> bool {
        self.connections.lock().remove(&connection_id)
    }

    /// A session is active while its connection set is non-empty. The
    /// registry removes it the instant this turns false.
    pub fn is_active(&self) -> bool {
        !self.connections.lock().is_empty()
    }

    pub fn connection_ids(&self) -> Vec<u64> {
        self.connections.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}

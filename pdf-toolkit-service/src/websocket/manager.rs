//! WebSocket connection manager.
//!
//! Tracks open connections and what each one is subscribed to.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::messages::ServerMessage;

/// State for a single WebSocket connection
pub(crate) struct ConnectionState {
    pub(crate) username: String,
    pub(crate) tx: mpsc::UnboundedSender<ServerMessage>,
    /// Receives updates for every job
    pub(crate) all_jobs: bool,
    pub(crate) jobs: HashSet<String>,
}

impl ConnectionState {
    pub(crate) fn wants(&self, job_id: &str) -> bool {
        self.all_jobs || self.jobs.contains(job_id)
    }
}

/// Manager for all WebSocket connections
pub struct WebSocketManager {
    pub(crate) connections: DashMap<String, ConnectionState>,
}

impl Default for WebSocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub(crate) fn add_connection(
        &self,
        session_id: String,
        username: String,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        debug!(session_id = %session_id, username = %username, "Adding WebSocket connection");
        self.connections.insert(
            session_id,
            ConnectionState {
                username,
                tx,
                all_jobs: false,
                jobs: HashSet::new(),
            },
        );
    }

    pub(crate) fn remove_connection(&self, session_id: &str) {
        debug!(session_id = %session_id, "Removing WebSocket connection");
        self.connections.remove(session_id);
    }

    /// Subscribe to one job, or to all jobs when `job_id` is `None`
    pub(crate) fn subscribe(&self, session_id: &str, job_id: Option<&str>) {
        if let Some(mut conn) = self.connections.get_mut(session_id) {
            match job_id {
                Some(id) => {
                    conn.jobs.insert(id.to_string());
                }
                None => conn.all_jobs = true,
            }
            debug!(session_id = %session_id, job_id = ?job_id, user = %conn.username, "Subscribed");
        }
    }

    /// Unsubscribe from one job, or from everything when `job_id` is `None`
    pub(crate) fn unsubscribe(&self, session_id: &str, job_id: Option<&str>) {
        if let Some(mut conn) = self.connections.get_mut(session_id) {
            match job_id {
                Some(id) => {
                    conn.jobs.remove(id);
                }
                None => {
                    conn.all_jobs = false;
                    conn.jobs.clear();
                }
            }
            debug!(session_id = %session_id, job_id = ?job_id, "Unsubscribed");
        }
    }

    /// Send a message to a specific connection
    pub fn send_to(&self, session_id: &str, msg: ServerMessage) {
        if let Some(conn) = self.connections.get(session_id)
            && conn.tx.send(msg).is_err()
        {
            tracing::warn!(session_id = %session_id, "Failed to send message to connection");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections that would receive an update for `job_id`
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().wants(job_id))
            .count()
    }
}

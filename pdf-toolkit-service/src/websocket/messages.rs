//! WebSocket message types.
//!
//! Defines the client-to-server and server-to-client message formats
//! for the batch progress feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Follow one job, or every job when `job_id` is absent
    Subscribe {
        #[serde(default)]
        job_id: Option<String>,
    },
    /// Stop following one job, or everything when `job_id` is absent
    Unsubscribe {
        #[serde(default)]
        job_id: Option<String>,
    },
    /// Keepalive ping
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: String,
    },
    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    Unsubscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    /// Batch job progress update
    JobProgress {
        job_id: String,
        status: String,
        progress: f64,
        processed: usize,
        failed: usize,
        total: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_completion: Option<DateTime<Utc>>,
    },
    /// Keepalive pong response
    Pong { timestamp: u64 },
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}

/// Data for broadcasting batch job progress
#[derive(Debug, Clone)]
pub struct JobProgressUpdate {
    pub job_id: String,
    pub status: String,
    pub progress: f64,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl From<JobProgressUpdate> for ServerMessage {
    fn from(update: JobProgressUpdate) -> Self {
        ServerMessage::JobProgress {
            job_id: update.job_id,
            status: update.status,
            progress: update.progress,
            processed: update.processed,
            failed: update.failed,
            total: update.total,
            estimated_completion: update.estimated_completion,
        }
    }
}

//! Broadcast of batch job progress to subscribed connections.

use tracing::debug;

use super::manager::WebSocketManager;
use super::messages::{JobProgressUpdate, ServerMessage};

impl WebSocketManager {
    /// Send a job update to every connection following that job
    pub fn broadcast_job_update(&self, update: JobProgressUpdate) {
        let job_id = update.job_id.clone();
        let msg: ServerMessage = update.into();
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.wants(&job_id) && conn.tx.send(msg.clone()).is_ok() {
                sent_count += 1;
            }
        }

        if sent_count > 0 {
            debug!(job_id = %job_id, sent_count, "Broadcast job update to connections");
        }
    }
}

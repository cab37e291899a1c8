//! WebSocket feed of batch job progress.
//!
//! Clients connect to `/api/v1/batch/ws`, subscribe to one job or to all
//! of them, and receive a `job_progress` message on every file completion.

mod broadcast;
mod handlers;
mod manager;
pub mod messages;

pub use handlers::handle_ws_connection;
pub use manager::WebSocketManager;
pub use messages::{ClientMessage, JobProgressUpdate, ServerMessage};

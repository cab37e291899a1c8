//! Durable batch processing.
//!
//! A job applies one [`Operation`] to many uploaded files. Jobs are queued,
//! run by a fixed set of dispatcher tasks, persisted after every change and
//! restored on startup.

mod job;
mod report;
mod retry;
mod scheduler;

use futures::future::BoxFuture;

pub use job::{BatchConfiguration, BatchJob, BatchOptions, FileOutcome, JobStatus};
pub use report::{JobReport, JobStatistics};
pub use scheduler::{BatchScheduler, JobProgress};

use crate::error::ServiceResult;
use crate::operation::{Operation, OperationResult};

/// Runs a single operation against a single uploaded file on behalf of a job.
///
/// `Err` means the attempt itself broke and may be retried when the error is
/// transient. `Ok` with `success: false` is a final answer about the document.
pub trait OperationExecutor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        operation: Operation,
        job_id: &'a str,
        file_id: &'a str,
        parameters: &'a serde_json::Value,
    ) -> BoxFuture<'a, ServiceResult<OperationResult>>;
}

//! Batch job entities and their bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::operation::{Operation, OperationResult};

/// Upper bound on per-job transient retries
pub const MAX_RETRIES: u32 = 10;

/// Aggregate status of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Per-job execution options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Files processed at the same time; capped by `batch.max_workers_per_job`
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Retries for transient failures; defaults to `batch.max_retries`
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

fn default_continue_on_error() -> bool {
    true
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            max_retries: None,
            continue_on_error: true,
        }
    }
}

impl BatchOptions {
    pub fn validate(&self) -> ServiceResult<()> {
        if self.max_workers == Some(0) {
            return Err(ServiceError::invalid("max_workers must be at least 1"));
        }
        if let Some(retries) = self.max_retries
            && retries > MAX_RETRIES
        {
            return Err(ServiceError::invalid(format!(
                "max_retries must be at most {}",
                MAX_RETRIES
            )));
        }
        Ok(())
    }
}

/// Result of running the operation on one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file_id: String,
    pub result: OperationResult,
    pub attempts: u32,
    /// Wall time across all attempts, seconds
    pub duration_secs: f64,
}

/// A tracked collection of per-file results with an aggregate status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub operation: Operation,
    pub parameters: serde_json::Value,
    pub file_ids: Vec<String>,
    pub options: BatchOptions,
    pub status: JobStatus,
    /// Indexed like `file_ids`; `None` until the file finishes
    pub results: Vec<Option<FileOutcome>>,
    pub processed_files: usize,
    pub failed_files: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub source_job_id: Option<String>,
}

impl BatchJob {
    pub fn new(
        operation: Operation,
        file_ids: Vec<String>,
        parameters: serde_json::Value,
        options: BatchOptions,
    ) -> Self {
        let results = vec![None; file_ids.len()];
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            parameters,
            file_ids,
            options,
            status: JobStatus::Pending,
            results,
            processed_files: 0,
            failed_files: 0,
            warnings: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            source_job_id: None,
        }
    }

    pub fn total_files(&self) -> usize {
        self.file_ids.len()
    }

    /// Percentage of files with an outcome
    pub fn progress(&self) -> f64 {
        if self.file_ids.is_empty() {
            return 100.0;
        }
        (self.processed_files + self.failed_files) as f64 / self.file_ids.len() as f64 * 100.0
    }

    /// Indices of files that have no outcome yet
    pub fn pending_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Store an outcome and update the counters. Re-recording an index is ignored.
    pub fn record(&mut self, index: usize, outcome: FileOutcome) -> bool {
        let Some(slot) = self.results.get_mut(index) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        if outcome.result.success {
            self.processed_files += 1;
        } else {
            self.failed_files += 1;
        }
        *slot = Some(outcome);
        true
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &FileOutcome> {
        self.results.iter().flatten()
    }

    pub fn failed_file_ids(&self) -> Vec<String> {
        self.outcomes()
            .filter(|o| !o.result.success)
            .map(|o| o.file_id.clone())
            .collect()
    }

    /// Extrapolate completion from the mean duration of finished files
    pub fn estimated_completion(&self, workers: usize) -> Option<DateTime<Utc>> {
        if self.status.is_terminal() {
            return self.completed_at;
        }
        let started = self.started_at?;
        let done: Vec<f64> = self.outcomes().map(|o| o.duration_secs).collect();
        if done.is_empty() {
            return None;
        }
        let mean = done.iter().sum::<f64>() / done.len() as f64;
        let remaining = self.total_files().saturating_sub(done.len()) as f64;
        let waves = (remaining / workers.max(1) as f64).ceil();
        let elapsed = (Utc::now() - started).num_milliseconds().max(0) as f64 / 1000.0;
        let eta_secs = elapsed.max(0.0) + waves * mean;
        Some(started + chrono::Duration::milliseconds((eta_secs * 1000.0) as i64))
    }
}

/// A named, reusable job template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfiguration {
    pub name: String,
    pub operation: Operation,
    pub parameters: serde_json::Value,
    pub options: BatchOptions,
    pub created_at: DateTime<Utc>,
    pub source_job_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(file_id: &str, success: bool) -> FileOutcome {
        let result = if success {
            OperationResult::ok("ok")
        } else {
            OperationResult::failure("failed", "boom")
        };
        FileOutcome {
            file_id: file_id.to_string(),
            result,
            attempts: 1,
            duration_secs: 0.5,
        }
    }

    #[test]
    fn test_record_updates_counters_once() {
        let mut job = BatchJob::new(
            Operation::Compress,
            vec!["a".into(), "b".into(), "c".into()],
            serde_json::json!({}),
            BatchOptions::default(),
        );
        assert!(job.record(0, outcome("a", true)));
        assert!(job.record(2, outcome("c", false)));
        assert!(!job.record(2, outcome("c", true)));
        assert!(!job.record(9, outcome("z", true)));

        assert_eq!(job.processed_files, 1);
        assert_eq!(job.failed_files, 1);
        assert_eq!(job.pending_indices(), vec![1]);
        assert_eq!(job.failed_file_ids(), vec!["c".to_string()]);
        assert!((job.progress() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_options_validate_bounds() {
        assert!(BatchOptions::default().validate().is_ok());

        let bounded = BatchOptions {
            max_retries: Some(MAX_RETRIES),
            ..Default::default()
        };
        assert!(bounded.validate().is_ok());

        let unbounded = BatchOptions {
            max_retries: Some(MAX_RETRIES + 1),
            ..Default::default()
        };
        assert!(matches!(
            unbounded.validate(),
            Err(ServiceError::InvalidRequest { .. })
        ));

        let idle = BatchOptions {
            max_workers: Some(0),
            ..Default::default()
        };
        assert!(idle.validate().is_err());
    }

    #[test]
    fn test_options_default_continue_on_error() {
        let options: BatchOptions = serde_json::from_str("{}").unwrap();
        assert!(options.continue_on_error);
        assert_eq!(options.max_workers, None);
    }
}

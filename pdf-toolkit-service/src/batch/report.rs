//! Job statistics and the post-run report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::job::{BatchJob, JobStatus};
use crate::operation::Operation;

#[derive(Debug, Clone, Serialize)]
pub struct JobStatistics {
    pub job_id: String,
    pub operation: Operation,
    pub status: JobStatus,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    /// Percent of all files that succeeded
    pub success_rate: f64,
    pub job_duration_seconds: f64,
    pub total_processing_time_seconds: f64,
    pub average_processing_time_seconds: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub total_warnings: usize,
    pub total_errors: usize,
}

impl JobStatistics {
    pub fn from_job(job: &BatchJob) -> Self {
        let outcomes: Vec<_> = job.outcomes().collect();
        let total_processing: f64 = outcomes.iter().map(|o| o.result.execution_time).sum();
        let successful = outcomes.iter().filter(|o| o.result.success).count();

        let job_duration = match (job.started_at, job.completed_at) {
            (Some(start), Some(end)) => seconds_between(start, end),
            (Some(start), None) => seconds_between(start, Utc::now()),
            _ => 0.0,
        };

        Self {
            job_id: job.id.clone(),
            operation: job.operation,
            status: job.status,
            total_files: job.total_files(),
            processed_files: job.processed_files,
            failed_files: job.failed_files,
            success_rate: if job.total_files() > 0 {
                job.processed_files as f64 / job.total_files() as f64 * 100.0
            } else {
                0.0
            },
            job_duration_seconds: job_duration,
            total_processing_time_seconds: total_processing,
            average_processing_time_seconds: if outcomes.is_empty() {
                0.0
            } else {
                total_processing / outcomes.len() as f64
            },
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            successful_operations: successful,
            failed_operations: outcomes.len() - successful,
            total_warnings: outcomes.iter().map(|o| o.result.warnings.len()).sum(),
            total_errors: outcomes.iter().map(|o| o.result.errors.len()).sum(),
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub operation: Operation,
    pub status: JobStatus,
    pub total_files: usize,
    pub success_rate: f64,
    pub execution_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// 1-based position in the job's input
    pub file_index: usize,
    pub file_id: String,
    pub success: bool,
    pub attempts: u32,
    pub execution_time: f64,
    pub output_files: Vec<String>,
    pub warnings_count: usize,
    pub errors_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub total_warnings: usize,
    pub failed_files: usize,
    pub error_types: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub average_processing_time: f64,
    pub total_processing_time: f64,
    pub throughput_files_per_second: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_summary: JobSummary,
    pub statistics: JobStatistics,
    pub file_results: Vec<FileReport>,
    pub error_summary: ErrorSummary,
    pub performance_metrics: PerformanceMetrics,
    pub recommendations: Vec<String>,
}

impl JobReport {
    pub fn from_job(job: &BatchJob) -> Self {
        let stats = JobStatistics::from_job(job);

        let mut error_types = BTreeMap::new();
        let file_results = job
            .outcomes()
            .enumerate()
            .map(|(i, outcome)| {
                let result = &outcome.result;
                let error_message = (!result.success).then(|| {
                    let mut text = result.message.clone();
                    for error in &result.errors {
                        text.push_str(": ");
                        text.push_str(error);
                    }
                    *error_types.entry(categorize_error(&text)).or_insert(0) += 1;
                    text
                });
                FileReport {
                    file_index: i + 1,
                    file_id: outcome.file_id.clone(),
                    success: result.success,
                    attempts: outcome.attempts,
                    execution_time: result.execution_time,
                    output_files: result.output_files.clone(),
                    warnings_count: result.warnings.len(),
                    errors_count: result.errors.len(),
                    error_message,
                }
            })
            .collect();

        let throughput = if stats.job_duration_seconds > 0.0 {
            stats.total_files as f64 / stats.job_duration_seconds
        } else {
            0.0
        };

        Self {
            job_summary: JobSummary {
                job_id: job.id.clone(),
                operation: job.operation,
                status: job.status,
                total_files: stats.total_files,
                success_rate: stats.success_rate,
                execution_time: stats.job_duration_seconds,
            },
            file_results,
            error_summary: ErrorSummary {
                total_errors: stats.total_errors,
                total_warnings: stats.total_warnings,
                failed_files: stats.failed_files,
                error_types,
            },
            performance_metrics: PerformanceMetrics {
                average_processing_time: stats.average_processing_time_seconds,
                total_processing_time: stats.total_processing_time_seconds,
                throughput_files_per_second: throughput,
            },
            recommendations: recommendations(job.operation, &stats),
            statistics: stats,
        }
    }
}

/// Bucket a failure message into a coarse error category
pub fn categorize_error(message: &str) -> &'static str {
    let message = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if has(&["file not found", "does not exist"]) {
        "file_not_found"
    } else if has(&["permission", "access"]) {
        "permission_error"
    } else if has(&["corrupted", "invalid pdf", "pdf error"]) {
        "corrupted_file"
    } else if has(&["memory"]) {
        "memory_error"
    } else if has(&["timeout", "timed out"]) {
        "timeout_error"
    } else {
        "unknown_error"
    }
}

fn recommendations(operation: Operation, stats: &JobStatistics) -> Vec<String> {
    let mut out = Vec::new();

    if stats.success_rate < 50.0 {
        out.push("Consider checking file integrity before batch processing".to_string());
    }
    if stats.average_processing_time_seconds > 10.0 {
        out.push("Consider reducing batch size for better performance".to_string());
    }
    if stats.total_errors as f64 > stats.total_files as f64 * 0.2 {
        out.push("High error rate detected, review input files and parameters".to_string());
    }
    if operation == Operation::Compress && stats.success_rate > 90.0 {
        out.push("Consider using higher compression levels for better size reduction".to_string());
    }
    if operation == Operation::Ocr && stats.failed_operations > 0 {
        out.push("OCR failures may indicate scanned PDFs, try image preprocessing".to_string());
    }

    out
}

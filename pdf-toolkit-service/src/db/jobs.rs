//! Batch job persistence.
//!
//! Each row is a full snapshot of a [`BatchJob`]; the scheduler upserts after
//! every state change.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::batch::{BatchJob, JobStatus};
use crate::error::{DatabaseError, ServiceResult};
use crate::operation::Operation;

const JOB_COLUMNS: &str = "id, operation, parameters, file_ids, options, status, results, warnings, \
     processed, failed, created_at, started_at, completed_at, source_job_id";

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> ServiceResult<String> {
    Ok(serde_json::to_string(value).map_err(DatabaseError::Serialization)?)
}

fn job_from_row(row: &Row<'_>) -> Result<BatchJob, rusqlite::Error> {
    let operation: String = row.get(1)?;
    let parameters: String = row.get(2)?;
    let file_ids: String = row.get(3)?;
    let options: String = row.get(4)?;
    let status: String = row.get(5)?;
    let results: String = row.get(6)?;
    let warnings: String = row.get(7)?;
    let processed: i64 = row.get(8)?;
    let failed: i64 = row.get(9)?;
    let created_at: String = row.get(10)?;

    let operation = operation.parse::<Operation>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let file_ids: Vec<String> = serde_json::from_str(&file_ids).unwrap_or_default();
    let mut results: Vec<_> = serde_json::from_str(&results).unwrap_or_default();
    results.resize(file_ids.len(), None);

    Ok(BatchJob {
        id: row.get(0)?,
        operation,
        parameters: serde_json::from_str(&parameters).unwrap_or(serde_json::Value::Null),
        file_ids,
        options: serde_json::from_str(&options).unwrap_or_default(),
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
        results,
        processed_files: processed.max(0) as usize,
        failed_files: failed.max(0) as usize,
        warnings: serde_json::from_str(&warnings).unwrap_or_default(),
        created_at: parse_timestamp(&created_at),
        started_at: parse_optional_timestamp(row.get(11)?),
        completed_at: parse_optional_timestamp(row.get(12)?),
        source_job_id: row.get(13)?,
    })
}

impl Database {
    /// Insert or replace the snapshot of a job
    pub fn save_job(&self, job: &BatchJob) -> ServiceResult<()> {
        let parameters = to_json(&job.parameters)?;
        let file_ids = to_json(&job.file_ids)?;
        let options = to_json(&job.options)?;
        let results = to_json(&job.results)?;
        let warnings = to_json(&job.warnings)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO batch_jobs (id, operation, parameters, file_ids, options, status, results, warnings,
                                     processed, failed, created_at, started_at, completed_at, source_job_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                results = excluded.results,
                warnings = excluded.warnings,
                processed = excluded.processed,
                failed = excluded.failed,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at",
            params![
                job.id,
                job.operation.as_ref(),
                parameters,
                file_ids,
                options,
                job.status.as_str(),
                results,
                warnings,
                job.processed_files as i64,
                job.failed_files as i64,
                format_timestamp(job.created_at),
                job.started_at.map(format_timestamp),
                job.completed_at.map(format_timestamp),
                job.source_job_id,
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    pub fn get_job(&self, id: &str) -> ServiceResult<Option<BatchJob>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM batch_jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            job_from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    /// All jobs, oldest first
    pub fn list_jobs(&self) -> ServiceResult<Vec<BatchJob>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM batch_jobs ORDER BY created_at ASC",
                JOB_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let jobs = stmt
            .query_map([], job_from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(jobs)
    }

    /// Delete terminal jobs that completed before `cutoff`; returns their ids
    pub fn delete_jobs_completed_before(&self, cutoff: DateTime<Utc>) -> ServiceResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT id FROM batch_jobs
                 WHERE status IN ('completed', 'failed', 'cancelled')
                   AND completed_at IS NOT NULL AND completed_at < ?1",
            )
            .map_err(DatabaseError::Query)?;

        let ids = stmt
            .query_map(params![format_timestamp(cutoff)], |row| row.get::<_, String>(0))
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        for id in &ids {
            conn.execute("DELETE FROM batch_jobs WHERE id = ?1", params![id])
                .map_err(DatabaseError::Query)?;
        }

        Ok(ids)
    }
}

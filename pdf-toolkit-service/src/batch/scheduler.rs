//! Job queue, dispatcher tasks and per-file execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::OperationExecutor;
use super::job::{BatchConfiguration, BatchJob, BatchOptions, FileOutcome, JobStatus, MAX_RETRIES};
use super::report::{JobReport, JobStatistics};
use super::retry::{backoff_delay, is_transient};
use crate::config::{BatchConfig, RuntimeConfig};
use crate::db::Database;
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::files::FileManager;
use crate::operation::{Operation, OperationResult};
use crate::websocket::{JobProgressUpdate, WebSocketManager};

const ABORTED: &str = "skipped: job aborted";

/// Progress view of a job, without per-file results
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job_id: String,
    pub operation: Operation,
    pub status: JobStatus,
    pub progress: f64,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

pub struct BatchScheduler {
    db: Arc<Database>,
    runtime_config: Arc<RuntimeConfig>,
    files: Arc<FileManager>,
    ws_manager: Arc<WebSocketManager>,
    /// Jobs not yet finished by a dispatcher
    active: DashMap<String, BatchJob>,
    cancellation_tokens: DashMap<String, CancellationToken>,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Mutex<mpsc::Receiver<String>>,
    /// Shared by every running job
    file_permits: Semaphore,
    shutdown: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        db: Arc<Database>,
        runtime_config: Arc<RuntimeConfig>,
        files: Arc<FileManager>,
        ws_manager: Arc<WebSocketManager>,
    ) -> Self {
        let batch = runtime_config.dynamic().batch.clone();
        let (queue_tx, queue_rx) = mpsc::channel(batch.queue_capacity.max(1));
        let permits = batch.max_concurrent_jobs.max(1) * batch.max_workers_per_job.max(1);

        Self {
            db,
            runtime_config,
            files,
            ws_manager,
            active: DashMap::new(),
            cancellation_tokens: DashMap::new(),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            file_permits: Semaphore::new(permits),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the dispatcher tasks. Call once on startup.
    pub fn start(self: &Arc<Self>, executor: Arc<dyn OperationExecutor>) {
        let dispatchers = self.runtime_config.dynamic().batch.max_concurrent_jobs.max(1);
        for worker in 0..dispatchers {
            let scheduler = Arc::clone(self);
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                debug!(worker, "Batch dispatcher started");
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = scheduler.shutdown.cancelled() => None,
                        job_id = async { scheduler.queue_rx.lock().await.recv().await } => job_id,
                    };
                    let Some(job_id) = next else { break };
                    scheduler.run_job(&job_id, executor.as_ref()).await;
                }
                debug!(worker, "Batch dispatcher stopped");
            });
        }
        info!(dispatchers, "Batch scheduler started");
    }

    /// Stop taking new jobs from the queue
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Re-queue jobs persisted as pending or running. Run after [`start`](Self::start).
    pub async fn restore(&self) -> ServiceResult<usize> {
        let mut restored = 0;
        for mut job in self.db.list_jobs()? {
            if job.status.is_terminal() {
                continue;
            }
            if job.status == JobStatus::Running {
                job.status = JobStatus::Pending;
                self.db.save_job(&job)?;
            }

            let job_id = job.id.clone();
            self.register_token(&job_id);
            self.active.insert(job_id.clone(), job);
            self.queue_tx
                .send(job_id)
                .await
                .map_err(|_| ServiceError::internal("Batch queue closed"))?;
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "Restored unfinished batch jobs");
        }
        Ok(restored)
    }

    /// Validate, persist and enqueue a new job
    #[instrument(skip_all, fields(operation = %operation, files = file_ids.len()))]
    pub fn create_job(
        &self,
        operation: Operation,
        file_ids: Vec<String>,
        parameters: serde_json::Value,
        options: BatchOptions,
    ) -> ServiceResult<BatchJob> {
        self.submit(operation, file_ids, parameters, options, None)
    }

    fn submit(
        &self,
        operation: Operation,
        file_ids: Vec<String>,
        parameters: serde_json::Value,
        options: BatchOptions,
        source_job_id: Option<String>,
    ) -> ServiceResult<BatchJob> {
        if !operation.is_batchable() {
            return Err(ServiceError::invalid(format!(
                "Operation {} is not supported in batch jobs",
                operation
            )));
        }
        if file_ids.is_empty() {
            return Err(ServiceError::invalid("At least one file id is required"));
        }
        options.validate()?;

        let mut warnings = Vec::new();
        let mut valid = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            if self.files.exists(&file_id) {
                valid.push(file_id);
            } else {
                warn!(file_id = %file_id, "Dropping unknown file from batch job");
                warnings.push(format!("File not found, skipped: {}", file_id));
            }
        }
        if valid.is_empty() {
            return Err(ServiceError::invalid("None of the requested files exist"));
        }

        let permit = self.queue_tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(_) => ServiceError::QueueFull {
                capacity: self.queue_tx.max_capacity(),
            },
            TrySendError::Closed(_) => ServiceError::internal("Batch queue closed"),
        })?;

        let mut job = BatchJob::new(operation, valid, parameters, options);
        job.warnings = warnings;
        job.source_job_id = source_job_id;
        self.db.save_job(&job)?;

        self.register_token(&job.id);
        self.active.insert(job.id.clone(), job.clone());
        permit.send(job.id.clone());

        info!(job_id = %job.id, files = job.total_files(), "Batch job queued");
        Ok(job)
    }

    /// Cancel a pending or running job. Returns false for unknown or finished jobs.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let cancelled = self.update_job(job_id, |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
            true
        });

        match cancelled {
            Some((true, job)) => {
                if let Some((_, token)) = self.cancellation_tokens.remove(job_id) {
                    token.cancel();
                }
                counter!("pdf_toolkit_batch_jobs_total", "status" => "cancelled").increment(1);
                info!(job_id = %job_id, "Batch job cancelled");
                self.broadcast(&job);
                true
            }
            _ => false,
        }
    }

    pub fn get_job(&self, job_id: &str) -> ServiceResult<BatchJob> {
        if let Some(job) = self.active.get(job_id) {
            return Ok(job.clone());
        }
        self.db
            .get_job(job_id)?
            .ok_or_else(|| ServiceError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Jobs newest first, optionally filtered by status
    pub fn list_jobs(&self, status: Option<JobStatus>) -> ServiceResult<Vec<BatchJob>> {
        let mut jobs = self.db.list_jobs()?;
        if let Some(status) = status {
            jobs.retain(|job| job.status == status);
        }
        jobs.reverse();
        Ok(jobs)
    }

    pub fn job_status(&self, job_id: &str) -> ServiceResult<JobProgress> {
        let job = self.get_job(job_id)?;
        Ok(JobProgress {
            progress: job.progress(),
            total_files: job.total_files(),
            processed_files: job.processed_files,
            failed_files: job.failed_files,
            estimated_completion: job.estimated_completion(self.workers_for(&job.options)),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            status: job.status,
            operation: job.operation,
            warnings: job.warnings,
            job_id: job.id,
        })
    }

    /// Recorded per-file outcomes in input order
    pub fn results(&self, job_id: &str) -> ServiceResult<Vec<FileOutcome>> {
        Ok(self.get_job(job_id)?.outcomes().cloned().collect())
    }

    pub fn statistics(&self, job_id: &str) -> ServiceResult<JobStatistics> {
        Ok(JobStatistics::from_job(&self.get_job(job_id)?))
    }

    pub fn report(&self, job_id: &str) -> ServiceResult<JobReport> {
        Ok(JobReport::from_job(&self.get_job(job_id)?))
    }

    /// Delete finished jobs that completed more than `max_age` ago
    pub fn cleanup(&self, max_age: Duration) -> ServiceResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| ServiceError::invalid(format!("Invalid cleanup age: {}", e)))?;
        let removed = self.db.delete_jobs_completed_before(Utc::now() - max_age)?;
        for job_id in &removed {
            self.active.remove(job_id);
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), "Cleaned up old batch jobs");
        }
        Ok(removed.len())
    }

    /// Start a new job over the files that failed in a completed job
    pub fn retry_failed(&self, job_id: &str) -> ServiceResult<BatchJob> {
        let job = self.get_job(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(ServiceError::invalid(
                "Only completed jobs can have failed files retried",
            ));
        }
        let failed = job.failed_file_ids();
        if failed.is_empty() {
            return Err(ServiceError::invalid("Job has no failed files to retry"));
        }

        info!(job_id = %job_id, files = failed.len(), "Retrying failed files");
        self.submit(
            job.operation,
            failed,
            job.parameters,
            job.options,
            Some(job.id),
        )
    }

    /// Store a job's operation, parameters and options under `name`
    pub fn save_configuration(&self, name: &str, job_id: &str) -> ServiceResult<BatchConfiguration> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::invalid("Configuration name cannot be empty"));
        }
        let job = self.get_job(job_id)?;
        let config = BatchConfiguration {
            name: name.to_string(),
            operation: job.operation,
            parameters: job.parameters,
            options: job.options,
            created_at: Utc::now(),
            source_job_id: Some(job.id),
        };
        self.db.save_batch_configuration(&config)?;
        info!(name = %config.name, job_id = %job_id, "Saved batch configuration");
        Ok(config)
    }

    pub fn load_configuration(&self, name: &str) -> ServiceResult<BatchConfiguration> {
        self.db
            .get_batch_configuration(name)?
            .ok_or_else(|| ServiceError::ConfigurationNotFound {
                name: name.to_string(),
            })
    }

    pub fn list_configurations(&self) -> ServiceResult<Vec<BatchConfiguration>> {
        self.db.list_batch_configurations()
    }

    pub fn create_from_configuration(
        &self,
        name: &str,
        file_ids: Vec<String>,
    ) -> ServiceResult<BatchJob> {
        let config = self.load_configuration(name)?;
        self.create_job(config.operation, file_ids, config.parameters, config.options)
    }

    /// Jobs waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_tx.max_capacity()
    }

    pub fn active_jobs(&self) -> usize {
        self.active
            .iter()
            .filter(|entry| entry.value().status == JobStatus::Running)
            .count()
    }

    fn register_token(&self, job_id: &str) {
        self.cancellation_tokens
            .insert(job_id.to_string(), CancellationToken::new());
    }

    /// Remove a job from the in-memory set once its dispatcher is done with it
    fn finish(&self, job_id: &str) {
        self.active.remove(job_id);
        self.cancellation_tokens.remove(job_id);
    }

    fn workers_for(&self, options: &BatchOptions) -> usize {
        let cap = self.runtime_config.dynamic().batch.max_workers_per_job.max(1);
        options.max_workers.unwrap_or(cap).clamp(1, cap)
    }

    /// Mutate an active job and persist the snapshot while the entry is held
    fn update_job<R>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut BatchJob) -> R,
    ) -> Option<(R, BatchJob)> {
        let mut entry = self.active.get_mut(job_id)?;
        let out = f(&mut entry);
        if let Err(e) = self.db.save_job(&entry) {
            error!(job_id = %job_id, error = %e, "Failed to persist batch job");
        }
        Some((out, entry.clone()))
    }

    fn broadcast(&self, job: &BatchJob) {
        self.ws_manager.broadcast_job_update(JobProgressUpdate {
            job_id: job.id.clone(),
            status: job.status.as_str().to_string(),
            progress: job.progress(),
            processed: job.processed_files,
            failed: job.failed_files,
            total: job.total_files(),
            estimated_completion: job.estimated_completion(self.workers_for(&job.options)),
        });
    }

    #[instrument(skip_all, fields(job_id = %job_id))]
    async fn run_job(&self, job_id: &str, executor: &dyn OperationExecutor) {
        let token = self
            .cancellation_tokens
            .get(job_id)
            .map(|t| t.clone())
            .unwrap_or_else(CancellationToken::new);

        let started = self.update_job(job_id, |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Running;
            if job.started_at.is_none() {
                job.started_at = Some(Utc::now());
            }
            true
        });
        let snapshot = match started {
            Some((true, job)) => job,
            Some((false, _)) => {
                debug!("Skipping job that was cancelled while queued");
                self.finish(job_id);
                return;
            }
            None => {
                warn!("Queued job is no longer tracked");
                return;
            }
        };
        self.broadcast(&snapshot);
        info!(operation = %snapshot.operation, files = snapshot.total_files(), "Batch job started");

        let batch = self.runtime_config.dynamic().batch.clone();
        let max_retries = snapshot
            .options
            .max_retries
            .unwrap_or(batch.max_retries)
            .min(MAX_RETRIES);
        let job_permits = Semaphore::new(self.workers_for(&snapshot.options));
        let stop = token.child_token();

        let mut tasks: FuturesUnordered<_> = snapshot
            .pending_indices()
            .into_iter()
            .map(|index| {
                let (snapshot, batch, job_permits, stop) = (&snapshot, &batch, &job_permits, &stop);
                async move {
                    let permits = tokio::select! {
                        biased;
                        _ = stop.cancelled() => None,
                        permits = async {
                            let job_permit = job_permits.acquire().await.ok()?;
                            let file_permit = self.file_permits.acquire().await.ok()?;
                            Some((job_permit, file_permit))
                        } => permits,
                    };
                    if permits.is_none() || stop.is_cancelled() {
                        return (index, None);
                    }
                    let outcome = self
                        .run_file(executor, snapshot, index, max_retries, batch, stop)
                        .await;
                    (index, Some(outcome))
                }
            })
            .collect();

        let mut aborted = false;
        while let Some((index, outcome)) = tasks.next().await {
            let Some(outcome) = outcome else { continue };
            let failed = !outcome.result.success;
            let file_id = outcome.file_id.clone();

            if let Some((_, job)) = self.update_job(job_id, |job| job.record(index, outcome)) {
                self.broadcast(&job);
            }
            if failed && !snapshot.options.continue_on_error && !stop.is_cancelled() {
                warn!(file_id = %file_id, "File failed, aborting remaining files");
                aborted = true;
                stop.cancel();
            }
        }
        drop(tasks);

        let finished = self.update_job(job_id, |job| {
            if job.status == JobStatus::Cancelled {
                return None;
            }
            if aborted {
                for index in job.pending_indices() {
                    let outcome = FileOutcome {
                        file_id: job.file_ids[index].clone(),
                        result: OperationResult::failure(format!("{} failed", job.operation), ABORTED),
                        attempts: 0,
                        duration_secs: 0.0,
                    };
                    job.record(index, outcome);
                }
                job.status = JobStatus::Failed;
            } else {
                job.status = JobStatus::Completed;
            }
            job.completed_at = Some(Utc::now());
            Some(job.status)
        });

        match finished {
            Some((Some(status), job)) => {
                counter!("pdf_toolkit_batch_jobs_total", "status" => status.as_str()).increment(1);
                info!(
                    status = status.as_str(),
                    processed = job.processed_files,
                    failed = job.failed_files,
                    "Batch job finished"
                );
                self.broadcast(&job);
            }
            _ => info!("Batch job stopped after cancellation"),
        }
        self.finish(job_id);
    }

    /// Run one file with timeout and transient-failure retries
    async fn run_file(
        &self,
        executor: &dyn OperationExecutor,
        job: &BatchJob,
        index: usize,
        max_retries: u32,
        batch: &BatchConfig,
        stop: &CancellationToken,
    ) -> FileOutcome {
        let file_id = &job.file_ids[index];
        let start = Instant::now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            let attempt = executor.execute(job.operation, &job.id, file_id, &job.parameters);
            let error = match tokio::time::timeout(batch.job_timeout(), attempt).await {
                Ok(Ok(result)) => break result,
                Ok(Err(e)) => e,
                Err(_) => ServiceError::Processing(ProcessingError::Timeout {
                    secs: batch.job_timeout_secs,
                }),
            };

            if attempts > max_retries || !is_transient(&error) || stop.is_cancelled() {
                warn!(file_id = %file_id, attempts, error = %error, "File failed");
                break OperationResult::from_error(job.operation, &error).timed(start);
            }

            let seed = format!("{}:{}", job.id, file_id);
            let delay = backoff_delay(attempts, batch.retry_base_delay(), batch.retry_max_delay(), &seed);
            debug!(file_id = %file_id, attempts, delay_ms = delay.as_millis() as u64, error = %error, "Retrying transient failure");
            tokio::select! {
                _ = stop.cancelled() => {
                    break OperationResult::from_error(job.operation, &error).timed(start);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        FileOutcome {
            file_id: file_id.clone(),
            result,
            attempts,
            duration_secs: start.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::websocket::ServerMessage;
    use futures::future::BoxFuture;
    use tempfile::TempDir;

    type Behavior = fn(&str, u32) -> ServiceResult<OperationResult>;

    struct FakeExecutor {
        calls: DashMap<String, u32>,
        behavior: Behavior,
        delay: Duration,
    }

    impl FakeExecutor {
        fn new(behavior: Behavior) -> Arc<Self> {
            Self::slow(behavior, Duration::from_millis(5))
        }

        fn slow(behavior: Behavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: DashMap::new(),
                behavior,
                delay,
            })
        }

        fn calls(&self, file_id: &str) -> u32 {
            self.calls.get(file_id).map(|c| *c).unwrap_or(0)
        }
    }

    impl OperationExecutor for FakeExecutor {
        fn execute<'a>(
            &'a self,
            _operation: Operation,
            _job_id: &'a str,
            file_id: &'a str,
            _parameters: &'a serde_json::Value,
        ) -> BoxFuture<'a, ServiceResult<OperationResult>> {
            Box::pin(async move {
                let attempt = {
                    let mut count = self.calls.entry(file_id.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };
                tokio::time::sleep(self.delay).await;
                (self.behavior)(file_id, attempt)
            })
        }
    }

    fn succeed(_: &str, _: u32) -> ServiceResult<OperationResult> {
        Ok(OperationResult::ok("done"))
    }

    fn fail_all(_: &str, _: u32) -> ServiceResult<OperationResult> {
        Ok(OperationResult::failure("operation failed", "bad document"))
    }

    struct Harness {
        _dir: TempDir,
        db: Arc<Database>,
        files: Arc<FileManager>,
        ws_manager: Arc<WebSocketManager>,
        scheduler: Arc<BatchScheduler>,
    }

    fn harness_with(tweak: impl FnOnce(&mut BatchConfig)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut dynamic = (**config.dynamic()).clone();
        tweak(&mut dynamic.batch);
        config.update_dynamic(dynamic);
        let config = Arc::new(config);

        let db = Arc::new(Database::open_in_memory().unwrap());
        let files = Arc::new(FileManager::new(Arc::clone(&db), Arc::clone(&config)).unwrap());
        let ws_manager = Arc::new(WebSocketManager::new());
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::clone(&db),
            config,
            Arc::clone(&files),
            Arc::clone(&ws_manager),
        ));
        Harness {
            _dir: dir,
            db,
            files,
            ws_manager,
            scheduler,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    impl Harness {
        fn upload(&self, count: usize) -> Vec<String> {
            (0..count)
                .map(|i| {
                    self.files
                        .save_upload(b"%PDF-1.4 test", &format!("doc{}.pdf", i))
                        .unwrap()
                        .id
                })
                .collect()
        }

        async fn wait_finished(&self, job_id: &str) -> BatchJob {
            for _ in 0..500 {
                if !self.scheduler.active.contains_key(job_id) {
                    return self.scheduler.get_job(job_id).unwrap();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("job {} did not finish", job_id);
        }
    }

    #[tokio::test]
    async fn test_job_runs_every_file_and_completes() {
        let h = harness();
        let executor = FakeExecutor::new(succeed);
        h.scheduler.start(executor.clone());
        let ids = h.upload(3);

        let job = h
            .scheduler
            .create_job(Operation::Compress, ids.clone(), serde_json::json!({}), BatchOptions::default())
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let job = h.wait_finished(&job.id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 3);
        assert_eq!(job.failed_files, 0);
        assert_eq!(job.progress(), 100.0);
        assert!(job.started_at.is_some() && job.completed_at.is_some());
        for id in &ids {
            assert_eq!(executor.calls(id), 1);
        }

        let results = h.scheduler.results(&job.id).unwrap();
        assert_eq!(
            results.iter().map(|o| o.file_id.clone()).collect::<Vec<_>>(),
            ids
        );
    }

    #[tokio::test]
    async fn test_unknown_files_are_dropped_with_warning() {
        let h = harness();
        h.scheduler.start(FakeExecutor::new(succeed));
        let mut ids = h.upload(2);
        ids.push("missing".to_string());

        let job = h
            .scheduler
            .create_job(Operation::Rotate, ids, serde_json::json!({}), BatchOptions::default())
            .unwrap();
        assert_eq!(job.total_files(), 2);
        assert_eq!(job.warnings, vec!["File not found, skipped: missing".to_string()]);

        let job = h.wait_finished(&job.id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 2);
    }

    #[tokio::test]
    async fn test_failed_document_counts_as_failed_file() {
        let h = harness();
        let executor = FakeExecutor::new(fail_all);
        h.scheduler.start(executor.clone());
        let ids = h.upload(2);

        let job = h
            .scheduler
            .create_job(Operation::Compress, ids.clone(), serde_json::json!({}), BatchOptions::default())
            .unwrap();
        let job = h.wait_finished(&job.id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.failed_files, 2);
        assert_eq!(executor.calls(&ids[0]), 1);
        assert_eq!(job.failed_file_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        fn flaky(_: &str, attempt: u32) -> ServiceResult<OperationResult> {
            if attempt < 3 {
                Err(ServiceError::Processing(ProcessingError::Io(std::io::Error::other(
                    "disk busy",
                ))))
            } else {
                Ok(OperationResult::ok("done"))
            }
        }
        let h = harness();
        let executor = FakeExecutor::new(flaky);
        h.scheduler.start(executor.clone());
        let ids = h.upload(1);

        let options = BatchOptions {
            max_retries: Some(2),
            ..Default::default()
        };
        let job = h
            .scheduler
            .create_job(Operation::ExtractText, ids.clone(), serde_json::json!({}), options)
            .unwrap();
        let job = h.wait_finished(&job.id).await;

        assert_eq!(job.processed_files, 1);
        assert_eq!(executor.calls(&ids[0]), 3);
        assert_eq!(job.results[0].as_ref().unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_timed_out_attempts_are_retried_then_fail() {
        let h = harness_with(|batch| batch.job_timeout_secs = 0);
        let executor = FakeExecutor::slow(succeed, Duration::from_millis(200));
        h.scheduler.start(executor.clone());
        let ids = h.upload(1);

        let options = BatchOptions {
            max_retries: Some(1),
            ..Default::default()
        };
        let job = h
            .scheduler
            .create_job(Operation::Compress, ids.clone(), serde_json::json!({}), options)
            .unwrap();
        let job = h.wait_finished(&job.id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_files, 0);
        assert_eq!(job.failed_files, 1);
        assert_eq!(executor.calls(&ids[0]), 2);

        let outcome = job.results[0].as_ref().unwrap();
        assert!(!outcome.result.success);
        assert_eq!(outcome.attempts, 2);
        assert!(
            outcome.result.errors[0].contains("timed out after 0s"),
            "{:?}",
            outcome.result.errors
        );
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        fn invalid(_: &str, _: u32) -> ServiceResult<OperationResult> {
            Err(ServiceError::Processing(ProcessingError::InvalidPassword))
        }
        let h = harness();
        let executor = FakeExecutor::new(invalid);
        h.scheduler.start(executor.clone());
        let ids = h.upload(1);

        let job = h
            .scheduler
            .create_job(Operation::RemovePassword, ids.clone(), serde_json::json!({}), BatchOptions::default())
            .unwrap();
        let job = h.wait_finished(&job.id).await;

        assert_eq!(executor.calls(&ids[0]), 1);
        let outcome = job.results[0].as_ref().unwrap();
        assert!(!outcome.result.success);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.errors[0].contains("Incorrect password"));
    }

    #[tokio::test]
    async fn test_first_failure_aborts_when_not_continuing() {
        let h = harness();
        let executor = FakeExecutor::new(fail_all);
        h.scheduler.start(executor.clone());
        let ids = h.upload(3);

        let options = BatchOptions {
            max_workers: Some(1),
            continue_on_error: false,
            ..Default::default()
        };
        let job = h
            .scheduler
            .create_job(Operation::Split, ids.clone(), serde_json::json!({}), options)
            .unwrap();
        let job = h.wait_finished(&job.id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_files, 3);
        assert_eq!(executor.calls(&ids[0]), 1);
        assert_eq!(executor.calls(&ids[2]), 0);
        let skipped = job.results[2].as_ref().unwrap();
        assert_eq!(skipped.result.errors, vec![ABORTED.to_string()]);
        assert_eq!(skipped.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_unstarted_files() {
        let h = harness();
        let executor = FakeExecutor::slow(succeed, Duration::from_millis(200));
        h.scheduler.start(executor.clone());
        let ids = h.upload(3);

        let options = BatchOptions {
            max_workers: Some(1),
            ..Default::default()
        };
        let job = h
            .scheduler
            .create_job(Operation::Compress, ids.clone(), serde_json::json!({}), options)
            .unwrap();

        for _ in 0..100 {
            if h.scheduler.get_job(&job.id).unwrap().status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.scheduler.cancel_job(&job.id));

        let job = h.wait_finished(&job.id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());
        assert!(job.processed_files <= 1);
        assert_eq!(executor.calls(&ids[2]), 0);
        assert!(!h.scheduler.cancel_job(&job.id));
        assert!(!h.scheduler.cancel_job("nope"));
    }

    #[tokio::test]
    async fn test_queue_full_rejects_without_persisting() {
        let h = harness_with(|batch| batch.queue_capacity = 1);
        let ids = h.upload(1);

        h.scheduler
            .create_job(Operation::Compress, ids.clone(), serde_json::json!({}), BatchOptions::default())
            .unwrap();
        let err = h
            .scheduler
            .create_job(Operation::Compress, ids, serde_json::json!({}), BatchOptions::default())
            .unwrap_err();

        assert!(matches!(err, ServiceError::QueueFull { capacity: 1 }));
        assert_eq!(h.scheduler.queue_depth(), 1);
        assert_eq!(h.scheduler.list_jobs(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_job_validation() {
        let h = harness();
        let ids = h.upload(1);

        assert!(matches!(
            h.scheduler.create_job(Operation::Merge, ids.clone(), serde_json::json!({}), BatchOptions::default()),
            Err(ServiceError::InvalidRequest { .. })
        ));
        assert!(matches!(
            h.scheduler.create_job(Operation::Compress, vec![], serde_json::json!({}), BatchOptions::default()),
            Err(ServiceError::InvalidRequest { .. })
        ));
        assert!(matches!(
            h.scheduler.create_job(Operation::Compress, vec!["ghost".into()], serde_json::json!({}), BatchOptions::default()),
            Err(ServiceError::InvalidRequest { .. })
        ));
        let greedy = BatchOptions {
            max_retries: Some(1_000),
            ..Default::default()
        };
        assert!(matches!(
            h.scheduler.create_job(Operation::Compress, ids, serde_json::json!({}), greedy),
            Err(ServiceError::InvalidRequest { .. })
        ));
        assert!(h.scheduler.list_jobs(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_reruns_only_unfinished_files() {
        let h = harness();
        let ids = h.upload(2);

        let mut job = BatchJob::new(Operation::Compress, ids.clone(), serde_json::json!({}), BatchOptions::default());
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.record(
            0,
            FileOutcome {
                file_id: ids[0].clone(),
                result: OperationResult::ok("done"),
                attempts: 1,
                duration_secs: 0.1,
            },
        );
        h.db.save_job(&job).unwrap();

        let executor = FakeExecutor::new(succeed);
        h.scheduler.start(executor.clone());
        assert_eq!(h.scheduler.restore().await.unwrap(), 1);

        let restored = h.wait_finished(&job.id).await;
        assert_eq!(restored.status, JobStatus::Completed);
        assert_eq!(restored.processed_files, 2);
        assert_eq!(executor.calls(&ids[0]), 0);
        assert_eq!(executor.calls(&ids[1]), 1);
    }

    #[tokio::test]
    async fn test_retry_failed_and_configurations() {
        let h = harness();
        h.scheduler.start(FakeExecutor::new(fail_all));
        let ids = h.upload(2);

        let params = serde_json::json!({"language": "eng"});
        let job = h
            .scheduler
            .create_job(Operation::Ocr, ids.clone(), params.clone(), BatchOptions::default())
            .unwrap();
        let job = h.wait_finished(&job.id).await;

        let retry = h.scheduler.retry_failed(&job.id).unwrap();
        assert_eq!(retry.source_job_id.as_deref(), Some(job.id.as_str()));
        assert_eq!(retry.file_ids, ids);
        assert_eq!(retry.parameters, params);
        let retry = h.wait_finished(&retry.id).await;

        let config = h.scheduler.save_configuration("nightly-ocr", &job.id).unwrap();
        assert_eq!(config.operation, Operation::Ocr);
        assert_eq!(h.scheduler.list_configurations().unwrap().len(), 1);
        assert_eq!(h.scheduler.load_configuration("nightly-ocr").unwrap().parameters, params);
        assert!(matches!(
            h.scheduler.load_configuration("missing"),
            Err(ServiceError::ConfigurationNotFound { .. })
        ));

        let from_config = h
            .scheduler
            .create_from_configuration("nightly-ocr", vec![ids[0].clone()])
            .unwrap();
        assert_eq!(from_config.operation, Operation::Ocr);
        h.wait_finished(&from_config.id).await;

        assert_eq!(h.scheduler.list_jobs(None).unwrap().len(), 3);
        assert_eq!(h.scheduler.statistics(&retry.id).unwrap().failed_operations, 2);
        assert!(h.scheduler.cleanup(Duration::ZERO).unwrap() >= 3);
        assert!(matches!(
            h.scheduler.get_job(&job.id),
            Err(ServiceError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_failed_requires_failures() {
        let h = harness();
        h.scheduler.start(FakeExecutor::new(succeed));
        let ids = h.upload(1);
        let job = h
            .scheduler
            .create_job(Operation::Compress, ids, serde_json::json!({}), BatchOptions::default())
            .unwrap();
        let job = h.wait_finished(&job.id).await;

        assert!(matches!(
            h.scheduler.retry_failed(&job.id),
            Err(ServiceError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_progress_is_broadcast_to_subscribers() {
        let h = harness();
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.ws_manager
            .add_connection("ws".to_string(), "admin".to_string(), tx);
        h.ws_manager.subscribe("ws", None);
        h.scheduler.start(FakeExecutor::new(succeed));
        let ids = h.upload(2);

        let job = h
            .scheduler
            .create_job(Operation::Compress, ids, serde_json::json!({}), BatchOptions::default())
            .unwrap();
        h.wait_finished(&job.id).await;

        let mut last = None;
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::JobProgress { status, progress, .. } = msg {
                last = Some((status, progress));
            }
        }
        assert_eq!(last, Some(("completed".to_string(), 100.0)));
    }
}

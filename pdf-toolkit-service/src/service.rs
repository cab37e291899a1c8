mod params;

pub use params::{MAX_COMPRESSION_LEVEL, MIN_COMPRESSION_LEVEL};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::ai::{AiService, ChatSession};
use crate::auth::AuthService;
use crate::batch::{BatchScheduler, OperationExecutor};
use crate::cache::ConversionCache;
use crate::config::{DynamicConfig, RuntimeConfig};
use crate::convert;
use crate::db::Database;
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::files::{FileManager, WorkDir, sanitize_filename};
use crate::hash::{cache_key, content_cache_key};
use crate::ocr::OcrProcessor;
use crate::ollama::OllamaClient;
use crate::operation::{Operation, OperationResult};
use crate::pdf::optimize::{self, SizeAnalysis};
use crate::pdf::watermark::{Position, Watermark};
use crate::pdf::{self, PdfInfo, extract, pages, security, tables};
use crate::websocket::WebSocketManager;
use params::*;

/// Levels compared when a request names none
const DEFAULT_COMPARISON_LEVELS: [u8; 5] = [1, 3, 5, 7, 9];

/// Run CPU-bound PDF work off the async executor
async fn blocking<T, F>(task: F) -> ServiceResult<T>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ServiceError::internal(format!("Processing task failed: {}", e)))?
}

/// `name` sanitized and forced to a `.pdf` extension
fn pdf_file_name(name: &str) -> String {
    let name = sanitize_filename(name);
    if name.to_ascii_lowercase().ends_with(".pdf") {
        name
    } else {
        format!("{}.pdf", name)
    }
}

async fn merge(inputs: &[PathBuf], parameters: &Value, dir: PathBuf) -> ServiceResult<OperationResult> {
    let params: MergeParams = parse(Operation::Merge, parameters)?;
    if inputs.len() < 2 {
        return Err(ServiceError::invalid("Merge needs at least 2 files"));
    }
    let output = dir.join(
        params
            .output_filename
            .as_deref()
            .map(pdf_file_name)
            .unwrap_or_else(|| "merged.pdf".to_string()),
    );
    let sources = inputs.to_vec();
    blocking(move || {
        let page_count = pages::merge(&sources, &output)?;
        Ok(OperationResult::ok(format!("Merged {} files", sources.len()))
            .with_output(&output)
            .with_data(json!({ "files": sources.len(), "pages": page_count })))
    })
    .await
}

fn single_input(operation: Operation, inputs: &[PathBuf]) -> ServiceResult<PathBuf> {
    match inputs {
        [input] => Ok(input.clone()),
        _ => Err(ServiceError::invalid(format!(
            "{} takes exactly one file, got {}",
            operation,
            inputs.len()
        ))),
    }
}

/// Cache key over input files, hashed off the async executor
async fn file_cache_key(inputs: &[PathBuf], operation: &str, parameters: Value) -> ServiceResult<String> {
    let hashed = inputs.to_vec();
    let operation = operation.to_string();
    blocking(move || {
        let refs: Vec<&Path> = hashed.iter().map(PathBuf::as_path).collect();
        cache_key(&refs, &operation, &parameters).map_err(|e| ServiceError::from(ProcessingError::Io(e)))
    })
    .await
}

/// Counts removed by one cleanup pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanupReport {
    pub jobs: usize,
    pub cache_entries: usize,
    pub tokens: usize,
    pub chat_sessions: usize,
    pub output_files: usize,
    pub work_dirs: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.jobs
            + self.cache_entries
            + self.tokens
            + self.chat_sessions
            + self.output_files
            + self.work_dirs
    }
}

/// Main service coordinator
pub struct PdfToolkitService {
    pub runtime_config: Arc<RuntimeConfig>,
    pub db: Arc<Database>,
    pub files: Arc<FileManager>,
    pub cache: Arc<ConversionCache>,
    pub ollama: Arc<OllamaClient>,
    pub ocr: OcrProcessor,
    pub ai: AiService,
    pub auth: Arc<AuthService>,
    pub ws_manager: Arc<WebSocketManager>,
    pub scheduler: Arc<BatchScheduler>,
}

impl PdfToolkitService {
    /// Accepts a pre-opened database so that RuntimeConfig can load settings from it
    pub async fn new(db: Arc<Database>, runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        info!("Initializing PDF toolkit service");
        let static_config = &runtime_config.static_config;

        let files = Arc::new(FileManager::new(db.clone(), runtime_config.clone())?);
        let cache = Arc::new(ConversionCache::new(db.clone(), runtime_config.clone())?);

        let ollama = Arc::new(OllamaClient::new(runtime_config.clone())?);
        let ollama_url = runtime_config.dynamic().ollama.base_url.clone();
        if !ollama.is_enabled() {
            info!("Ollama disabled, AI features use offline heuristics");
        } else if ollama.health_check().await {
            info!(url = %ollama_url, "Ollama is available");
        } else {
            warn!(url = %ollama_url, "Ollama is not available, falling back to heuristics");
        }

        let ocr = OcrProcessor::new(runtime_config.clone(), ollama.clone());
        match ocr.backend() {
            Some(backend) => info!(backend = backend.as_str(), "OCR backend selected"),
            None => warn!("No OCR backend available"),
        }
        let ai = AiService::new(ollama.clone());

        let auth = Arc::new(AuthService::new(db.clone(), static_config.auth.token_ttl()));
        let seeded = auth.seed_users(&static_config.auth.users)?;
        if seeded > 0 {
            info!(count = seeded, "Seeded users from configuration");
        }

        let ws_manager = Arc::new(WebSocketManager::new());
        let scheduler = Arc::new(BatchScheduler::new(
            db.clone(),
            runtime_config.clone(),
            files.clone(),
            ws_manager.clone(),
        ));

        Ok(Self {
            runtime_config,
            db,
            files,
            cache,
            ollama,
            ocr,
            ai,
            auth,
            ws_manager,
            scheduler,
        })
    }

    /// Spawn the batch dispatchers and re-queue persisted jobs
    pub async fn start_batch(self: &Arc<Self>) -> ServiceResult<usize> {
        self.scheduler.start(self.clone());
        self.scheduler.restore().await
    }

    /// Update settings and hot-reload the dynamic configuration
    pub async fn update_settings(&self, updates: HashMap<String, Value>) -> ServiceResult<()> {
        let valid = DynamicConfig::valid_keys();
        let mut unknown: Vec<&str> = updates
            .keys()
            .map(String::as_str)
            .filter(|key| !valid.contains(*key))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(ServiceError::invalid(format!(
                "Unknown setting keys: {}",
                unknown.join(", ")
            )));
        }

        let keys = updates.len();
        self.db.set_settings(updates)?;
        self.runtime_config.reload_from_db(&self.db)?;
        info!(keys, "Settings updated");
        Ok(())
    }

    /// One pass over everything that expires
    pub fn cleanup(&self) -> ServiceResult<CleanupReport> {
        let dynamic = self.runtime_config.dynamic();
        let max_age = dynamic.batch.cleanup_max_age();

        let report = CleanupReport {
            jobs: self.scheduler.cleanup(max_age)?,
            cache_entries: self.cache.purge_expired()?,
            tokens: self.auth.purge_expired(),
            chat_sessions: self
                .ai
                .purge_sessions(Duration::from_secs(dynamic.cache.ttl_secs)),
            output_files: self.files.cleanup_older_than(max_age)?,
            work_dirs: self.files.sweep_work_dirs(max_age)?,
        };
        debug!(?report, "Cleanup pass finished");
        Ok(report)
    }

    /// Register outputs and record metrics for a finished call. The work dir
    /// is kept only when registered outputs live in it.
    fn finish(
        &self,
        label: &str,
        start: Instant,
        source_job_id: Option<&str>,
        work_dir: Option<WorkDir>,
        outcome: ServiceResult<OperationResult>,
    ) -> ServiceResult<OperationResult> {
        let outcome = outcome.and_then(|result| self.files.register_result(result, source_job_id));
        if let Some(dir) = work_dir {
            dir.settle(&outcome);
        }
        let status = match &outcome {
            Ok(result) if result.success => "success",
            Ok(_) => "failure",
            Err(_) => "error",
        };
        counter!("pdf_toolkit_operations_total", "operation" => label.to_string(), "outcome" => status)
            .increment(1);
        histogram!("pdf_toolkit_operation_seconds", "operation" => label.to_string())
            .record(start.elapsed().as_secs_f64());

        outcome.map(|result| result.timed(start))
    }

    /// Run a named operation over uploaded files. Outputs come back as file ids.
    #[instrument(skip_all, fields(operation = %operation, inputs = file_ids.len()))]
    pub async fn run_operation(
        &self,
        operation: Operation,
        file_ids: &[String],
        parameters: &Value,
        source_job_id: Option<&str>,
    ) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let inputs = file_ids
            .iter()
            .map(|id| self.files.path(id))
            .collect::<ServiceResult<Vec<_>>>()?;
        if operation != Operation::Merge {
            single_input(operation, &inputs)?;
        }

        let work_dir = self.files.work_dir()?;
        let outcome = if operation.is_cacheable() {
            self.cached(operation, &inputs, parameters, work_dir.path()).await
        } else {
            self.compute(operation, &inputs, parameters, work_dir.path()).await
        };

        self.finish(operation.as_ref(), start, source_job_id, Some(work_dir), outcome)
    }

    async fn cached(
        &self,
        operation: Operation,
        inputs: &[PathBuf],
        parameters: &Value,
        work_dir: &Path,
    ) -> ServiceResult<OperationResult> {
        let key = file_cache_key(inputs, operation.as_ref(), parameters.clone()).await?;

        self.cache
            .get_or_compute(&key, operation.as_ref(), work_dir, || {
                self.compute(operation, inputs, parameters, work_dir)
            })
            .await
    }

    async fn compute(
        &self,
        operation: Operation,
        inputs: &[PathBuf],
        parameters: &Value,
        work_dir: &Path,
    ) -> ServiceResult<OperationResult> {
        let dir = work_dir.to_path_buf();
        let input = match operation {
            Operation::Merge => return merge(inputs, parameters, dir).await,
            _ => single_input(operation, inputs)?,
        };
        let name = pdf::stem(&input);
        match operation {
            Operation::Merge => Err(ServiceError::internal("merge dispatched as a single-file operation")),
            Operation::Split => {
                let params: SplitParams = parse(operation, parameters)?;
                blocking(move || {
                    let outputs = pages::split(&input, &params.page_ranges, &dir)?;
                    Ok(OperationResult::ok(format!("Split into {} files", outputs.len()))
                        .with_outputs(&outputs)
                        .with_data(json!({ "files": outputs.len() })))
                })
                .await
            }
            Operation::Rotate => {
                let params: RotateParams = parse(operation, parameters)?;
                let output = dir.join(format!("{}_rotated.pdf", name));
                blocking(move || {
                    pages::rotate(&input, &params.page_rotations, &output)?;
                    Ok(OperationResult::ok(format!(
                        "Rotated {} pages",
                        params.page_rotations.len()
                    ))
                    .with_output(&output))
                })
                .await
            }
            Operation::ExtractPages => {
                let params: ExtractPagesParams = parse(operation, parameters)?;
                let output = dir.join(format!("{}_extracted_pages.pdf", name));
                blocking(move || {
                    let kept = pages::extract_pages(&input, &params.pages, &output)?;
                    Ok(OperationResult::ok(format!("Extracted {} pages", kept.len()))
                        .with_output(&output)
                        .with_data(json!({ "pages": kept })))
                })
                .await
            }
            Operation::ReorderPages => {
                let params: ReorderParams = parse(operation, parameters)?;
                let output = dir.join(format!("{}_reordered.pdf", name));
                blocking(move || {
                    pages::reorder_pages(&input, &params.page_order, &output)?;
                    Ok(OperationResult::ok("Pages reordered")
                        .with_output(&output)
                        .with_data(json!({ "page_order": params.page_order })))
                })
                .await
            }
            Operation::ExtractText => {
                let params: TextParams = parse(operation, parameters)?;
                blocking(move || extract::extract_text(&input, params.preserve_layout, &dir)).await
            }
            Operation::ExtractImages => {
                let params: FormatParams = parse(operation, parameters)?;
                blocking(move || extract::extract_images(&input, params.format_or("png"), &dir)).await
            }
            Operation::ExtractTables => {
                let params: FormatParams = parse(operation, parameters)?;
                blocking(move || tables::extract_tables(&input, params.format_or("csv"), &dir)).await
            }
            Operation::ExtractMetadata => {
                blocking(move || extract::extract_metadata(&input, &dir)).await
            }
            Operation::ExtractLinks => blocking(move || extract::extract_links(&input, &dir)).await,
            Operation::Ocr => {
                let params: OcrParams = parse(operation, parameters)?;
                let dpi = params.dpi_or(self.runtime_config.dynamic().rendering.default_dpi)?;
                self.ocr
                    .ocr(&input, params.language.as_deref(), dpi, &dir)
                    .await
            }
            Operation::ConvertToImages => {
                let params: ToImagesParams = parse(operation, parameters)?;
                let dpi = params.validated_dpi()?;
                blocking(move || {
                    convert::pdf_to_images(&input, &dir, &params.output_format, dpi, params.quality)
                })
                .await
            }
            Operation::ConvertToText => blocking(move || convert::pdf_to_text(&input, &dir)).await,
            Operation::ConvertToHtml => blocking(move || convert::pdf_to_html(&input, &dir)).await,
            Operation::ConvertToMarkdown => {
                blocking(move || convert::pdf_to_markdown(&input, &dir)).await
            }
            Operation::AddPassword => {
                let params: AddPasswordParams = parse(operation, parameters)?;
                let permissions = params
                    .permissions
                    .as_ref()
                    .map(security::Permissions::from_map)
                    .transpose()?;
                let output = dir.join(format!("{}_protected.pdf", name));
                blocking(move || {
                    security::add_password(
                        &input,
                        &output,
                        &params.user_password,
                        params.owner_password.as_deref(),
                        permissions.as_ref(),
                    )
                })
                .await
            }
            Operation::RemovePassword => {
                let params: RemovePasswordParams = parse(operation, parameters)?;
                let output = dir.join(format!("{}_unlocked.pdf", name));
                blocking(move || security::remove_password(&input, &output, &params.password)).await
            }
            Operation::SetPermissions => {
                let params: PermissionsParams = parse(operation, parameters)?;
                let permissions = security::Permissions::from_map(&params.permissions)?;
                let output = dir.join(format!("{}_permissions.pdf", name));
                blocking(move || {
                    security::set_permissions(
                        &input,
                        &output,
                        &permissions,
                        params.owner_password.as_deref(),
                    )
                })
                .await
            }
            Operation::AddWatermark => {
                let params: WatermarkParams = parse(operation, parameters)?;
                let image = params
                    .watermark_image_id
                    .as_deref()
                    .map(|id| self.files.path(id))
                    .transpose()?;
                let watermark = Watermark::new(
                    params.watermark_text,
                    image,
                    Position::parse(&params.position)?,
                    params.opacity,
                )?;
                let output = dir.join(format!("{}_watermarked.pdf", name));
                blocking(move || pdf::watermark::add_watermark(&input, &output, &watermark)).await
            }
            Operation::Compress => {
                let params: CompressParams = parse(operation, parameters)?;
                params.validate()?;
                blocking(move || {
                    optimize::compress(
                        &input,
                        &dir,
                        params.compression_level,
                        params.optimize_images,
                        Some(params.image_quality),
                    )
                })
                .await
            }
            Operation::OptimizeWeb => blocking(move || optimize::optimize_for_web(&input, &dir)).await,
            Operation::Summarize => {
                let params: SummarizeParams = parse(operation, parameters)?;
                params.validate()?;
                self.ai.summarize(&input, params.summary_length, &dir).await
            }
            Operation::Analyze => self.ai.analyze(&input, &dir).await,
            Operation::Classify => self.ai.classify(&input, &dir).await,
        }
    }

    pub async fn pdf_info(&self, file_id: &str) -> ServiceResult<PdfInfo> {
        let input = self.files.path(file_id)?;
        blocking(move || pdf::info(&input)).await
    }

    pub async fn security_info(&self, file_id: &str, password: Option<String>) -> ServiceResult<Value> {
        let input = self.files.path(file_id)?;
        blocking(move || security::security_info(&input, password.as_deref())).await
    }

    pub async fn size_analysis(&self, file_id: &str) -> ServiceResult<SizeAnalysis> {
        let input = self.files.path(file_id)?;
        blocking(move || optimize::analyze(&input)).await
    }

    pub async fn compression_preview(&self, file_id: &str, level: u8) -> ServiceResult<Value> {
        optimize::validate_level(level)?;
        let input = self.files.path(file_id)?;
        blocking(move || optimize::preview(&input, level)).await
    }

    pub async fn compression_comparison(
        &self,
        file_id: &str,
        levels: Option<Vec<u8>>,
    ) -> ServiceResult<Value> {
        let levels = levels
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_COMPARISON_LEVELS.to_vec());
        let input = self.files.path(file_id)?;
        blocking(move || optimize::comparison(&input, &levels)).await
    }

    /// One page per image, in the given order
    pub async fn images_to_pdf(
        &self,
        file_ids: &[String],
        output_filename: Option<&str>,
    ) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        if file_ids.is_empty() {
            return Err(ServiceError::invalid("At least one image is required"));
        }
        let inputs = file_ids
            .iter()
            .map(|id| self.files.path(id))
            .collect::<ServiceResult<Vec<_>>>()?;
        let file_name = output_filename
            .map(pdf_file_name)
            .unwrap_or_else(|| "images.pdf".to_string());
        let key = file_cache_key(&inputs, "images_to_pdf", json!({ "output_filename": file_name })).await?;

        let dir = self.files.work_dir()?;
        let output = dir.join(&file_name);
        let outcome = self
            .cache
            .get_or_compute(&key, "images_to_pdf", dir.path(), || {
                blocking(move || convert::images_to_pdf(&inputs, &output))
            })
            .await;
        self.finish("images_to_pdf", start, None, Some(dir), outcome)
    }

    pub async fn html_to_pdf(&self, html: &str) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let key = content_cache_key(html.as_bytes(), "html_to_pdf", &json!({}));
        let dir = self.files.work_dir()?;
        let output = dir.join("document.pdf");
        let chrome_path = self.runtime_config.dynamic().rendering.chrome_path.clone();
        let outcome = self
            .cache
            .get_or_compute(&key, "html_to_pdf", dir.path(), || {
                convert::html_to_pdf(html, chrome_path.as_deref(), &output)
            })
            .await;
        self.finish("html_to_pdf", start, None, Some(dir), outcome)
    }

    /// Printed through Chromium; falls back to a plain-text PDF of the source
    /// when no browser can be launched. Only browser output is cached.
    pub async fn markdown_to_pdf(&self, markdown: &str) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let key = content_cache_key(markdown.as_bytes(), "markdown_to_pdf", &json!({}));
        let dir = self.files.work_dir()?;
        let output = dir.join("document.pdf");
        let chrome_path = self.runtime_config.dynamic().rendering.chrome_path.clone();

        let rendered = self
            .cache
            .get_or_compute(&key, "markdown_to_pdf", dir.path(), || {
                convert::markdown_to_pdf(markdown, chrome_path.as_deref(), &output)
            })
            .await;
        let outcome = match rendered {
            Err(ServiceError::Processing(e)) => {
                warn!(error = %e, "Browser rendering failed, writing plain text PDF");
                let text = markdown.to_string();
                let title = markdown
                    .lines()
                    .find_map(|l| l.strip_prefix("# "))
                    .unwrap_or("Document")
                    .to_string();
                blocking(move || convert::text_to_pdf(&text, &title, &output))
                    .await
                    .map(|result| {
                        result.with_warning(format!(
                            "Rendered as plain text, browser unavailable: {}",
                            e
                        ))
                    })
            }
            other => other,
        };
        self.finish("markdown_to_pdf", start, None, Some(dir), outcome)
    }

    pub async fn to_office(&self, file_id: &str, target_format: &str) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let input = self.files.path(file_id)?;
        self.finish("to_office", start, None, None, convert::to_office(&input, target_format))
    }

    pub async fn convert_image(&self, file_id: &str, format: &str) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let input = self.files.path(file_id)?;
        let format = format.to_ascii_lowercase();
        let key = file_cache_key(
            std::slice::from_ref(&input),
            "convert_image",
            json!({ "format": format }),
        )
        .await?;

        let dir = self.files.work_dir()?;
        let target = dir.path().to_path_buf();
        let outcome = self
            .cache
            .get_or_compute(&key, "convert_image", dir.path(), || {
                blocking(move || convert::convert_image(&input, &format, &target))
            })
            .await;
        self.finish("convert_image", start, None, Some(dir), outcome)
    }

    pub async fn answer_question(&self, file_id: &str, question: &str) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let input = self.files.path(file_id)?;
        let dir = self.files.work_dir()?;
        let outcome = self.ai.answer_question(&input, question, dir.path()).await;
        self.finish("question", start, None, Some(dir), outcome)
    }

    pub async fn translate(
        &self,
        file_id: &str,
        target_language: &str,
        preserve_formatting: bool,
    ) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let input = self.files.path(file_id)?;
        let dir = self.files.work_dir()?;
        let outcome = self
            .ai
            .translate(&input, target_language, preserve_formatting, dir.path())
            .await;
        self.finish("translate", start, None, Some(dir), outcome)
    }

    pub async fn start_chat(&self, file_id: &str) -> ServiceResult<ChatSession> {
        let input = self.files.path(file_id)?;
        let session = self.ai.start_chat(file_id, &input).await?;
        info!(session_id = %session.id, file_id = %file_id, "Chat session started");
        Ok(session)
    }

    pub async fn chat(&self, session_id: &str, message: &str) -> ServiceResult<OperationResult> {
        let start = Instant::now();
        let outcome = self.ai.chat(session_id, message).await;
        self.finish("chat", start, None, None, outcome)
    }
}

impl OperationExecutor for PdfToolkitService {
    fn execute<'a>(
        &'a self,
        operation: Operation,
        job_id: &'a str,
        file_id: &'a str,
        parameters: &'a Value,
    ) -> BoxFuture<'a, ServiceResult<OperationResult>> {
        Box::pin(async move {
            let file_ids = [file_id.to_string()];
            self.run_operation(operation, &file_ids, parameters, Some(job_id))
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchJob, BatchOptions, JobStatus};
    use crate::config::test_config;
    use crate::db::FileKind;
    use crate::pdf::testing::{sample_pdf, write_pdf};
    use tempfile::TempDir;

    async fn service() -> (TempDir, Arc<PdfToolkitService>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let runtime_config = Arc::new(test_config(dir.path()));
        let service = PdfToolkitService::new(db, runtime_config).await.unwrap();
        (dir, Arc::new(service))
    }

    fn upload(service: &PdfToolkitService, dir: &Path, name: &str, pages: usize) -> String {
        let path = sample_pdf(dir, name, pages);
        let bytes = std::fs::read(path).unwrap();
        service.files.save_upload(&bytes, name).unwrap().id
    }

    #[tokio::test]
    async fn test_default_users_are_seeded() {
        let (_dir, service) = service().await;
        let users = service.auth.list_users().unwrap();
        assert!(users.iter().any(|u| u.username == "admin" && u.has_scope("admin")));
        assert!(service.auth.issue_token("user", "userpassword", None).is_ok());
    }

    #[tokio::test]
    async fn test_rotate_registers_output() {
        let (dir, service) = service().await;
        let id = upload(&service, dir.path(), "doc.pdf", 2);

        let result = service
            .run_operation(
                Operation::Rotate,
                &[id],
                &json!({"page_rotations": {"1": 90}}),
                None,
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output_files.len(), 1);
        let record = service.files.get(&result.output_files[0]).unwrap();
        assert_eq!(record.kind, FileKind::Output);
        assert!(record.original_name.ends_with("_rotated.pdf"));
        assert_eq!(pdf::info(&record.path).unwrap().pages[0].rotation, 90);
        assert!(result.execution_time > 0.0);
    }

    #[tokio::test]
    async fn test_split_and_merge() {
        let (dir, service) = service().await;
        let id = upload(&service, dir.path(), "doc.pdf", 4);

        let split = service
            .run_operation(
                Operation::Split,
                &[id.clone()],
                &json!({"page_ranges": [[1, 1], [2, 4]]}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(split.output_files.len(), 2);

        let merged = service
            .run_operation(
                Operation::Merge,
                &split.output_files,
                &json!({"output_filename": "joined"}),
                None,
            )
            .await
            .unwrap();
        let record = service.files.get(&merged.output_files[0]).unwrap();
        assert_eq!(record.original_name, "joined.pdf");
        assert_eq!(pdf::page_count(&record.path).unwrap(), 4);

        let err = service
            .run_operation(Operation::Merge, &[id], &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_single_file_operations_reject_many_inputs() {
        let (dir, service) = service().await;
        let a = upload(&service, dir.path(), "a.pdf", 1);
        let b = upload(&service, dir.path(), "b.pdf", 1);
        let err = service
            .run_operation(Operation::ExtractText, &[a, b], &json!({}), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exactly one file"));
    }

    #[tokio::test]
    async fn test_unknown_file_and_bad_parameters() {
        let (dir, service) = service().await;
        let err = service
            .run_operation(Operation::ExtractText, &["missing".into()], &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::FileNotFound { .. }));

        let id = upload(&service, dir.path(), "doc.pdf", 1);
        let err = service
            .run_operation(Operation::Compress, &[id.clone()], &json!({"compression_level": 9}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));

        let err = service
            .run_operation(Operation::Rotate, &[id], &json!({"page_rotations": {"1": 45}}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_cacheable_operation_is_served_from_cache() {
        let (dir, service) = service().await;
        let path = write_pdf(dir.path(), "text.pdf", &[vec!["Hello cached world"]]);
        let id = service
            .files
            .save_upload(&std::fs::read(path).unwrap(), "text.pdf")
            .unwrap()
            .id;

        let first = service
            .run_operation(Operation::ExtractText, &[id.clone()], &json!({}), None)
            .await
            .unwrap();
        let second = service
            .run_operation(Operation::ExtractText, &[id], &json!({}), None)
            .await
            .unwrap();

        assert!(first.data.as_ref().and_then(|d| d.get("cached")).is_none());
        assert_eq!(second.data.as_ref().unwrap()["cached"], json!(true));
        assert_ne!(first.output_files, second.output_files);

        let a = std::fs::read_to_string(service.files.path(&first.output_files[0]).unwrap()).unwrap();
        let b = std::fs::read_to_string(service.files.path(&second.output_files[0]).unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(service.cache.stats().unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_batch_job_runs_through_service() {
        let (dir, service) = service().await;
        let ids = vec![
            upload(&service, dir.path(), "a.pdf", 2),
            upload(&service, dir.path(), "b.pdf", 3),
        ];
        service.start_batch().await.unwrap();

        let job = service
            .scheduler
            .create_job(
                Operation::Rotate,
                ids,
                json!({"page_rotations": {"1": 180}}),
                BatchOptions::default(),
            )
            .unwrap();

        let mut finished = None;
        for _ in 0..200 {
            let current = service.scheduler.get_job(&job.id).unwrap();
            if current.status.is_terminal() {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let finished = finished.expect("job finished");
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.processed_files, 2);

        for outcome in finished.outcomes() {
            let record = service.files.get(&outcome.result.output_files[0]).unwrap();
            assert_eq!(record.source_job_id.as_deref(), Some(job.id.as_str()));
        }
        service.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_info_and_compression_estimates() {
        let (dir, service) = service().await;
        let id = upload(&service, dir.path(), "doc.pdf", 3);

        assert_eq!(service.pdf_info(&id).await.unwrap().page_count, 3);
        assert_eq!(service.size_analysis(&id).await.unwrap().page_count, 3);
        assert!(service.compression_preview(&id, 0).await.is_err());

        let preview = service.compression_preview(&id, 5).await.unwrap();
        assert_eq!(preview["compression_level"], json!(5));

        let comparison = service.compression_comparison(&id, None).await.unwrap();
        assert_eq!(comparison["comparisons"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_to_office_reports_failure_result() {
        let (dir, service) = service().await;
        let id = upload(&service, dir.path(), "doc.pdf", 1);
        let result = service.to_office(&id, "docx").await.unwrap();
        assert!(!result.success);
        assert!(result.output_files.is_empty());
        assert!(service.to_office(&id, "odt").await.is_err());
    }

    #[tokio::test]
    async fn test_chat_session_round_trip() {
        let (dir, service) = service().await;
        let path = write_pdf(dir.path(), "chat.pdf", &[vec!["Invoices are due within thirty days."]]);
        let id = service
            .files
            .save_upload(&std::fs::read(path).unwrap(), "chat.pdf")
            .unwrap()
            .id;

        let session = service.start_chat(&id).await.unwrap();
        let reply = service.chat(&session.id, "hello").await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.data.as_ref().unwrap()["engine"], json!("heuristic"));
        assert!(matches!(
            service.chat("nope", "hello").await,
            Err(ServiceError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_settings_rejects_unknown_keys() {
        let (_dir, service) = service().await;
        let mut updates = HashMap::new();
        updates.insert("not.a.key".to_string(), json!(1));
        let err = service.update_settings(updates).await.unwrap_err();
        assert!(err.to_string().contains("not.a.key"));
    }

    fn output_entries(service: &PdfToolkitService) -> usize {
        std::fs::read_dir(service.files.output_dir()).unwrap().count()
    }

    #[tokio::test]
    async fn test_failed_operations_leave_no_work_dirs() {
        let (dir, service) = service().await;
        let id = upload(&service, dir.path(), "doc.pdf", 2);

        let rotate = service
            .run_operation(Operation::Rotate, &[id.clone()], &json!({"page_rotations": {"1": 45}}), None)
            .await;
        assert!(rotate.is_err());
        let split = service
            .run_operation(Operation::Split, &[id.clone()], &json!({"page_ranges": [[1, 1], [2, 9]]}), None)
            .await;
        assert!(split.is_err());
        assert_eq!(output_entries(&service), 0);

        let abandoned = tokio::time::timeout(
            Duration::ZERO,
            service.run_operation(Operation::Rotate, &[id], &json!({"page_rotations": {"1": 90}}), None),
        )
        .await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(output_entries(&service), 0);
        assert!(service.files.list(Some(FileKind::Output)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_image_conversions_are_served_from_cache() {
        let (dir, service) = service().await;
        let path = dir.path().join("dot.png");
        image::RgbImage::from_pixel(4, 3, image::Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();
        let id = service
            .files
            .save_upload(&std::fs::read(&path).unwrap(), "dot.png")
            .unwrap()
            .id;

        let first = service.convert_image(&id, "jpeg").await.unwrap();
        let second = service.convert_image(&id, "JPEG").await.unwrap();
        assert!(first.data.as_ref().and_then(|d| d.get("cached")).is_none());
        assert_eq!(second.data.as_ref().unwrap()["cached"], json!(true));
        assert_eq!(second.data.as_ref().unwrap()["width"], json!(4));
        assert_ne!(first.output_files, second.output_files);
        assert_eq!(service.cache.stats().unwrap().entries, 1);

        let pdf = service.images_to_pdf(&[id.clone()], Some("single")).await.unwrap();
        assert!(pdf.success);
        let again = service.images_to_pdf(&[id], Some("single")).await.unwrap();
        assert_eq!(again.data.as_ref().unwrap()["cached"], json!(true));
        let record = service.files.get(&again.output_files[0]).unwrap();
        assert_eq!(record.original_name, "single.pdf");
        assert_eq!(pdf::page_count(&record.path).unwrap(), 1);
        assert_eq!(service.cache.stats().unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_cleanup_reports_counts() {
        let (dir, service) = service().await;
        assert_eq!(service.cleanup().unwrap().total(), 0);

        let path = write_pdf(dir.path(), "text.pdf", &[vec!["Expiring text"]]);
        let id = service
            .files
            .save_upload(&std::fs::read(path).unwrap(), "text.pdf")
            .unwrap()
            .id;
        service
            .run_operation(Operation::ExtractText, &[id.clone()], &json!({}), None)
            .await
            .unwrap();

        let mut job = BatchJob::new(Operation::Compress, vec![id], json!({}), BatchOptions::default());
        job.status = JobStatus::Completed;
        job.completed_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
        service.db.save_job(&job).unwrap();

        let orphan = service.files.work_dir().unwrap().keep();
        std::fs::write(orphan.join("late.pdf"), "late").unwrap();

        let mut next = (**service.runtime_config.dynamic()).clone();
        next.batch.cleanup_max_age_hours = 0;
        next.cache.ttl_secs = 0;
        service.runtime_config.update_dynamic(next);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = service.cleanup().unwrap();
        assert_eq!(report.jobs, 1);
        assert_eq!(report.cache_entries, 1);
        assert_eq!(report.output_files, 1);
        assert_eq!(report.work_dirs, 1);
        assert_eq!(report.tokens, 0);
        assert_eq!(report.chat_sessions, 0);
        assert!(!orphan.exists());
        assert_eq!(output_entries(&service), 0);
        assert_eq!(service.cleanup().unwrap().total(), 0);
    }
}

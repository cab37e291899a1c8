//! File manager: opaque ids for uploaded and generated files.
//!
//! Records live in the `files` table with a write-through [`DashMap`] index in
//! front. Every path handed out is inside the upload or output directory.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::db::{Database, FileKind, FileRecord};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::hash::file_sha256;
use crate::operation::OperationResult;

/// A per-operation directory under the output dir. Dropping it removes the
/// directory and anything written into it unless [`keep`](Self::keep) was called.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Leave the directory on disk and hand back its path
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }

    /// Keep the directory only when `outcome` produced files
    pub fn settle(self, outcome: &ServiceResult<OperationResult>) {
        if matches!(outcome, Ok(result) if !result.output_files.is_empty()) {
            self.keep();
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Discarded work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to discard work directory"),
        }
    }
}

/// Replace path separators and shell-hostile characters
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '$' | '`' | ';' | '&' => '_',
            c if c.is_control() => '_',
            ' ' => '-',
            _ => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches('.').to_string();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Content type for a lowercase extension
pub fn content_type_for(ext: &str) -> String {
    let mime = match ext {
        "pdf" => mime::APPLICATION_PDF,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "txt" => mime::TEXT_PLAIN_UTF_8,
        "html" | "htm" => mime::TEXT_HTML_UTF_8,
        "csv" => mime::TEXT_CSV_UTF_8,
        "json" => mime::APPLICATION_JSON,
        "tif" | "tiff" => return "image/tiff".to_string(),
        "webp" => return "image/webp".to_string(),
        "md" => return "text/markdown; charset=utf-8".to_string(),
        "xls" => return "application/vnd.ms-excel".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM,
    };
    mime.to_string()
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}

pub struct FileManager {
    db: Arc<Database>,
    runtime_config: Arc<RuntimeConfig>,
    index: DashMap<String, FileRecord>,
}

impl FileManager {
    pub fn new(db: Arc<Database>, runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        let storage = &runtime_config.static_config.storage;
        for dir in [storage.upload_dir(), storage.output_dir()] {
            std::fs::create_dir_all(&dir).map_err(ProcessingError::Io)?;
        }

        Ok(Self {
            db,
            runtime_config,
            index: DashMap::new(),
        })
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.runtime_config.static_config.storage.upload_dir()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.runtime_config.static_config.storage.output_dir()
    }

    fn is_managed(&self, path: &Path) -> bool {
        let has_parent_refs = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        !has_parent_refs
            && (path.starts_with(self.upload_dir()) || path.starts_with(self.output_dir()))
    }

    /// Validate and store uploaded bytes
    pub fn save_upload(&self, content: &[u8], original_name: &str) -> ServiceResult<FileRecord> {
        let limits = self.runtime_config.dynamic().limits.clone();
        let original_name = sanitize_filename(original_name);

        let ext = extension_of(&original_name).ok_or_else(|| ProcessingError::UnsupportedFormat {
            format: "(none)".to_string(),
        })?;
        if !limits.is_allowed_extension(&ext) {
            return Err(ProcessingError::UnsupportedFormat { format: ext }.into());
        }
        if content.len() as u64 > limits.max_upload_size_bytes {
            return Err(ProcessingError::FileTooLarge {
                size: content.len() as u64,
                max: limits.max_upload_size_bytes,
            }
            .into());
        }

        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.upload_dir();
        let path = dir.join(format!("{}.{}", id, ext));

        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(ProcessingError::Io)?;
        temp.write_all(content).map_err(ProcessingError::Io)?;
        temp.persist(&path)
            .map_err(|e| ProcessingError::Io(e.error))?;

        let record = FileRecord {
            id: id.clone(),
            kind: FileKind::Upload,
            original_name,
            path,
            size: content.len() as u64,
            content_type: content_type_for(&ext),
            sha256: crate::hash::bytes_sha256(content),
            created_at: Utc::now(),
            source_job_id: None,
        };
        self.db.insert_file(&record)?;
        self.index.insert(id.clone(), record.clone());

        metrics::counter!("pdf_toolkit_uploads_total").increment(1);
        info!(file_id = %id, filename = %record.original_name, size = record.size, "File uploaded");
        Ok(record)
    }

    /// Allocate a fresh directory under the output dir for one operation's outputs
    pub fn work_dir(&self) -> ServiceResult<WorkDir> {
        let path = self.output_dir().join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&path).map_err(ProcessingError::Io)?;
        Ok(WorkDir { path, keep: false })
    }

    /// A unique output path named `{stem}.{ext}`
    pub fn output_path(&self, stem: &str, ext: &str) -> ServiceResult<PathBuf> {
        Ok(self
            .work_dir()?
            .keep()
            .join(format!("{}.{}", sanitize_filename(stem), ext)))
    }

    /// Record a generated file
    pub fn register_output(
        &self,
        path: &Path,
        source_job_id: Option<&str>,
    ) -> ServiceResult<FileRecord> {
        if !self.is_managed(path) {
            return Err(ServiceError::internal(format!(
                "Output path outside managed directories: {}",
                path.display()
            )));
        }

        let metadata = std::fs::metadata(path).map_err(ProcessingError::Io)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let ext = extension_of(&name).unwrap_or_default();

        let record = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            kind: FileKind::Output,
            original_name: name,
            path: path.to_path_buf(),
            size: metadata.len(),
            content_type: content_type_for(&ext),
            sha256: file_sha256(path).map_err(ProcessingError::Io)?,
            created_at: Utc::now(),
            source_job_id: source_job_id.map(str::to_string),
        };
        self.db.insert_file(&record)?;
        self.index.insert(record.id.clone(), record.clone());

        debug!(file_id = %record.id, path = %path.display(), "Registered output file");
        Ok(record)
    }

    /// Swap the result's output paths for registered file ids
    pub fn register_result(
        &self,
        mut result: OperationResult,
        source_job_id: Option<&str>,
    ) -> ServiceResult<OperationResult> {
        let mut ids = Vec::with_capacity(result.output_files.len());
        for path in result.output_paths() {
            ids.push(self.register_output(&path, source_job_id)?.id);
        }
        result.output_files = ids;
        Ok(result)
    }

    pub fn get(&self, id: &str) -> ServiceResult<FileRecord> {
        if let Some(record) = self.index.get(id) {
            return Ok(record.clone());
        }

        let record = self
            .db
            .get_file(id)?
            .filter(|r| self.is_managed(&r.path))
            .ok_or_else(|| ServiceError::FileNotFound {
                file_id: id.to_string(),
            })?;
        self.index.insert(id.to_string(), record.clone());
        Ok(record)
    }

    /// Path of an existing file
    pub fn path(&self, id: &str) -> ServiceResult<PathBuf> {
        let record = self.get(id)?;
        if !record.path.exists() {
            return Err(ServiceError::FileNotFound {
                file_id: id.to_string(),
            });
        }
        Ok(record.path)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path(id).is_ok()
    }

    pub fn delete(&self, id: &str) -> ServiceResult<()> {
        let record = self.get(id)?;
        self.remove_record(&record);
        info!(file_id = %id, "File deleted");
        Ok(())
    }

    fn remove_record(&self, record: &FileRecord) {
        if let Err(e) = std::fs::remove_file(&record.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(file_id = %record.id, error = %e, "Failed to remove file");
        }
        // Drop the per-operation work dir once it is empty
        if record.kind == FileKind::Output
            && let Some(parent) = record.path.parent()
            && parent != self.output_dir()
        {
            let _ = std::fs::remove_dir(parent);
        }
        self.index.remove(&record.id);
        if let Err(e) = self.db.delete_file(&record.id) {
            warn!(file_id = %record.id, error = %e, "Failed to delete file record");
        }
    }

    pub fn list(&self, kind: Option<FileKind>) -> ServiceResult<Vec<FileRecord>> {
        self.db.list_files(kind)
    }

    /// Remove generated files older than `max_age`; returns how many were removed
    pub fn cleanup_older_than(&self, max_age: Duration) -> ServiceResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(1));
        let expired = self.db.list_files_older_than(FileKind::Output, cutoff)?;
        for record in &expired {
            self.remove_record(record);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Removed expired output files");
        }
        Ok(expired.len())
    }

    /// Remove directories under the output dir that hold no registered file
    /// and were last modified before `max_age` ago. These are left by
    /// operations abandoned mid-write or by a previous process.
    pub fn sweep_work_dirs(&self, max_age: Duration) -> ServiceResult<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let registered: HashSet<PathBuf> = self
            .db
            .list_files(Some(FileKind::Output))?
            .into_iter()
            .filter_map(|record| record.path.parent().map(Path::to_path_buf))
            .collect();

        let entries = match std::fs::read_dir(self.output_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ProcessingError::Io(e).into()),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || registered.contains(&path) {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .is_ok_and(|modified| modified <= cutoff);
            if !stale {
                continue;
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphaned work directory"),
            }
        }
        if removed > 0 {
            info!(count = removed, "Removed orphaned work directories");
        }
        Ok(removed)
    }
}

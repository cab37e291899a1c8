//! Content-addressed cache of operation outputs.
//!
//! An entry lives at `cache_dir/{key[0..2]}/{key}/` with its row in
//! `cache_entries`. Keys come from [`crate::hash::cache_key`] for file inputs
//! and [`crate::hash::content_cache_key`] for inline content, so identical
//! input bytes, operation and parameters always land on the same entry.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::db::{CacheEntry, Database};
use crate::error::{ProcessingError, ServiceResult};
use crate::operation::OperationResult;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: u64,
    pub size_bytes: u64,
    pub hits: u64,
    pub max_size_bytes: u64,
    pub ttl_secs: u64,
}

pub struct ConversionCache {
    db: Arc<Database>,
    runtime_config: Arc<RuntimeConfig>,
}

fn record_request(result: &'static str) {
    counter!("pdf_toolkit_cache_requests_total", "result" => result).increment(1);
}

impl ConversionCache {
    pub fn new(db: Arc<Database>, runtime_config: Arc<RuntimeConfig>) -> ServiceResult<Self> {
        std::fs::create_dir_all(runtime_config.static_config.storage.cache_dir())
            .map_err(ProcessingError::Io)?;
        Ok(Self { db, runtime_config })
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        let prefix = key.get(..2).unwrap_or("00");
        self.runtime_config
            .static_config
            .storage
            .cache_dir()
            .join(prefix)
            .join(key)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        let ttl = self.runtime_config.dynamic().cache.ttl_secs;
        let age = Utc::now() - entry.created_at;
        age.num_seconds() >= ttl as i64
    }

    fn remove(&self, key: &str) -> ServiceResult<()> {
        let dir = self.entry_dir(key);
        if dir.exists()
            && let Err(e) = std::fs::remove_dir_all(&dir)
        {
            warn!(key = %key, error = %e, "Failed to remove cache directory");
        }
        self.db.delete_cache_entry(key)
    }

    /// Copy a live entry's outputs into `dest_dir` and return the cached result.
    /// Expired or incomplete entries are dropped and count as misses.
    pub fn get(
        &self,
        key: &str,
        operation: &str,
        dest_dir: &Path,
    ) -> ServiceResult<Option<OperationResult>> {
        let Some(entry) = self.db.get_cache_entry(key)? else {
            return Ok(None);
        };

        let dir = self.entry_dir(key);
        if self.is_expired(&entry) || !entry.outputs.iter().all(|name| dir.join(name).is_file()) {
            debug!(key = %key, "Dropping stale cache entry");
            self.remove(key)?;
            return Ok(None);
        }

        let mut outputs = Vec::with_capacity(entry.outputs.len());
        for name in &entry.outputs {
            let target = dest_dir.join(name);
            std::fs::copy(dir.join(name), &target).map_err(ProcessingError::Io)?;
            outputs.push(target);
        }
        self.db.touch_cache_entry(key, Utc::now())?;

        let mut result = OperationResult::ok(format!("{} served from cache", operation))
            .with_outputs(&outputs);
        result.data = entry.data;
        result.set_data_field("cached", json!(true));
        Ok(Some(result))
    }

    /// Store a successful result's outputs and data under `key`
    pub fn put(&self, key: &str, operation: &str, result: &OperationResult) -> ServiceResult<()> {
        let dir = self.entry_dir(key);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(ProcessingError::Io)?;
        }
        std::fs::create_dir_all(&dir).map_err(ProcessingError::Io)?;

        let mut names = Vec::with_capacity(result.output_files.len());
        let mut size_bytes = 0;
        for (index, path) in result.output_paths().iter().enumerate() {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("output_{}", index));
            let name = if names.contains(&file_name) {
                format!("{}_{}", index, file_name)
            } else {
                file_name
            };
            size_bytes += std::fs::copy(path, dir.join(&name)).map_err(ProcessingError::Io)?;
            names.push(name);
        }

        let now = Utc::now();
        self.db.upsert_cache_entry(&CacheEntry {
            key: key.to_string(),
            operation: operation.to_string(),
            outputs: names,
            data: result.data.clone(),
            size_bytes,
            created_at: now,
            last_accessed: now,
            hits: 0,
        })?;
        debug!(key = %key, operation = %operation, size_bytes, "Cached result");

        self.evict_to_limit()
    }

    /// Drop least recently used entries until the total fits the size limit
    fn evict_to_limit(&self) -> ServiceResult<()> {
        let max = self.runtime_config.dynamic().cache.max_size_bytes;
        let (_, mut total, _) = self.db.cache_totals()?;
        if total <= max {
            return Ok(());
        }
        for entry in self.db.list_cache_entries_lru()? {
            if total <= max {
                break;
            }
            self.remove(&entry.key)?;
            total = total.saturating_sub(entry.size_bytes);
            debug!(key = %entry.key, "Evicted cache entry");
        }
        Ok(())
    }

    /// Serve from the cache or run `compute`. Only successful results are stored.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        operation: &str,
        dest_dir: &Path,
        compute: F,
    ) -> ServiceResult<OperationResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<OperationResult>>,
    {
        if !self.runtime_config.dynamic().cache.enabled {
            record_request("bypass");
            return compute().await;
        }

        if let Some(hit) = self.get(key, operation, dest_dir)? {
            record_request("hit");
            debug!(key = %key, operation = %operation, "Cache hit");
            return Ok(hit);
        }
        record_request("miss");

        let result = compute().await?;
        if result.success
            && let Err(e) = self.put(key, operation, &result)
        {
            warn!(key = %key, error = %e, "Failed to cache result");
        }
        Ok(result)
    }

    pub fn purge_expired(&self) -> ServiceResult<usize> {
        let mut purged = 0;
        for entry in self.db.list_cache_entries_lru()? {
            if self.is_expired(&entry) {
                self.remove(&entry.key)?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    pub fn stats(&self) -> ServiceResult<CacheStats> {
        let (entries, size_bytes, hits) = self.db.cache_totals()?;
        let dynamic = self.runtime_config.dynamic();
        let config = &dynamic.cache;
        Ok(CacheStats {
            enabled: config.enabled,
            entries,
            size_bytes,
            hits,
            max_size_bytes: config.max_size_bytes,
            ttl_secs: config.ttl_secs,
        })
    }
}

//! Configuration struct definitions for DynamicConfig sections.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upload and request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "super::defaults::default_max_upload_size")]
    pub max_upload_size_bytes: u64,

    /// Lowercase extensions without the leading dot
    #[serde(default = "super::defaults::default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default = "super::defaults::default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl LimitsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.allowed_extensions.iter().any(|allowed| *allowed == ext)
    }
}

/// Batch scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Jobs executed at the same time
    #[serde(default = "super::defaults::default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Upper bound for a job's `max_workers` option
    #[serde(default = "super::defaults::default_max_workers_per_job")]
    pub max_workers_per_job: usize,

    /// Pending jobs admitted before new submissions are rejected
    #[serde(default = "super::defaults::default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "super::defaults::default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "super::defaults::default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Timeout for a single file attempt
    #[serde(default = "super::defaults::default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    #[serde(default = "super::defaults::default_cleanup_max_age_hours")]
    pub cleanup_max_age_hours: u64,

    #[serde(default = "super::defaults::default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl BatchConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_hours * 3600)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Conversion cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "super::defaults::default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "super::defaults::default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "super::defaults::default_cache_max_size")]
    pub max_size_bytes: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Ollama LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "super::defaults::default_ollama_enabled")]
    pub enabled: bool,

    #[serde(default = "super::defaults::default_ollama_url")]
    pub base_url: String,

    #[serde(default = "super::defaults::default_model")]
    pub default_model: String,

    /// Vision model used for OCR when the local engine is unavailable. Empty disables it.
    #[serde(default)]
    pub vision_model: String,

    #[serde(default = "super::defaults::default_temperature")]
    pub temperature: f32,

    #[serde(default = "super::defaults::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Page rendering configuration (pdfium and headless Chromium)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderingConfig {
    /// Optional path to Chrome/Chromium executable (uses system default if not set)
    #[serde(default)]
    pub chrome_path: Option<String>,

    #[serde(default = "super::defaults::default_dpi")]
    pub default_dpi: u32,
}

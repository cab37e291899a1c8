//! Default value functions for DynamicConfig.

use super::schemas::{BatchConfig, CacheConfig, LimitsConfig, OllamaConfig, RenderingConfig};

// ==================== Top-level Section Defaults ====================

pub(crate) fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_upload_size_bytes: default_max_upload_size(),
        allowed_extensions: default_allowed_extensions(),
        request_timeout_secs: default_request_timeout(),
    }
}

pub(crate) fn default_batch() -> BatchConfig {
    BatchConfig {
        max_concurrent_jobs: default_max_concurrent_jobs(),
        max_workers_per_job: default_max_workers_per_job(),
        queue_capacity: default_queue_capacity(),
        max_retries: default_max_retries(),
        retry_base_delay_ms: default_retry_base_delay_ms(),
        retry_max_delay_ms: default_retry_max_delay_ms(),
        job_timeout_secs: default_job_timeout_secs(),
        cleanup_max_age_hours: default_cleanup_max_age_hours(),
        cleanup_interval_secs: default_cleanup_interval_secs(),
    }
}

pub(crate) fn default_cache() -> CacheConfig {
    CacheConfig {
        enabled: default_cache_enabled(),
        ttl_secs: default_cache_ttl_secs(),
        max_size_bytes: default_cache_max_size(),
    }
}

pub(crate) fn default_ollama() -> OllamaConfig {
    OllamaConfig {
        enabled: default_ollama_enabled(),
        base_url: default_ollama_url(),
        default_model: default_model(),
        vision_model: String::new(),
        temperature: default_temperature(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

pub(crate) fn default_rendering() -> RenderingConfig {
    RenderingConfig {
        chrome_path: None,
        default_dpi: default_dpi(),
    }
}

// ==================== Limits Defaults ====================

pub(crate) fn default_max_upload_size() -> u64 {
    104_857_600 // 100MB
}

pub(crate) fn default_allowed_extensions() -> Vec<String> {
    [
        "pdf", "png", "jpg", "jpeg", "tiff", "tif", "bmp", "gif", "webp", "txt", "md", "html",
        "htm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub(crate) fn default_request_timeout() -> u64 {
    300
}

// ==================== Batch Defaults ====================

pub(crate) fn default_max_concurrent_jobs() -> usize {
    4
}

pub(crate) fn default_max_workers_per_job() -> usize {
    4
}

pub(crate) fn default_queue_capacity() -> usize {
    64
}

pub(crate) fn default_max_retries() -> u32 {
    2
}

pub(crate) fn default_retry_base_delay_ms() -> u64 {
    500
}

pub(crate) fn default_retry_max_delay_ms() -> u64 {
    30_000
}

pub(crate) fn default_job_timeout_secs() -> u64 {
    300
}

pub(crate) fn default_cleanup_max_age_hours() -> u64 {
    24
}

pub(crate) fn default_cleanup_interval_secs() -> u64 {
    3600
}

// ==================== Cache Defaults ====================

pub(crate) fn default_cache_enabled() -> bool {
    true
}

pub(crate) fn default_cache_ttl_secs() -> u64 {
    3600
}

pub(crate) fn default_cache_max_size() -> u64 {
    536_870_912 // 512MB
}

// ==================== Ollama Defaults ====================

pub(crate) fn default_ollama_enabled() -> bool {
    true
}

pub(crate) fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

pub(crate) fn default_model() -> String {
    "llama3.2".to_string()
}

pub(crate) fn default_temperature() -> f32 {
    0.3
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    120
}

// ==================== Rendering Defaults ====================

pub(crate) fn default_dpi() -> u32 {
    150
}

//! Valid setting keys for DynamicConfig.

use std::collections::HashSet;

/// All valid setting keys for DynamicConfig
pub const VALID_SETTING_KEYS: &[&str] = &[
    "limits.max_upload_size_bytes",
    "limits.allowed_extensions",
    "limits.request_timeout_secs",
    "batch.max_concurrent_jobs",
    "batch.max_workers_per_job",
    "batch.queue_capacity",
    "batch.max_retries",
    "batch.retry_base_delay_ms",
    "batch.retry_max_delay_ms",
    "batch.job_timeout_secs",
    "batch.cleanup_max_age_hours",
    "batch.cleanup_interval_secs",
    "cache.enabled",
    "cache.ttl_secs",
    "cache.max_size_bytes",
    "ollama.enabled",
    "ollama.base_url",
    "ollama.default_model",
    "ollama.vision_model",
    "ollama.temperature",
    "ollama.request_timeout_secs",
    "rendering.chrome_path",
    "rendering.default_dpi",
];

/// Get all valid setting keys as a HashSet
pub fn valid_keys() -> HashSet<&'static str> {
    VALID_SETTING_KEYS.iter().copied().collect()
}

//! Key-value conversion and DB merging logic for DynamicConfig.

use std::collections::HashMap;

use serde_json::Value;

use super::DynamicConfig;

impl DynamicConfig {
    /// Convert config to a flat `section.field` map for API responses
    pub fn to_key_value_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        let Ok(Value::Object(sections)) = serde_json::to_value(self) else {
            return map;
        };

        for (section, fields) in sections {
            if let Value::Object(fields) = fields {
                for (field, value) in fields {
                    map.insert(format!("{}.{}", section, field), value);
                }
            }
        }

        map
    }

    /// Apply DB settings as overrides to this config
    pub fn merge_from_db(&mut self, db_settings: &HashMap<String, Value>) {
        for (key, value) in db_settings {
            self.apply_setting(key, value);
        }
    }

    /// Apply a single setting by key
    fn apply_setting(&mut self, key: &str, value: &Value) {
        let as_usize = |v: &Value| v.as_u64().map(|n| n as usize);

        match key {
            // Limits settings
            "limits.max_upload_size_bytes" => {
                if let Some(v) = value.as_u64() {
                    self.limits.max_upload_size_bytes = v;
                }
            }
            "limits.allowed_extensions" => {
                if let Some(items) = value.as_array() {
                    self.limits.allowed_extensions = items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
                        .collect();
                }
            }
            "limits.request_timeout_secs" => {
                if let Some(v) = value.as_u64() {
                    self.limits.request_timeout_secs = v;
                }
            }

            // Batch settings
            "batch.max_concurrent_jobs" => {
                if let Some(v) = as_usize(value) {
                    self.batch.max_concurrent_jobs = v.max(1);
                }
            }
            "batch.max_workers_per_job" => {
                if let Some(v) = as_usize(value) {
                    self.batch.max_workers_per_job = v.max(1);
                }
            }
            "batch.queue_capacity" => {
                if let Some(v) = as_usize(value) {
                    self.batch.queue_capacity = v.max(1);
                }
            }
            "batch.max_retries" => {
                if let Some(v) = value.as_u64() {
                    self.batch.max_retries = v as u32;
                }
            }
            "batch.retry_base_delay_ms" => {
                if let Some(v) = value.as_u64() {
                    self.batch.retry_base_delay_ms = v;
                }
            }
            "batch.retry_max_delay_ms" => {
                if let Some(v) = value.as_u64() {
                    self.batch.retry_max_delay_ms = v;
                }
            }
            "batch.job_timeout_secs" => {
                if let Some(v) = value.as_u64() {
                    self.batch.job_timeout_secs = v;
                }
            }
            "batch.cleanup_max_age_hours" => {
                if let Some(v) = value.as_u64() {
                    self.batch.cleanup_max_age_hours = v;
                }
            }
            "batch.cleanup_interval_secs" => {
                if let Some(v) = value.as_u64() {
                    self.batch.cleanup_interval_secs = v;
                }
            }

            // Cache settings
            "cache.enabled" => {
                if let Some(v) = value.as_bool() {
                    self.cache.enabled = v;
                }
            }
            "cache.ttl_secs" => {
                if let Some(v) = value.as_u64() {
                    self.cache.ttl_secs = v;
                }
            }
            "cache.max_size_bytes" => {
                if let Some(v) = value.as_u64() {
                    self.cache.max_size_bytes = v;
                }
            }

            // Ollama settings
            "ollama.enabled" => {
                if let Some(v) = value.as_bool() {
                    self.ollama.enabled = v;
                }
            }
            "ollama.base_url" => {
                if let Some(v) = value.as_str() {
                    self.ollama.base_url = v.to_string();
                }
            }
            "ollama.default_model" => {
                if let Some(v) = value.as_str() {
                    self.ollama.default_model = v.to_string();
                }
            }
            "ollama.vision_model" => {
                if let Some(v) = value.as_str() {
                    self.ollama.vision_model = v.to_string();
                }
            }
            "ollama.temperature" => {
                if let Some(v) = value.as_f64() {
                    self.ollama.temperature = v as f32;
                }
            }
            "ollama.request_timeout_secs" => {
                if let Some(v) = value.as_u64() {
                    self.ollama.request_timeout_secs = v;
                }
            }

            // Rendering settings
            "rendering.chrome_path" => {
                if value.is_null() {
                    self.rendering.chrome_path = None;
                } else if let Some(v) = value.as_str() {
                    self.rendering.chrome_path = Some(v.to_string());
                }
            }
            "rendering.default_dpi" => {
                if let Some(v) = value.as_u64() {
                    self.rendering.default_dpi = v.clamp(72, 300) as u32;
                }
            }

            _ => {
                tracing::warn!(key = %key, "Unknown setting key in merge_from_db");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dynamic_config::keys::VALID_SETTING_KEYS;

    #[test]
    fn test_key_value_map_covers_valid_keys() {
        let config = DynamicConfig::default();
        let map = config.to_key_value_map();
        for key in VALID_SETTING_KEYS {
            assert!(map.contains_key(*key), "missing {}", key);
        }
        assert_eq!(map.len(), VALID_SETTING_KEYS.len());
    }

    #[test]
    fn test_merge_from_db_overrides() {
        let mut config = DynamicConfig::default();
        let mut settings = HashMap::new();
        settings.insert("batch.max_retries".to_string(), serde_json::json!(5));
        settings.insert("cache.enabled".to_string(), serde_json::json!(false));
        settings.insert(
            "limits.allowed_extensions".to_string(),
            serde_json::json!([".PDF", "png"]),
        );
        settings.insert("bogus.key".to_string(), serde_json::json!(1));

        config.merge_from_db(&settings);

        assert_eq!(config.batch.max_retries, 5);
        assert!(!config.cache.enabled);
        assert_eq!(config.limits.allowed_extensions, vec!["pdf", "png"]);
    }

    #[test]
    fn test_merge_clamps_worker_counts() {
        let mut config = DynamicConfig::default();
        let mut settings = HashMap::new();
        settings.insert("batch.max_concurrent_jobs".to_string(), serde_json::json!(0));
        config.merge_from_db(&settings);
        assert_eq!(config.batch.max_concurrent_jobs, 1);
    }
}

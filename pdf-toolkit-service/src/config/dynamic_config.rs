//! Dynamic configuration that can be updated at runtime via API.
//! DB values override config file/env defaults.

mod defaults;
pub(crate) mod keys;
mod merging;
mod schemas;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub use schemas::{BatchConfig, CacheConfig, LimitsConfig, OllamaConfig, RenderingConfig};

use defaults::{default_batch, default_cache, default_limits, default_ollama, default_rendering};

/// Dynamic configuration that can be updated at runtime via API
/// DB values override config file/env defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default = "default_batch")]
    pub batch: BatchConfig,

    #[serde(default = "default_cache")]
    pub cache: CacheConfig,

    #[serde(default = "default_ollama")]
    pub ollama: OllamaConfig,

    #[serde(default = "default_rendering")]
    pub rendering: RenderingConfig,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            batch: default_batch(),
            cache: default_cache(),
            ollama: default_ollama(),
            rendering: default_rendering(),
        }
    }
}

impl DynamicConfig {
    /// Get all valid setting keys
    pub fn valid_keys() -> HashSet<&'static str> {
        keys::valid_keys()
    }
}

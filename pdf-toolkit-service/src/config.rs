//! Service configuration.
//!
//! Static settings (binding, storage, seeded users) are read once at startup.
//! Dynamic settings are layered file/env defaults with database overrides and
//! can be swapped at runtime through the settings API.

mod dynamic_config;
mod loader;
mod static_config;

use arc_swap::ArcSwap;
use std::sync::Arc;

pub use dynamic_config::{
    BatchConfig, CacheConfig, DynamicConfig, LimitsConfig, OllamaConfig, RenderingConfig,
};
pub use loader::load_static_config;
pub use static_config::{AuthConfig, SeedUser, ServerConfig, StaticConfig, StorageConfig};

use crate::db::Database;
use crate::error::ServiceResult;

/// Runtime configuration manager
/// Combines static config (startup-only) with dynamic config (hot-reloadable via ArcSwap)
pub struct RuntimeConfig {
    /// Static configuration (never changes after startup)
    pub static_config: StaticConfig,
    /// Dynamic configuration (can be hot-reloaded)
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Get current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    /// Update dynamic config (atomic swap)
    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Load config from all sources with DB overrides
    pub fn load(static_config: StaticConfig, db: &Database) -> ServiceResult<Self> {
        let mut dynamic = loader::load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);

        Ok(Self::new(static_config, dynamic))
    }

    /// Rebuild dynamic config from file/env defaults + DB and swap atomically
    pub fn reload_from_db(&self, db: &Database) -> ServiceResult<()> {
        let mut dynamic = loader::load_dynamic_config()?;
        let db_settings = db.get_all_settings()?;
        dynamic.merge_from_db(&db_settings);
        self.update_dynamic(dynamic);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: &std::path::Path) -> RuntimeConfig {
    let mut static_config: StaticConfig =
        serde_json::from_value(serde_json::json!({})).expect("empty static config");
    static_config.storage.data_dir = data_dir.to_path_buf();
    let mut dynamic = DynamicConfig::default();
    dynamic.ollama.enabled = false;
    dynamic.batch.retry_base_delay_ms = 1;
    dynamic.batch.retry_max_delay_ms = 5;
    RuntimeConfig::new(static_config, dynamic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_dynamic_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let before = config.dynamic();
        let mut next = (**before).clone();
        next.cache.ttl_secs = 42;
        config.update_dynamic(next);

        assert_eq!(before.cache.ttl_secs, 3600);
        assert_eq!(config.dynamic().cache.ttl_secs, 42);
    }
}

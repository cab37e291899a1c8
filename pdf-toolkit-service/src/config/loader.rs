//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;

use crate::error::{ServiceError, ServiceResult};

use super::dynamic_config::DynamicConfig;
use super::static_config::StaticConfig;

/// Environment variable prefix, e.g. `PDF_TOOLKIT_SERVER__PORT=9000`
const ENV_PREFIX: &str = "PDF_TOOLKIT";

/// Deserialize a config section set from `config.*` and the environment
fn load_layered<T: DeserializeOwned>(what: &str) -> ServiceResult<T> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize {} config: {}", what, e),
        })
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    load_layered("static")
}

/// Load dynamic configuration from file and env vars (without DB overrides)
pub fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    load_layered("dynamic")
}

//! Static configuration that cannot be changed at runtime.
//! These settings affect server binding or require restart to change.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Static configuration that cannot be changed at runtime
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_auth")]
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
///
/// Upload, output and cache directories default to subdirectories of `data_dir`.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub upload_dir: Option<PathBuf>,

    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("output"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cache"))
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("pdf-toolkit.db")
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: u64,

    /// Users inserted on startup when not already present
    #[serde(default = "default_users")]
    pub users: Vec<SeedUser>,
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_minutes * 60)
    }
}

/// A user account seeded from configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
        upload_dir: None,
        output_dir: None,
        cache_dir: None,
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

pub(crate) fn default_auth() -> AuthConfig {
    AuthConfig {
        token_ttl_minutes: default_token_ttl_minutes(),
        users: default_users(),
    }
}

fn default_token_ttl_minutes() -> u64 {
    30
}

fn seed(username: &str, full_name: &str, password: &str, scopes: &[&str]) -> SeedUser {
    SeedUser {
        username: username.to_string(),
        password: password.to_string(),
        full_name: Some(full_name.to_string()),
        email: Some(format!("{}@example.com", username)),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        disabled: false,
    }
}

fn default_users() -> Vec<SeedUser> {
    vec![
        seed(
            "admin",
            "Administrator",
            "adminpassword",
            &["read", "write", "admin"],
        ),
        seed("user", "Regular User", "userpassword", &["read"]),
        seed("editor", "Content Editor", "editorpassword", &["read", "write"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_dirs_default_under_data_dir() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/srv/pdf"),
            upload_dir: None,
            output_dir: Some(PathBuf::from("/tmp/out")),
            cache_dir: None,
        };
        assert_eq!(storage.upload_dir(), PathBuf::from("/srv/pdf/uploads"));
        assert_eq!(storage.output_dir(), PathBuf::from("/tmp/out"));
        assert_eq!(storage.cache_dir(), PathBuf::from("/srv/pdf/cache"));
    }

    #[test]
    fn test_default_users_have_expected_scopes() {
        let auth = default_auth();
        let admin = auth.users.iter().find(|u| u.username == "admin").unwrap();
        assert_eq!(admin.scopes, vec!["read", "write", "admin"]);
        let user = auth.users.iter().find(|u| u.username == "user").unwrap();
        assert_eq!(user.scopes, vec!["read"]);
        assert_eq!(auth.token_ttl(), Duration::from_secs(1800));
    }
}

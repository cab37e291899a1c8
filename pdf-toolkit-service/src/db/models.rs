//! Row types stored in the database.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::parse_timestamp;

/// Where a managed file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Upload,
    Output,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Upload => "upload",
            FileKind::Output => "output",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "output" => FileKind::Output,
            _ => FileKind::Upload,
        }
    }
}

/// A file known to the file manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "file_id")]
    pub id: String,
    pub kind: FileKind,
    #[serde(rename = "filename")]
    pub original_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub content_type: String,
    pub sha256: String,
    #[serde(rename = "upload_time")]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<String>,
}

impl FileRecord {
    /// Column order: id, kind, original_name, path, size, content_type, sha256, created_at, source_job_id
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let kind: String = row.get(1)?;
        let path: String = row.get(3)?;
        let size: i64 = row.get(4)?;
        let created_at: String = row.get(7)?;

        Ok(Self {
            id: row.get(0)?,
            kind: FileKind::from_str(&kind),
            original_name: row.get(2)?,
            path: PathBuf::from(path),
            size: size.max(0) as u64,
            content_type: row.get(5)?,
            sha256: row.get(6)?,
            created_at: parse_timestamp(&created_at),
            source_job_id: row.get(8)?,
        })
    }

    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    pub fn stem(&self) -> String {
        std::path::Path::new(&self.original_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// An API user account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub username: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    pub scopes: Vec<String>,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Column order: username, full_name, email, password_hash, scopes, disabled, created_at
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let scopes: String = row.get(4)?;
        let disabled: i64 = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(Self {
            username: row.get(0)?,
            full_name: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            scopes: serde_json::from_str(&scopes).unwrap_or_default(),
            disabled: disabled != 0,
            created_at: parse_timestamp(&created_at),
        })
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// A cached set of operation outputs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub operation: String,
    /// File names relative to the entry directory
    pub outputs: Vec<String>,
    pub data: Option<serde_json::Value>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub hits: u64,
}

impl CacheEntry {
    /// Column order: key, operation, outputs, data, size_bytes, created_at, last_accessed, hits
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let outputs: String = row.get(2)?;
        let data: Option<String> = row.get(3)?;
        let size: i64 = row.get(4)?;
        let created_at: String = row.get(5)?;
        let last_accessed: String = row.get(6)?;
        let hits: i64 = row.get(7)?;

        Ok(Self {
            key: row.get(0)?,
            operation: row.get(1)?,
            outputs: serde_json::from_str(&outputs).unwrap_or_default(),
            data: data.and_then(|s| serde_json::from_str(&s).ok()),
            size_bytes: size.max(0) as u64,
            created_at: parse_timestamp(&created_at),
            last_accessed: parse_timestamp(&last_accessed),
            hits: hits.max(0) as u64,
        })
    }
}

//! File record operations.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{Database, FileKind, FileRecord, format_timestamp};
use crate::error::{DatabaseError, ServiceResult};

const FILE_COLUMNS: &str =
    "id, kind, original_name, path, size, content_type, sha256, created_at, source_job_id";

impl Database {
    pub fn insert_file(&self, file: &FileRecord) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO files (id, kind, original_name, path, size, content_type, sha256, created_at, source_job_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file.id,
                file.kind.as_str(),
                file.original_name,
                file.path.to_string_lossy(),
                file.size as i64,
                file.content_type,
                file.sha256,
                format_timestamp(file.created_at),
                file.source_job_id,
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    pub fn get_file(&self, id: &str) -> ServiceResult<Option<FileRecord>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
            params![id],
            FileRecord::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    /// List files, newest first, optionally filtered by kind
    pub fn list_files(&self, kind: Option<FileKind>) -> ServiceResult<Vec<FileRecord>> {
        let conn = self.conn.lock().unwrap();

        let files = if let Some(kind) = kind {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM files WHERE kind = ?1 ORDER BY created_at DESC",
                    FILE_COLUMNS
                ))
                .map_err(DatabaseError::Query)?;
            stmt.query_map(params![kind.as_str()], FileRecord::from_row)
                .map_err(DatabaseError::Query)?
                .collect::<Result<Vec<_>, _>>()
        } else {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM files ORDER BY created_at DESC",
                    FILE_COLUMNS
                ))
                .map_err(DatabaseError::Query)?;
            stmt.query_map([], FileRecord::from_row)
                .map_err(DatabaseError::Query)?
                .collect::<Result<Vec<_>, _>>()
        }
        .map_err(DatabaseError::Query)?;

        Ok(files)
    }

    /// Files of `kind` created before `cutoff`
    pub fn list_files_older_than(
        &self,
        kind: FileKind,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Vec<FileRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM files WHERE kind = ?1 AND created_at < ?2",
                FILE_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let files = stmt
            .query_map(
                params![kind.as_str(), format_timestamp(cutoff)],
                FileRecord::from_row,
            )
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(files)
    }

    /// Returns true when a row was removed
    pub fn delete_file(&self, id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute("DELETE FROM files WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;
        Ok(deleted > 0)
    }
}

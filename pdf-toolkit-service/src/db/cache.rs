//! Conversion cache index operations.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{CacheEntry, Database, format_timestamp};
use crate::error::{DatabaseError, ServiceResult};

const CACHE_COLUMNS: &str =
    "key, operation, outputs, data, size_bytes, created_at, last_accessed, hits";

impl Database {
    pub fn upsert_cache_entry(&self, entry: &CacheEntry) -> ServiceResult<()> {
        let outputs =
            serde_json::to_string(&entry.outputs).map_err(DatabaseError::Serialization)?;
        let data = entry
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cache_entries (key, operation, outputs, data, size_bytes, created_at, last_accessed, hits)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(key) DO UPDATE SET
                outputs = excluded.outputs,
                data = excluded.data,
                size_bytes = excluded.size_bytes,
                created_at = excluded.created_at,
                last_accessed = excluded.last_accessed",
            params![
                entry.key,
                entry.operation,
                outputs,
                data,
                entry.size_bytes as i64,
                format_timestamp(entry.created_at),
                format_timestamp(entry.last_accessed),
                entry.hits as i64,
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    pub fn get_cache_entry(&self, key: &str) -> ServiceResult<Option<CacheEntry>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM cache_entries WHERE key = ?1", CACHE_COLUMNS),
            params![key],
            CacheEntry::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    pub fn touch_cache_entry(&self, key: &str, at: DateTime<Utc>) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cache_entries SET last_accessed = ?2, hits = hits + 1 WHERE key = ?1",
            params![key, format_timestamp(at)],
        )
        .map_err(DatabaseError::Query)?;
        Ok(())
    }

    pub fn delete_cache_entry(&self, key: &str) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .map_err(DatabaseError::Query)?;
        Ok(())
    }

    /// All entries, least recently accessed first
    pub fn list_cache_entries_lru(&self) -> ServiceResult<Vec<CacheEntry>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM cache_entries ORDER BY last_accessed ASC",
                CACHE_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let entries = stmt
            .query_map([], CacheEntry::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(entries)
    }

    /// Returns (entries, total bytes, total hits)
    pub fn cache_totals(&self) -> ServiceResult<(u64, u64, u64)> {
        let conn = self.conn.lock().unwrap();

        let (count, bytes, hits): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), COALESCE(SUM(hits), 0) FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(DatabaseError::Query)?;

        Ok((count.max(0) as u64, bytes.max(0) as u64, hits.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, size: u64, accessed: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            operation: "convert_to_text".to_string(),
            outputs: vec!["out.txt".to_string()],
            data: Some(serde_json::json!({"pages": 1})),
            size_bytes: size,
            created_at: accessed,
            last_accessed: accessed,
            hits: 0,
        }
    }

    #[test]
    fn test_cache_entry_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.upsert_cache_entry(&entry("k1", 10, now - chrono::Duration::minutes(5)))
            .unwrap();
        db.upsert_cache_entry(&entry("k2", 20, now)).unwrap();

        let lru = db.list_cache_entries_lru().unwrap();
        assert_eq!(lru[0].key, "k1");

        db.touch_cache_entry("k1", now + chrono::Duration::minutes(1))
            .unwrap();
        let lru = db.list_cache_entries_lru().unwrap();
        assert_eq!(lru[0].key, "k2");
        assert_eq!(db.get_cache_entry("k1").unwrap().unwrap().hits, 1);

        assert_eq!(db.cache_totals().unwrap(), (2, 30, 1));

        db.delete_cache_entry("k1").unwrap();
        assert!(db.get_cache_entry("k1").unwrap().is_none());
    }
}

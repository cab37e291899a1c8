//! Saved batch configuration operations.

use rusqlite::{OptionalExtension, Row, params};

use super::{Database, format_timestamp, parse_timestamp};
use crate::batch::BatchConfiguration;
use crate::error::{DatabaseError, ServiceResult};

fn configuration_from_row(row: &Row<'_>) -> Result<BatchConfiguration, rusqlite::Error> {
    let operation: String = row.get(1)?;
    let parameters: String = row.get(2)?;
    let options: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(BatchConfiguration {
        name: row.get(0)?,
        operation: operation.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        parameters: serde_json::from_str(&parameters).unwrap_or(serde_json::Value::Null),
        options: serde_json::from_str(&options).unwrap_or_default(),
        created_at: parse_timestamp(&created_at),
        source_job_id: row.get(5)?,
    })
}

impl Database {
    /// Save a configuration, replacing any with the same name
    pub fn save_batch_configuration(&self, config: &BatchConfiguration) -> ServiceResult<()> {
        let parameters =
            serde_json::to_string(&config.parameters).map_err(DatabaseError::Serialization)?;
        let options =
            serde_json::to_string(&config.options).map_err(DatabaseError::Serialization)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO batch_configurations (name, operation, parameters, options, created_at, source_job_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                operation = excluded.operation,
                parameters = excluded.parameters,
                options = excluded.options,
                created_at = excluded.created_at,
                source_job_id = excluded.source_job_id",
            params![
                config.name,
                config.operation.as_ref(),
                parameters,
                options,
                format_timestamp(config.created_at),
                config.source_job_id,
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    pub fn get_batch_configuration(&self, name: &str) -> ServiceResult<Option<BatchConfiguration>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT name, operation, parameters, options, created_at, source_job_id
             FROM batch_configurations WHERE name = ?1",
            params![name],
            configuration_from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    pub fn list_batch_configurations(&self) -> ServiceResult<Vec<BatchConfiguration>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT name, operation, parameters, options, created_at, source_job_id
                 FROM batch_configurations ORDER BY name",
            )
            .map_err(DatabaseError::Query)?;

        let configs = stmt
            .query_map([], configuration_from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchOptions;
    use crate::operation::Operation;
    use chrono::Utc;

    #[test]
    fn test_configuration_upsert() {
        let db = Database::open_in_memory().unwrap();
        let mut config = BatchConfiguration {
            name: "nightly".to_string(),
            operation: Operation::Compress,
            parameters: serde_json::json!({"compression_level": 3}),
            options: BatchOptions::default(),
            created_at: Utc::now(),
            source_job_id: Some("job-1".to_string()),
        };
        db.save_batch_configuration(&config).unwrap();

        config.operation = Operation::OptimizeWeb;
        db.save_batch_configuration(&config).unwrap();

        let loaded = db.get_batch_configuration("nightly").unwrap().unwrap();
        assert_eq!(loaded.operation, Operation::OptimizeWeb);
        assert_eq!(loaded.parameters["compression_level"], 3);
        assert_eq!(db.list_batch_configurations().unwrap().len(), 1);
        assert!(db.get_batch_configuration("missing").unwrap().is_none());
    }
}

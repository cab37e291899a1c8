//! User account operations.

use rusqlite::{OptionalExtension, params};

use super::{Database, UserRecord, format_timestamp};
use crate::error::{DatabaseError, ServiceResult};

const USER_COLUMNS: &str =
    "username, full_name, email, password_hash, scopes, disabled, created_at";

impl Database {
    /// Insert a user unless the username already exists. Returns true when inserted.
    pub fn insert_user_if_absent(&self, user: &UserRecord) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let scopes = serde_json::to_string(&user.scopes).map_err(DatabaseError::Serialization)?;

        let inserted = conn
            .execute(
                "INSERT INTO users (username, full_name, email, password_hash, scopes, disabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(username) DO NOTHING",
                params![
                    user.username,
                    user.full_name,
                    user.email,
                    user.password_hash,
                    scopes,
                    user.disabled as i64,
                    format_timestamp(user.created_at),
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(inserted > 0)
    }

    pub fn get_user(&self, username: &str) -> ServiceResult<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            params![username],
            UserRecord::from_row,
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }

    pub fn list_users(&self) -> ServiceResult<Vec<UserRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users ORDER BY username",
                USER_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let users = stmt
            .query_map([], UserRecord::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;

        Ok(users)
    }
}

//! Users, password verification and opaque bearer tokens.
//!
//! Tokens are random and never stored; only their SHA-256 digest is kept in
//! memory together with the owner, granted scopes and expiry. Restarting the
//! service therefore invalidates every token.

use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::RequestPartsExt;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SeedUser;
use crate::db::{Database, UserRecord};
use crate::error::{ServiceError, ServiceResult};
use crate::hash::bytes_sha256;

pub const SCOPE_READ: &str = "read";
pub const SCOPE_WRITE: &str = "write";
pub const SCOPE_ADMIN: &str = "admin";

#[derive(Debug, Clone)]
struct IssuedToken {
    username: String,
    scopes: Vec<String>,
    expires_at: DateTime<Utc>,
}

/// Body of a successful token request
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    /// Seconds
    pub expires_in: u64,
    pub scopes: Vec<String>,
}

/// The caller behind a validated bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    token_digest: String,
}

impl AuthUser {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn require_scope(&self, scope: &str) -> ServiceResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden {
                scope: scope.to_string(),
            })
        }
    }
}

fn unauthorized(message: &str) -> ServiceError {
    ServiceError::Unauthorized {
        message: message.to_string(),
    }
}

fn hasher() -> Argon2<'static> {
    // Cheap parameters keep the test suite fast
    #[cfg(test)]
    {
        let params = argon2::Params::new(1024, 1, 1, None).unwrap_or_default();
        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
    }
    #[cfg(not(test))]
    {
        Argon2::default()
    }
}

pub fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| ServiceError::internal(format!("Failed to create salt: {}", e)))?;
    let hash = hasher()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ServiceError::internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

pub struct AuthService {
    db: Arc<Database>,
    token_ttl: Duration,
    /// Keyed by token digest
    tokens: DashMap<String, IssuedToken>,
}

impl AuthService {
    pub fn new(db: Arc<Database>, token_ttl: Duration) -> Self {
        Self {
            db,
            token_ttl,
            tokens: DashMap::new(),
        }
    }

    /// Insert configured users that do not exist yet
    pub fn seed_users(&self, users: &[SeedUser]) -> ServiceResult<usize> {
        let mut inserted = 0;
        for seed in users {
            if self.db.get_user(&seed.username)?.is_some() {
                continue;
            }
            let record = UserRecord {
                username: seed.username.clone(),
                full_name: seed.full_name.clone(),
                email: seed.email.clone(),
                password_hash: hash_password(&seed.password)?,
                scopes: seed.scopes.clone(),
                disabled: seed.disabled,
                created_at: Utc::now(),
            };
            if self.db.insert_user_if_absent(&record)? {
                info!(username = %record.username, "Seeded user");
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Check credentials and return the active user
    pub fn authenticate(&self, username: &str, password: &str) -> ServiceResult<UserRecord> {
        let user = self
            .db
            .get_user(username)?
            .filter(|user| verify_password(password, &user.password_hash))
            .ok_or_else(|| unauthorized("Incorrect username or password"))?;
        if user.disabled {
            return Err(unauthorized("Inactive user"));
        }
        Ok(user)
    }

    /// Authenticate and mint a token. `scope` is a space-separated request;
    /// when empty, every scope the user holds is granted.
    pub fn issue_token(
        &self,
        username: &str,
        password: &str,
        scope: Option<&str>,
    ) -> ServiceResult<TokenResponse> {
        let user = self.authenticate(username, password)?;

        let requested: Vec<&str> = scope.unwrap_or_default().split_whitespace().collect();
        let scopes: Vec<String> = if requested.is_empty() {
            user.scopes.clone()
        } else {
            user.scopes
                .iter()
                .filter(|s| requested.contains(&s.as_str()))
                .cloned()
                .collect()
        };
        if scopes.is_empty() && !requested.is_empty() {
            return Err(ServiceError::Forbidden {
                scope: requested.join(" "),
            });
        }

        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(rand::random::<[u8; 32]>());
        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| ServiceError::internal(format!("Invalid token lifetime: {}", e)))?;
        self.tokens.insert(
            bytes_sha256(token.as_bytes()),
            IssuedToken {
                username: user.username.clone(),
                scopes: scopes.clone(),
                expires_at: Utc::now() + ttl,
            },
        );

        info!(username = %user.username, scopes = ?scopes, "Issued access token");
        Ok(TokenResponse {
            access_token: token,
            token_type: "bearer",
            expires_in: self.token_ttl.as_secs(),
            scopes,
        })
    }

    pub fn validate(&self, token: &str) -> ServiceResult<AuthUser> {
        let digest = bytes_sha256(token.as_bytes());
        let issued = self
            .tokens
            .get(&digest)
            .map(|entry| entry.clone())
            .ok_or_else(|| unauthorized("Could not validate credentials"))?;

        if issued.expires_at <= Utc::now() {
            self.tokens.remove(&digest);
            return Err(unauthorized("Token has expired"));
        }

        Ok(AuthUser {
            username: issued.username,
            scopes: issued.scopes,
            expires_at: issued.expires_at,
            token_digest: digest,
        })
    }

    /// Revoke the token the user authenticated with
    pub fn logout(&self, user: &AuthUser) -> bool {
        let removed = self.tokens.remove(&user.token_digest).is_some();
        debug!(username = %user.username, removed, "Token revoked");
        removed
    }

    /// Drop expired tokens; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, token| token.expires_at > now);
        before - self.tokens.len()
    }

    pub fn active_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn get_user(&self, username: &str) -> ServiceResult<UserRecord> {
        self.db
            .get_user(username)?
            .ok_or_else(|| unauthorized("User no longer exists"))
    }

    pub fn list_users(&self) -> ServiceResult<Vec<UserRecord>> {
        self.db.list_users()
    }
}

/// Router state that can validate bearer tokens
pub trait AuthState {
    fn auth_service(&self) -> &AuthService;
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: AuthState + Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| unauthorized("Not authenticated"))?;

        state.auth_service().validate(bearer.token())
    }
}

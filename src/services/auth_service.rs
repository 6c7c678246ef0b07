//! Domain service for checking identity credentials.
//!
//! Callers only ever see [`AuthError::AuthenticationFailed`]; the factor that
//! failed and why is written to the audit log and to `auth_log`.

use serde::Serialize;
use thiserror::Error;

use crate::db::AuthLogEntry;
use crate::error::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
    pub totp_code: Option<String>,
    /// Address of the device the login arrives through, if known.
    pub device_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub identity: String,
    /// `password` or `password+totp`.
    pub factors: &'static str,
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Checks the password, and the TOTP code when the identity has an
    /// enabled profile. Every attempt is recorded.
    async fn authenticate(&self, request: AuthRequest) -> Result<AuthOutcome, AuthError>;

    async fn authenticate_at(
        &self,
        request: AuthRequest,
        unix_time: u64,
    ) -> Result<AuthOutcome, AuthError>;

    /// Most recent attempts first.
    async fn history(&self, limit: u64) -> Result<Vec<AuthLogEntry>, AuthError>;
}

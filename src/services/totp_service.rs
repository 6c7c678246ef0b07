//! Domain service for TOTP second-factor credentials.
//!
//! A profile moves through `provisioned -> enabled -> disabled`, or is
//! deleted. The secret is only ever handed out while the profile is
//! provisioned and not yet enabled.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::{CredentialError, StoreError, ValidationError};
use crate::totp::Algorithm;

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("Identity '{0}' not found")]
    IdentityNotFound(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Secret is no longer revealable once the profile has been enabled")]
    SecretSealed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TotpState {
    Provisioned,
    Enabled,
    Disabled,
}

impl TotpState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioned => "provisioned",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for TotpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overrides of the `[totp]` defaults for one provisioning.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub identity: String,
    pub issuer: Option<String>,
    pub label: Option<String>,
    pub digits: Option<u32>,
    pub period: Option<u32>,
    pub algorithm: Option<Algorithm>,
}

/// Enrollment material. Only produced by provision and reveal.
#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub identity: String,
    pub secret: String,
    pub uri: String,
    pub issuer: String,
    pub label: String,
    pub digits: u32,
    pub period: u32,
    pub algorithm: Algorithm,
}

/// Profile status without any secret material.
#[derive(Debug, Clone, Serialize)]
pub struct TotpProfileInfo {
    pub identity: String,
    pub state: TotpState,
    pub issuer: String,
    pub label: String,
    pub digits: u32,
    pub period: u32,
    pub algorithm: Algorithm,
    pub last_used_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[async_trait::async_trait]
pub trait TotpService: Send + Sync {
    /// Generates a new secret, replacing any existing profile.
    async fn provision(&self, request: ProvisionRequest) -> Result<Enrollment, TotpError>;

    async fn reveal(&self, identity: &str) -> Result<Enrollment, TotpError>;

    /// Enables the profile once a valid code proves enrollment.
    async fn enable(&self, identity: &str, code: &str) -> Result<(), TotpError>;

    async fn enable_at(&self, identity: &str, code: &str, unix_time: u64)
    -> Result<(), TotpError>;

    /// Validates a code against the current time and consumes its step.
    async fn verify(&self, identity: &str, code: &str) -> Result<u64, TotpError>;

    async fn verify_at(&self, identity: &str, code: &str, unix_time: u64)
    -> Result<u64, TotpError>;

    async fn disable(&self, identity: &str) -> Result<(), TotpError>;

    async fn delete(&self, identity: &str) -> Result<(), TotpError>;

    /// `None` when the identity has no profile.
    async fn status(&self, identity: &str) -> Result<Option<TotpProfileInfo>, TotpError>;
}

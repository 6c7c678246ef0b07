//! Error taxonomy shared by the policy core.
//!
//! Services wrap these in their own error enums; nothing here is fatal to the
//! process.

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Malformed input, reported with the offending field. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A dangling reference found while compiling a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("access rule {rule_id} references missing {entity} {id}")]
    DanglingRuleReference {
        rule_id: i32,
        entity: &'static str,
        id: i32,
    },

    #[error(
        "access rule {rule_id} grants group '{group}' on device group '{device_group}' \
         but no access policy links them"
    )]
    MissingPolicyLink {
        rule_id: i32,
        group: String,
        device_group: String,
    },

    #[error("{relation} references missing {entity} {id}")]
    DanglingReference {
        relation: &'static str,
        entity: &'static str,
        id: i32,
    },
}

/// Second-factor failures. Shown to end users only as a generic
/// authentication failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("no TOTP profile for identity")]
    ProfileMissing,

    #[error("TOTP profile is disabled")]
    ProfileDisabled,

    #[error("TOTP profile is already enabled")]
    AlreadyEnabled,

    #[error("TOTP code does not match")]
    InvalidCode,

    #[error("TOTP code was already used")]
    Replay,

    #[error("identity is disabled")]
    IdentityDisabled,

    #[error("stored TOTP secret is malformed")]
    MalformedSecret,
}

/// Failures of the persistence layer. Callers may retry with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("stored record is invalid: {0}")]
    InvalidRecord(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => Self::Conflict(msg),
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => Self::Conflict(msg),
            _ => match err {
                DbErr::RecordNotFound(what) => Self::NotFound(what),
                other => Self::Database(other.to_string()),
            },
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidRecord(err.to_string())
    }
}

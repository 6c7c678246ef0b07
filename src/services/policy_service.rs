//! Domain service for administering the AAA policy.
//!
//! Every write validates its input shape before touching the store and fails
//! with a [`ValidationError`] naming the offending field.

use std::str::FromStr;

use thiserror::Error;

use crate::db::{DeleteOutcome, GroupMember};
use crate::error::{StoreError, ValidationError};
use crate::policy::{
    AccessRule, Action, CommandFilterEntry, Device, DeviceGroup, EffectiveRule, Identity,
    IdentityGroup, PolicySnapshot,
};

/// Errors specific to policy administration.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for PolicyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for PolicyError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentitySpec {
    pub name: String,
    /// Plain-text password to hash; `None` leaves the credential unchanged.
    pub password: Option<String>,
    /// Ready-made bcrypt hash stored as is.
    pub password_hash: Option<String>,
    /// Drops the stored password hash.
    pub clear_password: bool,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceSpec {
    pub name: String,
    pub address: String,
    pub secret: String,
    pub description: Option<String>,
    pub enabled: bool,
}

/// One command filter entry of a rule to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub action: String,
    pub pattern: String,
}

impl FilterSpec {
    #[must_use]
    pub fn new(action: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            pattern: pattern.into(),
        }
    }
}

/// Parses `ACTION:PATTERN`. Patterns may themselves contain ':'.
impl FromStr for FilterSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (action, pattern) = s
            .split_once(':')
            .ok_or_else(|| ValidationError::new("filter", "expected ACTION:PATTERN"))?;
        Ok(Self::new(action.trim(), pattern))
    }
}

/// A rule to create. Exactly one of `identity` and `group` must be set.
#[derive(Debug, Clone, Default)]
pub struct RuleSpec {
    pub identity: Option<String>,
    pub group: Option<String>,
    pub device_group: String,
    pub service: Option<String>,
    pub priv_lvl: i32,
    pub action: String,
    /// Command filter entries, in evaluation order.
    pub filters: Vec<FilterSpec>,
    pub av_pairs: Vec<(String, String)>,
}

/// Access of one identity to one device.
#[derive(Debug, Clone)]
pub struct DeviceAccess {
    pub device: String,
    pub address: String,
    pub device_group: Option<String>,
    pub rules: Vec<EffectiveRule>,
}

#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub device_group: Option<String>,
    pub rule: EffectiveRule,
    /// Outcome of the command check, when a command was given.
    pub command: Option<Action>,
}

/// Domain service trait for policy administration.
#[async_trait::async_trait]
pub trait PolicyService: Send + Sync {
    async fn put_identity(&self, spec: IdentitySpec) -> Result<Identity, PolicyError>;

    async fn get_identity(&self, name: &str) -> Result<Identity, PolicyError>;

    async fn list_identities(&self) -> Result<Vec<Identity>, PolicyError>;

    async fn set_identity_enabled(&self, name: &str, enabled: bool) -> Result<(), PolicyError>;

    async fn set_attribute(&self, name: &str, key: &str, value: &str) -> Result<(), PolicyError>;

    async fn unset_attribute(&self, name: &str, key: &str) -> Result<(), PolicyError>;

    /// Disables instead of deleting when history references the identity,
    /// unless `force` is set.
    async fn delete_identity(&self, name: &str, force: bool)
    -> Result<DeleteOutcome, PolicyError>;

    async fn put_group(
        &self,
        name: &str,
        description: Option<&str>,
        enabled: bool,
    ) -> Result<IdentityGroup, PolicyError>;

    async fn get_group(&self, name: &str) -> Result<(IdentityGroup, Vec<GroupMember>), PolicyError>;

    async fn list_groups(&self) -> Result<Vec<IdentityGroup>, PolicyError>;

    async fn delete_group(&self, name: &str) -> Result<(), PolicyError>;

    async fn add_member(&self, identity: &str, group: &str, priority: i32)
    -> Result<(), PolicyError>;

    async fn remove_member(&self, identity: &str, group: &str) -> Result<(), PolicyError>;

    async fn put_device(&self, spec: DeviceSpec) -> Result<Device, PolicyError>;

    /// Looks a device up by name, then by address.
    async fn get_device(&self, name_or_address: &str) -> Result<Device, PolicyError>;

    async fn list_devices(&self) -> Result<Vec<Device>, PolicyError>;

    async fn delete_device(&self, name: &str) -> Result<(), PolicyError>;

    async fn put_device_group(
        &self,
        name: &str,
        secret: Option<&str>,
        description: Option<&str>,
    ) -> Result<DeviceGroup, PolicyError>;

    async fn get_device_group(&self, name: &str)
    -> Result<(DeviceGroup, Vec<String>), PolicyError>;

    async fn list_device_groups(&self) -> Result<Vec<DeviceGroup>, PolicyError>;

    async fn delete_device_group(&self, name: &str) -> Result<(), PolicyError>;

    async fn add_device(&self, device: &str, device_group: &str) -> Result<(), PolicyError>;

    async fn remove_device(&self, device: &str, device_group: &str) -> Result<(), PolicyError>;

    async fn link(&self, group: &str, device_group: &str) -> Result<(), PolicyError>;

    async fn unlink(&self, group: &str, device_group: &str) -> Result<(), PolicyError>;

    /// `(identity group, device group)` names, sorted.
    async fn list_links(&self) -> Result<Vec<(String, String)>, PolicyError>;

    async fn create_rule(&self, spec: RuleSpec) -> Result<AccessRule, PolicyError>;

    async fn append_filter(
        &self,
        rule_id: i32,
        pattern: &str,
        action: &str,
    ) -> Result<CommandFilterEntry, PolicyError>;

    async fn delete_rule(&self, rule_id: i32) -> Result<(), PolicyError>;

    async fn list_rules(&self) -> Result<Vec<AccessRule>, PolicyError>;

    async fn snapshot(&self) -> Result<PolicySnapshot, PolicyError>;

    /// Effective access of an identity on every enabled device.
    async fn access(&self, identity: &str) -> Result<Vec<DeviceAccess>, PolicyError>;

    /// Effective rule for one identity, device and service, optionally
    /// checking a command line against its filter.
    async fn evaluate(
        &self,
        identity: &str,
        device: &str,
        service: Option<&str>,
        command: Option<&str>,
    ) -> Result<AccessDecision, PolicyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_spec_splits_on_first_colon() {
        let spec: FilterSpec = "permit:show ip route vrf a:b".parse().unwrap();
        assert_eq!(spec, FilterSpec::new("permit", "show ip route vrf a:b"));

        let spec: FilterSpec = "deny:permit".parse().unwrap();
        assert_eq!(spec.action, "deny");
        assert_eq!(spec.pattern, "permit");

        let missing = "show version".parse::<FilterSpec>();
        assert!(matches!(missing, Err(e) if e.field == "filter"));
    }
}

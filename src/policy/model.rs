//! Typed, store-independent view of the whole AAA policy.
//!
//! A [`PolicySnapshot`] is read in one transaction and never mutated; the
//! evaluator and the compiler only ever look at snapshots.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{ResolutionError, ValidationError};

/// Service name used when a rule does not name one.
pub const DEFAULT_SERVICE: &str = "exec";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Permit,
    Deny,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permit => "permit",
            Self::Deny => "deny",
        }
    }

    #[must_use]
    pub const fn is_permit(self) -> bool {
        matches!(self, Self::Permit)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permit" => Ok(Self::Permit),
            "deny" => Ok(Self::Deny),
            other => Err(ValidationError::new(
                "action",
                format!("expected permit or deny, got '{other}'"),
            )),
        }
    }
}

/// Cisco-style privilege level, 0 through 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct PrivLevel(u8);

impl PrivLevel {
    pub const MAX: u8 = 15;

    pub fn new(level: i32) -> Result<Self, ValidationError> {
        u8::try_from(level)
            .ok()
            .filter(|l| *l <= Self::MAX)
            .map(Self)
            .ok_or_else(|| {
                ValidationError::new(
                    "priv_lvl",
                    format!("must be between 0 and {}, got {level}", Self::MAX),
                )
            })
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PrivLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i32,
    pub name: String,
    /// Password hash, `None` when the identity cannot log in with a password.
    pub credential: Option<String>,
    pub enabled: bool,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityGroup {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
}

/// Identity membership in a group. Lower priority wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub identity_id: i32,
    pub group_id: i32,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub secret: String,
    pub description: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub id: i32,
    pub name: String,
    pub secret: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMembership {
    pub device_id: i32,
    pub group_id: i32,
}

/// Link allowing an identity group's rules to apply on a device group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub group_id: i32,
    pub device_group_id: i32,
}

/// What an access rule is attached to. Exactly one of the two, always.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleSubject {
    Identity(i32),
    Group(i32),
}

impl RuleSubject {
    /// Builds a subject from the two nullable store columns.
    pub fn from_columns(
        identity_id: Option<i32>,
        group_id: Option<i32>,
    ) -> Result<Self, ValidationError> {
        match (identity_id, group_id) {
            (Some(id), None) => Ok(Self::Identity(id)),
            (None, Some(id)) => Ok(Self::Group(id)),
            (Some(_), Some(_)) => Err(ValidationError::new(
                "subject",
                "an access rule cannot be bound to both an identity and a group",
            )),
            (None, None) => Err(ValidationError::new(
                "subject",
                "an access rule must be bound to an identity or a group",
            )),
        }
    }

    #[must_use]
    pub const fn identity_id(self) -> Option<i32> {
        match self {
            Self::Identity(id) => Some(id),
            Self::Group(_) => None,
        }
    }

    #[must_use]
    pub const fn group_id(self) -> Option<i32> {
        match self {
            Self::Group(id) => Some(id),
            Self::Identity(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandFilterEntry {
    pub ordinal: i32,
    pub pattern: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AvPair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub id: i32,
    pub subject: RuleSubject,
    pub device_group_id: i32,
    pub service: String,
    pub priv_lvl: PrivLevel,
    pub action: Action,
    /// Sorted by ordinal.
    pub filters: Vec<CommandFilterEntry>,
    pub av_pairs: Vec<AvPair>,
}

/// Second-factor status of an identity. Secret material never enters a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotpStatus {
    pub identity_id: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub identities: Vec<Identity>,
    pub groups: Vec<IdentityGroup>,
    pub memberships: Vec<Membership>,
    pub devices: Vec<Device>,
    pub device_groups: Vec<DeviceGroup>,
    pub device_memberships: Vec<DeviceMembership>,
    pub policies: Vec<AccessPolicy>,
    pub rules: Vec<AccessRule>,
    pub totp: Vec<TotpStatus>,
}

impl PolicySnapshot {
    /// Checks that every relation points at an entity present in the snapshot
    /// and that every group rule is backed by an access policy link.
    pub fn check_references(&self) -> Result<(), ResolutionError> {
        let identities: HashSet<i32> = self.identities.iter().map(|i| i.id).collect();
        let groups: HashMap<i32, &str> =
            self.groups.iter().map(|g| (g.id, g.name.as_str())).collect();
        let devices: HashSet<i32> = self.devices.iter().map(|d| d.id).collect();
        let device_groups: HashMap<i32, &str> = self
            .device_groups
            .iter()
            .map(|g| (g.id, g.name.as_str()))
            .collect();
        let links: HashSet<(i32, i32)> = self
            .policies
            .iter()
            .map(|p| (p.group_id, p.device_group_id))
            .collect();

        let dangling = |relation, entity, id| ResolutionError::DanglingReference {
            relation,
            entity,
            id,
        };

        for m in &self.memberships {
            if !identities.contains(&m.identity_id) {
                return Err(dangling("group membership", "identity", m.identity_id));
            }
            if !groups.contains_key(&m.group_id) {
                return Err(dangling("group membership", "identity group", m.group_id));
            }
        }

        for m in &self.device_memberships {
            if !devices.contains(&m.device_id) {
                return Err(dangling("device group membership", "device", m.device_id));
            }
            if !device_groups.contains_key(&m.group_id) {
                return Err(dangling("device group membership", "device group", m.group_id));
            }
        }

        for p in &self.policies {
            if !groups.contains_key(&p.group_id) {
                return Err(dangling("access policy", "identity group", p.group_id));
            }
            if !device_groups.contains_key(&p.device_group_id) {
                return Err(dangling("access policy", "device group", p.device_group_id));
            }
        }

        for t in &self.totp {
            if !identities.contains(&t.identity_id) {
                return Err(dangling("totp profile", "identity", t.identity_id));
            }
        }

        for rule in &self.rules {
            let Some(device_group) = device_groups.get(&rule.device_group_id) else {
                return Err(ResolutionError::DanglingRuleReference {
                    rule_id: rule.id,
                    entity: "device group",
                    id: rule.device_group_id,
                });
            };

            match rule.subject {
                RuleSubject::Identity(id) if !identities.contains(&id) => {
                    return Err(ResolutionError::DanglingRuleReference {
                        rule_id: rule.id,
                        entity: "identity",
                        id,
                    });
                }
                RuleSubject::Identity(_) => {}
                RuleSubject::Group(id) => {
                    let Some(group) = groups.get(&id) else {
                        return Err(ResolutionError::DanglingRuleReference {
                            rule_id: rule.id,
                            entity: "identity group",
                            id,
                        });
                    };
                    if !links.contains(&(id, rule.device_group_id)) {
                        return Err(ResolutionError::MissingPolicyLink {
                            rule_id: rule.id,
                            group: (*group).to_string(),
                            device_group: (*device_group).to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn identity_by_name(&self, name: &str) -> Option<&Identity> {
        self.identities
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Distinct patterns used by any command filter in the snapshot.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .flat_map(|r| r.filters.iter().map(|f| f.pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i32, subject: RuleSubject, device_group_id: i32) -> AccessRule {
        AccessRule {
            id,
            subject,
            device_group_id,
            service: DEFAULT_SERVICE.to_string(),
            priv_lvl: PrivLevel::new(15).unwrap(),
            action: Action::Permit,
            filters: vec![],
            av_pairs: vec![],
        }
    }

    fn base() -> PolicySnapshot {
        PolicySnapshot {
            identities: vec![Identity {
                id: 1,
                name: "netadmin".to_string(),
                credential: None,
                enabled: true,
                attributes: BTreeMap::new(),
            }],
            groups: vec![IdentityGroup {
                id: 10,
                name: "network-admins".to_string(),
                description: None,
                enabled: true,
            }],
            device_groups: vec![DeviceGroup {
                id: 100,
                name: "core-routers".to_string(),
                secret: None,
                description: None,
            }],
            ..PolicySnapshot::default()
        }
    }

    #[test]
    fn subject_requires_exactly_one_binding() {
        assert_eq!(
            RuleSubject::from_columns(Some(1), None).unwrap(),
            RuleSubject::Identity(1)
        );
        assert_eq!(
            RuleSubject::from_columns(None, Some(2)).unwrap(),
            RuleSubject::Group(2)
        );

        let both = RuleSubject::from_columns(Some(1), Some(2)).unwrap_err();
        assert_eq!(both.field, "subject");
        let neither = RuleSubject::from_columns(None, None).unwrap_err();
        assert_eq!(neither.field, "subject");
    }

    #[test]
    fn priv_level_range() {
        assert_eq!(PrivLevel::new(0).unwrap().value(), 0);
        assert_eq!(PrivLevel::new(15).unwrap().value(), 15);
        assert_eq!(PrivLevel::new(16).unwrap_err().field, "priv_lvl");
        assert!(PrivLevel::new(-1).is_err());
    }

    #[test]
    fn action_parsing_is_case_insensitive() {
        assert_eq!("PERMIT".parse::<Action>().unwrap(), Action::Permit);
        assert_eq!(" deny ".parse::<Action>().unwrap(), Action::Deny);
        assert!("allow".parse::<Action>().is_err());
    }

    #[test]
    fn group_rule_without_policy_link_is_unresolved() {
        let mut snapshot = base();
        snapshot.rules.push(rule(7, RuleSubject::Group(10), 100));

        let err = snapshot.check_references().unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::MissingPolicyLink { rule_id: 7, .. }
        ));

        snapshot.policies.push(AccessPolicy {
            group_id: 10,
            device_group_id: 100,
        });
        assert!(snapshot.check_references().is_ok());
    }

    #[test]
    fn rule_pointing_at_missing_identity_is_unresolved() {
        let mut snapshot = base();
        snapshot.rules.push(rule(3, RuleSubject::Identity(99), 100));

        assert_eq!(
            snapshot.check_references().unwrap_err(),
            ResolutionError::DanglingRuleReference {
                rule_id: 3,
                entity: "identity",
                id: 99
            }
        );
    }

    #[test]
    fn membership_pointing_at_missing_group_is_unresolved() {
        let mut snapshot = base();
        snapshot.memberships.push(Membership {
            identity_id: 1,
            group_id: 42,
            priority: 10,
        });

        assert!(matches!(
            snapshot.check_references().unwrap_err(),
            ResolutionError::DanglingReference { id: 42, .. }
        ));
    }
}

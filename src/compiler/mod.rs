//! Turns a [`PolicySnapshot`] into the three daemon configuration artifacts.
//!
//! Compilation is all-or-nothing and deterministic: every collection is
//! sorted by its natural key before emission, so the same snapshot always
//! yields byte-identical output regardless of the order rows were read in.

pub mod grammar;
pub mod publish;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{ResolutionError, ValidationError};
use crate::policy::filter::{self, PatternCache};
use crate::policy::{AccessEvaluator, CommandFilter, PolicySnapshot, validate};
use grammar::{Writer, bare, quoted};

pub use publish::{PublishError, PublishReport, publish};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Users,
    Hosts,
    HostGroups,
}

impl ArtifactKind {
    pub const ALL: [Self; 3] = [Self::Users, Self::Hosts, Self::HostGroups];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Hosts => "hosts",
            Self::HostGroups => "host_groups",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub content: String,
    /// Number of top-level blocks emitted.
    pub records: usize,
}

impl Artifact {
    fn from_writer(kind: ArtifactKind, writer: Writer) -> Self {
        let (content, records) = writer.finish();
        Self {
            kind,
            content,
            records,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledConfig {
    pub users: Artifact,
    pub hosts: Artifact,
    pub host_groups: Artifact,
}

impl CompiledConfig {
    #[must_use]
    pub fn artifacts(&self) -> [&Artifact; 3] {
        [&self.users, &self.hosts, &self.host_groups]
    }

    #[must_use]
    pub fn counts(&self) -> BTreeMap<ArtifactKind, usize> {
        self.artifacts()
            .iter()
            .map(|a| (a.kind, a.records))
            .collect()
    }
}

/// Resolves, validates and emits the whole snapshot.
pub fn compile(snapshot: &PolicySnapshot) -> Result<CompiledConfig, CompileError> {
    snapshot.check_references()?;

    let cache = PatternCache::build(snapshot.patterns())?;
    for rule in &snapshot.rules {
        filter::check_entries(&rule.filters)?;
    }

    let evaluator = AccessEvaluator::new(snapshot);

    let users = emit_users(&evaluator, &cache)?;
    let hosts = emit_hosts(&evaluator)?;
    let host_groups = emit_host_groups(snapshot)?;

    debug!(
        users = users.records,
        hosts = hosts.records,
        host_groups = host_groups.records,
        patterns = cache.len(),
        "Compiled policy snapshot"
    );

    Ok(CompiledConfig {
        users,
        hosts,
        host_groups,
    })
}

fn emit_users(
    evaluator: &AccessEvaluator<'_>,
    cache: &PatternCache,
) -> Result<Artifact, CompileError> {
    let snapshot = evaluator.snapshot();

    let groups: HashMap<i32, &crate::policy::IdentityGroup> =
        snapshot.groups.iter().map(|g| (g.id, g)).collect();
    let mfa: HashSet<i32> = snapshot
        .totp
        .iter()
        .filter(|t| t.enabled)
        .map(|t| t.identity_id)
        .collect();

    let mut device_groups: Vec<_> = snapshot.device_groups.iter().collect();
    device_groups.sort_by(|a, b| a.name.cmp(&b.name));

    let mut identities: Vec<_> = snapshot.identities.iter().filter(|i| i.enabled).collect();
    identities.sort_by(|a, b| a.name.cmp(&b.name));

    let mut w = Writer::new(ArtifactKind::Users.as_str());

    for identity in identities {
        w.open("user", bare("identity name", &identity.name)?);

        if let Some(hash) = &identity.credential {
            let hash = validate::crypt_hash(hash)?;
            w.line(&format!("password login = crypt {}", quoted("password", hash)?));
        }

        let mut member_of: Vec<(i32, &str)> = snapshot
            .memberships
            .iter()
            .filter(|m| m.identity_id == identity.id)
            .filter_map(|m| {
                groups
                    .get(&m.group_id)
                    .filter(|g| g.enabled)
                    .map(|g| (m.priority, g.name.as_str()))
            })
            .collect();
        member_of.sort_unstable();
        if !member_of.is_empty() {
            let names = member_of
                .iter()
                .map(|(_, name)| bare("group name", name))
                .collect::<Result<Vec<_>, _>>()?;
            w.assign("member", &names.join(","));
        }

        if mfa.contains(&identity.id) {
            w.assign("mfa", "totp");
        }

        for (key, value) in &identity.attributes {
            w.assign(
                &format!("attribute {}", bare("attribute key", key)?),
                &quoted("attribute value", value)?,
            );
        }

        for device_group in &device_groups {
            let effective = evaluator.evaluate_all(identity.id, device_group.id);
            if effective.is_empty() {
                continue;
            }

            w.open("profile", bare("device group name", &device_group.name)?);
            for rule in effective {
                // Resolves every pattern of the winning rule against the cache.
                rule.command_filter(cache)?;

                w.open("service", bare("service", &rule.service)?);
                w.assign("action", rule.action.as_str());
                w.assign("priv-lvl", &rule.priv_lvl.to_string());
                for entry in &rule.filters {
                    w.line(&format!(
                        "cmd {} {}",
                        entry.action,
                        quoted("pattern", &filter::normalize_pattern(&entry.pattern))?
                    ));
                }
                w.assign("cmd default", CommandFilter::DEFAULT_ACTION.as_str());
                for pair in &rule.av_pairs {
                    w.assign(
                        &format!("set {}", bare("av-pair key", &pair.key)?),
                        &quoted("av-pair value", &pair.value)?,
                    );
                }
                w.close();
            }
            w.close();
        }

        w.close();
    }

    Ok(Artifact::from_writer(ArtifactKind::Users, w))
}

fn emit_hosts(evaluator: &AccessEvaluator<'_>) -> Result<Artifact, CompileError> {
    let snapshot = evaluator.snapshot();

    let mut group_count: HashMap<i32, usize> = HashMap::new();
    for m in &snapshot.device_memberships {
        *group_count.entry(m.device_id).or_default() += 1;
    }

    let mut devices: Vec<_> = snapshot.devices.iter().filter(|d| d.enabled).collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name));

    let mut w = Writer::new(ArtifactKind::Hosts.as_str());

    for device in devices {
        w.open("host", bare("device name", &device.name)?);
        w.assign("address", bare("address", &device.address)?);
        w.assign("key", &quoted("secret", &device.secret)?);
        if let Some(description) = &device.description {
            w.assign("description", &quoted("description", description)?);
        }
        if let Some(group) = evaluator.device_group_of(device.id) {
            if group_count.get(&device.id).copied().unwrap_or(0) > 1 {
                warn!(
                    device = %device.name,
                    template = %group.name,
                    "Device belongs to several device groups; only the first by name applies"
                );
            }
            w.assign("template", bare("device group name", &group.name)?);
        }
        w.close();
    }

    Ok(Artifact::from_writer(ArtifactKind::Hosts, w))
}

fn emit_host_groups(snapshot: &PolicySnapshot) -> Result<Artifact, CompileError> {
    let group_names: HashMap<i32, &str> = snapshot
        .groups
        .iter()
        .map(|g| (g.id, g.name.as_str()))
        .collect();

    let mut device_groups: Vec<_> = snapshot.device_groups.iter().collect();
    device_groups.sort_by(|a, b| a.name.cmp(&b.name));

    let mut w = Writer::new(ArtifactKind::HostGroups.as_str());

    for device_group in device_groups {
        w.open("hostgroup", bare("device group name", &device_group.name)?);
        if let Some(description) = &device_group.description {
            w.assign("description", &quoted("description", description)?);
        }
        if let Some(secret) = &device_group.secret {
            w.assign("key", &quoted("secret", secret)?);
        }

        let mut linked: Vec<&str> = snapshot
            .policies
            .iter()
            .filter(|p| p.device_group_id == device_group.id)
            .filter_map(|p| group_names.get(&p.group_id).copied())
            .collect();
        linked.sort_unstable();
        for name in linked {
            w.assign("policy", bare("group name", name)?);
        }

        w.close();
    }

    Ok(Artifact::from_writer(ArtifactKind::HostGroups, w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        AccessPolicy, AccessRule, Action, AvPair, CommandFilterEntry, Device, DeviceGroup,
        DeviceMembership, Identity, IdentityGroup, Membership, PrivLevel, RuleSubject, TotpStatus,
    };

    const HASH: &str = "$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW";

    fn snapshot() -> PolicySnapshot {
        PolicySnapshot {
            identities: vec![
                Identity {
                    id: 2,
                    name: "operator".to_string(),
                    credential: None,
                    enabled: true,
                    attributes: BTreeMap::new(),
                },
                Identity {
                    id: 1,
                    name: "netadmin".to_string(),
                    credential: Some(HASH.to_string()),
                    enabled: true,
                    attributes: BTreeMap::from([("department".to_string(), "noc \"east\"".to_string())]),
                },
                Identity {
                    id: 3,
                    name: "retired".to_string(),
                    credential: None,
                    enabled: false,
                    attributes: BTreeMap::new(),
                },
            ],
            groups: vec![IdentityGroup {
                id: 10,
                name: "network-admins".to_string(),
                description: None,
                enabled: true,
            }],
            memberships: vec![Membership {
                identity_id: 1,
                group_id: 10,
                priority: 10,
            }],
            devices: vec![Device {
                id: 100,
                name: "core-r1".to_string(),
                address: "10.0.0.1".to_string(),
                secret: "tac key".to_string(),
                description: Some("rack {4}".to_string()),
                enabled: true,
            }],
            device_groups: vec![DeviceGroup {
                id: 50,
                name: "core-routers".to_string(),
                secret: None,
                description: Some("Core".to_string()),
            }],
            device_memberships: vec![DeviceMembership {
                device_id: 100,
                group_id: 50,
            }],
            policies: vec![AccessPolicy {
                group_id: 10,
                device_group_id: 50,
            }],
            rules: vec![AccessRule {
                id: 7,
                subject: RuleSubject::Group(10),
                device_group_id: 50,
                service: "exec".to_string(),
                priv_lvl: PrivLevel::new(15).unwrap(),
                action: Action::Permit,
                filters: vec![
                    CommandFilterEntry {
                        ordinal: 1,
                        pattern: "show running-config.*".to_string(),
                        action: Action::Deny,
                    },
                    CommandFilterEntry {
                        ordinal: 2,
                        pattern: "^show .*".to_string(),
                        action: Action::Permit,
                    },
                ],
                av_pairs: vec![AvPair {
                    key: "timeout".to_string(),
                    value: "30".to_string(),
                }],
            }],
            totp: vec![TotpStatus {
                identity_id: 1,
                enabled: true,
            }],
        }
    }

    #[test]
    fn users_artifact_layout() {
        let compiled = compile(&snapshot()).unwrap();
        assert_eq!(
            compiled.users.content,
            "# generated by tacman; artifact=users; format=1\n\
             \n\
             user netadmin {\n\
             \tpassword login = crypt \"$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW\"\n\
             \tmember = network-admins\n\
             \tmfa = totp\n\
             \tattribute department = \"noc \\\"east\\\"\"\n\
             \tprofile core-routers {\n\
             \t\tservice exec {\n\
             \t\t\taction = permit\n\
             \t\t\tpriv-lvl = 15\n\
             \t\t\tcmd deny \"^(?:show running-config.*)$\"\n\
             \t\t\tcmd permit \"^(?:show .*)$\"\n\
             \t\t\tcmd default = deny\n\
             \t\t\tset timeout = \"30\"\n\
             \t\t}\n\
             \t}\n\
             }\n\
             \n\
             user operator {\n\
             }\n"
        );
        assert_eq!(compiled.users.records, 2);
    }

    #[test]
    fn hosts_and_host_groups() {
        let compiled = compile(&snapshot()).unwrap();
        assert_eq!(
            compiled.hosts.content,
            "# generated by tacman; artifact=hosts; format=1\n\
             \n\
             host core-r1 {\n\
             \taddress = 10.0.0.1\n\
             \tkey = \"tac key\"\n\
             \tdescription = \"rack \\{4\\}\"\n\
             \ttemplate = core-routers\n\
             }\n"
        );
        assert_eq!(
            compiled.host_groups.content,
            "# generated by tacman; artifact=host_groups; format=1\n\
             \n\
             hostgroup core-routers {\n\
             \tdescription = \"Core\"\n\
             \tpolicy = network-admins\n\
             }\n"
        );
        assert_eq!(compiled.counts()[&ArtifactKind::Hosts], 1);
        assert_eq!(compiled.counts()[&ArtifactKind::HostGroups], 1);
    }

    #[test]
    fn compile_is_idempotent_and_order_independent() {
        let first = compile(&snapshot()).unwrap();
        let second = compile(&snapshot()).unwrap();
        assert_eq!(first, second);

        let mut shuffled = snapshot();
        shuffled.identities.reverse();
        shuffled.rules[0].filters.reverse();
        assert_eq!(compile(&shuffled).unwrap(), first);
    }

    /// Two groups tied at priority 10 for netadmin, a device in two device
    /// groups, and rules on several services and subjects.
    fn wide_snapshot() -> PolicySnapshot {
        let mut s = snapshot();
        s.groups.extend([
            IdentityGroup {
                id: 11,
                name: "auditors".to_string(),
                description: None,
                enabled: true,
            },
            IdentityGroup {
                id: 12,
                name: "backup".to_string(),
                description: None,
                enabled: true,
            },
        ]);
        s.memberships.extend([
            Membership {
                identity_id: 1,
                group_id: 11,
                priority: 10,
            },
            Membership {
                identity_id: 2,
                group_id: 12,
                priority: 5,
            },
            Membership {
                identity_id: 2,
                group_id: 11,
                priority: 5,
            },
        ]);
        s.devices.push(Device {
            id: 101,
            name: "edge-sw1".to_string(),
            address: "10.0.1.1".to_string(),
            secret: "sw key".to_string(),
            description: None,
            enabled: true,
        });
        s.device_groups.push(DeviceGroup {
            id: 51,
            name: "access-switches".to_string(),
            secret: Some("group key".to_string()),
            description: None,
        });
        s.device_memberships.extend([
            DeviceMembership {
                device_id: 101,
                group_id: 51,
            },
            DeviceMembership {
                device_id: 100,
                group_id: 51,
            },
        ]);
        s.policies.extend([
            AccessPolicy {
                group_id: 11,
                device_group_id: 50,
            },
            AccessPolicy {
                group_id: 11,
                device_group_id: 51,
            },
            AccessPolicy {
                group_id: 12,
                device_group_id: 51,
            },
        ]);
        let rule = |id, subject, device_group_id, service: &str, level, action| AccessRule {
            id,
            subject,
            device_group_id,
            service: service.to_string(),
            priv_lvl: PrivLevel::new(level).unwrap(),
            action,
            filters: vec![],
            av_pairs: vec![],
        };
        let mut junos = rule(9, RuleSubject::Group(12), 51, "junos-exec", 5, Action::Permit);
        junos.av_pairs = vec![
            AvPair {
                key: "local-user-name".to_string(),
                value: "backup".to_string(),
            },
            AvPair {
                key: "allow-commands".to_string(),
                value: "show".to_string(),
            },
        ];
        let mut direct = rule(10, RuleSubject::Identity(2), 51, "exec", 3, Action::Permit);
        direct.filters = vec![
            CommandFilterEntry {
                ordinal: 2,
                pattern: "ping .*".to_string(),
                action: Action::Permit,
            },
            CommandFilterEntry {
                ordinal: 1,
                pattern: "reload".to_string(),
                action: Action::Deny,
            },
        ];
        s.rules.extend([
            rule(8, RuleSubject::Group(11), 50, "exec", 1, Action::Deny),
            junos,
            direct,
            rule(11, RuleSubject::Group(11), 51, "exec", 1, Action::Permit),
        ]);
        s
    }

    fn permute(mut s: PolicySnapshot, n: usize) -> PolicySnapshot {
        fn turn<T>(v: &mut [T], n: usize) {
            if !v.is_empty() {
                v.rotate_left(n % v.len());
            }
            if n % 2 == 1 {
                v.reverse();
            }
        }
        turn(&mut s.identities, n);
        turn(&mut s.groups, n);
        turn(&mut s.memberships, n);
        turn(&mut s.devices, n);
        turn(&mut s.device_groups, n);
        turn(&mut s.device_memberships, n);
        turn(&mut s.policies, n);
        turn(&mut s.rules, n);
        turn(&mut s.totp, n);
        for rule in &mut s.rules {
            turn(&mut rule.filters, n);
            turn(&mut rule.av_pairs, n);
        }
        s
    }

    #[test]
    fn every_collection_is_order_independent() {
        let expected = compile(&wide_snapshot()).unwrap();

        // Tied groups are listed by name; the tied deny on core-routers wins.
        assert!(expected
            .users
            .content
            .contains("\tmember = auditors,network-admins\n"));
        assert!(expected.users.content.contains("\tmember = auditors,backup\n"));
        assert!(expected
            .host_groups
            .content
            .contains("\tpolicy = auditors\n\tpolicy = backup\n"));

        for n in 1..8 {
            assert_eq!(compile(&permute(wide_snapshot(), n)).unwrap(), expected, "permutation {n}");
        }
    }

    #[test]
    fn non_crypt_credential_is_rejected() {
        let mut s = snapshot();
        s.identities[1].credential = Some("$argon2id$v=19$m=8192,t=3,p=1$c2FsdA$aGFzaA".to_string());
        let err = compile(&s).unwrap_err();
        assert!(matches!(err, CompileError::Validation(ref v) if v.field == "password_hash"));
    }

    #[test]
    fn unresolved_rule_fails_whole_compile() {
        let mut s = snapshot();
        s.policies.clear();
        assert!(matches!(
            compile(&s).unwrap_err(),
            CompileError::Resolution(ResolutionError::MissingPolicyLink { rule_id: 7, .. })
        ));
    }

    #[test]
    fn unescapable_value_is_rejected() {
        let mut s = snapshot();
        s.devices[0].description = Some("bell\u{7}".to_string());
        let err = compile(&s).unwrap_err();
        assert!(matches!(err, CompileError::Validation(ref v) if v.field == "description"));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let mut s = snapshot();
        s.rules[0].filters[0].pattern = "show (".to_string();
        assert!(matches!(compile(&s).unwrap_err(), CompileError::Validation(_)));
    }
}

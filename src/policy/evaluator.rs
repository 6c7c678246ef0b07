//! Resolves cascading group memberships into one effective rule per
//! (identity, device group, service).
//!
//! Candidates are collected into an explicit list and sorted by precedence:
//! identity rules first, then group rules by ascending membership priority,
//! then by group name, then by rule id. The first candidate wins, except that
//! a deny anywhere in the winner's scope overrides a permit.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::filter::{CommandFilter, PatternCache};
use super::model::{
    AccessRule, Action, AvPair, CommandFilterEntry, DeviceGroup, PolicySnapshot, PrivLevel,
    RuleSubject,
};
use crate::error::ValidationError;

/// Where the winning rule came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleScope {
    Identity,
    Group { name: String, priority: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    pub rule_id: i32,
    pub scope: RuleScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveRule {
    pub service: String,
    pub action: Action,
    pub priv_lvl: PrivLevel,
    pub filters: Vec<CommandFilterEntry>,
    pub av_pairs: Vec<AvPair>,
    /// `None` when no rule applied and the implicit deny was used.
    pub source: Option<RuleSource>,
}

impl EffectiveRule {
    fn implicit_deny(service: &str) -> Self {
        Self {
            service: service.to_string(),
            action: Action::Deny,
            priv_lvl: PrivLevel::default(),
            filters: Vec::new(),
            av_pairs: Vec::new(),
            source: None,
        }
    }

    #[must_use]
    pub const fn is_permit(&self) -> bool {
        self.action.is_permit()
    }

    pub fn command_filter(&self, cache: &PatternCache) -> Result<CommandFilter, ValidationError> {
        CommandFilter::new(&self.filters, cache)
    }

    /// Authorizes one command line under this rule.
    pub fn authorize_command(
        &self,
        command: &str,
        cache: &PatternCache,
    ) -> Result<Action, ValidationError> {
        if !self.is_permit() {
            return Ok(Action::Deny);
        }
        Ok(self.command_filter(cache)?.evaluate(command))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Scope {
    Identity,
    Group,
}

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    rule: &'a AccessRule,
    scope: Scope,
    priority: i32,
    group_name: &'a str,
}

impl Candidate<'_> {
    fn precedence(&self, other: &Self) -> Ordering {
        self.scope
            .cmp(&other.scope)
            .then(self.priority.cmp(&other.priority))
            .then_with(|| self.group_name.cmp(other.group_name))
            .then(self.rule.id.cmp(&other.rule.id))
    }

    fn source(&self) -> RuleSource {
        let scope = match self.scope {
            Scope::Identity => RuleScope::Identity,
            Scope::Group => RuleScope::Group {
                name: self.group_name.to_string(),
                priority: self.priority,
            },
        };
        RuleSource {
            rule_id: self.rule.id,
            scope,
        }
    }
}

struct GroupRef<'a> {
    name: &'a str,
    enabled: bool,
}

/// Read-only indexes over one snapshot.
pub struct AccessEvaluator<'a> {
    snapshot: &'a PolicySnapshot,
    groups: HashMap<i32, GroupRef<'a>>,
    enabled_identities: HashSet<i32>,
    memberships: HashMap<i32, Vec<(i32, i32)>>,
    links: HashSet<(i32, i32)>,
    rules_by_subject: HashMap<RuleSubject, Vec<&'a AccessRule>>,
    device_groups: HashMap<i32, &'a DeviceGroup>,
    device_memberships: HashMap<i32, Vec<i32>>,
}

impl<'a> AccessEvaluator<'a> {
    #[must_use]
    pub fn new(snapshot: &'a PolicySnapshot) -> Self {
        let groups = snapshot
            .groups
            .iter()
            .map(|g| {
                (
                    g.id,
                    GroupRef {
                        name: g.name.as_str(),
                        enabled: g.enabled,
                    },
                )
            })
            .collect();

        let enabled_identities = snapshot
            .identities
            .iter()
            .filter(|i| i.enabled)
            .map(|i| i.id)
            .collect();

        let mut memberships: HashMap<i32, Vec<(i32, i32)>> = HashMap::new();
        for m in &snapshot.memberships {
            memberships
                .entry(m.identity_id)
                .or_default()
                .push((m.group_id, m.priority));
        }

        let links = snapshot
            .policies
            .iter()
            .map(|p| (p.group_id, p.device_group_id))
            .collect();

        let mut rules_by_subject: HashMap<RuleSubject, Vec<&AccessRule>> = HashMap::new();
        for rule in &snapshot.rules {
            rules_by_subject.entry(rule.subject).or_default().push(rule);
        }

        let device_groups = snapshot.device_groups.iter().map(|g| (g.id, g)).collect();

        let mut device_memberships: HashMap<i32, Vec<i32>> = HashMap::new();
        for m in &snapshot.device_memberships {
            device_memberships
                .entry(m.device_id)
                .or_default()
                .push(m.group_id);
        }

        Self {
            snapshot,
            groups,
            enabled_identities,
            memberships,
            links,
            rules_by_subject,
            device_groups,
            device_memberships,
        }
    }

    #[must_use]
    pub const fn snapshot(&self) -> &'a PolicySnapshot {
        self.snapshot
    }

    fn candidates(&self, identity_id: i32, device_group_id: i32) -> Vec<Candidate<'a>> {
        if !self.enabled_identities.contains(&identity_id) {
            return Vec::new();
        }

        let mut candidates = Vec::new();

        if let Some(rules) = self.rules_by_subject.get(&RuleSubject::Identity(identity_id)) {
            candidates.extend(
                rules
                    .iter()
                    .filter(|r| r.device_group_id == device_group_id)
                    .map(|&rule| Candidate {
                        rule,
                        scope: Scope::Identity,
                        priority: 0,
                        group_name: "",
                    }),
            );
        }

        for &(group_id, priority) in self.memberships.get(&identity_id).into_iter().flatten() {
            let Some(group) = self.groups.get(&group_id) else {
                continue;
            };
            if !group.enabled || !self.links.contains(&(group_id, device_group_id)) {
                continue;
            }
            let Some(rules) = self.rules_by_subject.get(&RuleSubject::Group(group_id)) else {
                continue;
            };
            candidates.extend(
                rules
                    .iter()
                    .filter(|r| r.device_group_id == device_group_id)
                    .map(|&rule| Candidate {
                        rule,
                        scope: Scope::Group,
                        priority,
                        group_name: group.name,
                    }),
            );
        }

        candidates.sort_by(Candidate::precedence);
        candidates
    }

    /// Services named by any rule that could apply to the pair, sorted.
    #[must_use]
    pub fn services(&self, identity_id: i32, device_group_id: i32) -> BTreeSet<&'a str> {
        self.candidates(identity_id, device_group_id)
            .iter()
            .map(|c| c.rule.service.as_str())
            .collect()
    }

    #[must_use]
    pub fn evaluate(&self, identity_id: i32, device_group_id: i32, service: &str) -> EffectiveRule {
        let candidates: Vec<Candidate<'a>> = self
            .candidates(identity_id, device_group_id)
            .into_iter()
            .filter(|c| c.rule.service == service)
            .collect();

        let Some(best) = candidates.first() else {
            return EffectiveRule::implicit_deny(service);
        };

        // A deny in the winning scope beats any permit there, whatever its priority.
        let winner = if best.rule.action == Action::Permit {
            candidates
                .iter()
                .find(|c| c.scope == best.scope && c.rule.action == Action::Deny)
                .unwrap_or(best)
        } else {
            best
        };

        let mut av_pairs = winner.rule.av_pairs.clone();
        av_pairs.sort();

        let mut filters = winner.rule.filters.clone();
        filters.sort_by_key(|f| f.ordinal);

        EffectiveRule {
            service: service.to_string(),
            action: winner.rule.action,
            priv_lvl: winner.rule.priv_lvl,
            filters,
            av_pairs,
            source: Some(winner.source()),
        }
    }

    /// One effective rule per service that has candidates, in service order.
    #[must_use]
    pub fn evaluate_all(&self, identity_id: i32, device_group_id: i32) -> Vec<EffectiveRule> {
        self.services(identity_id, device_group_id)
            .into_iter()
            .map(|service| self.evaluate(identity_id, device_group_id, service))
            .collect()
    }

    /// The device group that governs a device.
    ///
    /// A device in several groups is governed by the lexically first group
    /// name; rules from its other groups do not apply to it.
    #[must_use]
    pub fn device_group_of(&self, device_id: i32) -> Option<&'a DeviceGroup> {
        self.device_memberships
            .get(&device_id)?
            .iter()
            .filter_map(|id| self.device_groups.get(id).copied())
            .min_by(|a, b| a.name.cmp(&b.name))
    }

    /// Effective rule for an identity logging into a specific device.
    #[must_use]
    pub fn evaluate_device(&self, identity_id: i32, device_id: i32, service: &str) -> EffectiveRule {
        match self.device_group_of(device_id) {
            Some(group) => self.evaluate(identity_id, group.id, service),
            None => EffectiveRule::implicit_deny(service),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::model::{
        AccessPolicy, Device, DeviceMembership, Identity, IdentityGroup, Membership,
        DEFAULT_SERVICE,
    };
    use std::collections::BTreeMap;

    const NETADMIN: i32 = 1;
    const ADMINS: i32 = 10;
    const OPS: i32 = 11;
    const CORE: i32 = 100;
    const EDGE: i32 = 101;

    fn rule(id: i32, subject: RuleSubject, priv_lvl: i32, action: Action) -> AccessRule {
        AccessRule {
            id,
            subject,
            device_group_id: CORE,
            service: DEFAULT_SERVICE.to_string(),
            priv_lvl: PrivLevel::new(priv_lvl).unwrap(),
            action,
            filters: vec![],
            av_pairs: vec![],
        }
    }

    fn group(id: i32, name: &str) -> IdentityGroup {
        IdentityGroup {
            id,
            name: name.to_string(),
            description: None,
            enabled: true,
        }
    }

    fn device_group(id: i32, name: &str) -> DeviceGroup {
        DeviceGroup {
            id,
            name: name.to_string(),
            secret: None,
            description: None,
        }
    }

    /// netadmin in network-admins (priority 10), linked to core-routers.
    fn scenario() -> PolicySnapshot {
        PolicySnapshot {
            identities: vec![Identity {
                id: NETADMIN,
                name: "netadmin".to_string(),
                credential: None,
                enabled: true,
                attributes: BTreeMap::new(),
            }],
            groups: vec![group(ADMINS, "network-admins"), group(OPS, "ops")],
            memberships: vec![Membership {
                identity_id: NETADMIN,
                group_id: ADMINS,
                priority: 10,
            }],
            devices: vec![Device {
                id: 1000,
                name: "core-r1".to_string(),
                address: "10.0.0.1".to_string(),
                secret: "k".to_string(),
                description: None,
                enabled: true,
            }],
            device_groups: vec![device_group(CORE, "core-routers"), device_group(EDGE, "edge")],
            device_memberships: vec![DeviceMembership {
                device_id: 1000,
                group_id: CORE,
            }],
            policies: vec![AccessPolicy {
                group_id: ADMINS,
                device_group_id: CORE,
            }],
            rules: vec![rule(1, RuleSubject::Group(ADMINS), 15, Action::Permit)],
            totp: vec![],
        }
    }

    fn join_ops(snapshot: &mut PolicySnapshot, priority: i32) {
        snapshot.memberships.push(Membership {
            identity_id: NETADMIN,
            group_id: OPS,
            priority,
        });
        snapshot.policies.push(AccessPolicy {
            group_id: OPS,
            device_group_id: CORE,
        });
    }

    #[test]
    fn group_rule_grants_privilege() {
        let snapshot = scenario();
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate_device(NETADMIN, 1000, DEFAULT_SERVICE);
        assert_eq!(effective.action, Action::Permit);
        assert_eq!(effective.priv_lvl.value(), 15);
        assert_eq!(
            effective.source.unwrap().scope,
            RuleScope::Group {
                name: "network-admins".to_string(),
                priority: 10
            }
        );
    }

    #[test]
    fn direct_deny_overrides_group_permit() {
        let mut snapshot = scenario();
        snapshot
            .rules
            .push(rule(2, RuleSubject::Identity(NETADMIN), 0, Action::Deny));
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE);
        assert_eq!(effective.action, Action::Deny);
        assert_eq!(effective.source.unwrap().scope, RuleScope::Identity);
    }

    #[test]
    fn direct_permit_overrides_group_deny() {
        let mut snapshot = scenario();
        snapshot.rules[0].action = Action::Deny;
        snapshot
            .rules
            .push(rule(2, RuleSubject::Identity(NETADMIN), 7, Action::Permit));
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE);
        assert_eq!(effective.action, Action::Permit);
        assert_eq!(effective.priv_lvl.value(), 7);
    }

    #[test]
    fn lower_priority_number_wins_between_permits() {
        let mut snapshot = scenario();
        join_ops(&mut snapshot, 5);
        snapshot
            .rules
            .push(rule(2, RuleSubject::Group(OPS), 3, Action::Permit));
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE);
        assert_eq!(effective.priv_lvl.value(), 3);
        assert_eq!(effective.source.unwrap().rule_id, 2);
    }

    #[test]
    fn equal_priority_deny_wins() {
        let mut snapshot = scenario();
        join_ops(&mut snapshot, 10);
        snapshot
            .rules
            .push(rule(2, RuleSubject::Group(OPS), 1, Action::Deny));
        let eval = AccessEvaluator::new(&snapshot);

        assert_eq!(
            eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE).action,
            Action::Deny
        );
    }

    #[test]
    fn group_deny_at_higher_priority_number_still_wins_in_group_scope() {
        let mut snapshot = scenario();
        join_ops(&mut snapshot, 50);
        snapshot
            .rules
            .push(rule(2, RuleSubject::Group(OPS), 1, Action::Deny));
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE);
        assert_eq!(effective.action, Action::Deny);
        assert_eq!(effective.source.unwrap().rule_id, 2);
    }

    #[test]
    fn priority_ties_break_on_group_name() {
        let mut snapshot = scenario();
        // "aaa-ops" sorts before "network-admins".
        snapshot.groups[1].name = "aaa-ops".to_string();
        join_ops(&mut snapshot, 10);
        snapshot
            .rules
            .push(rule(2, RuleSubject::Group(OPS), 4, Action::Permit));
        let eval = AccessEvaluator::new(&snapshot);

        assert_eq!(eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE).priv_lvl.value(), 4);
    }

    #[test]
    fn winning_rule_filters_are_not_merged() {
        let mut snapshot = scenario();
        snapshot.rules[0].filters = vec![CommandFilterEntry {
            ordinal: 1,
            pattern: "show .*".to_string(),
            action: Action::Permit,
        }];
        join_ops(&mut snapshot, 20);
        let mut ops_rule = rule(2, RuleSubject::Group(OPS), 1, Action::Permit);
        ops_rule.filters = vec![CommandFilterEntry {
            ordinal: 1,
            pattern: "ping .*".to_string(),
            action: Action::Permit,
        }];
        snapshot.rules.push(ops_rule);
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE);
        assert_eq!(effective.filters.len(), 1);
        assert_eq!(effective.filters[0].pattern, "show .*");

        let cache = PatternCache::build(snapshot.patterns()).unwrap();
        assert_eq!(
            effective.authorize_command("show version", &cache).unwrap(),
            Action::Permit
        );
        assert_eq!(
            effective.authorize_command("ping 10.0.0.1", &cache).unwrap(),
            Action::Deny
        );
    }

    #[test]
    fn unlinked_group_rules_do_not_apply() {
        let mut snapshot = scenario();
        snapshot.policies.clear();
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE);
        assert_eq!(effective, EffectiveRule::implicit_deny(DEFAULT_SERVICE));
    }

    #[test]
    fn no_candidates_means_deny_level_zero() {
        let snapshot = scenario();
        let eval = AccessEvaluator::new(&snapshot);

        let effective = eval.evaluate(NETADMIN, EDGE, DEFAULT_SERVICE);
        assert_eq!(effective.action, Action::Deny);
        assert_eq!(effective.priv_lvl.value(), 0);
        assert!(effective.filters.is_empty());
        assert!(effective.source.is_none());
    }

    #[test]
    fn disabled_identity_and_group_get_nothing() {
        let mut snapshot = scenario();
        snapshot.groups[0].enabled = false;
        let eval = AccessEvaluator::new(&snapshot);
        assert!(!eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE).is_permit());

        let mut snapshot = scenario();
        snapshot.identities[0].enabled = false;
        let eval = AccessEvaluator::new(&snapshot);
        assert!(!eval.evaluate(NETADMIN, CORE, DEFAULT_SERVICE).is_permit());
    }

    #[test]
    fn services_are_evaluated_independently() {
        let mut snapshot = scenario();
        let mut ppp = rule(2, RuleSubject::Group(ADMINS), 1, Action::Deny);
        ppp.service = "ppp".to_string();
        snapshot.rules.push(ppp);
        let eval = AccessEvaluator::new(&snapshot);

        let all = eval.evaluate_all(NETADMIN, CORE);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].service, "exec");
        assert!(all[0].is_permit());
        assert_eq!(all[1].service, "ppp");
        assert!(!all[1].is_permit());
    }

    #[test]
    fn device_in_several_groups_uses_first_group_name() {
        let mut snapshot = scenario();
        snapshot.device_groups[1].name = "aaa-edge".to_string();
        snapshot.device_memberships.push(DeviceMembership {
            device_id: 1000,
            group_id: EDGE,
        });
        let eval = AccessEvaluator::new(&snapshot);

        assert_eq!(eval.device_group_of(1000).unwrap().id, EDGE);
        assert!(!eval.evaluate_device(NETADMIN, 1000, DEFAULT_SERVICE).is_permit());
    }
}

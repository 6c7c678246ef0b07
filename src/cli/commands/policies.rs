use std::collections::HashMap;

use anyhow::Context;

use crate::cli::{PolicyCommands, RuleCommands};
use crate::config::Config;
use crate::policy::{AccessRule, RuleSubject};
use crate::services::{FilterSpec, PolicyService, RuleSpec};

use super::policy_service;

pub async fn cmd_policies(config: &Config, command: PolicyCommands) -> anyhow::Result<()> {
    let service = policy_service(config).await?;

    match command {
        PolicyCommands::Link {
            group,
            device_group,
        } => {
            service.link(&group, &device_group).await?;
            println!("Linked '{group}' -> '{device_group}'");
        }

        PolicyCommands::Unlink {
            group,
            device_group,
        } => {
            service.unlink(&group, &device_group).await?;
            println!("Unlinked '{group}' -> '{device_group}'");
        }

        PolicyCommands::List => {
            let links = service.list_links().await?;
            if links.is_empty() {
                println!("No access policies.");
                return Ok(());
            }
            for (group, device_group) in links {
                println!("• {group} -> {device_group}");
            }
        }
    }

    Ok(())
}

/// Splits `KEY=VALUE`.
fn parse_av_pair(raw: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("AV pair '{raw}' is not in KEY=VALUE form"))?;
    Ok((key.to_string(), value.to_string()))
}

pub async fn cmd_rules(config: &Config, command: RuleCommands) -> anyhow::Result<()> {
    let service = policy_service(config).await?;

    match command {
        RuleCommands::Create {
            identity,
            group,
            device_group,
            service: rule_service,
            priv_lvl,
            action,
            filters,
            av_pairs,
        } => {
            let rule = service
                .create_rule(RuleSpec {
                    identity,
                    group,
                    device_group,
                    service: rule_service,
                    priv_lvl,
                    action,
                    filters: filters
                        .iter()
                        .map(|f| {
                            f.parse::<FilterSpec>()
                                .with_context(|| format!("Invalid filter '{f}'"))
                        })
                        .collect::<anyhow::Result<_>>()?,
                    av_pairs: av_pairs
                        .iter()
                        .map(|p| parse_av_pair(p))
                        .collect::<anyhow::Result<_>>()?,
                })
                .await?;
            println!("Created rule {}", rule.id);
        }

        RuleCommands::AddFilter {
            rule_id,
            action,
            pattern,
        } => {
            let entry = service.append_filter(rule_id, &pattern, &action).await?;
            println!(
                "Rule {rule_id}: #{} {} \"{}\"",
                entry.ordinal, entry.action, entry.pattern
            );
        }

        RuleCommands::Delete { rule_id } => {
            service.delete_rule(rule_id).await?;
            println!("Deleted rule {rule_id}");
        }

        RuleCommands::List => {
            let rules = service.list_rules().await?;
            if rules.is_empty() {
                println!("No access rules.");
                return Ok(());
            }

            let snapshot = service.snapshot().await?;
            let identities: HashMap<i32, &str> = snapshot
                .identities
                .iter()
                .map(|i| (i.id, i.name.as_str()))
                .collect();
            let groups: HashMap<i32, &str> = snapshot
                .groups
                .iter()
                .map(|g| (g.id, g.name.as_str()))
                .collect();
            let device_groups: HashMap<i32, &str> = snapshot
                .device_groups
                .iter()
                .map(|g| (g.id, g.name.as_str()))
                .collect();

            for rule in &rules {
                print_rule(rule, &identities, &groups, &device_groups);
            }
        }
    }

    Ok(())
}

fn print_rule(
    rule: &AccessRule,
    identities: &HashMap<i32, &str>,
    groups: &HashMap<i32, &str>,
    device_groups: &HashMap<i32, &str>,
) {
    let subject = match rule.subject {
        RuleSubject::Identity(id) => format!("user {}", identities.get(&id).unwrap_or(&"?")),
        RuleSubject::Group(id) => format!("group {}", groups.get(&id).unwrap_or(&"?")),
    };
    println!(
        "[{}] {} on {} service {}: {} priv-lvl {}",
        rule.id,
        subject,
        device_groups.get(&rule.device_group_id).unwrap_or(&"?"),
        rule.service,
        rule.action,
        rule.priv_lvl
    );
    for filter in &rule.filters {
        println!("    #{} {} \"{}\"", filter.ordinal, filter.action, filter.pattern);
    }
    for pair in &rule.av_pairs {
        println!("    set {} = {}", pair.key, pair.value);
    }
}

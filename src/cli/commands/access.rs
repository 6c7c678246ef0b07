use crate::config::Config;
use crate::policy::{EffectiveRule, RuleScope};
use crate::services::PolicyService;

use super::policy_service;

fn describe(rule: &EffectiveRule) -> String {
    let source = match &rule.source {
        None => "implicit deny".to_string(),
        Some(source) => match &source.scope {
            RuleScope::Identity => format!("rule {} (direct)", source.rule_id),
            RuleScope::Group { name, priority } => {
                format!("rule {} (group {name}, priority {priority})", source.rule_id)
            }
        },
    };
    format!(
        "{} {} priv-lvl {} via {}",
        rule.service, rule.action, rule.priv_lvl, source
    )
}

pub async fn cmd_access(config: &Config, identity: &str) -> anyhow::Result<()> {
    let service = policy_service(config).await?;
    let access = service.access(identity).await?;

    if access.is_empty() {
        println!("No enabled devices.");
        return Ok(());
    }

    println!("Access for {identity}:");
    println!("{:-<70}", "");
    for device in access {
        let group = device.device_group.as_deref().unwrap_or("(ungrouped)");
        println!("• {} ({}) in {}", device.device, device.address, group);
        if device.rules.is_empty() {
            println!("  no access");
        }
        for rule in &device.rules {
            println!("  {}", describe(rule));
        }
    }

    Ok(())
}

pub async fn cmd_evaluate(
    config: &Config,
    identity: &str,
    device: &str,
    service_name: Option<&str>,
    command: Option<&str>,
) -> anyhow::Result<()> {
    let service = policy_service(config).await?;
    let decision = service
        .evaluate(identity, device, service_name, command)
        .await?;

    println!(
        "Device group: {}",
        decision.device_group.as_deref().unwrap_or("(ungrouped)")
    );
    println!("Decision:     {}", describe(&decision.rule));
    for pair in &decision.rule.av_pairs {
        println!("  set {} = {}", pair.key, pair.value);
    }
    if let (Some(command), Some(action)) = (command, decision.command) {
        println!("Command \"{command}\": {action}");
    }

    Ok(())
}

use crate::cli::GroupCommands;
use crate::config::Config;
use crate::services::PolicyService;

use super::{policy_service, yes_no};

pub async fn cmd_groups(config: &Config, command: GroupCommands) -> anyhow::Result<()> {
    let service = policy_service(config).await?;

    match command {
        GroupCommands::Put {
            name,
            description,
            disabled,
        } => {
            let group = service
                .put_group(&name, description.as_deref(), !disabled)
                .await?;
            println!("Saved group '{}' (id {})", group.name, group.id);
        }

        GroupCommands::Show { name } => {
            let (group, members) = service.get_group(&name).await?;
            println!("Group: {}", group.name);
            println!("{:-<70}", "");
            println!("Enabled: {}", yes_no(group.enabled));
            if let Some(description) = &group.description {
                println!("Description: {description}");
            }
            println!();
            if members.is_empty() {
                println!("No members.");
            } else {
                println!("Members ({}):", members.len());
                for member in members {
                    println!("  • {} (priority {})", member.identity, member.priority);
                }
            }
        }

        GroupCommands::List => {
            let groups = service.list_groups().await?;
            if groups.is_empty() {
                println!("No identity groups.");
                return Ok(());
            }
            for group in groups {
                let state = if group.enabled { "" } else { " [DISABLED]" };
                println!(
                    "• {}{} {}",
                    group.name,
                    state,
                    group.description.as_deref().unwrap_or("")
                );
            }
        }

        GroupCommands::Delete { name } => {
            service.delete_group(&name).await?;
            println!("Deleted group '{name}'");
        }

        GroupCommands::AddMember {
            identity,
            group,
            priority,
        } => {
            service.add_member(&identity, &group, priority).await?;
            println!("Added '{identity}' to '{group}' with priority {priority}");
        }

        GroupCommands::RemoveMember { identity, group } => {
            service.remove_member(&identity, &group).await?;
            println!("Removed '{identity}' from '{group}'");
        }
    }

    Ok(())
}

use crate::cli::UserCommands;
use crate::config::Config;
use crate::db::DeleteOutcome;
use crate::services::{IdentitySpec, PolicyService};

use super::{policy_service, yes_no};

pub async fn cmd_users(config: &Config, command: UserCommands) -> anyhow::Result<()> {
    let service = policy_service(config).await?;

    match command {
        UserCommands::Put {
            name,
            password,
            password_hash,
            clear_password,
            disabled,
        } => {
            let identity = service
                .put_identity(IdentitySpec {
                    name,
                    password,
                    password_hash,
                    clear_password,
                    enabled: disabled.then_some(false),
                })
                .await?;
            println!("Saved identity '{}' (id {})", identity.name, identity.id);
        }

        UserCommands::Show { name } => {
            let identity = service.get_identity(&name).await?;
            println!("Identity: {}", identity.name);
            println!("{:-<70}", "");
            println!("Enabled:  {}", yes_no(identity.enabled));
            println!("Password: {}", if identity.credential.is_some() { "set" } else { "none" });
            if !identity.attributes.is_empty() {
                println!();
                println!("Attributes:");
                for (key, value) in &identity.attributes {
                    println!("  {key} = {value}");
                }
            }
        }

        UserCommands::List => {
            let identities = service.list_identities().await?;
            if identities.is_empty() {
                println!("No identities.");
                return Ok(());
            }
            println!("{:<32} {:<8} {:<8}", "NAME", "ENABLED", "PASSWORD");
            for identity in identities {
                println!(
                    "{:<32} {:<8} {:<8}",
                    identity.name,
                    yes_no(identity.enabled),
                    yes_no(identity.credential.is_some())
                );
            }
        }

        UserCommands::Enable { name } => {
            service.set_identity_enabled(&name, true).await?;
            println!("Enabled '{name}'");
        }

        UserCommands::Disable { name } => {
            service.set_identity_enabled(&name, false).await?;
            println!("Disabled '{name}'");
        }

        UserCommands::SetAttr { name, key, value } => {
            service.set_attribute(&name, &key, &value).await?;
            println!("Set {key} on '{name}'");
        }

        UserCommands::UnsetAttr { name, key } => {
            service.unset_attribute(&name, &key).await?;
            println!("Removed {key} from '{name}'");
        }

        UserCommands::Delete { name, force } => match service.delete_identity(&name, force).await? {
            DeleteOutcome::Deleted => println!("Deleted '{name}'"),
            DeleteOutcome::Disabled => {
                println!("'{name}' has login history and was disabled instead.");
                println!("Use --force to delete it anyway.");
            }
        },
    }

    Ok(())
}

use crate::cli::{DeviceCommands, DeviceGroupCommands};
use crate::config::Config;
use crate::services::{DeviceSpec, PolicyService};

use super::{policy_service, yes_no};

pub async fn cmd_devices(config: &Config, command: DeviceCommands) -> anyhow::Result<()> {
    let service = policy_service(config).await?;

    match command {
        DeviceCommands::Put {
            name,
            address,
            secret,
            description,
            disabled,
        } => {
            let device = service
                .put_device(DeviceSpec {
                    name,
                    address,
                    secret,
                    description,
                    enabled: !disabled,
                })
                .await?;
            println!(
                "Saved device '{}' at {} (id {})",
                device.name, device.address, device.id
            );
        }

        DeviceCommands::Show { device } => {
            let device = service.get_device(&device).await?;
            println!("Device: {}", device.name);
            println!("{:-<70}", "");
            println!("Address: {}", device.address);
            println!("Enabled: {}", yes_no(device.enabled));
            if let Some(description) = &device.description {
                println!("Description: {description}");
            }
        }

        DeviceCommands::List => {
            let devices = service.list_devices().await?;
            if devices.is_empty() {
                println!("No devices.");
                return Ok(());
            }
            println!("{:<32} {:<20} {:<8}", "NAME", "ADDRESS", "ENABLED");
            for device in devices {
                println!(
                    "{:<32} {:<20} {:<8}",
                    device.name,
                    device.address,
                    yes_no(device.enabled)
                );
            }
        }

        DeviceCommands::Delete { name } => {
            service.delete_device(&name).await?;
            println!("Deleted device '{name}'");
        }
    }

    Ok(())
}

pub async fn cmd_device_groups(config: &Config, command: DeviceGroupCommands) -> anyhow::Result<()> {
    let service = policy_service(config).await?;

    match command {
        DeviceGroupCommands::Put {
            name,
            secret,
            description,
        } => {
            let group = service
                .put_device_group(&name, secret.as_deref(), description.as_deref())
                .await?;
            println!("Saved device group '{}' (id {})", group.name, group.id);
        }

        DeviceGroupCommands::Show { name } => {
            let (group, devices) = service.get_device_group(&name).await?;
            println!("Device group: {}", group.name);
            println!("{:-<70}", "");
            println!("Group key: {}", if group.secret.is_some() { "set" } else { "none" });
            if let Some(description) = &group.description {
                println!("Description: {description}");
            }
            println!();
            if devices.is_empty() {
                println!("No devices.");
            } else {
                println!("Devices ({}):", devices.len());
                for device in devices {
                    println!("  • {device}");
                }
            }
        }

        DeviceGroupCommands::List => {
            let groups = service.list_device_groups().await?;
            if groups.is_empty() {
                println!("No device groups.");
                return Ok(());
            }
            for group in groups {
                println!(
                    "• {} {}",
                    group.name,
                    group.description.as_deref().unwrap_or("")
                );
            }
        }

        DeviceGroupCommands::Delete { name } => {
            service.delete_device_group(&name).await?;
            println!("Deleted device group '{name}'");
        }

        DeviceGroupCommands::Add { device, group } => {
            service.add_device(&device, &group).await?;
            println!("Added '{device}' to '{group}'");
        }

        DeviceGroupCommands::Remove { device, group } => {
            service.remove_device(&device, &group).await?;
            println!("Removed '{device}' from '{group}'");
        }
    }

    Ok(())
}

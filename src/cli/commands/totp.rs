use tracing::warn;

use crate::cli::TotpCommands;
use crate::config::Config;
use crate::services::{Enrollment, ProvisionRequest, SeaOrmTotpService, TotpService};
use crate::totp::{self, Algorithm};

use super::connect;

fn print_enrollment(enrollment: &Enrollment) {
    println!("Identity:  {}", enrollment.identity);
    println!("Secret:    {}", enrollment.secret);
    println!(
        "Params:    {} digits, {}s period, {}",
        enrollment.digits, enrollment.period, enrollment.algorithm
    );
    println!("URI:       {}", enrollment.uri);
    println!();
    match totp::qr_code(&enrollment.uri) {
        Ok(qr) => println!("{qr}"),
        Err(e) => warn!("Could not render the enrollment QR code: {e}"),
    }
    println!(
        "Scan the code or enroll the URI in an authenticator app, then run 'tacman totp enable {} <code>'.",
        enrollment.identity
    );
}

pub async fn cmd_totp(config: &Config, command: TotpCommands) -> anyhow::Result<()> {
    let service = SeaOrmTotpService::new(connect(config).await?, config.totp.clone());

    match command {
        TotpCommands::Provision {
            identity,
            issuer,
            label,
            digits,
            period,
            algorithm,
        } => {
            let algorithm = algorithm.map(|a| a.parse::<Algorithm>()).transpose()?;
            let enrollment = service
                .provision(ProvisionRequest {
                    identity,
                    issuer,
                    label,
                    digits,
                    period,
                    algorithm,
                })
                .await?;
            print_enrollment(&enrollment);
        }

        TotpCommands::Reveal { identity } => {
            print_enrollment(&service.reveal(&identity).await?);
        }

        TotpCommands::Enable { identity, code } => {
            service.enable(&identity, &code).await?;
            println!("TOTP enabled for '{identity}'");
        }

        TotpCommands::Verify { identity, code } => {
            let step = service.verify(&identity, &code).await?;
            println!("Code accepted (time-step {step})");
        }

        TotpCommands::Disable { identity } => {
            service.disable(&identity).await?;
            println!("TOTP disabled for '{identity}'");
        }

        TotpCommands::Delete { identity } => {
            service.delete(&identity).await?;
            println!("TOTP profile removed for '{identity}'");
        }

        TotpCommands::Status { identity } => match service.status(&identity).await? {
            None => println!("'{identity}' has no TOTP profile."),
            Some(info) => {
                println!("Identity:  {}", info.identity);
                println!("State:     {}", info.state);
                println!("Issuer:    {}", info.issuer);
                println!("Label:     {}", info.label);
                println!(
                    "Params:    {} digits, {}s period, {}",
                    info.digits, info.period, info.algorithm
                );
                println!(
                    "Last used: {}",
                    info.last_used_at.as_deref().unwrap_or("never")
                );
                println!("Created:   {}", info.created_at);
            }
        },
    }

    Ok(())
}

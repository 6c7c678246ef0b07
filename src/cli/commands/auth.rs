use crate::config::Config;
use crate::services::{
    AuthError, AuthRequest, AuthService, SeaOrmAuthService, SeaOrmTotpService,
};

use super::{connect, read_secret_line};

pub async fn cmd_auth(
    config: &Config,
    username: String,
    password: Option<String>,
    totp_code: Option<String>,
    device_address: Option<String>,
) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_secret_line("Password")?,
    };

    let store = connect(config).await?;
    let totp = SeaOrmTotpService::new(store.clone(), config.totp.clone());
    let service = SeaOrmAuthService::new(store, totp);

    match service
        .authenticate(AuthRequest {
            username,
            password,
            totp_code,
            device_address,
        })
        .await
    {
        Ok(outcome) => {
            println!("Authenticated '{}' ({})", outcome.identity, outcome.factors);
            Ok(())
        }
        Err(AuthError::AuthenticationFailed) => anyhow::bail!("Authentication failed"),
        Err(e) => Err(e.into()),
    }
}

pub async fn cmd_log(config: &Config, limit: u64) -> anyhow::Result<()> {
    let store = connect(config).await?;
    let totp = SeaOrmTotpService::new(store.clone(), config.totp.clone());
    let service = SeaOrmAuthService::new(store, totp);

    let entries = service.history(limit).await?;
    if entries.is_empty() {
        println!("No authentication attempts recorded.");
        return Ok(());
    }

    println!("Recent authentication attempts (last {}):", entries.len());
    println!("{:-<70}", "");
    for entry in entries {
        println!(
            "• {} {} {} from {}",
            entry.created_at,
            entry.outcome,
            entry.username,
            entry.device_address.as_deref().unwrap_or("-")
        );
        if let Some(factor) = &entry.factor {
            match &entry.detail {
                Some(detail) => println!("  {factor}: {detail}"),
                None => println!("  {factor}"),
            }
        }
    }

    Ok(())
}

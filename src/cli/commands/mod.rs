mod access;
mod apply;
mod auth;
mod devices;
mod groups;
mod identities;
mod init;
mod policies;
mod totp;

pub use access::{cmd_access, cmd_evaluate};
pub use apply::cmd_apply;
pub use auth::{cmd_auth, cmd_log};
pub use devices::{cmd_device_groups, cmd_devices};
pub use groups::cmd_groups;
pub use identities::cmd_users;
pub use init::cmd_init;
pub use policies::{cmd_policies, cmd_rules};
pub use totp::cmd_totp;

use anyhow::Context;

use crate::config::Config;
use crate::db::Store;
use crate::services::SeaOrmPolicyService;

async fn connect(config: &Config) -> anyhow::Result<Store> {
    Store::with_pool_options(
        &config.general.database_path,
        config.general.max_db_connections,
        config.general.min_db_connections,
    )
    .await
    .with_context(|| format!("Failed to open store at {}", config.general.database_path))
}

async fn policy_service(config: &Config) -> anyhow::Result<SeaOrmPolicyService> {
    Ok(SeaOrmPolicyService::new(
        connect(config).await?,
        config.security.clone(),
    ))
}

/// Reads one line from stdin, without the trailing newline.
fn read_secret_line(prompt: &str) -> anyhow::Result<String> {
    use std::io::{BufRead, Write};

    eprint!("{prompt}: ");
    std::io::stderr().flush().ok();

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

pub mod cli;
pub mod compiler;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod policy;
pub mod services;
pub mod totp;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
pub use config::Config;

fn init_tracing(config: &Config) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.general.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    if matches!(command, Commands::Init) {
        return cli::cmd_init();
    }

    let config = Config::load()?;
    config.validate()?;
    init_tracing(&config);

    match command {
        Commands::Init => cli::cmd_init(),
        Commands::Users { command } => cli::cmd_users(&config, command).await,
        Commands::Groups { command } => cli::cmd_groups(&config, command).await,
        Commands::Devices { command } => cli::cmd_devices(&config, command).await,
        Commands::DeviceGroups { command } => cli::cmd_device_groups(&config, command).await,
        Commands::Policies { command } => cli::cmd_policies(&config, command).await,
        Commands::Rules { command } => cli::cmd_rules(&config, command).await,
        Commands::Access { identity } => cli::cmd_access(&config, &identity).await,
        Commands::Evaluate {
            identity,
            device,
            service,
            command,
        } => {
            cli::cmd_evaluate(
                &config,
                &identity,
                &device,
                service.as_deref(),
                command.as_deref(),
            )
            .await
        }
        Commands::Totp { command } => cli::cmd_totp(&config, command).await,
        Commands::Auth {
            username,
            password,
            totp,
            device,
        } => cli::cmd_auth(&config, username, password, totp, device).await,
        Commands::Log { limit } => cli::cmd_log(&config, limit).await,
        Commands::Apply {
            dry_run,
            allow_empty,
        } => cli::cmd_apply(&config, dry_run, allow_empty).await,
    }
}

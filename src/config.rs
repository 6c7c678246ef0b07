use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::totp::{Algorithm, TotpParams};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "TACMAN_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub export: ExportConfig,

    pub totp: TotpConfig,

    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// "text" or "json"
    pub log_format: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    pub max_db_connections: u32,

    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/tacman.db".to_string(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory the external daemon reads its configuration from.
    pub directory: String,

    pub users_file: String,

    pub hosts_file: String,

    pub host_groups_file: String,

    /// Publish artifacts that contain zero records.
    /// Off by default so an accidentally emptied store cannot wipe the daemon config.
    pub allow_empty: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: "/etc/tac_plus-ng".to_string(),
            users_file: "users".to_string(),
            hosts_file: "hosts".to_string(),
            host_groups_file: "host_groups".to_string(),
            allow_empty: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TotpConfig {
    pub issuer: String,

    pub digits: u32,

    pub period: u32,

    pub algorithm: Algorithm,

    /// Accepted clock skew in time-steps on either side of the current step.
    pub skew_steps: u32,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            issuer: "tacacs-plus".to_string(),
            digits: 6,
            period: 30,
            algorithm: Algorithm::Sha1,
            skew_steps: 1,
        }
    }
}

impl TotpConfig {
    pub fn params(&self) -> Result<TotpParams> {
        TotpParams::new(self.digits, self.period, self.algorithm)
            .map_err(|e| anyhow::anyhow!("Invalid [totp] defaults: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// bcrypt cost factor (4-31) for identity passwords
    pub bcrypt_cost: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(explicit));
        }

        paths.push(PathBuf::from("tacman.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("tacman").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".tacman").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("tacman.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.export.directory.trim().is_empty() {
            anyhow::bail!("export.directory cannot be empty");
        }

        let names = [
            &self.export.users_file,
            &self.export.hosts_file,
            &self.export.host_groups_file,
        ];
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() || name.contains('/') || name.starts_with('.') {
                anyhow::bail!("Invalid artifact file name: '{name}'");
            }
            if names[..i].contains(name) {
                anyhow::bail!("Artifact file name '{name}' is used twice");
            }
        }

        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            anyhow::bail!(
                "general.log_format must be \"text\" or \"json\", got \"{}\"",
                self.general.log_format
            );
        }

        if !(4..=31).contains(&self.security.bcrypt_cost) {
            anyhow::bail!("security.bcrypt_cost must be between 4 and 31");
        }

        if self.totp.skew_steps > 10 {
            anyhow::bail!("totp.skew_steps must be 10 or less");
        }

        self.totp.params()?;

        Ok(())
    }
}

use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::StoreError;
use crate::policy::PolicySnapshot;

pub mod migrator;
pub mod repositories;

pub use repositories::auth_log::{AuthLogEntry, NewAuthLogEntry};
pub use repositories::device::DeviceInput;
pub use repositories::group::GroupMember;
pub use repositories::identity::{DeleteOutcome, IdentityChanges};
pub use repositories::policy::NewRule;
pub use repositories::totp::{NewTotpProfile, TotpProfileRow};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:").trim_start_matches("//");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn identity_repo(&self) -> repositories::identity::IdentityRepository {
        repositories::identity::IdentityRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn group_repo(&self) -> repositories::group::IdentityGroupRepository {
        repositories::group::IdentityGroupRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn device_repo(&self) -> repositories::device::DeviceRepository {
        repositories::device::DeviceRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn device_group_repo(&self) -> repositories::device::DeviceGroupRepository {
        repositories::device::DeviceGroupRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn policy_repo(&self) -> repositories::policy::PolicyRepository {
        repositories::policy::PolicyRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn totp_repo(&self) -> repositories::totp::TotpRepository {
        repositories::totp::TotpRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn auth_log_repo(&self) -> repositories::auth_log::AuthLogRepository {
        repositories::auth_log::AuthLogRepository::new(self.conn.clone())
    }

    /// One consistent view of the whole policy.
    pub async fn snapshot(&self) -> std::result::Result<PolicySnapshot, StoreError> {
        repositories::snapshot::SnapshotRepository::new(self.conn.clone())
            .load()
            .await
    }

    pub async fn append_auth_log(
        &self,
        entry: NewAuthLogEntry,
    ) -> std::result::Result<AuthLogEntry, StoreError> {
        self.auth_log_repo().append(entry).await
    }

    pub async fn recent_auth_log(
        &self,
        limit: u64,
    ) -> std::result::Result<Vec<AuthLogEntry>, StoreError> {
        self.auth_log_repo().recent(limit).await
    }
}

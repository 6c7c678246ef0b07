use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use crate::entities::{auth_log, prelude::*};
use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

pub use crate::entities::auth_log::Model as AuthLogEntry;

#[derive(Debug, Clone, Default)]
pub struct NewAuthLogEntry {
    pub identity_id: Option<i32>,
    pub device_id: Option<i32>,
    pub username: String,
    pub device_address: Option<String>,
    pub success: bool,
    pub factor: Option<String>,
    pub detail: Option<String>,
}

pub struct AuthLogRepository {
    conn: DatabaseConnection,
}

impl AuthLogRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Rows are only ever inserted.
    pub async fn append(&self, entry: NewAuthLogEntry) -> Result<AuthLogEntry> {
        let outcome = if entry.success { "success" } else { "failure" };
        Ok(auth_log::ActiveModel {
            identity_id: Set(entry.identity_id),
            device_id: Set(entry.device_id),
            username: Set(entry.username),
            device_address: Set(entry.device_address),
            outcome: Set(outcome.to_string()),
            factor: Set(entry.factor),
            detail: Set(entry.detail),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await?)
    }

    pub async fn recent(&self, limit: u64) -> Result<Vec<AuthLogEntry>> {
        Ok(AuthLog::find()
            .order_by_desc(auth_log::Column::Id)
            .limit(limit)
            .all(&self.conn)
            .await?)
    }

    pub async fn count_for_identity(&self, identity_id: i32) -> Result<u64> {
        Ok(AuthLog::find()
            .filter(auth_log::Column::IdentityId.eq(identity_id))
            .count(&self.conn)
            .await?)
    }
}

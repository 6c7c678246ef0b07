use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait, sea_query::Expr,
};

use crate::entities::{prelude::*, totp_profiles};
use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

pub use crate::entities::totp_profiles::Model as TotpProfileRow;

#[derive(Debug, Clone)]
pub struct NewTotpProfile {
    pub identity_id: i32,
    pub secret: String,
    pub issuer: String,
    pub label: String,
    pub digits: i32,
    pub period: i32,
    pub algorithm: String,
}

pub struct TotpRepository {
    conn: DatabaseConnection,
}

impl TotpRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, identity_id: i32) -> Result<Option<TotpProfileRow>> {
        Ok(TotpProfiles::find()
            .filter(totp_profiles::Column::IdentityId.eq(identity_id))
            .one(&self.conn)
            .await?)
    }

    /// Stores a fresh, not yet enabled profile, replacing any existing one.
    pub async fn replace(&self, profile: NewTotpProfile) -> Result<TotpProfileRow> {
        let txn = self.conn.begin().await?;
        let now = chrono::Utc::now().to_rfc3339();

        TotpProfiles::delete_many()
            .filter(totp_profiles::Column::IdentityId.eq(profile.identity_id))
            .exec(&txn)
            .await?;

        let model = totp_profiles::ActiveModel {
            identity_id: Set(profile.identity_id),
            secret: Set(profile.secret),
            issuer: Set(profile.issuer),
            label: Set(profile.label),
            digits: Set(profile.digits),
            period: Set(profile.period),
            algorithm: Set(profile.algorithm),
            enabled: Set(false),
            last_used_step: Set(None),
            last_used_at: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(model)
    }

    /// Moves the watermark to `step` if it is still below it.
    ///
    /// With `enable` set the update also requires the profile to be disabled
    /// and enables it. Returns `false` when another writer got there first.
    pub async fn consume_step(&self, identity_id: i32, step: i64, enable: bool) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut update = TotpProfiles::update_many()
            .col_expr(totp_profiles::Column::LastUsedStep, Expr::value(step))
            .col_expr(totp_profiles::Column::LastUsedAt, Expr::value(now.clone()))
            .col_expr(totp_profiles::Column::UpdatedAt, Expr::value(now))
            .filter(totp_profiles::Column::IdentityId.eq(identity_id))
            .filter(
                Condition::any()
                    .add(totp_profiles::Column::LastUsedStep.is_null())
                    .add(totp_profiles::Column::LastUsedStep.lt(step)),
            )
            .filter(totp_profiles::Column::Enabled.eq(!enable));

        if enable {
            update = update.col_expr(totp_profiles::Column::Enabled, Expr::value(true));
        }

        let result = update.exec(&self.conn).await?;
        Ok(result.rows_affected == 1)
    }

    /// Disables without touching the secret or the watermark.
    pub async fn disable(&self, identity_id: i32) -> Result<bool> {
        let Some(model) = self.get(identity_id).await? else {
            return Ok(false);
        };
        let mut active: totp_profiles::ActiveModel = model.into();
        active.enabled = Set(false);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;
        Ok(true)
    }

    pub async fn delete(&self, identity_id: i32) -> Result<bool> {
        let result = TotpProfiles::delete_many()
            .filter(totp_profiles::Column::IdentityId.eq(identity_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

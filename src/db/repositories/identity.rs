use std::collections::BTreeMap;

use anyhow::Context;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tokio::task;

use crate::config::SecurityConfig;
use crate::entities::{auth_log, identities, identity_attributes, prelude::*};
use crate::error::StoreError;
use crate::policy::Identity;

type Result<T> = std::result::Result<T, StoreError>;

/// What a delete actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The identity has authentication history and was disabled instead.
    Disabled,
}

/// Fields of an identity create/update. `None` leaves a field unchanged on
/// update.
#[derive(Debug, Clone, Default)]
pub struct IdentityChanges {
    pub password_hash: Option<Option<String>>,
    pub enabled: Option<bool>,
}

pub struct IdentityRepository {
    conn: DatabaseConnection,
}

impl IdentityRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    async fn find_model(&self, name: &str) -> Result<Option<identities::Model>> {
        Ok(Identities::find()
            .filter(identities::Column::NormalizedName.eq(name.to_lowercase()))
            .one(&self.conn)
            .await?)
    }

    async fn attributes_of(&self, identity_id: i32) -> Result<BTreeMap<String, String>> {
        let rows = IdentityAttributes::find()
            .filter(identity_attributes::Column::IdentityId.eq(identity_id))
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
    }

    fn to_identity(model: identities::Model, attributes: BTreeMap<String, String>) -> Identity {
        Identity {
            id: model.id,
            name: model.name,
            credential: model.password_hash,
            enabled: model.enabled,
            attributes,
        }
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Identity>> {
        let Some(model) = self.find_model(name).await? else {
            return Ok(None);
        };
        let attributes = self.attributes_of(model.id).await?;
        Ok(Some(Self::to_identity(model, attributes)))
    }

    pub async fn list(&self) -> Result<Vec<Identity>> {
        let models = Identities::find()
            .order_by_asc(identities::Column::NormalizedName)
            .all(&self.conn)
            .await?;

        let mut attributes: BTreeMap<i32, BTreeMap<String, String>> = BTreeMap::new();
        for row in IdentityAttributes::find().all(&self.conn).await? {
            attributes
                .entry(row.identity_id)
                .or_default()
                .insert(row.key, row.value);
        }

        Ok(models
            .into_iter()
            .map(|m| {
                let attrs = attributes.remove(&m.id).unwrap_or_default();
                Self::to_identity(m, attrs)
            })
            .collect())
    }

    /// Creates the identity or updates the fields named in `changes`.
    pub async fn put(&self, name: &str, changes: IdentityChanges) -> Result<Identity> {
        let now = chrono::Utc::now().to_rfc3339();

        let model = match self.find_model(name).await? {
            Some(existing) => {
                let mut active: identities::ActiveModel = existing.into();
                if let Some(hash) = changes.password_hash {
                    active.password_hash = Set(hash);
                }
                if let Some(enabled) = changes.enabled {
                    active.enabled = Set(enabled);
                }
                active.updated_at = Set(now);
                active.update(&self.conn).await?
            }
            None => {
                identities::ActiveModel {
                    name: Set(name.to_string()),
                    normalized_name: Set(name.to_lowercase()),
                    password_hash: Set(changes.password_hash.flatten()),
                    enabled: Set(changes.enabled.unwrap_or(true)),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&self.conn)
                .await?
            }
        };

        let attributes = self.attributes_of(model.id).await?;
        Ok(Self::to_identity(model, attributes))
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let model = self
            .find_model(name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("identity '{name}'")))?;

        let mut active: identities::ActiveModel = model.into();
        active.enabled = Set(enabled);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        active.update(&self.conn).await?;
        Ok(())
    }

    pub async fn set_attribute(&self, identity_id: i32, key: &str, value: &str) -> Result<()> {
        let existing = IdentityAttributes::find()
            .filter(identity_attributes::Column::IdentityId.eq(identity_id))
            .filter(identity_attributes::Column::Key.eq(key))
            .one(&self.conn)
            .await?;

        match existing {
            Some(row) => {
                let mut active: identity_attributes::ActiveModel = row.into();
                active.value = Set(value.to_string());
                active.update(&self.conn).await?;
            }
            None => {
                identity_attributes::ActiveModel {
                    identity_id: Set(identity_id),
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                    ..Default::default()
                }
                .insert(&self.conn)
                .await?;
            }
        }

        Ok(())
    }

    /// Returns whether the attribute existed.
    pub async fn unset_attribute(&self, identity_id: i32, key: &str) -> Result<bool> {
        let result = IdentityAttributes::delete_many()
            .filter(identity_attributes::Column::IdentityId.eq(identity_id))
            .filter(identity_attributes::Column::Key.eq(key))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Removes the identity, or disables it when authentication history
    /// references it and `force` is not set. A forced delete keeps the history
    /// rows with their identity reference cleared.
    pub async fn delete(&self, name: &str, force: bool) -> Result<DeleteOutcome> {
        let txn = self.conn.begin().await?;

        let model = Identities::find()
            .filter(identities::Column::NormalizedName.eq(name.to_lowercase()))
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("identity '{name}'")))?;

        let history = AuthLog::find()
            .filter(auth_log::Column::IdentityId.eq(model.id))
            .count(&txn)
            .await?;

        let outcome = if history > 0 && !force {
            let mut active: identities::ActiveModel = model.into();
            active.enabled = Set(false);
            active.updated_at = Set(chrono::Utc::now().to_rfc3339());
            active.update(&txn).await?;
            DeleteOutcome::Disabled
        } else {
            Identities::delete_by_id(model.id).exec(&txn).await?;
            DeleteOutcome::Deleted
        };

        txn.commit().await?;
        Ok(outcome)
    }
}

/// Hashes a password as bcrypt `$2b$`, which the daemon verifies through
/// crypt(3). Blocking; call it from the blocking pool.
pub fn hash_password(password: &str, config: &SecurityConfig) -> anyhow::Result<String> {
    bcrypt::hash(password, config.bcrypt_cost)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))
}

/// Runs on the blocking pool. Errors when `hash` is not a bcrypt hash.
pub async fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();

    task::spawn_blocking(move || {
        bcrypt::verify(&password, &hash).map_err(|e| anyhow::anyhow!("Invalid password hash: {e}"))
    })
    .await
    .context("Password verification task panicked")?
}

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};

use crate::entities::{identities, identity_group_members, identity_groups, prelude::*};
use crate::error::StoreError;
use crate::policy::IdentityGroup;

type Result<T> = std::result::Result<T, StoreError>;

impl From<identity_groups::Model> for IdentityGroup {
    fn from(model: identity_groups::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            enabled: model.enabled,
        }
    }
}

/// A member row joined with its identity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub identity: String,
    pub priority: i32,
}

pub struct IdentityGroupRepository {
    conn: DatabaseConnection,
}

impl IdentityGroupRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    async fn find_model(&self, name: &str) -> Result<Option<identity_groups::Model>> {
        Ok(IdentityGroups::find()
            .filter(identity_groups::Column::NormalizedName.eq(name.to_lowercase()))
            .one(&self.conn)
            .await?)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<IdentityGroup>> {
        Ok(self.find_model(name).await?.map(IdentityGroup::from))
    }

    pub async fn list(&self) -> Result<Vec<IdentityGroup>> {
        let groups = IdentityGroups::find()
            .order_by_asc(identity_groups::Column::NormalizedName)
            .all(&self.conn)
            .await?;
        Ok(groups.into_iter().map(IdentityGroup::from).collect())
    }

    pub async fn put(
        &self,
        name: &str,
        description: Option<&str>,
        enabled: bool,
    ) -> Result<IdentityGroup> {
        let now = chrono::Utc::now().to_rfc3339();

        let model = match self.find_model(name).await? {
            Some(existing) => {
                let mut active: identity_groups::ActiveModel = existing.into();
                active.description = Set(description.map(str::to_string));
                active.enabled = Set(enabled);
                active.updated_at = Set(now);
                active.update(&self.conn).await?
            }
            None => {
                identity_groups::ActiveModel {
                    name: Set(name.to_string()),
                    normalized_name: Set(name.to_lowercase()),
                    description: Set(description.map(str::to_string)),
                    enabled: Set(enabled),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&self.conn)
                .await?
            }
        };

        Ok(model.into())
    }

    /// Rules, links and memberships of the group go with it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let model = self
            .find_model(name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("identity group '{name}'")))?;
        IdentityGroups::delete_by_id(model.id)
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Adds the membership or changes its priority.
    pub async fn add_member(&self, identity_id: i32, group_id: i32, priority: i32) -> Result<()> {
        IdentityGroupMembers::insert(identity_group_members::ActiveModel {
            identity_id: Set(identity_id),
            group_id: Set(group_id),
            priority: Set(priority),
        })
        .on_conflict(
            OnConflict::columns([
                identity_group_members::Column::IdentityId,
                identity_group_members::Column::GroupId,
            ])
            .update_column(identity_group_members::Column::Priority)
            .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await?;
        Ok(())
    }

    /// Returns whether a membership was removed.
    pub async fn remove_member(&self, identity_id: i32, group_id: i32) -> Result<bool> {
        let result = IdentityGroupMembers::delete_many()
            .filter(identity_group_members::Column::IdentityId.eq(identity_id))
            .filter(identity_group_members::Column::GroupId.eq(group_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Members ordered by priority, then identity name.
    pub async fn members(&self, group_id: i32) -> Result<Vec<GroupMember>> {
        let rows = IdentityGroupMembers::find()
            .filter(identity_group_members::Column::GroupId.eq(group_id))
            .find_also_related(Identities)
            .all(&self.conn)
            .await?;

        let mut members: Vec<GroupMember> = rows
            .into_iter()
            .filter_map(|(m, identity): (_, Option<identities::Model>)| {
                identity.map(|i| GroupMember {
                    identity: i.name,
                    priority: m.priority,
                })
            })
            .collect();
        members.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Ok(members)
    }
}

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "access_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Exactly one of `identity_id` and `group_id` is set.
    pub identity_id: Option<i32>,

    pub group_id: Option<i32>,

    pub device_group_id: i32,

    pub service: String,

    pub priv_lvl: i32,

    /// "permit" or "deny"
    pub action: String,

    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::identities::Entity",
        from = "Column::IdentityId",
        to = "super::identities::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Identity,
    #[sea_orm(
        belongs_to = "super::identity_groups::Entity",
        from = "Column::GroupId",
        to = "super::identity_groups::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Group,
    #[sea_orm(
        belongs_to = "super::device_groups::Entity",
        from = "Column::DeviceGroupId",
        to = "super::device_groups::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    DeviceGroup,
    #[sea_orm(has_many = "super::rule_command_filters::Entity")]
    CommandFilters,
    #[sea_orm(has_many = "super::rule_av_pairs::Entity")]
    AvPairs,
}

impl Related<super::rule_command_filters::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CommandFilters.def()
    }
}

impl Related<super::rule_av_pairs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AvPairs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

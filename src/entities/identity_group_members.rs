use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "identity_group_members")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub identity_id: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub group_id: i32,
    /// Lower values take precedence.
    pub priority: i32,
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
}

impl Related<super::identities::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Identity.def()
    }
}

impl Related<super::identity_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

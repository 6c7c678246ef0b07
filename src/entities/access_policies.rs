use sea_orm::entity::prelude::*;

/// Lets an identity group's rules apply on a device group.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "access_policies")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub group_id: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_group_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
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
}

impl Related<super::identity_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl Related<super::device_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceGroup.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

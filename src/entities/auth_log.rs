use sea_orm::entity::prelude::*;

/// Append-only history of authentication attempts. References are nulled,
/// never cascaded, when the identity or device goes away.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "auth_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub identity_id: Option<i32>,

    pub device_id: Option<i32>,

    /// Name as submitted, kept even if it matched nothing.
    pub username: String,

    pub device_address: Option<String>,

    /// "success" or "failure"
    pub outcome: String,

    /// Failing factor: "identity", "password" or "totp".
    pub factor: Option<String>,

    pub detail: Option<String>,

    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::identities::Entity",
        from = "Column::IdentityId",
        to = "super::identities::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    Identity,
    #[sea_orm(
        belongs_to = "super::devices::Entity",
        from = "Column::DeviceId",
        to = "super::devices::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    Device,
}

impl Related<super::identities::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Identity.def()
    }
}

impl Related<super::devices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

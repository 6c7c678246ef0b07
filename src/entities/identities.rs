use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "identities")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    /// Lowercased name; uniqueness is case-insensitive.
    #[sea_orm(unique)]
    pub normalized_name: String,

    /// bcrypt hash in crypt(3) form, `None` for identities without a password.
    pub password_hash: Option<String>,

    pub enabled: bool,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

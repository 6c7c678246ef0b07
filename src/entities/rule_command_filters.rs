use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "rule_command_filters")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub rule_id: i32,
    /// Evaluation position within the rule, ascending.
    pub ordinal: i32,
    pub pattern: String,
    pub action: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::access_rules::Entity",
        from = "Column::RuleId",
        to = "super::access_rules::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Rule,
}

impl Related<super::access_rules::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

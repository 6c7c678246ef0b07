use crate::entities::prelude::*;
use crate::entities::{
    access_rules, identity_attributes, rule_av_pairs, rule_command_filters,
};
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(Identities)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(IdentityAttributes)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(IdentityGroups)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(IdentityGroupMembers)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Devices)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(DeviceGroups)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(DeviceGroupMembers)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(AccessPolicies)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // A rule belongs to an identity or to a group, never both or neither.
        manager
            .create_table(
                schema
                    .create_table_from_entity(AccessRules)
                    .if_not_exists()
                    .check(Expr::cust("(identity_id IS NULL) <> (group_id IS NULL)"))
                    .check(Expr::cust("priv_lvl BETWEEN 0 AND 15"))
                    .check(Expr::cust("action IN ('permit', 'deny')"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(RuleCommandFilters)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(RuleAvPairs)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(TotpProfiles)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_identity_attributes_key")
                    .table(IdentityAttributes)
                    .col(identity_attributes::Column::IdentityId)
                    .col(identity_attributes::Column::Key)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_rule_command_filters_ordinal")
                    .table(RuleCommandFilters)
                    .col(rule_command_filters::Column::RuleId)
                    .col(rule_command_filters::Column::Ordinal)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_rule_command_filters_pattern")
                    .table(RuleCommandFilters)
                    .col(rule_command_filters::Column::RuleId)
                    .col(rule_command_filters::Column::Pattern)
                    .col(rule_command_filters::Column::Action)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_rule_av_pairs_rule")
                    .table(RuleAvPairs)
                    .col(rule_av_pairs::Column::RuleId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_access_rules_device_group")
                    .table(AccessRules)
                    .col(access_rules::Column::DeviceGroupId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TotpProfiles).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RuleAvPairs).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RuleCommandFilters).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AccessRules).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AccessPolicies).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DeviceGroupMembers).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DeviceGroups).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Devices).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IdentityGroupMembers).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IdentityGroups).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IdentityAttributes).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Identities).to_owned())
            .await?;

        Ok(())
    }
}

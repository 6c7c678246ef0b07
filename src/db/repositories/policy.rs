use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, LoaderTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::OnConflict,
};

use crate::entities::{
    access_policies, access_rules, prelude::*, rule_av_pairs, rule_command_filters,
};
use crate::error::StoreError;
use crate::policy::{
    AccessPolicy, AccessRule, Action, AvPair, CommandFilterEntry, PrivLevel, RuleSubject,
};

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewRule {
    pub subject: RuleSubject,
    pub device_group_id: i32,
    pub service: String,
    pub priv_lvl: PrivLevel,
    pub action: Action,
    pub filters: Vec<CommandFilterEntry>,
    pub av_pairs: Vec<AvPair>,
}

/// Rebuilds a typed rule from its rows. Rows that break a model invariant
/// are reported as invalid records.
pub(super) fn to_rule(
    model: access_rules::Model,
    filters: Vec<rule_command_filters::Model>,
    av_pairs: Vec<rule_av_pairs::Model>,
) -> Result<AccessRule> {
    let mut filters = filters
        .into_iter()
        .map(|f| -> Result<CommandFilterEntry> {
            Ok(CommandFilterEntry {
                ordinal: f.ordinal,
                pattern: f.pattern,
                action: f.action.parse()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    filters.sort_by_key(|f| f.ordinal);

    let mut av_pairs: Vec<AvPair> = av_pairs
        .into_iter()
        .map(|p| AvPair {
            key: p.key,
            value: p.value,
        })
        .collect();
    av_pairs.sort();

    Ok(AccessRule {
        id: model.id,
        subject: RuleSubject::from_columns(model.identity_id, model.group_id)?,
        device_group_id: model.device_group_id,
        service: model.service,
        priv_lvl: PrivLevel::new(model.priv_lvl)?,
        action: model.action.parse()?,
        filters,
        av_pairs,
    })
}

/// Loads every rule with its filters and AV pairs through `conn`.
pub(super) async fn load_rules<C: ConnectionTrait>(conn: &C) -> Result<Vec<AccessRule>> {
    let rules = AccessRules::find()
        .order_by_asc(access_rules::Column::Id)
        .all(conn)
        .await?;
    let filters = rules.load_many(RuleCommandFilters, conn).await?;
    let av_pairs = rules.load_many(RuleAvPairs, conn).await?;

    rules
        .into_iter()
        .zip(filters)
        .zip(av_pairs)
        .map(|((rule, filters), av_pairs)| to_rule(rule, filters, av_pairs))
        .collect()
}

fn filter_rows(rule_id: i32, filters: &[CommandFilterEntry]) -> Vec<rule_command_filters::ActiveModel> {
    filters
        .iter()
        .map(|f| rule_command_filters::ActiveModel {
            rule_id: Set(rule_id),
            ordinal: Set(f.ordinal),
            pattern: Set(f.pattern.clone()),
            action: Set(f.action.as_str().to_string()),
            ..Default::default()
        })
        .collect()
}

pub struct PolicyRepository {
    conn: DatabaseConnection,
}

impl PolicyRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn link(&self, group_id: i32, device_group_id: i32) -> Result<()> {
        AccessPolicies::insert(access_policies::ActiveModel {
            group_id: Set(group_id),
            device_group_id: Set(device_group_id),
        })
        .on_conflict(
            OnConflict::columns([
                access_policies::Column::GroupId,
                access_policies::Column::DeviceGroupId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await?;
        Ok(())
    }

    /// Refuses while group rules still depend on the link.
    pub async fn unlink(&self, group_id: i32, device_group_id: i32) -> Result<bool> {
        let txn = self.conn.begin().await?;

        let dependent = AccessRules::find()
            .filter(access_rules::Column::GroupId.eq(group_id))
            .filter(access_rules::Column::DeviceGroupId.eq(device_group_id))
            .count(&txn)
            .await?;
        if dependent > 0 {
            return Err(StoreError::Conflict(format!(
                "{dependent} access rule(s) still grant this group on the device group"
            )));
        }

        let result = AccessPolicies::delete_many()
            .filter(access_policies::Column::GroupId.eq(group_id))
            .filter(access_policies::Column::DeviceGroupId.eq(device_group_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn has_link(&self, group_id: i32, device_group_id: i32) -> Result<bool> {
        let found = AccessPolicies::find_by_id((group_id, device_group_id))
            .one(&self.conn)
            .await?;
        Ok(found.is_some())
    }

    pub async fn links(&self) -> Result<Vec<AccessPolicy>> {
        let rows = AccessPolicies::find().all(&self.conn).await?;
        Ok(rows
            .into_iter()
            .map(|r| AccessPolicy {
                group_id: r.group_id,
                device_group_id: r.device_group_id,
            })
            .collect())
    }

    /// Inserts the rule with its filters and AV pairs in one transaction.
    pub async fn create_rule(&self, rule: NewRule) -> Result<AccessRule> {
        let txn = self.conn.begin().await?;
        let now = chrono::Utc::now().to_rfc3339();

        let model = access_rules::ActiveModel {
            identity_id: Set(rule.subject.identity_id()),
            group_id: Set(rule.subject.group_id()),
            device_group_id: Set(rule.device_group_id),
            service: Set(rule.service),
            priv_lvl: Set(i32::from(rule.priv_lvl.value())),
            action: Set(rule.action.as_str().to_string()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        if !rule.filters.is_empty() {
            RuleCommandFilters::insert_many(filter_rows(model.id, &rule.filters))
                .exec(&txn)
                .await?;
        }

        if !rule.av_pairs.is_empty() {
            let rows: Vec<rule_av_pairs::ActiveModel> = rule
                .av_pairs
                .iter()
                .map(|p| rule_av_pairs::ActiveModel {
                    rule_id: Set(model.id),
                    key: Set(p.key.clone()),
                    value: Set(p.value.clone()),
                    ..Default::default()
                })
                .collect();
            RuleAvPairs::insert_many(rows).exec(&txn).await?;
        }

        let filters = RuleCommandFilters::find()
            .filter(rule_command_filters::Column::RuleId.eq(model.id))
            .all(&txn)
            .await?;
        let av_pairs = RuleAvPairs::find()
            .filter(rule_av_pairs::Column::RuleId.eq(model.id))
            .all(&txn)
            .await?;

        txn.commit().await?;
        to_rule(model, filters, av_pairs)
    }

    /// Appends a filter entry after the rule's current last ordinal.
    pub async fn append_filter(
        &self,
        rule_id: i32,
        pattern: &str,
        action: Action,
    ) -> Result<CommandFilterEntry> {
        let txn = self.conn.begin().await?;

        AccessRules::find_by_id(rule_id)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("access rule {rule_id}")))?;

        let last: Option<i32> = RuleCommandFilters::find()
            .select_only()
            .column_as(rule_command_filters::Column::Ordinal.max(), "max_ordinal")
            .filter(rule_command_filters::Column::RuleId.eq(rule_id))
            .into_tuple::<Option<i32>>()
            .one(&txn)
            .await?
            .flatten();

        let entry = CommandFilterEntry {
            ordinal: last.map_or(1, |o| o + 1),
            pattern: pattern.to_string(),
            action,
        };
        RuleCommandFilters::insert_many(filter_rows(rule_id, std::slice::from_ref(&entry)))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(entry)
    }

    pub async fn delete_rule(&self, rule_id: i32) -> Result<()> {
        let result = AccessRules::delete_by_id(rule_id).exec(&self.conn).await?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found(format!("access rule {rule_id}")));
        }
        Ok(())
    }

    pub async fn get_rule(&self, rule_id: i32) -> Result<Option<AccessRule>> {
        let Some(model) = AccessRules::find_by_id(rule_id).one(&self.conn).await? else {
            return Ok(None);
        };
        let filters = RuleCommandFilters::find()
            .filter(rule_command_filters::Column::RuleId.eq(rule_id))
            .all(&self.conn)
            .await?;
        let av_pairs = RuleAvPairs::find()
            .filter(rule_av_pairs::Column::RuleId.eq(rule_id))
            .all(&self.conn)
            .await?;
        to_rule(model, filters, av_pairs).map(Some)
    }

    pub async fn rules(&self) -> Result<Vec<AccessRule>> {
        load_rules(&self.conn).await
    }
}

use std::collections::BTreeMap;

use sea_orm::{DatabaseConnection, EntityTrait, TransactionTrait};

use super::policy::load_rules;
use crate::entities::prelude::*;
use crate::error::StoreError;
use crate::policy::{
    AccessPolicy, DeviceMembership, Identity, Membership, PolicySnapshot, TotpStatus,
};

pub struct SnapshotRepository {
    conn: DatabaseConnection,
}

impl SnapshotRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Reads every policy table inside one transaction so the result never
    /// mixes rows from before and after a concurrent write.
    pub async fn load(&self) -> Result<PolicySnapshot, StoreError> {
        let txn = self.conn.begin().await?;

        let mut attributes: BTreeMap<i32, BTreeMap<String, String>> = BTreeMap::new();
        for row in IdentityAttributes::find().all(&txn).await? {
            attributes
                .entry(row.identity_id)
                .or_default()
                .insert(row.key, row.value);
        }

        let identities = Identities::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| Identity {
                attributes: attributes.remove(&m.id).unwrap_or_default(),
                id: m.id,
                name: m.name,
                credential: m.password_hash,
                enabled: m.enabled,
            })
            .collect();

        let groups = IdentityGroups::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        let memberships = IdentityGroupMembers::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| Membership {
                identity_id: m.identity_id,
                group_id: m.group_id,
                priority: m.priority,
            })
            .collect();

        let devices = Devices::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        let device_groups = DeviceGroups::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        let device_memberships = DeviceGroupMembers::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| DeviceMembership {
                device_id: m.device_id,
                group_id: m.group_id,
            })
            .collect();

        let policies = AccessPolicies::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| AccessPolicy {
                group_id: p.group_id,
                device_group_id: p.device_group_id,
            })
            .collect();

        let rules = load_rules(&txn).await?;

        let totp = TotpProfiles::find()
            .all(&txn)
            .await?
            .into_iter()
            .map(|t| TotpStatus {
                identity_id: t.identity_id,
                enabled: t.enabled,
            })
            .collect();

        txn.commit().await?;

        Ok(PolicySnapshot {
            identities,
            groups,
            memberships,
            devices,
            device_groups,
            device_memberships,
            policies,
            rules,
            totp,
        })
    }
}

//! `SeaORM` implementation of the `PolicyService` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::task;
use tracing::{info, warn};

use crate::config::SecurityConfig;
use crate::db::repositories::identity::hash_password;
use crate::db::{DeleteOutcome, DeviceInput, GroupMember, IdentityChanges, NewRule, Store};
use crate::error::ValidationError;
use crate::policy::{
    validate, AccessEvaluator, AccessRule, Action, AvPair, CommandFilterEntry, Device,
    DeviceGroup, Identity, IdentityGroup, PatternCache, PolicySnapshot, PrivLevel, RuleSubject,
    DEFAULT_SERVICE,
};
use crate::services::policy_service::{
    AccessDecision, DeviceAccess, DeviceSpec, FilterSpec, IdentitySpec, PolicyError, PolicyService,
    RuleSpec,
};

pub struct SeaOrmPolicyService {
    store: Store,
    security: SecurityConfig,
}

impl SeaOrmPolicyService {
    #[must_use]
    pub const fn new(store: Store, security: SecurityConfig) -> Self {
        Self { store, security }
    }

    async fn identity(&self, name: &str) -> Result<Identity, PolicyError> {
        self.store
            .identity_repo()
            .get_by_name(name)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("identity '{name}'")))
    }

    async fn group(&self, name: &str) -> Result<IdentityGroup, PolicyError> {
        self.store
            .group_repo()
            .get_by_name(name)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("identity group '{name}'")))
    }

    async fn device(&self, name: &str) -> Result<Device, PolicyError> {
        self.store
            .device_repo()
            .get_by_name(name)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("device '{name}'")))
    }

    async fn device_group(&self, name: &str) -> Result<DeviceGroup, PolicyError> {
        self.store
            .device_group_repo()
            .get_by_name(name)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("device group '{name}'")))
    }

    async fn hash(&self, password: String) -> Result<String, PolicyError> {
        let security = self.security.clone();
        let hash = task::spawn_blocking(move || hash_password(&password, &security))
            .await
            .map_err(|e| PolicyError::Internal(format!("Password hashing task panicked: {e}")))??;
        Ok(hash)
    }

    fn parse_filters(filters: &[FilterSpec]) -> Result<Vec<CommandFilterEntry>, PolicyError> {
        let entries = filters
            .iter()
            .zip(1..)
            .map(|(filter, ordinal)| {
                validate::pattern(&filter.pattern)?;
                Ok(CommandFilterEntry {
                    ordinal,
                    pattern: filter.pattern.clone(),
                    action: filter.action.parse::<Action>()?,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        crate::policy::filter::check_entries(&entries)?;
        Ok(entries)
    }

    fn parse_av_pairs(pairs: &[(String, String)]) -> Result<Vec<AvPair>, PolicyError> {
        let mut parsed = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            parsed.push(AvPair {
                key: validate::key("av-pair key", key)?.to_string(),
                value: validate::free_text("av-pair value", value)?.to_string(),
            });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl PolicyService for SeaOrmPolicyService {
    async fn put_identity(&self, spec: IdentitySpec) -> Result<Identity, PolicyError> {
        let name = validate::name("name", &spec.name)?.to_string();

        let credentials = usize::from(spec.password.is_some())
            + usize::from(spec.password_hash.is_some())
            + usize::from(spec.clear_password);
        if credentials > 1 {
            return Err(ValidationError::new(
                "password",
                "only one credential change is allowed at a time",
            )
            .into());
        }

        let password_hash = if let Some(password) = spec.password {
            validate::password(&password)?;
            Some(Some(self.hash(password).await?))
        } else if let Some(hash) = spec.password_hash {
            Some(Some(validate::crypt_hash(hash.trim())?.to_string()))
        } else if spec.clear_password {
            Some(None)
        } else {
            None
        };

        let identity = self
            .store
            .identity_repo()
            .put(
                &name,
                IdentityChanges {
                    password_hash,
                    enabled: spec.enabled,
                },
            )
            .await?;

        info!(identity = %identity.name, enabled = identity.enabled, "Identity saved");
        Ok(identity)
    }

    async fn get_identity(&self, name: &str) -> Result<Identity, PolicyError> {
        self.identity(name).await
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, PolicyError> {
        Ok(self.store.identity_repo().list().await?)
    }

    async fn set_identity_enabled(&self, name: &str, enabled: bool) -> Result<(), PolicyError> {
        self.store.identity_repo().set_enabled(name, enabled).await?;
        info!(identity = %name, enabled, "Identity state changed");
        Ok(())
    }

    async fn set_attribute(&self, name: &str, key: &str, value: &str) -> Result<(), PolicyError> {
        let key = validate::key("attribute key", key)?;
        let value = validate::free_text("attribute value", value)?;
        let identity = self.identity(name).await?;
        self.store
            .identity_repo()
            .set_attribute(identity.id, key, value)
            .await?;
        Ok(())
    }

    async fn unset_attribute(&self, name: &str, key: &str) -> Result<(), PolicyError> {
        let identity = self.identity(name).await?;
        if !self
            .store
            .identity_repo()
            .unset_attribute(identity.id, key)
            .await?
        {
            return Err(PolicyError::NotFound(format!(
                "attribute '{key}' of identity '{name}'"
            )));
        }
        Ok(())
    }

    async fn delete_identity(&self, name: &str, force: bool) -> Result<DeleteOutcome, PolicyError> {
        let outcome = self.store.identity_repo().delete(name, force).await?;
        match outcome {
            DeleteOutcome::Deleted => info!(identity = %name, "Identity deleted"),
            DeleteOutcome::Disabled => warn!(
                identity = %name,
                "Identity has authentication history; disabled instead of deleted"
            ),
        }
        Ok(outcome)
    }

    async fn put_group(
        &self,
        name: &str,
        description: Option<&str>,
        enabled: bool,
    ) -> Result<IdentityGroup, PolicyError> {
        let name = validate::name("name", name)?;
        if let Some(description) = description {
            validate::free_text("description", description)?;
        }
        Ok(self
            .store
            .group_repo()
            .put(name, description, enabled)
            .await?)
    }

    async fn get_group(&self, name: &str) -> Result<(IdentityGroup, Vec<GroupMember>), PolicyError> {
        let group = self.group(name).await?;
        let members = self.store.group_repo().members(group.id).await?;
        Ok((group, members))
    }

    async fn list_groups(&self) -> Result<Vec<IdentityGroup>, PolicyError> {
        Ok(self.store.group_repo().list().await?)
    }

    async fn delete_group(&self, name: &str) -> Result<(), PolicyError> {
        self.store.group_repo().delete(name).await?;
        info!(group = %name, "Identity group deleted");
        Ok(())
    }

    async fn add_member(
        &self,
        identity: &str,
        group: &str,
        priority: i32,
    ) -> Result<(), PolicyError> {
        let priority = validate::membership_priority(priority)?;
        let identity = self.identity(identity).await?;
        let group = self.group(group).await?;
        self.store
            .group_repo()
            .add_member(identity.id, group.id, priority)
            .await?;
        Ok(())
    }

    async fn remove_member(&self, identity: &str, group: &str) -> Result<(), PolicyError> {
        let identity_row = self.identity(identity).await?;
        let group_row = self.group(group).await?;
        if !self
            .store
            .group_repo()
            .remove_member(identity_row.id, group_row.id)
            .await?
        {
            return Err(PolicyError::NotFound(format!(
                "membership of '{identity}' in '{group}'"
            )));
        }
        Ok(())
    }

    async fn put_device(&self, spec: DeviceSpec) -> Result<Device, PolicyError> {
        let name = validate::name("name", &spec.name)?;
        let address = validate::address(&spec.address)?;
        let secret = validate::secret("secret", &spec.secret)?;
        if let Some(description) = &spec.description {
            validate::free_text("description", description)?;
        }

        let device = self
            .store
            .device_repo()
            .put(DeviceInput {
                name,
                address,
                secret,
                description: spec.description.as_deref(),
                enabled: spec.enabled,
            })
            .await?;

        info!(device = %device.name, address = %device.address, "Device saved");
        Ok(device)
    }

    async fn get_device(&self, name_or_address: &str) -> Result<Device, PolicyError> {
        let repo = self.store.device_repo();
        if let Some(device) = repo.get_by_name(name_or_address).await? {
            return Ok(device);
        }
        repo.get_by_address(name_or_address)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("device '{name_or_address}'")))
    }

    async fn list_devices(&self) -> Result<Vec<Device>, PolicyError> {
        Ok(self.store.device_repo().list().await?)
    }

    async fn delete_device(&self, name: &str) -> Result<(), PolicyError> {
        self.store.device_repo().delete(name).await?;
        info!(device = %name, "Device deleted");
        Ok(())
    }

    async fn put_device_group(
        &self,
        name: &str,
        secret: Option<&str>,
        description: Option<&str>,
    ) -> Result<DeviceGroup, PolicyError> {
        let name = validate::name("name", name)?;
        if let Some(secret) = secret {
            validate::secret("secret", secret)?;
        }
        if let Some(description) = description {
            validate::free_text("description", description)?;
        }
        Ok(self
            .store
            .device_group_repo()
            .put(name, secret, description)
            .await?)
    }

    async fn get_device_group(
        &self,
        name: &str,
    ) -> Result<(DeviceGroup, Vec<String>), PolicyError> {
        let group = self.device_group(name).await?;
        let members = self.store.device_group_repo().members(group.id).await?;
        Ok((group, members))
    }

    async fn list_device_groups(&self) -> Result<Vec<DeviceGroup>, PolicyError> {
        Ok(self.store.device_group_repo().list().await?)
    }

    async fn delete_device_group(&self, name: &str) -> Result<(), PolicyError> {
        self.store.device_group_repo().delete(name).await?;
        info!(device_group = %name, "Device group deleted");
        Ok(())
    }

    async fn add_device(&self, device: &str, device_group: &str) -> Result<(), PolicyError> {
        let device = self.device(device).await?;
        let group = self.device_group(device_group).await?;
        self.store
            .device_group_repo()
            .add_device(device.id, group.id)
            .await?;
        Ok(())
    }

    async fn remove_device(&self, device: &str, device_group: &str) -> Result<(), PolicyError> {
        let device_row = self.device(device).await?;
        let group_row = self.device_group(device_group).await?;
        if !self
            .store
            .device_group_repo()
            .remove_device(device_row.id, group_row.id)
            .await?
        {
            return Err(PolicyError::NotFound(format!(
                "membership of '{device}' in '{device_group}'"
            )));
        }
        Ok(())
    }

    async fn link(&self, group: &str, device_group: &str) -> Result<(), PolicyError> {
        let group = self.group(group).await?;
        let device_group = self.device_group(device_group).await?;
        self.store
            .policy_repo()
            .link(group.id, device_group.id)
            .await?;
        info!(group = %group.name, device_group = %device_group.name, "Access policy linked");
        Ok(())
    }

    async fn unlink(&self, group: &str, device_group: &str) -> Result<(), PolicyError> {
        let group_row = self.group(group).await?;
        let device_group_row = self.device_group(device_group).await?;
        if !self
            .store
            .policy_repo()
            .unlink(group_row.id, device_group_row.id)
            .await?
        {
            return Err(PolicyError::NotFound(format!(
                "access policy '{group}' -> '{device_group}'"
            )));
        }
        Ok(())
    }

    async fn list_links(&self) -> Result<Vec<(String, String)>, PolicyError> {
        let groups: HashMap<i32, String> = self
            .store
            .group_repo()
            .list()
            .await?
            .into_iter()
            .map(|g| (g.id, g.name))
            .collect();
        let device_groups: HashMap<i32, String> = self
            .store
            .device_group_repo()
            .list()
            .await?
            .into_iter()
            .map(|g| (g.id, g.name))
            .collect();

        let mut links: Vec<(String, String)> = self
            .store
            .policy_repo()
            .links()
            .await?
            .into_iter()
            .filter_map(|l| {
                Some((
                    groups.get(&l.group_id)?.clone(),
                    device_groups.get(&l.device_group_id)?.clone(),
                ))
            })
            .collect();
        links.sort();
        Ok(links)
    }

    async fn create_rule(&self, spec: RuleSpec) -> Result<AccessRule, PolicyError> {
        let priv_lvl = PrivLevel::new(spec.priv_lvl)?;
        let action: Action = spec.action.parse()?;
        let service = validate::service(spec.service.as_deref().unwrap_or(DEFAULT_SERVICE))?
            .to_string();
        let filters = Self::parse_filters(&spec.filters)?;
        let av_pairs = Self::parse_av_pairs(&spec.av_pairs)?;

        let device_group = self.device_group(&spec.device_group).await?;

        let subject = match (spec.identity.as_deref(), spec.group.as_deref()) {
            (Some(identity), None) => RuleSubject::Identity(self.identity(identity).await?.id),
            (None, Some(group)) => {
                let group = self.group(group).await?;
                if !self
                    .store
                    .policy_repo()
                    .has_link(group.id, device_group.id)
                    .await?
                {
                    return Err(ValidationError::new(
                        "group",
                        format!(
                            "no access policy links '{}' to '{}'",
                            group.name, device_group.name
                        ),
                    )
                    .into());
                }
                RuleSubject::Group(group.id)
            }
            (identity, group) => {
                RuleSubject::from_columns(identity.map(|_| 0), group.map(|_| 0))?
            }
        };

        let rule = self
            .store
            .policy_repo()
            .create_rule(NewRule {
                subject,
                device_group_id: device_group.id,
                service,
                priv_lvl,
                action,
                filters,
                av_pairs,
            })
            .await?;

        info!(
            rule_id = rule.id,
            device_group = %device_group.name,
            action = %rule.action,
            priv_lvl = %rule.priv_lvl,
            "Access rule created"
        );
        Ok(rule)
    }

    async fn append_filter(
        &self,
        rule_id: i32,
        pattern: &str,
        action: &str,
    ) -> Result<CommandFilterEntry, PolicyError> {
        let pattern = validate::pattern(pattern)?;
        let action: Action = action.parse()?;

        let rule = self
            .store
            .policy_repo()
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("access rule {rule_id}")))?;
        if rule
            .filters
            .iter()
            .any(|f| f.pattern == pattern && f.action == action)
        {
            return Err(ValidationError::new(
                "pattern",
                format!("duplicate {action} entry for '{pattern}'"),
            )
            .into());
        }

        Ok(self
            .store
            .policy_repo()
            .append_filter(rule_id, pattern, action)
            .await?)
    }

    async fn delete_rule(&self, rule_id: i32) -> Result<(), PolicyError> {
        self.store.policy_repo().delete_rule(rule_id).await?;
        info!(rule_id, "Access rule deleted");
        Ok(())
    }

    async fn list_rules(&self) -> Result<Vec<AccessRule>, PolicyError> {
        Ok(self.store.policy_repo().rules().await?)
    }

    async fn snapshot(&self) -> Result<PolicySnapshot, PolicyError> {
        Ok(self.store.snapshot().await?)
    }

    async fn access(&self, identity: &str) -> Result<Vec<DeviceAccess>, PolicyError> {
        let snapshot = self.store.snapshot().await?;
        let identity = snapshot
            .identity_by_name(identity)
            .ok_or_else(|| PolicyError::NotFound(format!("identity '{identity}'")))?;
        let evaluator = AccessEvaluator::new(&snapshot);

        let mut devices: Vec<&Device> = snapshot.devices.iter().filter(|d| d.enabled).collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(devices
            .into_iter()
            .map(|device| {
                let group = evaluator.device_group_of(device.id);
                DeviceAccess {
                    device: device.name.clone(),
                    address: device.address.clone(),
                    device_group: group.map(|g| g.name.clone()),
                    rules: group
                        .map(|g| evaluator.evaluate_all(identity.id, g.id))
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn evaluate(
        &self,
        identity: &str,
        device: &str,
        service: Option<&str>,
        command: Option<&str>,
    ) -> Result<AccessDecision, PolicyError> {
        let snapshot = self.store.snapshot().await?;
        let identity_row = snapshot
            .identity_by_name(identity)
            .ok_or_else(|| PolicyError::NotFound(format!("identity '{identity}'")))?;
        let device_row = snapshot
            .device_by_name(device)
            .or_else(|| snapshot.devices.iter().find(|d| d.address == device))
            .ok_or_else(|| PolicyError::NotFound(format!("device '{device}'")))?;

        let evaluator = AccessEvaluator::new(&snapshot);
        let service = service.unwrap_or(DEFAULT_SERVICE);
        let rule = evaluator.evaluate_device(identity_row.id, device_row.id, service);

        let command = match command {
            Some(command) => {
                let cache = PatternCache::build(rule.filters.iter().map(|f| f.pattern.as_str()))?;
                Some(rule.authorize_command(command, &cache)?)
            }
            None => None,
        };

        Ok(AccessDecision {
            device_group: evaluator.device_group_of(device_row.id).map(|g| g.name.clone()),
            rule,
            command,
        })
    }
}

//! `SeaORM` implementation of the `TotpService` trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::TotpConfig;
use crate::db::{NewTotpProfile, Store, TotpProfileRow};
use crate::error::{CredentialError, StoreError, ValidationError};
use crate::policy::{Identity, validate};
use crate::services::totp_service::{
    Enrollment, ProvisionRequest, TotpError, TotpProfileInfo, TotpService, TotpState,
};
use crate::totp::{self, Algorithm, TotpParams};

pub struct SeaOrmTotpService {
    store: Store,
    defaults: TotpConfig,
    locks: Arc<Mutex<HashMap<i32, Arc<Mutex<()>>>>>,
}

pub(crate) fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

fn state_of(row: &TotpProfileRow) -> TotpState {
    if row.enabled {
        TotpState::Enabled
    } else if row.last_used_step.is_some() {
        TotpState::Disabled
    } else {
        TotpState::Provisioned
    }
}

fn params_of(row: &TotpProfileRow) -> Result<TotpParams, StoreError> {
    let invalid = |e: String| StoreError::InvalidRecord(format!("totp profile {}: {e}", row.id));
    let digits = u32::try_from(row.digits).map_err(|e| invalid(e.to_string()))?;
    let period = u32::try_from(row.period).map_err(|e| invalid(e.to_string()))?;
    let algorithm = row.algorithm.parse::<Algorithm>()?;
    Ok(TotpParams::new(digits, period, algorithm)?)
}

fn watermark(row: &TotpProfileRow) -> Option<u64> {
    row.last_used_step.and_then(|s| u64::try_from(s).ok())
}

fn step_column(step: u64) -> Result<i64, StoreError> {
    i64::try_from(step).map_err(|_| StoreError::InvalidRecord(format!("time-step {step} out of range")))
}

fn enrollment(identity: &str, row: &TotpProfileRow) -> Result<Enrollment, TotpError> {
    let params = params_of(row)?;
    Ok(Enrollment {
        identity: identity.to_string(),
        uri: totp::provisioning_uri(&row.issuer, &row.label, &row.secret, &params),
        secret: row.secret.clone(),
        issuer: row.issuer.clone(),
        label: row.label.clone(),
        digits: params.digits(),
        period: params.period(),
        algorithm: params.algorithm(),
    })
}

fn uri_component<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = validate::free_text(field, value)?;
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    if value.contains(':') {
        return Err(ValidationError::new(field, "cannot contain ':'"));
    }
    Ok(value)
}

impl SeaOrmTotpService {
    #[must_use]
    pub fn new(store: Store, defaults: TotpConfig) -> Self {
        Self {
            store,
            defaults,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn identity(&self, name: &str) -> Result<Identity, TotpError> {
        self.store
            .identity_repo()
            .get_by_name(name)
            .await?
            .ok_or_else(|| TotpError::IdentityNotFound(name.to_string()))
    }

    async fn profile(&self, identity_id: i32) -> Result<TotpProfileRow, TotpError> {
        self.store
            .totp_repo()
            .get(identity_id)
            .await?
            .ok_or(TotpError::Credential(CredentialError::ProfileMissing))
    }

    async fn lock_for(&self, identity_id: i32) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(identity_id)
            .or_default()
            .clone()
    }

    /// Drops the identity's lock once nobody else holds or waits on it.
    async fn release_lock(&self, identity_id: i32) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(&identity_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&identity_id);
        }
    }

    /// Validates and consumes a code for an enabled profile. Does not log.
    pub(crate) async fn check_code(
        &self,
        identity: &Identity,
        code: &str,
        unix_time: u64,
    ) -> Result<u64, TotpError> {
        if !identity.enabled {
            return Err(CredentialError::IdentityDisabled.into());
        }

        let lock = self.lock_for(identity.id).await;
        let _guard = lock.lock().await;

        let row = self.profile(identity.id).await?;
        if !row.enabled {
            return Err(CredentialError::ProfileDisabled.into());
        }

        let params = params_of(&row)?;
        let secret = totp::decode_secret(&row.secret)?;
        let step = totp::verify(
            &secret,
            code,
            unix_time,
            self.defaults.skew_steps,
            watermark(&row),
            &params,
        )?;

        if !self
            .store
            .totp_repo()
            .consume_step(identity.id, step_column(step)?, false)
            .await?
        {
            return Err(CredentialError::Replay.into());
        }
        Ok(step)
    }

    async fn try_enable(
        &self,
        identity: &Identity,
        row: &TotpProfileRow,
        code: &str,
        unix_time: u64,
    ) -> Result<u64, TotpError> {
        let params = params_of(row)?;
        let secret = totp::decode_secret(&row.secret)?;
        let step = totp::verify(
            &secret,
            code,
            unix_time,
            self.defaults.skew_steps,
            watermark(row),
            &params,
        )?;
        if !self
            .store
            .totp_repo()
            .consume_step(identity.id, step_column(step)?, true)
            .await?
        {
            return Err(CredentialError::Replay.into());
        }
        Ok(step)
    }

    pub(crate) async fn has_enabled_profile(&self, identity_id: i32) -> Result<bool, TotpError> {
        Ok(self
            .store
            .totp_repo()
            .get(identity_id)
            .await?
            .is_some_and(|row| row.enabled))
    }
}

#[async_trait]
impl TotpService for SeaOrmTotpService {
    async fn provision(&self, request: ProvisionRequest) -> Result<Enrollment, TotpError> {
        let identity = self.identity(&request.identity).await?;

        let params = TotpParams::new(
            request.digits.unwrap_or(self.defaults.digits),
            request.period.unwrap_or(self.defaults.period),
            request.algorithm.unwrap_or(self.defaults.algorithm),
        )?;
        let issuer = uri_component(
            "issuer",
            request.issuer.as_deref().unwrap_or(&self.defaults.issuer),
        )?;
        let label = uri_component("label", request.label.as_deref().unwrap_or(&identity.name))?;

        let secret = totp::encode_secret(&totp::generate_secret(params.algorithm()));

        let lock = self.lock_for(identity.id).await;
        let _guard = lock.lock().await;

        let row = self
            .store
            .totp_repo()
            .replace(NewTotpProfile {
                identity_id: identity.id,
                secret,
                issuer: issuer.to_string(),
                label: label.to_string(),
                digits: i32::try_from(params.digits()).unwrap_or(6),
                period: i32::try_from(params.period()).unwrap_or(30),
                algorithm: params.algorithm().as_str().to_string(),
            })
            .await?;

        info!(
            identity = %identity.name,
            digits = params.digits(),
            period = params.period(),
            algorithm = %params.algorithm(),
            "TOTP profile provisioned"
        );
        enrollment(&identity.name, &row)
    }

    async fn reveal(&self, identity: &str) -> Result<Enrollment, TotpError> {
        let identity = self.identity(identity).await?;
        let row = self.profile(identity.id).await?;
        if state_of(&row) != TotpState::Provisioned {
            return Err(TotpError::SecretSealed);
        }
        enrollment(&identity.name, &row)
    }

    async fn enable(&self, identity: &str, code: &str) -> Result<(), TotpError> {
        self.enable_at(identity, code, unix_now()).await
    }

    async fn enable_at(
        &self,
        identity: &str,
        code: &str,
        unix_time: u64,
    ) -> Result<(), TotpError> {
        let identity = self.identity(identity).await?;

        let lock = self.lock_for(identity.id).await;
        let _guard = lock.lock().await;

        let row = self.profile(identity.id).await?;
        if row.enabled {
            return Err(CredentialError::AlreadyEnabled.into());
        }

        let result = self.try_enable(&identity, &row, code, unix_time).await;

        match result {
            Ok(step) => {
                info!(identity = %identity.name, step, "TOTP profile enabled");
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "tacman::audit",
                    identity = %identity.name,
                    factor = "totp",
                    reason = %e,
                    "TOTP enrollment rejected"
                );
                Err(e)
            }
        }
    }

    async fn verify(&self, identity: &str, code: &str) -> Result<u64, TotpError> {
        self.verify_at(identity, code, unix_now()).await
    }

    async fn verify_at(
        &self,
        identity: &str,
        code: &str,
        unix_time: u64,
    ) -> Result<u64, TotpError> {
        let identity = self.identity(identity).await?;
        match self.check_code(&identity, code, unix_time).await {
            Ok(step) => {
                info!(identity = %identity.name, step, "TOTP code accepted");
                Ok(step)
            }
            Err(e) => {
                warn!(
                    target: "tacman::audit",
                    identity = %identity.name,
                    factor = "totp",
                    reason = %e,
                    "TOTP verification failed"
                );
                Err(e)
            }
        }
    }

    async fn disable(&self, identity: &str) -> Result<(), TotpError> {
        let identity = self.identity(identity).await?;
        let lock = self.lock_for(identity.id).await;
        let _guard = lock.lock().await;

        if !self.store.totp_repo().disable(identity.id).await? {
            return Err(CredentialError::ProfileMissing.into());
        }
        info!(identity = %identity.name, "TOTP profile disabled");
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<(), TotpError> {
        let identity = self.identity(identity).await?;
        let lock = self.lock_for(identity.id).await;
        let deleted = {
            let _guard = lock.lock().await;
            self.store.totp_repo().delete(identity.id).await
        };
        drop(lock);
        self.release_lock(identity.id).await;

        if !deleted? {
            return Err(CredentialError::ProfileMissing.into());
        }
        info!(identity = %identity.name, "TOTP profile deleted");
        Ok(())
    }

    async fn status(&self, identity: &str) -> Result<Option<TotpProfileInfo>, TotpError> {
        let identity = self.identity(identity).await?;
        let Some(row) = self.store.totp_repo().get(identity.id).await? else {
            return Ok(None);
        };
        let params = params_of(&row)?;

        Ok(Some(TotpProfileInfo {
            identity: identity.name,
            state: state_of(&row),
            issuer: row.issuer,
            label: row.label,
            digits: params.digits(),
            period: params.period(),
            algorithm: params.algorithm(),
            last_used_at: row.last_used_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IdentityChanges;

    async fn service() -> SeaOrmTotpService {
        let db_path = std::env::temp_dir()
            .join(format!("tacman-totp-locks-{}.db", uuid::Uuid::new_v4()));
        let store = Store::new(&format!("sqlite:{}", db_path.display()))
            .await
            .unwrap();
        store
            .identity_repo()
            .put("netadmin", IdentityChanges::default())
            .await
            .unwrap();
        SeaOrmTotpService::new(store, TotpConfig::default())
    }

    #[tokio::test]
    async fn test_delete_forgets_the_identity_lock() {
        let service = service().await;
        service
            .provision(ProvisionRequest {
                identity: "netadmin".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(service.locks.lock().await.len(), 1);

        service.delete("netadmin").await.unwrap();
        assert!(service.locks.lock().await.is_empty());

        let missing = service.delete("netadmin").await;
        assert!(matches!(
            missing,
            Err(TotpError::Credential(CredentialError::ProfileMissing))
        ));
        assert!(service.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_held_lock_survives_release() {
        let service = service().await;
        let held = service.lock_for(7).await;

        service.release_lock(7).await;
        assert_eq!(service.locks.lock().await.len(), 1);

        drop(held);
        service.release_lock(7).await;
        assert!(service.locks.lock().await.is_empty());
    }
}
